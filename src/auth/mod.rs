//! Authentication orchestrator.
//!
//! Drives the credential flows end to end: password login with a
//! human-presence challenge, the optional second-factor hop over a
//! single-use handshake token, registration, password change, and
//! two-factor enrollment. The orchestrator owns the ordering rules; the
//! store, validator, and token issuer it composes each stay single-purpose.
//!
//! A presence challenge is invalidated only when a login attempt reaches a
//! definite outcome. A mismatched challenge answer consumes nothing, so a
//! typo does not force the user through a fresh challenge.

pub mod types;
pub(crate) mod utils;


use tracing::{error, info};
use uuid::Uuid;

use crate::captcha::PresenceValidator;
use crate::config::AuthConfig;
use crate::error::Error;
use crate::events::LoginEventSink;
use crate::password;
use crate::session::{self, SessionTokenIssuer, TwoFactorStatus};
use crate::store::{
    Account, CredentialStore, InsertOutcome, NewAccount, NewProfile, Role, StoreError,
};
use crate::totp::{Enrollment, TotpManager};
use types::{
    ChangePasswordRequest, LoginOutcome, LoginRequest, RegisterRequest, SecondFactorRequest,
};

pub struct AuthService<S, P, E> {
    store: S,
    presence: P,
    events: E,
    totp: TotpManager,
    tokens: SessionTokenIssuer,
    config: AuthConfig,
}

impl<S, P, E> AuthService<S, P, E>
where
    S: CredentialStore,
    P: PresenceValidator,
    E: LoginEventSink,
{
    #[must_use]
    pub fn new(config: AuthConfig, store: S, presence: P, events: E) -> Self {
        let totp = TotpManager::new(config.issuer().to_string());
        let tokens = SessionTokenIssuer::new(
            config.token_signing_key().clone(),
            config.issuer().to_string(),
            config.audience().to_string(),
        );
        Self {
            store,
            presence,
            events,
            totp,
            tokens,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The issuer/verifier for session tokens, shared with the authorization
    /// layer that checks incoming tokens.
    #[must_use]
    pub const fn token_issuer(&self) -> &SessionTokenIssuer {
        &self.tokens
    }

    /// Password login. Challenge first, then credentials; an account with a
    /// second factor enrolled gets a handshake token instead of a session.
    ///
    /// # Errors
    ///
    /// `CaptchaInvalid` on a wrong challenge answer, `InvalidCredentials` for
    /// unknown email and wrong password alike, plus validation and dependency
    /// failures.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, Error> {
        let email = utils::normalize_email(&request.email);
        let password = request.password.trim();
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "email and password are required".to_string(),
            ));
        }

        let human = self
            .presence
            .validate(&request.challenge_id, &request.challenge_response)
            .await
            .map_err(Error::Presence)?;
        if !human {
            return Err(Error::CaptchaInvalid);
        }

        let Some(account) = self.store.find_account_by_email(&email).await? else {
            // Burn the same hashing effort as a real verification so unknown
            // emails are not distinguishable by timing.
            password::verify_dummy(password);
            self.consume_challenge(&request.challenge_id).await;
            return Err(Error::InvalidCredentials);
        };

        if !password::verify(password, &account.password_hash)? {
            self.consume_challenge(&request.challenge_id).await;
            return Err(Error::InvalidCredentials);
        }

        if account.second_factor_secret.is_some() {
            let handshake_token = self.issue_handshake_token(account.id).await?;
            self.consume_challenge(&request.challenge_id).await;
            info!(account_id = %account.id, "password accepted, second factor required");
            return Ok(LoginOutcome::SecondFactorRequired {
                handshake_token,
                redirect_url: self.config.two_factor_redirect_url().to_string(),
            });
        }

        let token = self
            .issue_session(&account, TwoFactorStatus::NotApplicable)
            .await?;
        self.consume_challenge(&request.challenge_id).await;
        Ok(LoginOutcome::SessionIssued { token })
    }

    /// Complete a two-factor login: redeem the handshake token, then check
    /// the code. The token is consumed before the code is inspected, so a
    /// wrong code forces a full re-login.
    ///
    /// # Errors
    ///
    /// `TokenInvalid` covers unknown, used, and expired handshake tokens
    /// without distinguishing them; `InvalidCode` is a wrong code.
    pub async fn verify_second_factor(&self, request: SecondFactorRequest) -> Result<String, Error> {
        let token = request.handshake_token.trim();
        let code = request.code.trim();
        if token.is_empty() || code.is_empty() {
            return Err(Error::Validation(
                "handshake token and code are required".to_string(),
            ));
        }

        let token_hash = utils::hash_handshake_token(token);
        let account_id = self
            .store
            .redeem_handshake_token(&token_hash)
            .await?
            .ok_or(Error::TokenInvalid)?;

        let Some(account) = self.store.find_account_by_id(account_id).await? else {
            error!(%account_id, "handshake token referenced a missing account");
            return Err(Error::AccountNotFound);
        };
        let Some(secret) = account.second_factor_secret.as_deref() else {
            return Err(Error::TwoFactorNotConfigured);
        };

        if !self.totp.verify(secret, code)? {
            return Err(Error::InvalidCode);
        }

        self.issue_session(&account, TwoFactorStatus::Verified).await
    }

    /// Create an account with its profile. Never issues a session; the new
    /// account logs in through the normal flow.
    ///
    /// # Errors
    ///
    /// `EmailInUse` when the normalized email is already registered,
    /// `Validation` for policy violations, `RegistrationFailed` when the
    /// transactional insert fails after validation passed.
    pub async fn register(&self, request: RegisterRequest) -> Result<Uuid, Error> {
        let email = utils::normalize_email(&request.email);
        // Trimmed exactly as the login path trims, so a registered password
        // always verifies later.
        let password = request.password.trim();
        let first_name = request.first_name.trim();
        let last_name = request.last_name.trim();
        if email.is_empty() || password.is_empty() || first_name.is_empty() || last_name.is_empty()
        {
            return Err(Error::Validation(
                "email, password, and name are required".to_string(),
            ));
        }
        if !utils::valid_email(&email) {
            return Err(Error::Validation("invalid email address".to_string()));
        }
        if !self.config.email_domain_allowed(&email) {
            return Err(Error::Validation(
                "email domain is not accepted for registration".to_string(),
            ));
        }
        if password.chars().count() < self.config.min_password_length() {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_length()
            )));
        }
        let role = match request.role.as_deref() {
            None => Role::Basic,
            Some(value) => {
                Role::parse(value).ok_or_else(|| Error::Validation("unknown role".to_string()))?
            }
        };

        let password_hash = password::hash(password)?;
        let middle_name = request
            .middle_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let outcome = self
            .store
            .insert_account_and_profile(
                NewAccount {
                    email: &email,
                    password_hash: &password_hash,
                    role,
                },
                NewProfile {
                    first_name,
                    middle_name,
                    last_name,
                },
            )
            .await
            .map_err(|err| match err {
                StoreError::Timeout => Error::Store(StoreError::Timeout),
                other => Error::RegistrationFailed(other),
            })?;

        match outcome {
            InsertOutcome::Created(id) => {
                info!(account_id = %id, "account registered");
                Ok(id)
            }
            InsertOutcome::EmailTaken => Err(Error::EmailInUse),
        }
    }

    /// Rotate an authenticated account's password.
    ///
    /// # Errors
    ///
    /// `ConfirmationMismatch` when the confirmation differs,
    /// `CurrentPasswordIncorrect` on a failed reauthentication, `NoOpChange`
    /// when the new password equals the current one.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        request: ChangePasswordRequest,
    ) -> Result<(), Error> {
        let current_password = request.current_password.trim();
        let new_password = request.new_password.trim();
        if current_password.is_empty() || new_password.is_empty() {
            return Err(Error::Validation(
                "current and new passwords are required".to_string(),
            ));
        }
        if new_password != request.new_password_confirmation.trim() {
            return Err(Error::ConfirmationMismatch);
        }
        if new_password.chars().count() < self.config.min_password_length() {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_length()
            )));
        }

        let account = self
            .store
            .find_account_by_id(account_id)
            .await?
            .ok_or(Error::AccountNotFound)?;

        if !password::verify(current_password, &account.password_hash)? {
            return Err(Error::CurrentPasswordIncorrect);
        }
        if password::verify(new_password, &account.password_hash)? {
            return Err(Error::NoOpChange);
        }

        let password_hash = password::hash(new_password)?;
        let updated = self
            .store
            .update_password_hash(account_id, &password_hash)
            .await?;
        if updated == 0 {
            error!(%account_id, "password update affected no rows");
            return Err(Error::UpdateFailed);
        }
        Ok(())
    }

    /// Enroll an account in two-factor authentication. Returns the secret
    /// and provisioning URL exactly once; the store keeps only the secret.
    ///
    /// # Errors
    ///
    /// `AlreadyEnrolled` when a secret is already on file.
    pub async fn enable_second_factor(&self, account_id: Uuid) -> Result<Enrollment, Error> {
        let account = self
            .store
            .find_account_by_id(account_id)
            .await?
            .ok_or(Error::AccountNotFound)?;
        if account.second_factor_secret.is_some() {
            return Err(Error::AlreadyEnrolled);
        }

        let enrollment = self.totp.enroll(&account.email)?;
        let updated = self
            .store
            .enroll_second_factor_secret(account_id, &enrollment.secret_base32)
            .await?;
        if updated == 0 {
            // The account was just fetched, so zero rows means a concurrent
            // enrollment set a secret first.
            return Err(Error::AlreadyEnrolled);
        }
        info!(%account_id, "two-factor authentication enabled");
        Ok(enrollment)
    }

    /// Clear an account's second-factor secret. Idempotence is not offered;
    /// a missing account is an error.
    ///
    /// # Errors
    ///
    /// `AccountNotFound` when the account does not exist.
    pub async fn disable_second_factor(&self, account_id: Uuid) -> Result<(), Error> {
        let updated = self
            .store
            .update_second_factor_secret(account_id, None)
            .await?;
        if updated == 0 {
            return Err(Error::AccountNotFound);
        }
        info!(%account_id, "two-factor authentication disabled");
        Ok(())
    }

    async fn issue_session(
        &self,
        account: &Account,
        status: TwoFactorStatus,
    ) -> Result<String, Error> {
        let token = self
            .tokens
            .issue(
                account.id,
                account.role,
                status,
                self.config.session_ttl_seconds(),
                session::unix_now(),
            )
            .map_err(|err| {
                Error::Internal(anyhow::Error::new(err).context("failed to sign session token"))
            })?;
        self.store.update_last_authenticated(account.id).await?;
        self.events.login_succeeded(account.id).await;
        Ok(token)
    }

    async fn issue_handshake_token(&self, account_id: Uuid) -> Result<String, Error> {
        let token = utils::generate_handshake_token()?;
        let token_hash = utils::hash_handshake_token(&token);
        self.store
            .insert_handshake_token(
                &token_hash,
                account_id,
                self.config.handshake_ttl_seconds(),
            )
            .await?;
        Ok(token)
    }

    async fn consume_challenge(&self, challenge_id: &str) {
        self.presence.invalidate(challenge_id).await;
    }
}
