//! Signed session tokens.
//!
//! Tokens are self-contained HS256 JWTs carrying the subject account id, its
//! role, and a two-factor scope claim. Nothing is persisted; the signature
//! plus expiry is the whole credential. Verification is consumed by the
//! authorization layer: signature, issuer, audience, expiry, then a scope
//! check against the operation's requirement.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::store::Role;

type HmacSha256 = Hmac<Sha256>;

/// Two-factor scope claim. `Pending` authorizes only second-factor
/// verification and must never be accepted where `Verified` is required;
/// `NotApplicable` marks accounts without a second factor enrolled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorStatus {
    NotApplicable,
    Pending,
    Verified,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokenHeader {
    pub alg: String,
    pub typ: String,
}

impl SessionTokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub role: Role,
    pub twofactor: TwoFactorStatus,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    /// The subject parsed back into an account id.
    #[must_use]
    pub fn account_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    /// Check the scope claim against an operation's requirement. A pending
    /// token is rejected wherever verified scope is required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientScope`] when the claim does not satisfy
    /// the requirement.
    pub fn require_scope(&self, required: TwoFactorStatus) -> Result<(), Error> {
        match (required, self.twofactor) {
            (TwoFactorStatus::Verified, TwoFactorStatus::Pending) => Err(Error::InsufficientScope),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("insufficient scope")]
    InsufficientScope,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub struct SessionTokenIssuer {
    key: SecretString,
    issuer: String,
    audience: String,
}

impl SessionTokenIssuer {
    #[must_use]
    pub fn new(key: SecretString, issuer: String, audience: String) -> Self {
        Self {
            key,
            issuer,
            audience,
        }
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).map_err(|_| Error::Key)
    }

    /// Create a signed session token. Deterministic given identical inputs
    /// and `now_unix_seconds`.
    ///
    /// # Errors
    ///
    /// Returns an error if claims cannot be encoded or the key is unusable.
    pub fn issue(
        &self,
        account_id: Uuid,
        role: Role,
        status: TwoFactorStatus,
        ttl_seconds: i64,
        now_unix_seconds: i64,
    ) -> Result<String, Error> {
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: account_id.to_string(),
            role,
            twofactor: status,
            iat: now_unix_seconds,
            exp: now_unix_seconds + ttl_seconds,
        };

        let header_b64 = b64e_json(&SessionTokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a session token and return its decoded claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, the signature is invalid,
    /// or the claims fail validation (`iss`, `aud`, `exp`).
    pub fn verify(&self, token: &str, now_unix_seconds: i64) -> Result<SessionClaims, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: SessionTokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: SessionClaims = b64d_json(claims_b64)?;
        if claims.iss != self.issuer {
            return Err(Error::InvalidIssuer);
        }
        if claims.aud != self.audience {
            return Err(Error::InvalidAudience);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fixed clock for stable claims.
    const NOW: i64 = 1_700_000_000;

    fn issuer() -> SessionTokenIssuer {
        SessionTokenIssuer::new(
            SecretString::from("a-server-held-signing-key".to_string()),
            "ensaluti.test".to_string(),
            "ensaluti-api".to_string(),
        )
    }

    #[test]
    fn issue_and_verify_round_trips() -> Result<(), Error> {
        let issuer = issuer();
        let account_id = Uuid::new_v4();
        let token = issuer.issue(account_id, Role::Basic, TwoFactorStatus::Verified, 3600, NOW)?;

        let claims = issuer.verify(&token, NOW + 10)?;
        assert_eq!(claims.account_id(), Some(account_id));
        assert_eq!(claims.role, Role::Basic);
        assert_eq!(claims.twofactor, TwoFactorStatus::Verified);
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.exp, NOW + 3600);
        Ok(())
    }

    #[test]
    fn issuance_is_deterministic_for_fixed_inputs() -> Result<(), Error> {
        let issuer = issuer();
        let account_id = Uuid::nil();
        let first = issuer.issue(account_id, Role::Admin, TwoFactorStatus::Verified, 60, NOW)?;
        let second = issuer.issue(account_id, Role::Admin, TwoFactorStatus::Verified, 60, NOW)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<(), Error> {
        let issuer = issuer();
        let token = issuer.issue(Uuid::new_v4(), Role::Basic, TwoFactorStatus::Verified, 60, NOW)?;
        let result = issuer.verify(&token, NOW + 61);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn wrong_key_fails_signature_check() -> Result<(), Error> {
        let token = issuer().issue(
            Uuid::new_v4(),
            Role::Basic,
            TwoFactorStatus::Verified,
            60,
            NOW,
        )?;
        let other = SessionTokenIssuer::new(
            SecretString::from("a-different-signing-key".to_string()),
            "ensaluti.test".to_string(),
            "ensaluti-api".to_string(),
        );
        let result = other.verify(&token, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn wrong_issuer_or_audience_is_rejected() -> Result<(), Error> {
        let issuer = issuer();
        let token = issuer.issue(Uuid::new_v4(), Role::Basic, TwoFactorStatus::Verified, 60, NOW)?;

        let other = SessionTokenIssuer::new(
            SecretString::from("a-server-held-signing-key".to_string()),
            "someone-else".to_string(),
            "ensaluti-api".to_string(),
        );
        assert!(matches!(other.verify(&token, NOW), Err(Error::InvalidIssuer)));

        let other = SessionTokenIssuer::new(
            SecretString::from("a-server-held-signing-key".to_string()),
            "ensaluti.test".to_string(),
            "another-audience".to_string(),
        );
        assert!(matches!(
            other.verify(&token, NOW),
            Err(Error::InvalidAudience)
        ));
        Ok(())
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let issuer = issuer();
        assert!(matches!(
            issuer.verify("not-a-token", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            issuer.verify("a.b.c.d", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            issuer.verify("!!.!!.!!", NOW),
            Err(Error::Base64)
        ));
    }

    #[test]
    fn pending_scope_never_satisfies_verified() -> Result<(), Error> {
        let issuer = issuer();
        let token = issuer.issue(Uuid::new_v4(), Role::Basic, TwoFactorStatus::Pending, 300, NOW)?;
        let claims = issuer.verify(&token, NOW)?;

        assert!(claims.require_scope(TwoFactorStatus::Pending).is_ok());
        assert!(matches!(
            claims.require_scope(TwoFactorStatus::Verified),
            Err(Error::InsufficientScope)
        ));
        Ok(())
    }

    #[test]
    fn not_applicable_scope_satisfies_verified() -> Result<(), Error> {
        let issuer = issuer();
        let token = issuer.issue(
            Uuid::new_v4(),
            Role::Basic,
            TwoFactorStatus::NotApplicable,
            3600,
            NOW,
        )?;
        let claims = issuer.verify(&token, NOW)?;
        assert!(claims.require_scope(TwoFactorStatus::Verified).is_ok());
        Ok(())
    }
}
