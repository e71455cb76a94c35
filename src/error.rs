//! Error taxonomy for the authentication engine.
//!
//! Variants in the authentication class deliberately share shape and wording
//! so a caller cannot tell an unknown account from a wrong password, or an
//! expired handshake token from an already-used one.

use thiserror::Error;

use crate::store::StoreError;

/// Broad error classes. The HTTP edge maps these to status codes and decides
/// what is safe to show; only `Dependency` failures are retryable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Conflict,
    State,
    Dependency,
    Invariant,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input; the message is safe to show.
    #[error("{0}")]
    Validation(String),
    /// Uniform for unknown email and wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid captcha")]
    CaptchaInvalid,
    /// Wrong second-factor code. The handshake token is already consumed at
    /// this point; the caller must restart login.
    #[error("invalid verification code")]
    InvalidCode,
    /// Covers not-found, already-used, and expired handshake tokens without
    /// distinguishing them.
    #[error("invalid or expired token")]
    TokenInvalid,
    #[error("two-factor authentication is not configured")]
    TwoFactorNotConfigured,
    #[error("two-factor authentication is already enabled")]
    AlreadyEnrolled,
    #[error("email already in use")]
    EmailInUse,
    /// Generic failure after the in-transaction uniqueness check; the
    /// transaction has been rolled back.
    #[error("registration failed")]
    RegistrationFailed(#[source] StoreError),
    #[error("current password is incorrect")]
    CurrentPasswordIncorrect,
    #[error("password confirmation does not match")]
    ConfirmationMismatch,
    #[error("new password must differ from the current password")]
    NoOpChange,
    #[error("password update affected no rows")]
    UpdateFailed,
    /// A redeemed handshake token pointed at a vanished account, or an
    /// operation targeted an id that no longer exists.
    #[error("account not found")]
    AccountNotFound,
    #[error("credential store failure")]
    Store(#[from] StoreError),
    #[error("human-presence validator failure")]
    Presence(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::ConfirmationMismatch | Self::NoOpChange => {
                ErrorKind::Validation
            }
            Self::InvalidCredentials
            | Self::CaptchaInvalid
            | Self::InvalidCode
            | Self::CurrentPasswordIncorrect => ErrorKind::Authentication,
            Self::EmailInUse | Self::AlreadyEnrolled => ErrorKind::Conflict,
            Self::TokenInvalid | Self::TwoFactorNotConfigured => ErrorKind::State,
            Self::RegistrationFailed(_) | Self::Store(_) | Self::Presence(_) => {
                ErrorKind::Dependency
            }
            Self::AccountNotFound | Self::UpdateFailed | Self::Internal(_) => ErrorKind::Invariant,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Dependency)
    }
}
