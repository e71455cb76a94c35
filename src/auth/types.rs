//! Request and outcome payloads for the authentication flows.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub challenge_id: String,
    pub challenge_response: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SecondFactorRequest {
    pub handshake_token: String,
    pub code: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    /// Defaults to the basic role when absent.
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub new_password_confirmation: String,
}

/// What a password login produced: either a full session, or a handshake that
/// must be completed with a second-factor code. Never a session token in the
/// second case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    SessionIssued {
        token: String,
    },
    SecondFactorRequired {
        handshake_token: String,
        redirect_url: String,
    },
}
