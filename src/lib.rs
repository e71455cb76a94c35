//! # Ensaluti (Credential Authentication Engine)
//!
//! `ensaluti` authenticates email/password credentials and issues signed,
//! scope-limited session tokens. It is the engine behind a login surface,
//! not the surface itself: HTTP routing, cookies, and challenge rendering
//! live in the embedding service.
//!
//! ## Login Flow
//!
//! Every password login starts with a human-presence challenge. Credentials
//! are only inspected once the challenge answer matches, and unknown emails
//! and wrong passwords produce one indistinguishable rejection.
//!
//! Accounts enrolled in two-factor authentication never receive a session
//! from the password step. They get a single-use **handshake token** and
//! must present it together with a TOTP code to collect the session.
//!
//! ## Session Tokens
//!
//! Sessions are self-contained HS256 tokens carrying the account id, role,
//! and a two-factor scope claim. A `pending` claim authorizes only the
//! second-factor hop and is rejected wherever `verified` scope is required.
//!
//! ## Storage
//!
//! Account records live behind the [`store::CredentialStore`] trait, with a
//! Postgres implementation for production and an in-memory one for tests.
//! Handshake tokens are stored hashed and redeemed with a single atomic
//! check-and-set, so concurrent redemptions have exactly one winner.

pub mod auth;
pub mod captcha;
pub mod config;
pub mod error;
pub mod events;
pub mod password;
pub mod session;
pub mod store;
pub mod totp;

pub use auth::AuthService;
pub use config::AuthConfig;
pub use error::{Error, ErrorKind};
