//! One-way salted password hashing with anti-enumeration support.
//!
//! Hashing uses argon2id with a per-call random salt embedded in the PHC
//! output, so two hashes of the same input differ. When a login targets an
//! email with no account, [`verify_dummy`] burns the same verification effort
//! against a fixed precomputed hash so the timing of "unknown account" and
//! "wrong password" is indistinguishable.

use anyhow::{anyhow, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::OnceLock;

/// Hash a plaintext password into a PHC string with a fresh random salt.
///
/// # Errors
///
/// Returns an error if argon2 rejects its inputs.
pub fn hash(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hashed = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hashed.to_string())
}

/// Verify a plaintext password against a stored PHC string.
///
/// # Errors
///
/// Returns an error if the stored hash is not a parseable PHC string; a
/// mismatched password is `Ok(false)`, not an error.
pub fn verify(plaintext: &str, stored: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored).map_err(|err| anyhow!("invalid stored password hash: {err}"))?;
    Ok(Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok())
}

// Hashed once per process; the input is never a user password, so this can
// never verify on a real login path.
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(b"ensaluti-dummy-credential", &salt)
            .map(|hashed| hashed.to_string())
            .unwrap_or_default()
    })
}

/// Run a full verification against the dummy hash. The login path discards
/// the result; the call exists only to keep timing uniform.
pub fn verify_dummy(plaintext: &str) -> bool {
    PasswordHash::new(dummy_hash())
        .map(|parsed| {
            Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
