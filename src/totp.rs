//! Second-factor secret manager.
//!
//! Generates per-account TOTP secrets, renders the otpauth provisioning URL
//! (the enrollment-material renderer turns it into a scannable image; the
//! core only supplies the string), and verifies time-step codes with one
//! step of tolerance in each direction to absorb clock drift. Verification
//! is stateless; replay across the login flow is closed by the single-use
//! handshake token, not by a per-code blocklist.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

/// Material shown to the user exactly once at enrollment. The base32 secret
/// doubles as the manual-entry key.
#[derive(Clone, Debug)]
pub struct Enrollment {
    pub secret_base32: String,
    pub provisioning_url: String,
}

#[derive(Clone, Debug)]
pub struct TotpManager {
    issuer: String,
}

impl TotpManager {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// Generate a fresh 160-bit secret and the provisioning URL embedding
    /// issuer, account label, and secret.
    ///
    /// # Errors
    ///
    /// Returns an error if secret generation or TOTP setup fails.
    pub fn enroll(&self, account_email: &str) -> Result<Enrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|err| anyhow!("secret generation error: {err:?}"))?;

        let totp = self.build(secret_bytes, account_email)?;
        Ok(Enrollment {
            secret_base32: totp.get_secret_base32(),
            provisioning_url: totp.get_url(),
        })
    }

    /// Check a submitted code against the stored secret, accepting the
    /// current time step and one adjacent step either side.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored secret is not valid base32.
    pub fn verify(&self, secret_base32: &str, code: &str) -> Result<bool> {
        let totp = self.build_from_base32(secret_base32)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    /// Same check against an explicit unix timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored secret is not valid base32.
    pub fn verify_at(&self, secret_base32: &str, code: &str, time: u64) -> Result<bool> {
        let totp = self.build_from_base32(secret_base32)?;
        Ok(totp.check(code, time))
    }

    fn build_from_base32(&self, secret_base32: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| anyhow!("invalid stored second-factor secret: {err:?}"))?;
        // The label does not participate in code generation.
        self.build(secret_bytes, "account")
    }

    fn build(&self, secret_bytes: Vec<u8>, label: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            label.to_string(),
        )
        .map_err(|err| anyhow!("TOTP init error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000;

    fn manager() -> TotpManager {
        TotpManager::new("ensaluti".to_string())
    }

    fn code_at(manager: &TotpManager, secret_base32: &str, time: u64) -> Result<String> {
        let totp = manager.build_from_base32(secret_base32)?;
        Ok(totp.generate(time))
    }

    #[test]
    fn enrollment_embeds_issuer_and_account() -> Result<()> {
        let enrollment = manager().enroll("alice@example.com")?;
        assert!(enrollment.provisioning_url.starts_with("otpauth://totp/"));
        assert!(enrollment.provisioning_url.contains("issuer=ensaluti"));
        assert!(enrollment
            .provisioning_url
            .contains(&enrollment.secret_base32));
        // 160-bit secret -> 32 base32 characters.
        assert_eq!(enrollment.secret_base32.len(), 32);
        Ok(())
    }

    #[test]
    fn enrollments_produce_distinct_secrets() -> Result<()> {
        let manager = manager();
        let first = manager.enroll("alice@example.com")?;
        let second = manager.enroll("alice@example.com")?;
        assert_ne!(first.secret_base32, second.secret_base32);
        Ok(())
    }

    #[test]
    fn current_step_code_verifies() -> Result<()> {
        let manager = manager();
        let enrollment = manager.enroll("alice@example.com")?;
        let code = code_at(&manager, &enrollment.secret_base32, T0)?;
        assert!(manager.verify_at(&enrollment.secret_base32, &code, T0)?);
        Ok(())
    }

    #[test]
    fn adjacent_step_codes_verify_but_distant_ones_do_not() -> Result<()> {
        let manager = manager();
        let enrollment = manager.enroll("alice@example.com")?;

        let previous = code_at(&manager, &enrollment.secret_base32, T0 - 30)?;
        assert!(manager.verify_at(&enrollment.secret_base32, &previous, T0)?);

        let next = code_at(&manager, &enrollment.secret_base32, T0 + 30)?;
        assert!(manager.verify_at(&enrollment.secret_base32, &next, T0)?);

        let stale = code_at(&manager, &enrollment.secret_base32, T0 - 90)?;
        assert!(!manager.verify_at(&enrollment.secret_base32, &stale, T0)?);
        Ok(())
    }

    #[test]
    fn wrong_code_is_rejected() -> Result<()> {
        let manager = manager();
        let enrollment = manager.enroll("alice@example.com")?;
        assert!(!manager.verify_at(&enrollment.secret_base32, "000000", T0)?
            || !manager.verify_at(&enrollment.secret_base32, "999999", T0)?);
        Ok(())
    }

    #[test]
    fn invalid_stored_secret_is_an_error() {
        assert!(manager().verify("not base32!", "123456").is_err());
    }
}
