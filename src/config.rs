//! Engine configuration.
//!
//! Built once at startup with the builder-style `with_*` methods, then shared
//! read-only. Every knob has a default except the three identity-critical
//! fields the constructor requires: issuer, audience, and the signing key.

use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_HANDSHAKE_TTL_SECONDS: i64 = 300;
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AuthConfig {
    issuer: String,
    audience: String,
    token_signing_key: SecretString,
    two_factor_redirect_url: String,
    session_ttl_seconds: i64,
    handshake_ttl_seconds: i64,
    min_password_length: usize,
    allowed_email_domains: Vec<String>,
    store_timeout: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(issuer: String, audience: String, token_signing_key: SecretString) -> Self {
        Self {
            issuer,
            audience,
            token_signing_key,
            two_factor_redirect_url: "/login/verify".to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            handshake_ttl_seconds: DEFAULT_HANDSHAKE_TTL_SECONDS,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            allowed_email_domains: Vec::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_two_factor_redirect_url(mut self, url: String) -> Self {
        self.two_factor_redirect_url = url;
        self
    }

    #[must_use]
    pub const fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_handshake_ttl_seconds(mut self, seconds: i64) -> Self {
        self.handshake_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    /// Restrict registration to the given email domains. An empty list
    /// (the default) accepts any domain.
    #[must_use]
    pub fn with_allowed_email_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_email_domains = domains;
        self
    }

    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub const fn token_signing_key(&self) -> &SecretString {
        &self.token_signing_key
    }

    #[must_use]
    pub fn two_factor_redirect_url(&self) -> &str {
        &self.two_factor_redirect_url
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub const fn handshake_ttl_seconds(&self) -> i64 {
        self.handshake_ttl_seconds
    }

    #[must_use]
    pub const fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Whether the policy admits a (normalized) email address's domain.
    #[must_use]
    pub fn email_domain_allowed(&self, email: &str) -> bool {
        if self.allowed_email_domains.is_empty() {
            return true;
        }
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        self.allowed_email_domains
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "ensaluti.test".to_string(),
            "ensaluti-api".to_string(),
            SecretString::from("k".to_string()),
        )
    }

    #[test]
    fn defaults_are_applied() {
        let config = config();
        assert_eq!(config.issuer(), "ensaluti.test");
        assert_eq!(config.audience(), "ensaluti-api");
        assert_eq!(config.two_factor_redirect_url(), "/login/verify");
        assert_eq!(config.session_ttl_seconds(), 3600);
        assert_eq!(config.handshake_ttl_seconds(), 300);
        assert_eq!(config.min_password_length(), 8);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn builders_override_defaults() {
        let config = config()
            .with_two_factor_redirect_url("/2fa".to_string())
            .with_session_ttl_seconds(60)
            .with_handshake_ttl_seconds(45)
            .with_min_password_length(12)
            .with_store_timeout(Duration::from_millis(250));
        assert_eq!(config.two_factor_redirect_url(), "/2fa");
        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.handshake_ttl_seconds(), 45);
        assert_eq!(config.min_password_length(), 12);
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn empty_domain_allowlist_accepts_everything() {
        assert!(config().email_domain_allowed("alice@example.com"));
    }

    #[test]
    fn domain_allowlist_is_case_insensitive_and_exact() {
        let config = config().with_allowed_email_domains(vec!["example.com".to_string()]);
        assert!(config.email_domain_allowed("alice@example.com"));
        assert!(config.email_domain_allowed("alice@EXAMPLE.COM"));
        assert!(!config.email_domain_allowed("alice@other.com"));
        assert!(!config.email_domain_allowed("alice@sub.example.com"));
        assert!(!config.email_domain_allowed("no-at-sign"));
    }
}
