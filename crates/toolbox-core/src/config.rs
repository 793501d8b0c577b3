//! Configuration sections owned by the core library.
//!
//! Every field has a default so an empty TOML table is valid; the binary
//! layers environment overrides on top and calls `validate` once at startup.

use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::bucket::BucketSpec;
use crate::error::{CoreError, CoreResult};

/// Secrets that ship in sample configs and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-secret",
    "changeme",
    "secret",
    "password",
    "jwt-secret",
];

/// What the login policy does when the bucket store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailPolicy {
    /// Admit the attempt; availability wins.
    #[default]
    Open,
    /// Refuse the attempt; the rate-limit guarantee wins.
    Closed,
}

impl FromStr for FailPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailPolicy::Open),
            "closed" => Ok(FailPolicy::Closed),
            other => Err(CoreError::Config(format!(
                "fail_policy must be \"open\" or \"closed\", got {other:?}"
            ))),
        }
    }
}

/// Capacity and refill window of one limiter dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRule {
    pub capacity: u32,
    pub window: Duration,
}

impl LimitRule {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    pub fn spec(&self) -> BucketSpec {
        BucketSpec::per_window(self.capacity, self.window)
    }
}

/// Login rate-limit settings (`[rate_limit]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_ip_capacity")]
    pub ip_capacity: u32,
    #[serde(default = "default_window_seconds")]
    pub ip_window_seconds: u64,
    #[serde(default = "default_email_capacity")]
    pub email_capacity: u32,
    #[serde(default = "default_window_seconds")]
    pub email_window_seconds: u64,
    #[serde(default)]
    pub fail_policy: FailPolicy,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_capacity: default_ip_capacity(),
            ip_window_seconds: default_window_seconds(),
            email_capacity: default_email_capacity(),
            email_window_seconds: default_window_seconds(),
            fail_policy: FailPolicy::default(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn ip_rule(&self) -> LimitRule {
        LimitRule::new(self.ip_capacity, Duration::from_secs(self.ip_window_seconds))
    }

    pub fn account_rule(&self) -> LimitRule {
        LimitRule::new(
            self.email_capacity,
            Duration::from_secs(self.email_window_seconds),
        )
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// # Errors
    ///
    /// [`CoreError::Config`] if any capacity, window or timeout is zero.
    pub fn validate(&self) -> CoreResult<()> {
        let checks = [
            ("ip_capacity", self.ip_capacity as u64),
            ("ip_window_seconds", self.ip_window_seconds),
            ("email_capacity", self.email_capacity as u64),
            ("email_window_seconds", self.email_window_seconds),
            ("store_timeout_ms", self.store_timeout_ms),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(CoreError::Config(format!("rate_limit.{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Session credential settings (`[auth]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default = "default_access_ttl_minutes")]
    pub access_ttl_minutes: u64,
    #[serde(default = "default_refresh_ttl_hours")]
    pub refresh_ttl_hours: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: default_jwt_algorithm(),
            access_ttl_minutes: default_access_ttl_minutes(),
            refresh_ttl_hours: default_refresh_ttl_hours(),
        }
    }
}

impl CredentialConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_minutes * 60)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_hours * 3600)
    }

    /// Parses the configured algorithm. Only HMAC algorithms are accepted
    /// because tokens are signed with a shared secret.
    pub fn algorithm(&self) -> CoreResult<Algorithm> {
        let algorithm = Algorithm::from_str(self.jwt_algorithm.trim()).map_err(|_| {
            CoreError::Config(format!("unknown jwt_algorithm {:?}", self.jwt_algorithm))
        })?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => Err(CoreError::Config(format!(
                "jwt_algorithm {other:?} needs a key pair; use HS256, HS384 or HS512"
            ))),
        }
    }

    /// # Errors
    ///
    /// [`CoreError::Config`] on an empty or placeholder secret, an
    /// unsupported algorithm, or a zero TTL.
    pub fn validate(&self) -> CoreResult<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(CoreError::Config(
                "jwt_secret is missing; set TOOLBOX_JWT_SECRET".to_string(),
            ));
        }
        if PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str()) {
            return Err(CoreError::Config(
                "jwt_secret matches a known placeholder value".to_string(),
            ));
        }
        self.algorithm()?;
        if self.access_ttl_minutes == 0 || self.refresh_ttl_hours == 0 {
            return Err(CoreError::Config(
                "access_ttl_minutes and refresh_ttl_hours must be positive".to_string(),
            ));
        }
        if self.jwt_secret.len() < 32 {
            tracing::warn!(
                "JWT secret is shorter than 32 characters. \
                 Consider using a stronger secret via TOOLBOX_JWT_SECRET."
            );
        }
        Ok(())
    }
}

fn default_ip_capacity() -> u32 { 10 }
fn default_email_capacity() -> u32 { 5 }
fn default_window_seconds() -> u64 { 60 }
fn default_store_timeout_ms() -> u64 { 500 }
fn default_jwt_algorithm() -> String { "HS256".to_string() }
fn default_access_ttl_minutes() -> u64 { 15 }
fn default_refresh_ttl_hours() -> u64 { 6 }

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(secret: &str) -> CredentialConfig {
        CredentialConfig {
            jwt_secret: secret.to_string(),
            ..CredentialConfig::default()
        }
    }

    #[test]
    fn default_rate_limits() {
        let config = RateLimitConfig::default();

        assert_eq!(config.ip_rule(), LimitRule::new(10, Duration::from_secs(60)));
        assert_eq!(config.account_rule(), LimitRule::new(5, Duration::from_secs(60)));
        assert_eq!(config.fail_policy, FailPolicy::Open);
        assert_eq!(config.store_timeout(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_credential_ttls() {
        let config = CredentialConfig::default();

        assert_eq!(config.access_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(config.refresh_ttl(), Duration::from_secs(6 * 3600));
        assert_eq!(config.algorithm().unwrap(), Algorithm::HS256);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RateLimitConfig =
            toml::from_str("email_capacity = 3\nfail_policy = \"closed\"").unwrap();

        assert_eq!(config.email_capacity, 3);
        assert_eq!(config.ip_capacity, 10);
        assert_eq!(config.fail_policy, FailPolicy::Closed);
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = RateLimitConfig {
            ip_window_seconds: 0,
            ..RateLimitConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ip_window_seconds"));
    }

    #[test]
    fn fail_policy_parses_case_insensitively() {
        assert_eq!("Closed".parse::<FailPolicy>().unwrap(), FailPolicy::Closed);
        assert_eq!(" open ".parse::<FailPolicy>().unwrap(), FailPolicy::Open);
        assert!("maybe".parse::<FailPolicy>().is_err());
    }

    #[test]
    fn missing_secret_is_rejected() {
        assert!(matches!(
            credentials("").validate(),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(credentials("secret").validate().is_err());
    }

    #[test]
    fn asymmetric_algorithm_is_rejected() {
        let config = CredentialConfig {
            jwt_algorithm: "RS256".to_string(),
            ..credentials("0123456789abcdef0123456789abcdef")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let config = CredentialConfig {
            jwt_algorithm: "none".to_string(),
            ..credentials("0123456789abcdef0123456789abcdef")
        };
        assert!(config.algorithm().is_err());
    }

    #[test]
    fn hs512_is_accepted() {
        let config = CredentialConfig {
            jwt_algorithm: "HS512".to_string(),
            ..credentials("0123456789abcdef0123456789abcdef")
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.algorithm().unwrap(), Algorithm::HS512);
    }
}
