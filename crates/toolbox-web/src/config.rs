use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::Deserialize;
use toolbox_core::{CredentialConfig, FailPolicy, RateLimitConfig};

/// An account seeded into the in-memory directory at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Take the client IP from the first `X-Forwarded-For` hop. Only safe
    /// behind a proxy that overwrites the header.
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub credentials: CredentialConfig,
    /// Defaults to on when TLS is configured.
    #[serde(default)]
    pub cookie_secure: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("store backend must be \"redis\" or \"memory\", got {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            trust_forwarded_for: true,
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            store: StoreConfig::default(),
            cors: CorsConfig::default(),
            tls: TlsConfig::default(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls.cert_path.is_some() && self.tls.key_path.is_some()
    }

    pub fn cookie_secure(&self) -> bool {
        self.auth.cookie_secure.unwrap_or_else(|| self.tls_enabled())
    }

    /// Reads `TOOLBOX_WEB_CONFIG` (if set) and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("TOOLBOX_WEB_CONFIG").map(PathBuf::from).ok();
        Self::from_sources(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Builds the config from an optional TOML file and an environment
    /// lookup, then validates it. Any problem here is fatal at startup.
    pub fn from_sources(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => ServerConfig::default(),
        };

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(addr) = env("TOOLBOX_BIND_ADDR") {
            self.bind_addr = parse_env("TOOLBOX_BIND_ADDR", &addr)?;
        }
        if let Some(secret) = env("TOOLBOX_JWT_SECRET") {
            self.auth.credentials.jwt_secret = secret;
        }
        if let Some(algorithm) = env("TOOLBOX_JWT_ALGORITHM") {
            self.auth.credentials.jwt_algorithm = algorithm;
        }
        if let Some(minutes) = env("TOOLBOX_ACCESS_TTL_MINUTES") {
            self.auth.credentials.access_ttl_minutes = parse_env("TOOLBOX_ACCESS_TTL_MINUTES", &minutes)?;
        }
        if let Some(hours) = env("TOOLBOX_REFRESH_TTL_HOURS") {
            self.auth.credentials.refresh_ttl_hours = parse_env("TOOLBOX_REFRESH_TTL_HOURS", &hours)?;
        }
        if let Some(secure) = env("TOOLBOX_COOKIE_SECURE") {
            self.auth.cookie_secure = Some(parse_env("TOOLBOX_COOKIE_SECURE", &secure)?);
        }
        if let Some(policy) = env("TOOLBOX_FAIL_POLICY") {
            self.rate_limit.fail_policy = policy.parse::<FailPolicy>()?;
        }
        if let Some(url) = env("TOOLBOX_REDIS_URL") {
            self.store.redis_url = Some(url);
        }
        if let Some(backend) = env("TOOLBOX_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Some(origins) = env("TOOLBOX_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(cert) = env("TOOLBOX_TLS_CERT") {
            self.tls.cert_path = Some(cert);
        }
        if let Some(key) = env("TOOLBOX_TLS_KEY") {
            self.tls.key_path = Some(key);
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.auth.credentials.validate()?;
        self.rate_limit.validate()?;

        if self.store.backend == StoreBackend::Redis
            && self.store.redis_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            bail!("store.redis_url is missing; set TOOLBOX_REDIS_URL or use the memory backend");
        }

        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            bail!("TLS needs both cert_path and key_path");
        }

        for user in &self.users {
            if toolbox_core::normalize_account(&user.email).is_none() {
                bail!("users entry has an empty email");
            }
            argon2::PasswordHash::new(&user.password_hash)
                .map_err(|e| anyhow::anyhow!("invalid password_hash for {}: {e}", user.email))?;
        }

        if !self.cookie_secure() {
            tracing::warn!(
                "Session cookies are sent without the Secure flag. \
                 Enable TLS or set TOOLBOX_COOKIE_SECURE=true outside development."
            );
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {name}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn env_only_config_uses_defaults() {
        let config = ServerConfig::from_sources(
            None,
            env(&[("TOOLBOX_JWT_SECRET", SECRET), ("TOOLBOX_REDIS_URL", "redis://127.0.0.1/")]),
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.auth.credentials.access_ttl_minutes, 15);
        assert_eq!(config.auth.credentials.refresh_ttl_hours, 6);
        assert_eq!(config.rate_limit.ip_capacity, 10);
        assert_eq!(config.rate_limit.email_capacity, 5);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert!(config.trust_forwarded_for);
        assert!(!config.cookie_secure());
    }

    #[test]
    fn missing_secret_is_fatal() {
        let err = ServerConfig::from_sources(None, env(&[("TOOLBOX_REDIS_URL", "redis://x/")]))
            .unwrap_err();
        assert!(err.to_string().contains("jwt_secret"));
    }

    #[test]
    fn missing_redis_url_is_fatal() {
        let err = ServerConfig::from_sources(None, env(&[("TOOLBOX_JWT_SECRET", SECRET)]))
            .unwrap_err();
        assert!(err.to_string().contains("redis_url"));
    }

    #[test]
    fn memory_backend_needs_no_redis() {
        let config = ServerConfig::from_sources(
            None,
            env(&[("TOOLBOX_JWT_SECRET", SECRET), ("TOOLBOX_STORE_BACKEND", "memory")]),
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn file_values_are_overridden_by_env() {
        let file = write_config(
            r#"
            bind_addr = "127.0.0.1:9000"

            [auth]
            jwt_secret = "file-secret-file-secret-file-secret"
            access_ttl_minutes = 5
            cookie_secure = true

            [rate_limit]
            ip_capacity = 20
            fail_policy = "closed"

            [store]
            backend = "memory"

            [cors]
            allowed_origins = ["http://localhost:5173"]
            "#,
        );

        let config = ServerConfig::from_sources(
            Some(file.path()),
            env(&[("TOOLBOX_ACCESS_TTL_MINUTES", "10"), ("TOOLBOX_FAIL_POLICY", "open")]),
        )
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.auth.credentials.jwt_secret, "file-secret-file-secret-file-secret");
        assert_eq!(config.auth.credentials.access_ttl_minutes, 10);
        assert_eq!(config.auth.credentials.refresh_ttl_hours, 6);
        assert_eq!(config.rate_limit.ip_capacity, 20);
        assert_eq!(config.rate_limit.email_capacity, 5);
        assert_eq!(config.rate_limit.fail_policy, FailPolicy::Open);
        assert_eq!(config.cors.allowed_origins, vec!["http://localhost:5173"]);
        assert!(config.cookie_secure());
    }

    #[test]
    fn malformed_env_value_is_fatal() {
        let err = ServerConfig::from_sources(
            None,
            env(&[
                ("TOOLBOX_JWT_SECRET", SECRET),
                ("TOOLBOX_STORE_BACKEND", "memory"),
                ("TOOLBOX_REFRESH_TTL_HOURS", "six"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("TOOLBOX_REFRESH_TTL_HOURS"));
    }

    #[test]
    fn allowed_origins_env_is_comma_separated() {
        let config = ServerConfig::from_sources(
            None,
            env(&[
                ("TOOLBOX_JWT_SECRET", SECRET),
                ("TOOLBOX_STORE_BACKEND", "memory"),
                ("TOOLBOX_ALLOWED_ORIGINS", "http://a.test, ,http://b.test "),
            ]),
        )
        .unwrap();
        assert_eq!(config.cors.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn tls_turns_on_secure_cookies() {
        let config = ServerConfig::from_sources(
            None,
            env(&[
                ("TOOLBOX_JWT_SECRET", SECRET),
                ("TOOLBOX_STORE_BACKEND", "memory"),
                ("TOOLBOX_TLS_CERT", "/etc/toolbox/cert.pem"),
                ("TOOLBOX_TLS_KEY", "/etc/toolbox/key.pem"),
            ]),
        )
        .unwrap();
        assert!(config.tls_enabled());
        assert!(config.cookie_secure());
    }

    #[test]
    fn half_tls_config_is_fatal() {
        let result = ServerConfig::from_sources(
            None,
            env(&[
                ("TOOLBOX_JWT_SECRET", SECRET),
                ("TOOLBOX_STORE_BACKEND", "memory"),
                ("TOOLBOX_TLS_CERT", "/etc/toolbox/cert.pem"),
            ]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn bad_seed_hash_is_fatal() {
        let file = write_config(
            r#"
            [[users]]
            email = "alice@example.com"
            password_hash = "plaintext-oops"
            "#,
        );
        let err = ServerConfig::from_sources(
            Some(file.path()),
            env(&[("TOOLBOX_JWT_SECRET", SECRET), ("TOOLBOX_STORE_BACKEND", "memory")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("alice@example.com"));
    }
}
