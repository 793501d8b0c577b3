//! Error types for `toolbox-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`.

use std::time::Duration;

/// Unified error type for all core operations.
///
/// Admission denials and invalid credentials are *not* errors: they are
/// ordinary outcomes ([`crate::Verdict`], [`crate::SessionOutcome`]).
/// Variants here describe things that went wrong on the way to a decision.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The bucket store rejected or failed a command.
    #[error("bucket store error: {0}")]
    Store(String),

    /// The bucket store did not answer within the configured bound.
    #[error("bucket store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The bucket store has been closed; no further calls are accepted.
    #[error("bucket store is closed")]
    StoreClosed,

    /// A configuration value is missing or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A credential could not be signed.
    #[error("token error: {0}")]
    Token(String),
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::Store(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for CoreError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        CoreError::Token(e.to_string())
    }
}

/// Convenience alias used throughout `toolbox-core`.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_displays_message() {
        let err = CoreError::Store("connection refused".to_string());
        assert_eq!(err.to_string(), "bucket store error: connection refused");
    }

    #[test]
    fn timeout_displays_duration() {
        let err = CoreError::StoreTimeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "bucket store timed out after 500ms");
    }

    #[test]
    fn closed_displays_message() {
        assert_eq!(CoreError::StoreClosed.to_string(), "bucket store is closed");
    }

    #[test]
    fn config_displays_message() {
        let err = CoreError::Config("jwt_secret is empty".to_string());
        assert_eq!(err.to_string(), "config error: jwt_secret is empty");
    }

    #[test]
    fn redis_error_converts_to_store() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe"));
        let core_err: CoreError = redis_err.into();
        assert!(matches!(core_err, CoreError::Store(_)));
        assert!(core_err.to_string().contains("broken pipe"));
    }

    #[test]
    fn error_is_debug() {
        let debug = format!("{:?}", CoreError::StoreClosed);
        assert!(debug.contains("StoreClosed"));
    }
}
