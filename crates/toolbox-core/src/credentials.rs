//! Signed session credentials and the lazy access-token rotation.
//!
//! Tokens are stateless JWTs: the server keeps only the signing secret and
//! cannot revoke a token before its `exp`. Each token carries a fixed
//! [`TokenKind`], so a refresh token is never usable as a bearer access
//! credential and vice versa.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::CredentialConfig;
use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed claim set of every session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: u64,
    pub exp: u64,
}

/// A freshly signed token and what the transport needs to carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: u64,
    pub max_age: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Neither an access nor a refresh credential was presented.
    NoCredentials,
    /// Something was presented but nothing valid: expired, malformed,
    /// badly signed or of the wrong kind. Deliberately not more specific.
    InvalidCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Authenticated { subject: String },
    /// The access credential was missing or invalid but the refresh
    /// credential was good; `access` must be handed back to the client.
    Refreshed { subject: String, access: IssuedToken },
    Rejected(RejectReason),
}

impl SessionOutcome {
    pub fn subject(&self) -> Option<&str> {
        match self {
            SessionOutcome::Authenticated { subject } | SessionOutcome::Refreshed { subject, .. } => {
                Some(subject)
            }
            SessionOutcome::Rejected(_) => None,
        }
    }
}

pub struct CredentialService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialService {
    /// # Errors
    ///
    /// [`CoreError::Config`](crate::CoreError::Config) if the config fails validation.
    pub fn new(config: &CredentialConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        config.validate()?;
        let secret = config.jwt_secret.as_bytes();
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm: config.algorithm()?,
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            clock,
        })
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    pub fn issue_access(&self, subject: &str) -> CoreResult<IssuedToken> {
        self.issue(subject, TokenKind::Access)
    }

    pub fn issue_refresh(&self, subject: &str) -> CoreResult<IssuedToken> {
        self.issue(subject, TokenKind::Refresh)
    }

    fn issue(&self, subject: &str, kind: TokenKind) -> CoreResult<IssuedToken> {
        let ttl = self.ttl(kind);
        let now = self.clock.now_secs();
        let claims = Claims {
            sub: subject.to_string(),
            kind,
            iat: now,
            exp: now + ttl.as_secs(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)?;

        Ok(IssuedToken {
            token,
            kind,
            expires_at: claims.exp,
            max_age: ttl,
        })
    }

    /// Checks signature, algorithm, claim shape and expiry.
    ///
    /// Returns `None` for a missing, empty, malformed, badly signed or
    /// expired token. A token without `exp` is rejected, never treated as
    /// non-expiring.
    pub fn verify(&self, token: Option<&str>) -> Option<Claims> {
        let token = token.filter(|t| !t.is_empty())?;

        let mut validation = Validation::new(self.algorithm);
        // expiry is checked below against the injected clock, with no leeway
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let claims = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!("Rejected token: {e}");
                return None;
            }
        };

        if claims.exp <= self.clock.now_secs() {
            tracing::debug!(kind = %claims.kind, "Rejected token: expired");
            return None;
        }
        if claims.sub.is_empty() {
            tracing::debug!("Rejected token: empty subject");
            return None;
        }
        Some(claims)
    }

    /// [`verify`](Self::verify), additionally requiring `kind`.
    pub fn verify_kind(&self, token: Option<&str>, kind: TokenKind) -> Option<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            tracing::debug!(expected = %kind, got = %claims.kind, "Rejected token: wrong kind");
            return None;
        }
        Some(claims)
    }

    /// Resolves a request's credentials to a subject.
    ///
    /// A valid access token wins outright. Otherwise a valid refresh token
    /// yields a new access token for the same subject; the refresh token
    /// itself is left as is and stays usable until it expires.
    ///
    /// # Errors
    ///
    /// Only if signing the replacement access token fails.
    pub fn authenticate(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> CoreResult<SessionOutcome> {
        let access = access.filter(|t| !t.is_empty());
        let refresh = refresh.filter(|t| !t.is_empty());

        if let Some(claims) = self.verify_kind(access, TokenKind::Access) {
            return Ok(SessionOutcome::Authenticated {
                subject: claims.sub,
            });
        }

        let Some(refresh) = refresh else {
            let reason = if access.is_none() {
                RejectReason::NoCredentials
            } else {
                RejectReason::InvalidCredentials
            };
            return Ok(SessionOutcome::Rejected(reason));
        };

        let Some(claims) = self.verify_kind(Some(refresh), TokenKind::Refresh) else {
            return Ok(SessionOutcome::Rejected(RejectReason::InvalidCredentials));
        };

        let access = self.issue_access(&claims.sub)?;
        tracing::info!(email = %claims.sub, "Refreshed access token");
        Ok(SessionOutcome::Refreshed {
            subject: claims.sub,
            access,
        })
    }
}
