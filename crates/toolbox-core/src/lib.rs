//! Toolbox core library: the rate-limited authentication gate.
//!
//! `toolbox-core` holds everything that decides whether a login attempt may
//! proceed and whether a request carries a valid session. It knows nothing
//! about HTTP; the `toolbox-web` binary maps its outcomes onto cookies,
//! headers and status codes.
//!
//! # Modules
//!
//! - [`clock`]: Time source shared by the limiter and the credential service.
//! - [`bucket`]: Token-bucket math, the [`BucketStore`] contract and its Redis and in-memory backends.
//! - [`limiter`]: [`TokenBucketLimiter`]: timeout-bounded `consume` against a store.
//! - [`policy`]: [`LoginRateLimiter`]: per-IP and per-account admission for login attempts.
//! - [`credentials`]: [`CredentialService`]: access/refresh token issuance, verification and lazy rotation.
//! - [`config`]: Serde-friendly configuration sections with documented defaults.
//! - [`error`]: Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod bucket;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod limiter;
pub mod policy;

pub use bucket::memory::MemoryBucketStore;
pub use bucket::redis::RedisBucketStore;
pub use bucket::store::BucketStore;
pub use bucket::{bucket_ttl_secs, refill_and_take, BucketSpec, BucketState, Consumption};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CredentialConfig, FailPolicy, LimitRule, RateLimitConfig};
pub use credentials::{
    Claims, CredentialService, IssuedToken, RejectReason, SessionOutcome, TokenKind,
};
pub use error::{CoreError, CoreResult};
pub use limiter::TokenBucketLimiter;
pub use policy::{normalize_account, LoginRateLimiter, Verdict};
