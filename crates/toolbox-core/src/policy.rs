//! Login admission: one token bucket per client IP, one per account.
//!
//! The IP bucket is charged first. Only when it admits, and the request
//! names an account, is the account bucket charged. A denied IP therefore
//! never drains the account's allowance.

use crate::config::{FailPolicy, LimitRule, RateLimitConfig};
use crate::error::CoreError;
use crate::limiter::TokenBucketLimiter;

const LOGIN_COST: f64 = 1.0;

/// Outcome of a login admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// Whole seconds, at least 1 when denied, 0 when allowed.
    pub retry_after_secs: u64,
    /// Capacity of the bucket that decided.
    pub limit: u32,
    /// The store failed and [`FailPolicy`] made the call.
    pub degraded: bool,
}

impl Verdict {
    fn allowed(limit: u32) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            limit,
            degraded: false,
        }
    }

    fn denied(limit: u32, retry_after: f64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: round_retry_after(retry_after),
            limit,
            degraded: false,
        }
    }
}

/// Rounds a fractional delay up to whole seconds, never below one.
fn round_retry_after(secs: f64) -> u64 {
    if !secs.is_finite() {
        return 1;
    }
    (secs.ceil() as u64).max(1)
}

/// Case-folds and trims an account identifier. `None` if nothing is left.
pub fn normalize_account(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

pub fn ip_key(ip: &str) -> String {
    format!("rl:login:ip:{ip}")
}

pub fn account_key(normalized_email: &str) -> String {
    format!("rl:login:email:{normalized_email}")
}

#[derive(Clone)]
pub struct LoginRateLimiter {
    limiter: TokenBucketLimiter,
    ip: LimitRule,
    account: LimitRule,
    fail_policy: FailPolicy,
}

impl LoginRateLimiter {
    pub fn new(
        limiter: TokenBucketLimiter,
        ip: LimitRule,
        account: LimitRule,
        fail_policy: FailPolicy,
    ) -> Self {
        Self {
            limiter,
            ip,
            account,
            fail_policy,
        }
    }

    pub fn from_config(limiter: TokenBucketLimiter, config: &RateLimitConfig) -> Self {
        Self::new(
            limiter,
            config.ip_rule(),
            config.account_rule(),
            config.fail_policy,
        )
    }

    pub fn fail_policy(&self) -> FailPolicy {
        self.fail_policy
    }

    /// Decides whether a login attempt from `client_ip` for `account` may
    /// proceed to the password check. Never fails: store errors are
    /// resolved by the configured [`FailPolicy`].
    pub async fn admit_login(&self, client_ip: &str, account: Option<&str>) -> Verdict {
        let verdict = self.check(&ip_key(client_ip), self.ip).await;
        if !verdict.allowed {
            tracing::warn!(ip = %client_ip, retry_after = verdict.retry_after_secs, "Login rate limited by IP");
            return verdict;
        }

        let Some(account) = account.and_then(normalize_account) else {
            return verdict;
        };

        let account_verdict = self.check(&account_key(&account), self.account).await;
        if !account_verdict.allowed {
            tracing::warn!(email = %account, retry_after = account_verdict.retry_after_secs, "Login rate limited by account");
        }
        Verdict {
            degraded: verdict.degraded || account_verdict.degraded,
            ..account_verdict
        }
    }

    async fn check(&self, key: &str, rule: LimitRule) -> Verdict {
        match self.limiter.consume(key, rule.spec(), LOGIN_COST).await {
            Ok(c) if c.allowed => Verdict::allowed(rule.capacity),
            Ok(c) => Verdict::denied(rule.capacity, c.retry_after_secs),
            Err(e) => self.on_store_failure(key, rule, e),
        }
    }

    fn on_store_failure(&self, key: &str, rule: LimitRule, error: CoreError) -> Verdict {
        match self.fail_policy {
            FailPolicy::Open => {
                tracing::warn!(key = %key, "Rate limit store unavailable, admitting (fail-open): {error}");
                Verdict {
                    degraded: true,
                    ..Verdict::allowed(rule.capacity)
                }
            }
            FailPolicy::Closed => {
                tracing::warn!(key = %key, "Rate limit store unavailable, refusing (fail-closed): {error}");
                Verdict {
                    degraded: true,
                    ..Verdict::denied(rule.capacity, 1.0)
                }
            }
        }
    }
}
