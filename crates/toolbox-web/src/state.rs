use std::sync::Arc;

use toolbox_core::{BucketStore, Clock, CredentialService, LoginRateLimiter, TokenBucketLimiter};

use crate::accounts::AccountDirectory;
use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub credentials: Arc<CredentialService>,
    pub login_limiter: LoginRateLimiter,
    pub accounts: Arc<dyn AccountDirectory>,
    /// Shared with the limiter; held here for health checks and shutdown.
    pub store: Arc<dyn BucketStore>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn BucketStore>,
        accounts: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let credentials = CredentialService::new(&config.auth.credentials, clock.clone())?;
        let limiter = TokenBucketLimiter::new(store.clone(), clock, config.rate_limit.store_timeout());
        let login_limiter = LoginRateLimiter::from_config(limiter, &config.rate_limit);

        Ok(Self {
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            login_limiter,
            accounts,
            store,
        })
    }
}
