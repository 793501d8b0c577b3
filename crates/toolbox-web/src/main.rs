mod accounts;
mod api;
mod auth;
mod config;
mod dto;
mod error;
mod middleware;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use axum::middleware::from_fn;
use toolbox_core::{BucketStore, Clock, MemoryBucketStore, RedisBucketStore, SystemClock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::accounts::InMemoryAccounts;
use crate::config::{ServerConfig, StoreBackend};
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolbox_web=debug,toolbox_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;
    let tls_config = config.tls.clone();
    let tls_enabled = config.tls_enabled();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn BucketStore> = match config.store.backend {
        StoreBackend::Redis => {
            let url = config.store.redis_url.as_deref().unwrap_or_default();
            let store = RedisBucketStore::connect(url)
                .await
                .context("connecting to the rate limit store")?;
            tracing::info!("Rate limit store: redis");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Rate limit store: in-memory (limits are per process)");
            let store = Arc::new(MemoryBucketStore::new());

            // Expired bucket cleanup task
            let sweep_store = store.clone();
            let sweep_clock = clock.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    interval.tick().await;
                    sweep_store.sweep(sweep_clock.now());
                }
            });
            store
        }
    };

    let accounts = Arc::new(InMemoryAccounts::from_users(&config.users));
    tracing::info!("Loaded {} account(s)", accounts.len());

    let cors = cors_layer(&config.cors.allowed_origins)?;
    let state = AppState::new(config, store.clone(), accounts, clock)?;

    let app = if tls_enabled {
        api::app(state)
            .layer(from_fn(middleware::security_headers::security_headers_with_hsts))
    } else {
        api::app(state).layer(from_fn(middleware::security_headers::security_headers))
    };
    let app = app
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    if let (Some(cert), Some(key)) = (&tls_config.cert_path, &tls_config.key_path) {
        use axum_server::tls_rustls::RustlsConfig;
        let rustls_config = RustlsConfig::from_pem_file(cert, key).await?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        tracing::info!("toolbox-web listening on https://{}", bind_addr);
        axum_server::bind_rustls(bind_addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("toolbox-web listening on http://{}", bind_addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    }

    store.close().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Same-origin only unless origins are listed; listed origins may send
/// cookies.
fn cors_layer(allowed_origins: &[String]) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return Ok(cors);
    }

    let origins = allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin {o:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(cors
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
