mod auth_handlers;
mod health;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::middleware::session_gate;
use crate::state::AppState;

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/signup", post(auth_handlers::signup))
        .route("/auth/logout", post(auth_handlers::logout))
}

/// Routes behind the session gate.
pub fn protected_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(auth_handlers::me))
        .route_layer(from_fn_with_state(state, session_gate))
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/health/redis", get(health::redis))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(auth_router())
        .merge(protected_router(state.clone()))
        .merge(health_router())
        .with_state(state)
}
