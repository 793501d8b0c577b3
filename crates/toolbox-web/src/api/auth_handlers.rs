use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use toolbox_core::{normalize_account, TokenKind};

use crate::auth::client_ip::ClientIp;
use crate::auth::cookies::{self, REFRESH_COOKIE};
use crate::auth::middleware::AuthUser;
use crate::auth::password;
use crate::dto::*;
use crate::error::AppError;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Login is admitted by the rate limiter before the body is validated, so
/// malformed requests are charged like any other attempt.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    body: Bytes,
) -> Result<Response, AppError> {
    let hint = serde_json::from_slice::<LoginHint>(&body)
        .ok()
        .and_then(|h| h.email);

    let verdict = state
        .login_limiter
        .admit_login(&client_ip, hint.as_deref())
        .await;
    if !verdict.allowed {
        return Err(if verdict.degraded {
            AppError::Unavailable {
                retry_after_secs: verdict.retry_after_secs,
            }
        } else {
            AppError::RateLimited {
                retry_after_secs: verdict.retry_after_secs,
                limit: verdict.limit,
            }
        });
    }

    let request: LoginRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid login request: {e}")))?;
    let email = normalize_account(&request.email)
        .ok_or_else(|| AppError::BadRequest("Email is required".to_string()))?;

    tracing::info!("Login attempt for user: {email}");

    let lookup = tokio::time::timeout(
        state.config.rate_limit.store_timeout(),
        state.accounts.password_hash(&email),
    )
    .await
    .map_err(|_| {
        tracing::warn!("Account lookup timed out for user: {email}");
        AppError::Unavailable { retry_after_secs: 1 }
    })??;

    let Some(hash) = lookup else {
        tracing::warn!("Failed login attempt (unknown account) for user: {email}");
        return Err(AppError::Auth(INVALID_CREDENTIALS.to_string()));
    };

    if !password::verify_password_blocking(hash, request.password).await? {
        tracing::warn!("Failed login attempt (wrong password) for user: {email}");
        return Err(AppError::Auth(INVALID_CREDENTIALS.to_string()));
    }

    let access = state.credentials.issue_access(&email)?;
    let refresh = state.credentials.issue_refresh(&email)?;

    let secure = state.config.cookie_secure();
    let mut headers = HeaderMap::new();
    cookies::append_session_cookie(&mut headers, &access, secure)?;
    cookies::append_session_cookie(&mut headers, &refresh, secure)?;

    tracing::info!("Login success for user: {email}");
    Ok((
        headers,
        Json(LoginResponse {
            msg: "Login successful",
            email,
        }),
    )
        .into_response())
}

pub async fn signup(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageResponse>, AppError> {
    let request: SignupRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid signup request: {e}")))?;

    let email = normalize_account(&request.email)
        .filter(|e| is_plausible_email(e))
        .ok_or_else(|| AppError::BadRequest("A valid email is required".to_string()))?;
    if request.password.is_empty() {
        return Err(AppError::BadRequest("Password is required".to_string()));
    }

    tracing::info!("Signup attempt for user: {email}");

    if state.accounts.password_hash(&email).await?.is_some() {
        tracing::warn!("Signup failed (already exists) for user: {email}");
        return Err(AppError::BadRequest("User already exists".to_string()));
    }

    let hash = password::hash_password_blocking(request.password).await?;
    if !state.accounts.register(&email, hash).await? {
        tracing::warn!("Signup failed (already exists) for user: {email}");
        return Err(AppError::BadRequest("User already exists".to_string()));
    }

    tracing::info!("Signup success for user: {email}");
    Ok(Json(MessageResponse {
        msg: "User registered successfully",
    }))
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

pub async fn me(user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse { email: user.sub })
}

/// Always succeeds. Tokens are stateless, so this only tells the browser to
/// drop them.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let refresh = cookies::read_cookie(&headers, REFRESH_COOKIE);
    if let Some(claims) = state.credentials.verify_kind(refresh, TokenKind::Refresh) {
        tracing::info!("Logout for user: {}", claims.sub);
    }

    let mut response_headers = HeaderMap::new();
    cookies::append_expired_cookies(&mut response_headers, state.config.cookie_secure())?;

    Ok((
        response_headers,
        Json(LogoutResponse {
            message: "Logged out",
        }),
    )
        .into_response())
}
