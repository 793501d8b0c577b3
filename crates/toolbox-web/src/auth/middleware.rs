use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use toolbox_core::{RejectReason, SessionOutcome};

use super::cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::error::AppError;
use crate::state::AppState;

const NOT_AUTHENTICATED: &str = "Not authenticated";

/// The subject the session gate admitted. Only present on routes behind
/// [`session_gate`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub sub: String,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Auth(NOT_AUTHENTICATED.to_string()))
    }
}

/// Admits requests carrying a valid access cookie, or a valid refresh
/// cookie in which case a fresh access cookie rides on the response.
pub async fn session_gate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let access = cookies::read_cookie(req.headers(), ACCESS_COOKIE).map(str::to_owned);
    let refresh = cookies::read_cookie(req.headers(), REFRESH_COOKIE).map(str::to_owned);

    match state
        .credentials
        .authenticate(access.as_deref(), refresh.as_deref())?
    {
        SessionOutcome::Authenticated { subject } => {
            req.extensions_mut().insert(AuthUser { sub: subject });
            Ok(next.run(req).await)
        }
        SessionOutcome::Refreshed { subject, access } => {
            req.extensions_mut().insert(AuthUser { sub: subject });
            let mut response = next.run(req).await;
            cookies::append_session_cookie(
                response.headers_mut(),
                &access,
                state.config.cookie_secure(),
            )?;
            Ok(response)
        }
        SessionOutcome::Rejected(RejectReason::NoCredentials) => {
            Err(AppError::Auth(NOT_AUTHENTICATED.to_string()))
        }
        SessionOutcome::Rejected(RejectReason::InvalidCredentials) => {
            tracing::debug!("Session rejected: invalid credentials");
            Err(AppError::Forbidden(NOT_AUTHENTICATED.to_string()))
        }
    }
}
