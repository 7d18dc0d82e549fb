//! Session gates: `protect` demands a live session, `is_logged_in` resolves one
//! when present, `restrict_to` narrows a protected route to certain roles.

use axum::{
    extract::{FromRef, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::{cookie, extractors::CurrentUser, jwt::TokenCodec};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    users::repo_types::{Role, User},
};

pub const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
pub const USER_GONE: &str = "The user belonging to this token no longer exists.";
pub const PASSWORD_CHANGED: &str = "User recently changed password! Please log in again.";
pub const NO_PERMISSION: &str = "You do not have permission to perform this action";

/// Bearer header first, then the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    bearer.or_else(|| cookie::get_cookie(headers, cookie::SESSION_COOKIE_NAME).filter(|t| !t.is_empty()))
}

/// Resolves the session user or says exactly why there is none.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> AppResult<User> {
    let token = extract_token(headers).ok_or_else(|| AppError::Unauthenticated(NOT_LOGGED_IN.into()))?;

    let claims = TokenCodec::from_ref(state).verify(token).map_err(|e| {
        warn!(error = %e, "session token rejected");
        e
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthenticated(USER_GONE.into()))?;

    if user.changed_password_after(claims.iat) {
        warn!(user_id = %user.id, "token predates password change");
        return Err(AppError::Unauthenticated(PASSWORD_CHANGED.into()));
    }

    Ok(user)
}

pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> AppResult<Response> {
    let user = authenticate(req.headers(), &state).await?;
    debug!(user_id = %user.id, "session accepted");
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Never fails: an unusable session just means an anonymous visitor.
pub async fn is_logged_in(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if extract_token(req.headers()).is_some() {
        match authenticate(req.headers(), &state).await {
            Ok(user) => {
                req.extensions_mut().insert(CurrentUser(user));
            }
            Err(e) => debug!(error = %e, "continuing anonymously"),
        }
    }
    next.run(req).await
}

/// Roles admitted by [`restrict_to`].
#[derive(Debug, Clone, Copy)]
pub struct RoleGate(pub &'static [Role]);

pub fn ensure_role(user: &User, allowed: &[Role]) -> AppResult<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        warn!(user_id = %user.id, role = ?user.role, "role not permitted");
        Err(AppError::Forbidden(NO_PERMISSION.into()))
    }
}

/// Must sit inside [`protect`].
pub async fn restrict_to(
    State(RoleGate(allowed)): State<RoleGate>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    let CurrentUser(user) = req
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthenticated(NOT_LOGGED_IN.into()))?;
    ensure_role(&user, allowed)?;
    Ok(next.run(req).await)
}
