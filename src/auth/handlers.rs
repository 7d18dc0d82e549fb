use axum::{
    extract::{FromRef, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        cookie::{logout_cookie, session_cookie},
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
            SignupRequest, StatusMessage, UpdatePasswordRequest,
        },
        extractors::CurrentUser,
        jwt::TokenCodec,
        middleware::protect,
        password::{hash_password, hash_reset_token, verify_password},
    },
    email::OutgoingEmail,
    error::{AppError, AppJson, AppResult},
    state::AppState,
    users::{
        repo_types::{NewUser, Role, User},
        validation::{normalize_email, validate_new_password, validate_signup},
    },
};

pub const MISSING_CREDENTIALS: &str = "Please provide email and password!";
pub const BAD_CREDENTIALS: &str = "incorrect email or password";
pub const NO_USER_WITH_EMAIL: &str = "There is no user with that email address.";
pub const BAD_RESET_TOKEN: &str = "Token is invalid or has expired";
pub const WRONG_CURRENT_PASSWORD: &str = "Your current password is wrong.";

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/updateMyPassword", patch(update_password))
        .route_layer(middleware::from_fn_with_state(state.clone(), protect));

    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
        .merge(protected)
}

/// Signs a fresh token for `user` and returns it in both the body and the cookie.
fn send_token(state: &AppState, user: User, status: StatusCode) -> AppResult<Response> {
    let token = TokenCodec::from_ref(state).issue(user.id)?;
    let cookie = session_cookie(
        &token,
        state.config.jwt.cookie_ttl_days,
        state.config.environment.is_production(),
    );
    Ok((
        status,
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(AuthResponse::new(token, user)),
    )
        .into_response())
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignupRequest>,
) -> AppResult<Response> {
    let email = normalize_email(&payload.email);
    validate_signup(&payload.name, &email, &payload.password, &payload.password_confirm)?;

    let user = state
        .users
        .create(NewUser {
            name: payload.name.trim().to_string(),
            email,
            password_hash: hash_password(&payload.password)?,
            role: Role::User,
        })
        .await?;
    info!(user_id = %user.id, email = %user.email, "user signed up");

    let welcome = OutgoingEmail::welcome(&user, &format!("{}/me", state.config.app_url));
    if let Err(e) = state.mailer.send(&welcome).await {
        warn!(error = %e, user_id = %user.id, "welcome email failed");
    }

    send_token(&state, user, StatusCode::CREATED)
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Response> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(AppError::BadRequest(MISSING_CREDENTIALS.into()));
    };
    let email = normalize_email(&email);

    let user = state.users.find_by_email(&email).await?;
    let user = match user {
        Some(u) if verify_password(&password, &u.password_hash)? => u,
        _ => {
            warn!(email = %email, "login rejected");
            return Err(AppError::Unauthenticated(BAD_CREDENTIALS.into()));
        }
    };

    info!(user_id = %user.id, "user logged in");
    send_token(&state, user, StatusCode::OK)
}

pub async fn logout() -> impl IntoResponse {
    (
        AppendHeaders([(header::SET_COOKIE, logout_cookie())]),
        Json(StatusMessage::success(None)),
    )
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<StatusMessage>> {
    let email = normalize_email(&payload.email);
    let mut user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::NotFound(NO_USER_WITH_EMAIL.into()))?;

    let token = user.create_password_reset_token(OffsetDateTime::now_utc());
    state.users.save(&user).await?;

    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{token}",
        state.config.app_url
    );
    if let Err(e) = state
        .mailer
        .send(&OutgoingEmail::password_reset(&user, &reset_url))
        .await
    {
        user.clear_password_reset();
        state.users.save(&user).await?;
        return Err(AppError::EmailDelivery(e));
    }

    info!(user_id = %user.id, "password reset token sent");
    Ok(Json(StatusMessage::success(Some("Token sent to email!"))))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> AppResult<Response> {
    let now = OffsetDateTime::now_utc();
    let mut user = state
        .users
        .find_by_reset_token(&hash_reset_token(&token), now)
        .await?
        .ok_or_else(|| AppError::BadRequest(BAD_RESET_TOKEN.into()))?;

    validate_new_password(&payload.password, &payload.password_confirm)?;
    user.set_password(hash_password(&payload.password)?, now);
    user.clear_password_reset();
    state.users.save(&user).await?;

    info!(user_id = %user.id, "password reset");
    send_token(&state, user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    AppJson(payload): AppJson<UpdatePasswordRequest>,
) -> AppResult<Response> {
    if !verify_password(&payload.password_current, &user.password_hash)? {
        return Err(AppError::Unauthenticated(WRONG_CURRENT_PASSWORD.into()));
    }
    validate_new_password(&payload.password, &payload.password_confirm)?;
    user.set_password(hash_password(&payload.password)?, OffsetDateTime::now_utc());
    state.users.save(&user).await?;

    info!(user_id = %user.id, "password updated");
    send_token(&state, user, StatusCode::OK)
}
