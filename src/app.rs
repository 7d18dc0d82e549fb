use std::net::SocketAddr;

use axum::{
    extract::{FromRef, OriginalUri},
    middleware,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth,
    error::AppError,
    normalize::{normalize_errors, ErrorNormalizer},
    state::AppState,
    users, views,
};

pub fn build_app(state: AppState) -> Router {
    let normalizer = ErrorNormalizer::from_ref(&state);
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .nest("/users", auth::router(&state).merge(users::router(&state)))
                .route("/health", get(|| async { "ok" })),
        )
        .merge(views::router(&state))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(normalizer, normalize_errors))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(format!("Can't find {} on this server!", uri.path()))
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::jwt::TokenCodec,
        config::Environment,
        state::Fake,
        users::repo_types::Role,
    };
    use axum::{
        body::Body,
        http::{header, HeaderMap, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;

    struct TestResponse {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    }

    impl TestResponse {
        fn json(&self) -> Value {
            serde_json::from_str(&self.body).expect("json body")
        }

        fn set_cookie(&self) -> Option<&str> {
            self.headers.get(header::SET_COOKIE).and_then(|v| v.to_str().ok())
        }
    }

    fn setup(env: Environment) -> (Fake, Router) {
        let fake = AppState::fake(env);
        let app = build_app(fake.state.clone());
        (fake, app)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        TestResponse {
            status,
            headers,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }

    fn session(fake: &Fake, user_id: uuid::Uuid) -> String {
        format!("jwt={}", TokenCodec::from_ref(&fake.state).issue(user_id).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_, app) = setup(Environment::Production);
        let res = send(&app, Method::GET, "/api/v1/health", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body, "ok");
    }

    #[tokio::test]
    async fn login_checks_credentials_and_sets_cookie() {
        let (fake, app) = setup(Environment::Production);
        fake.seed_user(Role::User, "jonas@example.com", "pass1234");

        let res = send(&app, Method::POST, "/api/v1/users/login", None, Some(json!({ "email": "jonas@example.com" }))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json()["message"], "Please provide email and password!");

        let res = send(
            &app,
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "jonas@example.com", "password": "wrong-pass" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json(), json!({ "status": "fail", "message": "incorrect email or password" }));

        let res = send(
            &app,
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "Jonas@Example.com", "password": "pass1234" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        let body = res.json();
        assert_eq!(body["status"], "success");
        let token = body["token"].as_str().unwrap();
        assert!(res.set_cookie().unwrap().starts_with(&format!("jwt={token};")));
        assert!(res.set_cookie().unwrap().contains("Secure"));
        assert!(!res.body.contains("password"));
    }

    #[tokio::test]
    async fn protected_api_without_token_is_401_json() {
        let (_, app) = setup(Environment::Production);
        let res = send(&app, Method::GET, "/api/v1/users/me", None, None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json()["status"], "fail");
        assert!(res.json()["message"].as_str().unwrap().starts_with("You are not logged in"));
    }

    #[tokio::test]
    async fn protected_api_reports_expired_token() {
        let (fake, app) = setup(Environment::Production);
        let user = fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let old = TokenCodec::from_ref(&fake.state)
            .issue_at(user.id, OffsetDateTime::now_utc() - Duration::hours(1))
            .unwrap();
        let res = send(&app, Method::GET, "/api/v1/users/me", Some(&format!("jwt={old}")), None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json()["message"], "Your token has expired, please log in again.");
    }

    #[tokio::test]
    async fn signup_creates_user_and_welcomes_them() {
        let (fake, app) = setup(Environment::Production);
        let res = send(
            &app,
            Method::POST,
            "/api/v1/users/signup",
            None,
            Some(json!({
                "name": "Laura Wilson",
                "email": "laura@example.com",
                "password": "pass1234",
                "passwordConfirm": "pass1234",
                "role": "admin"
            })),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.json()["data"]["user"]["role"], "user");
        assert!(res.set_cookie().is_some());
        let sent = fake.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "laura@example.com");
    }

    #[tokio::test]
    async fn signup_survives_welcome_email_failure() {
        let (fake, app) = setup(Environment::Production);
        fake.mailer.fail_sends(true);
        let res = send(
            &app,
            Method::POST,
            "/api/v1/users/signup",
            None,
            Some(json!({ "name": "A", "email": "a@example.com", "password": "pass1234", "passwordConfirm": "pass1234" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn signup_validation_is_rewritten_in_production() {
        let (_, app) = setup(Environment::Production);
        let res = send(
            &app,
            Method::POST,
            "/api/v1/users/signup",
            None,
            Some(json!({ "name": "A", "email": "a@example.com", "password": "pass1234", "passwordConfirm": "pass4321" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json()["message"], "Invalid input data. Passwords are not the same!");
    }

    fn duplicate_signup() -> Value {
        json!({
            "name": "Jonas",
            "email": "jonas@example.com",
            "password": "pass1234",
            "passwordConfirm": "pass1234"
        })
    }

    #[tokio::test]
    async fn duplicate_signup_in_production_hides_detail() {
        let (fake, app) = setup(Environment::Production);
        fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let res = send(&app, Method::POST, "/api/v1/users/signup", None, Some(duplicate_signup())).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            res.json(),
            json!({
                "status": "fail",
                "message": "Duplicate field value: jonas@example.com. Please use another value!"
            })
        );
    }

    #[tokio::test]
    async fn duplicate_signup_in_development_shows_detail() {
        let (fake, app) = setup(Environment::Development);
        fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let res = send(&app, Method::POST, "/api/v1/users/signup", None, Some(duplicate_signup())).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let body = res.json();
        assert_eq!(body["error"]["kind"], "conflict");
        assert!(body["stack"].as_array().is_some_and(|s| !s.is_empty()));
        assert!(body["message"].as_str().unwrap().contains("jonas@example.com"));
    }

    #[tokio::test]
    async fn optional_auth_page_ignores_garbage_cookie() {
        let (fake, app) = setup(Environment::Production);
        let res = send(&app, Method::GET, "/", Some("jwt=garbage"), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains("Log in"));

        let user = fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let res = send(&app, Method::GET, "/", Some(&session(&fake, user.id)), None).await;
        assert!(res.body.contains("Welcome back, Jonas!"));
    }

    #[tokio::test]
    async fn protected_page_renders_html_error() {
        let (_, app) = setup(Environment::Production);
        let res = send(&app, Method::GET, "/me", None, None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        let content_type = res.headers.get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
        assert!(res.body.contains("Something went wrong!"));
        assert!(res.body.contains("You are not logged in!"));
    }

    #[tokio::test]
    async fn forgot_password_email_failure_clears_reset_state() {
        let (fake, app) = setup(Environment::Production);
        let user = fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        fake.mailer.fail_sends(true);

        let res = send(&app, Method::POST, "/api/v1/users/forgotPassword", None, Some(json!({ "email": "jonas@example.com" }))).await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.json()["status"], "error");
        assert_eq!(res.json()["message"], "There was an error sending the email. Try again later!");

        let stored = fake.users.get(user.id).unwrap();
        assert!(stored.password_reset_token.is_none());
        assert!(stored.password_reset_expires.is_none());
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_is_404() {
        let (_, app) = setup(Environment::Production);
        let res = send(&app, Method::POST, "/api/v1/users/forgotPassword", None, Some(json!({ "email": "ghost@example.com" }))).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["message"], "There is no user with that email address.");
    }

    #[tokio::test]
    async fn password_reset_flow() {
        let (fake, app) = setup(Environment::Production);
        let user = fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let before_reset = TokenCodec::from_ref(&fake.state)
            .issue_at(user.id, OffsetDateTime::now_utc() - Duration::minutes(1))
            .unwrap();

        let res = send(&app, Method::POST, "/api/v1/users/forgotPassword", None, Some(json!({ "email": "jonas@example.com" }))).await;
        assert_eq!(res.status, StatusCode::OK);
        let sent = fake.mailer.sent();
        let link = sent[0]
            .body
            .split_whitespace()
            .find(|w| w.contains("/resetPassword/"))
            .unwrap();
        let token = link.rsplit('/').next().unwrap();
        assert!(link.starts_with("http://127.0.0.1:3000/api/v1/users/resetPassword/"));

        let res = send(
            &app,
            Method::PATCH,
            "/api/v1/users/resetPassword/not-the-token",
            None,
            Some(json!({ "password": "newpass123", "passwordConfirm": "newpass123" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json()["message"], "Token is invalid or has expired");

        let res = send(
            &app,
            Method::PATCH,
            &format!("/api/v1/users/resetPassword/{token}"),
            None,
            Some(json!({ "password": "newpass123", "passwordConfirm": "newpass123" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(fake.users.get(user.id).unwrap().password_reset_token.is_none());

        let res = send(
            &app,
            Method::GET,
            "/api/v1/users/me",
            Some(&format!("jwt={before_reset}")),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json()["message"], "User recently changed password! Please log in again.");

        let res = send(
            &app,
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "jonas@example.com", "password": "newpass123" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn update_password_requires_current_password() {
        let (fake, app) = setup(Environment::Production);
        let user = fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let cookie = session(&fake, user.id);

        let res = send(
            &app,
            Method::PATCH,
            "/api/v1/users/updateMyPassword",
            Some(&cookie),
            Some(json!({ "passwordCurrent": "nope", "password": "newpass123", "passwordConfirm": "newpass123" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json()["message"], "Your current password is wrong.");

        let res = send(
            &app,
            Method::PATCH,
            "/api/v1/users/updateMyPassword",
            Some(&cookie),
            Some(json!({ "passwordCurrent": "pass1234", "password": "newpass123", "passwordConfirm": "newpass123" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.json()["token"].is_string());
    }

    #[tokio::test]
    async fn token_from_password_change_replaces_older_sessions() {
        let (fake, app) = setup(Environment::Production);
        let user = fake.seed_user(Role::User, "jonas@example.com", "pass1234");
        let old = TokenCodec::from_ref(&fake.state)
            .issue_at(user.id, OffsetDateTime::now_utc() - Duration::minutes(1))
            .unwrap();
        let old_cookie = format!("jwt={old}");

        let res = send(
            &app,
            Method::PATCH,
            "/api/v1/users/updateMyPassword",
            Some(&old_cookie),
            Some(json!({ "passwordCurrent": "pass1234", "password": "newpass123", "passwordConfirm": "newpass123" })),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(fake.users.get(user.id).unwrap().password_changed_at.is_some());
        let fresh = res.json()["token"].as_str().unwrap().to_string();

        let res = send(&app, Method::GET, "/api/v1/users/me", Some(&format!("jwt={fresh}")), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.json()["data"]["user"]["email"], "jonas@example.com");

        let res = send(&app, Method::GET, "/api/v1/users/me", Some(&old_cookie), None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json()["message"], "User recently changed password! Please log in again.");
    }

    #[tokio::test]
    async fn admin_gate_on_user_lookup() {
        let (fake, app) = setup(Environment::Production);
        let user = fake.seed_user(Role::Guide, "guide@example.com", "pass1234");
        let admin = fake.seed_user(Role::Admin, "admin@example.com", "pass1234");
        let admin_cookie = session(&fake, admin.id);

        let res = send(&app, Method::GET, &format!("/api/v1/users/{}", admin.id), Some(&session(&fake, user.id)), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.json()["message"], "You do not have permission to perform this action");

        let res = send(&app, Method::GET, "/api/v1/users/not-a-uuid", Some(&admin_cookie), None).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json()["message"], "Invalid id: not-a-uuid.");

        let missing = uuid::Uuid::new_v4();
        let res = send(&app, Method::GET, &format!("/api/v1/users/{missing}"), Some(&admin_cookie), None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["message"], "No user found with that ID");

        let res = send(&app, Method::GET, &format!("/api/v1/users/{}", user.id), Some(&admin_cookie), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.json()["data"]["user"]["email"], "guide@example.com");
    }

    #[tokio::test]
    async fn logout_overwrites_session_cookie() {
        let (_, app) = setup(Environment::Production);
        let res = send(&app, Method::GET, "/api/v1/users/logout", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.set_cookie().unwrap().starts_with("jwt=loggedout;"));

        let res = send(&app, Method::GET, "/me", Some("jwt=loggedout"), None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert!(res.body.contains("Invalid token, please log in again."));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (_, app) = setup(Environment::Production);
        let res = send(&app, Method::GET, "/api/v1/tours-that-dont-exist", None, None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["message"], "Can't find /api/v1/tours-that-dont-exist on this server!");
    }
}
