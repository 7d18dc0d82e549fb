//! Single choke point that turns any [`AppError`] into the client-facing
//! error contract. Development responses carry full detail; production
//! responses only carry messages that were written for end users.

use axum::{
    extract::{FromRef, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::{
    auth::jwt::TokenError,
    config::Environment,
    error::{status_label, unique_violation, AppError, ErrorExtension},
    state::AppState,
    views,
};

pub const GENERIC_API_MESSAGE: &str = "Something went very wrong!";
pub const GENERIC_PAGE_MESSAGE: &str = "Please try again later.";
pub const ERROR_PAGE_TITLE: &str = "Something went wrong!";

/// Which kind of client the request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Api,
    Page,
}

impl Surface {
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/api") {
            Surface::Api
        } else {
            Surface::Page
        }
    }
}

/// Outcome of production classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub status_code: StatusCode,
    pub message: String,
    pub is_operational: bool,
}

impl Classified {
    fn operational(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            is_operational: true,
        }
    }
}

/// Rewrites known failure kinds into operational errors with safe messages.
///
/// Each error is exactly one variant, so rules never overlap. They are listed
/// in their documented precedence: malformed identifier, uniqueness conflict,
/// validation, bad signature, expired signature, then raw driver errors.
pub fn classify(err: &AppError) -> Classified {
    match err {
        AppError::MalformedId { field, value } => {
            Classified::operational(StatusCode::BAD_REQUEST, format!("Invalid {field}: {value}."))
        }
        AppError::Conflict { value, .. } => duplicate(value),
        AppError::Validation(fields) => {
            let complaints = fields
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join(". ");
            Classified::operational(
                StatusCode::BAD_REQUEST,
                format!("Invalid input data. {complaints}"),
            )
        }
        AppError::InvalidToken(TokenError::Invalid(_)) => Classified::operational(
            StatusCode::UNAUTHORIZED,
            "Invalid token, please log in again.",
        ),
        AppError::InvalidToken(TokenError::Expired) => Classified::operational(
            StatusCode::UNAUTHORIZED,
            "Your token has expired, please log in again.",
        ),
        AppError::Database(sqlx::Error::RowNotFound) => {
            Classified::operational(StatusCode::NOT_FOUND, "No document found with that ID.")
        }
        AppError::Database(db) if unique_violation(db).is_some() => {
            let (_, value) = unique_violation(db).unwrap_or_default();
            duplicate(&value)
        }
        other if other.is_operational() => {
            Classified::operational(other.status_code(), other.to_string())
        }
        other => Classified {
            status_code: other.status_code(),
            message: other.to_string(),
            is_operational: false,
        },
    }
}

fn duplicate(value: &str) -> Classified {
    Classified::operational(
        StatusCode::BAD_REQUEST,
        format!("Duplicate field value: {value}. Please use another value!"),
    )
}

/// The uniform error shape sent to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedError {
    #[serde(skip)]
    pub status_code: StatusCode,
    pub status: &'static str,
    pub message: String,
    #[serde(skip)]
    pub is_operational: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorNormalizer {
    environment: Environment,
}

impl FromRef<AppState> for ErrorNormalizer {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.config.environment)
    }
}

impl ErrorNormalizer {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn normalize(&self, err: &AppError, surface: Surface) -> NormalizedError {
        match self.environment {
            Environment::Development => {
                if !err.is_operational() {
                    error!(kind = err.kind(), error = %err, detail = ?err, "request failed");
                }
                let status_code = err.status_code();
                NormalizedError {
                    status_code,
                    status: status_label(status_code),
                    message: err.to_string(),
                    is_operational: err.is_operational(),
                    error: Some(json!({
                        "kind": err.kind(),
                        "statusCode": status_code.as_u16(),
                        "isOperational": err.is_operational(),
                        "detail": format!("{err:?}"),
                    })),
                    stack: Some(source_chain(err)),
                }
            }
            Environment::Production => {
                let classified = classify(err);
                if classified.is_operational {
                    return NormalizedError {
                        status_code: classified.status_code,
                        status: status_label(classified.status_code),
                        message: classified.message,
                        is_operational: true,
                        error: None,
                        stack: None,
                    };
                }
                error!(kind = err.kind(), error = %err, detail = ?err, "unexpected error");
                let message = match surface {
                    Surface::Api => GENERIC_API_MESSAGE,
                    Surface::Page => GENERIC_PAGE_MESSAGE,
                };
                NormalizedError {
                    status_code: StatusCode::INTERNAL_SERVER_ERROR,
                    status: "error",
                    message: message.to_string(),
                    is_operational: false,
                    error: None,
                    stack: None,
                }
            }
        }
    }

    pub fn respond(&self, err: &AppError, surface: Surface) -> Response {
        let normalized = self.normalize(err, surface);
        match surface {
            Surface::Api => (normalized.status_code, Json(normalized)).into_response(),
            Surface::Page => (
                normalized.status_code,
                views::error_page(ERROR_PAGE_TITLE, &normalized.message),
            )
                .into_response(),
        }
    }
}

fn source_chain(err: &AppError) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut current = std::error::Error::source(err);
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

/// Rebuilds every error response that carries an [`ErrorExtension`].
pub async fn normalize_errors(
    State(normalizer): State<ErrorNormalizer>,
    req: Request,
    next: Next,
) -> Response {
    let surface = Surface::from_path(req.uri().path());
    let response = next.run(req).await;
    match response.extensions().get::<ErrorExtension>().cloned() {
        Some(ErrorExtension(err)) => normalizer.respond(&err, surface),
        None => response,
    }
}
