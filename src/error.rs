use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::auth::jwt::TokenError;
use crate::normalize::{classify, GENERIC_API_MESSAGE};

/// One field's complaint from input validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Every failure a request can end with. Variants are produced where the failure
/// happens; the normalizer never has to guess a failure's shape.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error(transparent)]
    InvalidToken(#[from] TokenError),

    #[error("{0}")]
    Forbidden(String),

    #[error("validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("duplicate key value violates unique constraint on {field}: {value}")]
    Conflict { field: String, value: String },

    #[error("cast to identifier failed for value {value:?} at path {field:?}")]
    MalformedId { field: String, value: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("There was an error sending the email. Try again later!")]
    EmailDelivery(#[source] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_)
            | Self::Conflict { .. }
            | Self::MalformedId { .. }
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            Self::EmailDelivery(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// `"fail"` for client errors, `"error"` for everything else.
    pub fn status(&self) -> &'static str {
        status_label(self.status_code())
    }

    /// Whether the message was written for end users as raised. Raw failures
    /// (driver errors, token errors, validation) only become operational once
    /// production classification rewrites them.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_)
                | Self::Forbidden(_)
                | Self::NotFound(_)
                | Self::BadRequest(_)
                | Self::EmailDelivery(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::InvalidToken(TokenError::Expired) => "token_expired",
            Self::InvalidToken(TokenError::Invalid(_)) => "token_invalid",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
            Self::Conflict { .. } => "conflict",
            Self::MalformedId { .. } => "malformed_id",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::EmailDelivery(_) => "email_delivery",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }

    /// Turns a driver error into `Conflict` when it is a uniqueness violation.
    pub fn from_write(err: sqlx::Error) -> Self {
        match unique_violation(&err) {
            Some((field, value)) => Self::Conflict { field, value },
            None => Self::Database(err),
        }
    }
}

pub fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Marker carried in response extensions so the normalization layer can rebuild
/// the response with knowledge of environment and request surface.
#[derive(Clone)]
pub struct ErrorExtension(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Production-safe JSON; replaced wholesale when the normalization layer runs.
        let classified = classify(&self);
        let (status, message) = if classified.is_operational {
            (classified.status_code, classified.message)
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_API_MESSAGE.to_string())
        };
        let body = json!({ "status": status_label(status), "message": message });
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(ErrorExtension(Arc::new(self)));
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// `Json` whose rejection goes through `AppError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

const UNIQUE_VIOLATION: &str = "23505";

/// Extracts `(field, value)` from a PostgreSQL unique violation.
pub fn unique_violation(err: &sqlx::Error) -> Option<(String, String)> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().as_deref() != Some(UNIQUE_VIOLATION) {
        return None;
    }
    let parsed = db_err
        .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
        .and_then(|pg| pg.detail())
        .and_then(parse_unique_detail);
    Some(parsed.unwrap_or_else(|| {
        (
            db_err.constraint().unwrap_or("unknown").to_string(),
            "unknown".to_string(),
        )
    }))
}

/// Parses `Key (email)=(a@b.c) already exists.`
pub fn parse_unique_detail(detail: &str) -> Option<(String, String)> {
    lazy_static! {
        static ref KEY_RE: Regex = Regex::new(r"Key \((?P<field>[^)]+)\)=\((?P<value>.*)\) already exists").unwrap();
    }
    let caps = KEY_RE.captures(detail)?;
    Some((caps["field"].to_string(), caps["value"].to_string()))
}
