use axum::{
    extract::{Path, State},
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use super::repo_types::Role;
use crate::{
    auth::{
        extractors::CurrentUser,
        middleware::{protect, restrict_to, RoleGate},
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub const NO_USER_WITH_ID: &str = "No user found with that ID";

const ADMIN_ONLY: RoleGate = RoleGate(&[Role::Admin]);

pub fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route(
            "/:id",
            get(get_user).route_layer(middleware::from_fn_with_state(ADMIN_ONLY, restrict_to)),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), protect))
}

pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "status": "success", "data": { "user": user } }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let user_id = Uuid::parse_str(&id).map_err(|_| AppError::MalformedId {
        field: "id".into(),
        value: id.clone(),
    })?;
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(NO_USER_WITH_ID.into()))?;
    Ok(Json(json!({ "status": "success", "data": { "user": user } })))
}
