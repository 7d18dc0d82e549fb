use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod cookie;
pub(crate) mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::auth_routes(state)
}
