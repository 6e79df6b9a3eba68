use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
mod repo;

pub fn router() -> Router<AppState> {
    handlers::project_routes()
}
