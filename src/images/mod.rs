mod dto;
pub mod handlers;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router(max_upload_bytes: u64) -> Router<AppState> {
    handlers::upload_routes(max_upload_bytes)
}
