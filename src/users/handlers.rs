use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    error::AppError,
    state::AppState,
    users::{
        dto::{CreateUserRequest, LookupQuery},
        repo_types::{User, UserField},
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/search", get(search_user))
        .route("/users/:id", get(get_user))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = services::create_user(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(services::list_users(&state).await?))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    Ok(Json(services::find_user(&state, UserField::Id, &id).await?))
}

#[instrument(skip(state))]
pub async fn search_user(
    State(state): State<AppState>,
    Query(q): Query<LookupQuery>,
) -> Result<Json<User>, AppError> {
    let field: UserField = q.field.parse().map_err(AppError::Validation)?;
    Ok(Json(services::find_user(&state, field, &q.value).await?))
}
