use lazy_static::lazy_static;
use regex::Regex;
use time::{macros::format_description, Date, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::users::dto::CreateUserRequest;
use crate::users::password::hash_password;
use crate::users::repo_types::{User, UserField};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Calendar date as stored on the user row, e.g. `10-14-2026`.
pub(crate) fn format_date(date: Date) -> Result<String, AppError> {
    let fmt = format_description!("[month]-[day]-[year]");
    date.format(fmt)
        .map_err(|e| AppError::Internal(format!("format creation date: {e}")))
}

pub async fn create_user(st: &AppState, req: CreateUserRequest) -> Result<User, AppError> {
    let full_name = req.full_name.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if full_name.is_empty() {
        return Err(AppError::Validation("full_name is required".into()));
    }
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::Validation("invalid email".into()));
    }
    if req.password.is_empty() {
        return Err(AppError::Validation("password is required".into()));
    }

    let user = User {
        id: Uuid::new_v4(),
        full_name,
        email,
        password_hash: hash_password(&req.password)?,
        image_uri: st.config.default_image_uri.clone(),
        date_created: format_date(OffsetDateTime::now_utc().date())?,
        version: 0,
    };

    let user = st.users.create(&user).await?;
    info!(user_id = %user.id, email = %user.email, "user created");
    Ok(user)
}

pub async fn find_user(st: &AppState, field: UserField, value: &str) -> Result<User, AppError> {
    st.users.find_by_field(field, value).await
}

pub async fn list_users(st: &AppState) -> Result<Vec<User>, AppError> {
    st.users.list_all().await
}
