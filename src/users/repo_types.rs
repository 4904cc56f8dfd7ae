use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,              // assigned once at creation
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub image_uri: String,     // empty until the first upload
    pub date_created: String,  // MM-DD-YYYY
    #[serde(skip_serializing)]
    pub version: i64,          // bumped by every successful update
}

/// Columns `find_by_field` may match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Id,
    Email,
    FullName,
}

impl UserField {
    pub fn column(self) -> &'static str {
        match self {
            UserField::Id => "id",
            UserField::Email => "email",
            UserField::FullName => "full_name",
        }
    }
}

impl std::str::FromStr for UserField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "id" => Ok(UserField::Id),
            "email" => Ok(UserField::Email),
            "full_name" | "fullname" => Ok(UserField::FullName),
            other => Err(format!("unknown user field {other:?}")),
        }
    }
}
