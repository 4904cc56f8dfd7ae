use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

/// `GET /users/search?field=email&value=...`
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub field: String,
    pub value: String,
}
