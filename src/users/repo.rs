use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::users::repo_types::{User, UserField};

const USER_COLUMNS: &str =
    "id, full_name, email, password_hash, image_uri, date_created, version";

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new row; the identifier must not exist yet.
    async fn create(&self, user: &User) -> Result<User, AppError>;

    /// Exactly one user whose `field` equals `value`; the lowest id wins on ties.
    async fn find_by_field(&self, field: UserField, value: &str) -> Result<User, AppError>;

    /// Persist all mutable fields if `user.version` is still current.
    ///
    /// Returns the stored row with the bumped version. An absent id is
    /// `NotFound`, a stale version is `Conflict`.
    async fn update(&self, user: &User) -> Result<User, AppError>;

    /// Every user, ordered by id.
    async fn list_all(&self) -> Result<Vec<User>, AppError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<User, AppError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, full_name, email, password_hash, image_uri, date_created, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.full_name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.image_uri)
            .bind(&user.date_created)
            .bind(user.version)
            .fetch_one(&self.db)
            .await?;
        Ok(row)
    }

    async fn find_by_field(&self, field: UserField, value: &str) -> Result<User, AppError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1 ORDER BY id LIMIT 1",
            field.column()
        );
        let query = sqlx::query_as::<_, User>(&sql);
        let query = match field {
            UserField::Id => {
                let Ok(id) = Uuid::parse_str(value) else {
                    return Err(AppError::not_found("user", value));
                };
                query.bind(id)
            }
            UserField::Email | UserField::FullName => query.bind(value),
        };

        query
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("user", value))
    }

    async fn update(&self, user: &User) -> Result<User, AppError> {
        let sql = format!(
            r#"
            UPDATE users
               SET full_name = $3, email = $4, password_hash = $5, image_uri = $6,
                   version = version + 1
             WHERE id = $1 AND version = $2
            RETURNING {USER_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(user.version)
            .bind(&user.full_name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.image_uri)
            .fetch_optional(&self.db)
            .await?;

        if let Some(row) = updated {
            return Ok(row);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user.id)
            .fetch_one(&self.db)
            .await?;
        if exists {
            Err(AppError::Conflict(format!(
                "user {} was modified concurrently",
                user.id
            )))
        } else {
            Err(AppError::not_found("user", user.id))
        }
    }

    async fn list_all(&self) -> Result<Vec<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let rows = sqlx::query_as::<_, User>(&sql).fetch_all(&self.db).await?;
        Ok(rows)
    }
}
