use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::store::map_not_found;

const GET_AUTH_BY_NAME: &str = "
    SELECT id, name, password_hash, role, created_at, updated_at
    FROM users
    WHERE name = $1
    LIMIT 1
";

#[derive(Debug, FromRow)]
struct UserAuthRow {
    id: i64,
    name: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_auth_by_name(&self, name: &str) -> Result<(User, String), AppError> {
        let row = sqlx::query_as::<_, UserAuthRow>(GET_AUTH_BY_NAME)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_not_found(err, AppError::UserNotFound))?;

        let role = Role::parse(&row.role).ok_or_else(|| {
            AppError::Infrastructure(format!("unknown user role in row: {}", row.role))
        })?;

        let user = User {
            id: row.id,
            name: row.name,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };

        Ok((user, row.password_hash))
    }
}
