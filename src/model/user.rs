use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::model::role::Role;

/// Raw `users` row; `role` is read as text and checked by [`UserSql::role`].
#[derive(Debug, FromRow)]
pub struct UserSql {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: String,
}

impl UserSql {
    pub fn role(&self) -> Result<Role, AppError> {
        Role::from_str(&self.role).map_err(|_| {
            tracing::error!(user_id = self.id, role = %self.role, "Unknown role stored for user");
            AppError::internal("系统错误")
        })
    }
}

#[derive(Debug, FromRow)]
pub struct UserListRow {
    pub id: u64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// User as returned to admins. The password hash never leaves the database layer.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "Alice")]
    pub display_name: String,
    pub role: Role,
    #[schema(example = "2026-01-01T00:00:00Z", format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserListRow> for User {
    type Error = AppError;

    fn try_from(row: UserListRow) -> Result<Self, Self::Error> {
        let role = Role::from_str(&row.role).map_err(|_| {
            tracing::error!(user_id = row.id, role = %row.role, "Unknown role stored for user");
            AppError::internal("系统错误")
        })?;

        Ok(User {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            role,
            created_at: row.created_at,
        })
    }
}
