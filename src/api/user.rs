use crate::{
    auth::{auth::AuthUser, password::hash_password},
    error::{AppError, parse_id},
    model::user::{User, UserListRow},
    models::{CreateUserReq, ResetPasswordReq},
};
use actix_web::{HttpResponse, web};
use serde::Serialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_USERNAME_LEN: usize = 50;

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub data: Vec<User>,
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request("密码至少6位"));
    }
    Ok(())
}

/// Returns the trimmed username and the display name to store.
pub fn validate_new_user(req: &CreateUserReq) -> Result<(String, String), AppError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("参数错误: 用户名不能为空"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::bad_request("参数错误: 用户名过长"));
    }
    validate_password(&req.password)?;

    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(username);
    if display_name.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::bad_request("参数错误: 显示名称过长"));
    }

    Ok((username.to_string(), display_name.to_string()))
}

fn create_user_error(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            info!("Username already exists");
            AppError::conflict("用户名已存在")
        }
        e => {
            error!(error = %e, "Failed to create user");
            AppError::internal("创建失败")
        }
    }
}

/// Maps the DELETE outcome: zero rows is a missing user, a FK hit means violations still point at it.
fn delete_user_outcome(id: u64, result: Result<u64, sqlx::Error>) -> Result<(), AppError> {
    match result {
        Ok(0) => Err(AppError::not_found("用户不存在")),
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
            Err(AppError::conflict("该用户仍有违纪记录，无法删除"))
        }
        Err(e) => {
            error!(error = %e, user_id = id, "Failed to delete user");
            Err(AppError::internal("删除失败"))
        }
    }
}

async fn hash_blocking(password: String) -> Result<String, AppError> {
    web::block(move || hash_password(&password))
        .await?
        .map_err(|e| {
            error!(error = %e, "Failed to hash password");
            AppError::internal("系统错误")
        })
}

/// List users
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All users ordered by id", body = UserListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only")
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_users(pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, UserListRow>(
        "SELECT id, username, display_name, role, created_at FROM users ORDER BY id",
    )
    .fetch_all(pool.get_ref())
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to list users");
        AppError::internal("查询失败")
    })?;

    let data = rows
        .into_iter()
        .map(User::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(UserListResponse { data }))
}

/// Create user
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserReq,
    responses(
        (status = 200, description = "User created", body = Object, example = json!({
            "message": "用户创建成功"
        })),
        (status = 400, description = "Invalid username, password or role"),
        (status = 409, description = "Username taken", body = Object, example = json!({
            "error": "用户名已存在"
        }))
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
#[instrument(name = "create_user", skip_all, fields(admin_id = auth.user_id, username = %payload.username.trim()))]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUserReq>,
) -> Result<HttpResponse, AppError> {
    let (username, display_name) = validate_new_user(&payload)?;
    let hash = hash_blocking(payload.password.clone()).await?;

    let result = sqlx::query(
        "INSERT INTO users (username, password_hash, display_name, role) VALUES (?, ?, ?, ?)",
    )
    .bind(&username)
    .bind(&hash)
    .bind(&display_name)
    .bind(payload.role.as_ref())
    .execute(pool.get_ref())
    .await;

    let res = result.map_err(create_user_error)?;
    info!(user_id = res.last_insert_id(), role = %payload.role, "User created");
    Ok(HttpResponse::Ok().json(json!({ "message": "用户创建成功" })))
}

/// Delete user
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(
        ("id" = u64, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Deleted", body = Object, example = json!({
            "message": "删除成功"
        })),
        (status = 400, description = "Invalid id or self-deletion"),
        (status = 404, description = "No such user"),
        (status = 409, description = "User still referenced by violations")
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
#[instrument(name = "delete_user", skip(auth, pool), fields(admin_id = auth.user_id))]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id(&path).map_err(|_| AppError::bad_request("无效 ID"))?;

    if id == auth.user_id {
        return Err(AppError::bad_request("不能删除自己"));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map(|res| res.rows_affected());
    delete_user_outcome(id, result)?;

    info!(user_id = id, "User deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "删除成功" })))
}

/// Reset password
///
/// No old-password check; admins set the new password directly.
#[utoipa::path(
    post,
    path = "/api/users/{id}/reset-password",
    params(
        ("id" = u64, Path, description = "User ID")
    ),
    request_body = ResetPasswordReq,
    responses(
        (status = 200, description = "Password replaced", body = Object, example = json!({
            "message": "密码重置成功"
        })),
        (status = 400, description = "Password shorter than 6 characters"),
        (status = 404, description = "No such user")
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
#[instrument(name = "reset_password", skip(auth, pool, payload), fields(admin_id = auth.user_id))]
pub async fn reset_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    payload: web::Json<ResetPasswordReq>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id(&path).map_err(|_| AppError::bad_request("无效 ID"))?;
    validate_password(&payload.password)?;

    let hash = hash_blocking(payload.password.clone()).await?;

    let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(&hash)
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(|e| {
            error!(error = %e, user_id = id, "Failed to reset password");
            AppError::internal("重置失败")
        })?;

    // Fresh salt means the hash always changes, so zero rows means no such user.
    if result.rows_affected() == 0 {
        return Err(AppError::not_found("用户不存在"));
    }

    info!(user_id = id, "Password reset");
    Ok(HttpResponse::Ok().json(json!({ "message": "密码重置成功" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use actix_web::{ResponseError, http::StatusCode};
    use sqlx::error::{DatabaseError, ErrorKind};

    fn req(username: &str, password: &str, display_name: Option<&str>) -> CreateUserReq {
        CreateUserReq {
            username: username.into(),
            password: password.into(),
            display_name: display_name.map(str::to_owned),
            role: Role::Staff,
        }
    }

    #[test]
    fn display_name_defaults_to_username() {
        let (username, display) = validate_new_user(&req("  alice ", "secret1", None)).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(display, "alice");

        let (_, display) = validate_new_user(&req("alice", "secret1", Some("  "))).unwrap();
        assert_eq!(display, "alice");

        let (_, display) = validate_new_user(&req("alice", "secret1", Some("Alice Li"))).unwrap();
        assert_eq!(display, "Alice Li");
    }

    #[test]
    fn short_password_is_rejected() {
        assert!(validate_new_user(&req("alice", "12345", None)).is_err());
        assert!(validate_new_user(&req("alice", "123456", None)).is_ok());
        assert!(validate_password("密码密码密码").is_ok());
    }

    #[test]
    fn blank_or_long_username_is_rejected() {
        assert!(validate_new_user(&req("   ", "secret1", None)).is_err());
        assert!(validate_new_user(&req(&"u".repeat(51), "secret1", None)).is_err());
    }

    #[test]
    fn create_request_rejects_unknown_roles() {
        let ok: Result<CreateUserReq, _> = serde_json::from_str(
            r#"{"username":"alice","password":"secret1","role":"staff"}"#,
        );
        assert!(ok.is_ok());

        let bad: Result<CreateUserReq, _> = serde_json::from_str(
            r#"{"username":"alice","password":"secret1","role":"owner"}"#,
        );
        assert!(bad.is_err());
    }

    #[derive(Debug)]
    enum FakeKind {
        Unique,
        ForeignKey,
        Other,
    }

    #[derive(Debug)]
    struct FakeDbError(FakeKind);

    impl std::fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake database error: {:?}", self.0)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.0 {
                FakeKind::Unique => ErrorKind::UniqueViolation,
                FakeKind::ForeignKey => ErrorKind::ForeignKeyViolation,
                FakeKind::Other => ErrorKind::Other,
            }
        }
    }

    fn db_error(kind: FakeKind) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError(kind)))
    }

    #[test]
    fn duplicate_username_is_a_conflict() {
        let err = create_user_error(db_error(FakeKind::Unique));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "用户名已存在");

        let err = create_user_error(db_error(FakeKind::Other));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn delete_outcome_distinguishes_missing_referenced_and_deleted() {
        assert!(delete_user_outcome(9, Ok(1)).is_ok());

        let err = delete_user_outcome(9, Ok(0)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = delete_user_outcome(9, Err(db_error(FakeKind::ForeignKey))).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = delete_user_outcome(9, Err(sqlx::Error::RowNotFound)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
