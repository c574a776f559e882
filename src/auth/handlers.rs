use crate::{
    auth::{
        auth::{AuthUser, TOKEN_COOKIE},
        jwt::generate_token,
        password::{verify_dummy, verify_password},
    },
    config::Config,
    error::AppError,
    model::user::UserSql,
    models::LoginReqDto,
};
use actix_web::{
    HttpResponse,
    cookie::{Cookie, SameSite, time::Duration},
    web,
};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};

const INVALID_CREDENTIALS: &str = "用户名或密码错误";

/// Same error for an unknown user and a wrong password.
pub fn check_credentials(found: Option<UserSql>, password: &str) -> Result<UserSql, AppError> {
    match found {
        Some(user) if verify_password(password, &user.password_hash) => Ok(user),
        Some(_) => {
            info!("Invalid credentials: password mismatch");
            Err(AppError::unauthorized(INVALID_CREDENTIALS))
        }
        None => {
            verify_dummy(password);
            info!("Invalid credentials: user not found");
            Err(AppError::unauthorized(INVALID_CREDENTIALS))
        }
    }
}

fn token_cookie(token: String, config: &Config) -> Cookie<'static> {
    Cookie::build(TOKEN_COOKIE, token)
        .path("/")
        .max_age(Duration::seconds(config.token_ttl))
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .finish()
}

/// Login
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token issued and set as cookie", body = Object, example = json!({
            "token": "eyJhbGciOiJIUzI1NiJ9...",
            "user": { "id": 1, "username": "admin", "display_name": "系统管理员", "role": "admin" }
        })),
        (status = 400, description = "Username or password missing"),
        (status = 401, description = "Invalid credentials", body = Object, example = json!({
            "error": "用户名或密码错误"
        }))
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username.trim())
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    let username = user.username.trim().to_string();
    let password = user.password.trim().to_string();

    if username.is_empty() || password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(AppError::bad_request("用户名或密码不能为空"));
    }

    debug!("Fetching user from database");

    let found = sqlx::query_as::<_, UserSql>(
        r#"
        SELECT id, username, password_hash, display_name, role
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(&username)
    .fetch_optional(pool.get_ref())
    .await
    .map_err(|e| {
        error!(error = %e, "Database error while fetching user");
        AppError::internal("系统错误")
    })?;

    let db_user = web::block(move || check_credentials(found, &password)).await??;
    let role = db_user.role()?;

    debug!(user_id = db_user.id, "Password verified, generating token");

    let token = generate_token(
        db_user.id,
        db_user.username.clone(),
        role,
        &config.jwt_secret,
        config.token_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign token");
        AppError::internal("系统错误")
    })?;

    info!(user_id = db_user.id, "Login successful");

    Ok(HttpResponse::Ok()
        .cookie(token_cookie(token.clone(), &config))
        .json(json!({
            "token": token,
            "user": {
                "id": db_user.id,
                "username": db_user.username,
                "display_name": db_user.display_name,
                "role": role,
            }
        })))
}

/// Logout
///
/// Clears the cookie only; an already issued token stays valid until it expires.
#[utoipa::path(
    post,
    path = "/api/logout",
    responses(
        (status = 200, description = "Cookie cleared", body = Object, example = json!({
            "message": "已注销"
        }))
    ),
    tag = "Auth"
)]
pub async fn logout(config: web::Data<Config>) -> HttpResponse {
    let mut cookie = token_cookie(String::new(), &config);
    cookie.make_removal();

    HttpResponse::Ok()
        .cookie(cookie)
        .json(json!({ "message": "已注销" }))
}

/// Current user
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Claims of the current token", body = Object, example = json!({
            "user": { "id": 1, "username": "admin", "role": "admin" }
        })),
        (status = 401, description = "Not logged in")
    ),
    tag = "Auth",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(auth: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "user": {
            "id": auth.user_id,
            "username": auth.username,
            "role": auth.role,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use actix_web::{ResponseError, http::StatusCode};

    fn stored_user(password: &str) -> UserSql {
        UserSql {
            id: 3,
            username: "alice".into(),
            password_hash: hash_password(password).unwrap(),
            display_name: "Alice".into(),
            role: "staff".into(),
        }
    }

    #[test]
    fn valid_credentials_return_the_user() {
        let user = check_credentials(Some(stored_user("secret1")), "secret1").unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.role().unwrap(), crate::model::role::Role::Staff);
    }

    #[test]
    fn unknown_user_and_wrong_password_look_identical() {
        let missing = check_credentials(None, "secret1").unwrap_err();
        let wrong = check_credentials(Some(stored_user("secret1")), "secret2").unwrap_err();

        assert_eq!(missing.to_string(), wrong.to_string());
        assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn logout_expires_the_token_cookie() {
        let config = web::Data::new(Config::from_lookup(|_| None).unwrap());
        let resp = logout(config).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp
            .cookies()
            .find(|c| c.name() == TOKEN_COOKIE)
            .map(|c| c.into_owned())
            .unwrap();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }

    #[actix_web::test]
    async fn me_echoes_the_claims() {
        let auth = AuthUser {
            user_id: 9,
            username: "bob".into(),
            role: crate::model::role::Role::Admin,
        };
        let resp = me(auth).await;
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value, json!({ "user": { "id": 9, "username": "bob", "role": "admin" } }));
    }
}
