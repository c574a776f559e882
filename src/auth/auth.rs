use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::model::role::Role;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

pub const TOKEN_COOKIE: &str = "token";

/// Identity of the caller, decoded from a verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

/// Cookie first, then `Authorization: Bearer`.
pub fn extract_token(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(TOKEN_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolves the caller from the request, without consulting extensions.
pub fn authenticate(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let token = extract_token(req).ok_or_else(|| AppError::unauthorized("未登录"))?;

    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| AppError::internal("系统错误"))?;

    let claims = verify_token(&token, &config.jwt_secret).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        AppError::unauthorized("登录已过期")
    })?;

    Ok(AuthUser {
        user_id: claims.user_id,
        username: claims.username,
        role: claims.role,
    })
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Set by auth_middleware on protected scopes.
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        ready(authenticate(req))
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("权限不足"))
        }
    }
}
