use crate::auth::auth::{AuthUser, authenticate};
use crate::auth::csrf::CsrfPending;
use crate::error::AppError;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
};

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let auth_user = match authenticate(req.request()) {
        Ok(user) => user,
        Err(e) => {
            // The form token has not been read yet, so the request is still unverified.
            let e = if req.extensions().get::<CsrfPending>().is_some() {
                AppError::forbidden("CSRF 验证失败")
            } else {
                e
            };
            let resp = e.error_response();
            return Ok(req.into_response(resp));
        }
    };

    tracing::debug!(user_id = auth_user.user_id, role = %auth_user.role, "Authenticated");
    req.extensions_mut().insert(auth_user);

    next.call(req).await
}

/// Must sit inside a scope wrapped by [`auth_middleware`].
pub async fn admin_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let verdict = match req.extensions().get::<AuthUser>() {
        Some(user) => user.require_admin(),
        None => Err(AppError::unauthorized("未登录")),
    };

    if let Err(e) = verdict {
        let resp = e.error_response();
        return Ok(req.into_response(resp));
    }

    next.call(req).await
}
