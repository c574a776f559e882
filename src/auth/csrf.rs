use crate::config::Config;
use crate::error::AppError;
use actix_web::cookie::{Cookie, SameSite, time::Duration};
use actix_web::middleware::Next;
use actix_web::{
    Error, FromRequest, HttpMessage, HttpRequest, ResponseError,
    body::BoxBody,
    dev::{Payload, ServiceRequest, ServiceResponse},
    http::{Method, header},
    web::Data,
};
use argon2::password_hash::rand_core::{OsRng, RngCore};
use futures::future::{Ready, ready};
use std::fmt::Write;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CSRF_FIELD: &str = "csrf_token";

/// Token minted for the current safe request, for embedding in pages.
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

/// Expected token for a multipart form that carries it as a field instead of a header.
#[derive(Debug, Clone)]
pub struct CsrfPending(pub String);

impl CsrfPending {
    pub fn verify(&self, submitted: Option<&str>) -> Result<(), AppError> {
        match submitted {
            Some(s) if !s.is_empty() && constant_time_eq(s.as_bytes(), self.0.as_bytes()) => Ok(()),
            _ => Err(AppError::forbidden("CSRF 验证失败")),
        }
    }
}

/// 32 random bytes, lowercase hex.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_safe(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

fn is_multipart(req: &ServiceRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Double-submit cookie check: safe requests get a fresh token, unsafe ones must echo it.
pub async fn csrf_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let (ttl, secure, form_path) = match req.app_data::<Data<Config>>() {
        Some(c) => (c.csrf_ttl, c.cookie_secure, c.violation_form_path()),
        None => {
            let resp = AppError::internal("系统错误").error_response();
            return Ok(req.into_response(resp));
        }
    };

    if is_safe(req.method()) {
        let token = generate_csrf_token();
        req.extensions_mut().insert(CsrfToken(token.clone()));

        let mut res = next.call(req).await?;
        let cookie = Cookie::build(CSRF_COOKIE, token)
            .path("/")
            .max_age(Duration::seconds(ttl))
            .http_only(false)
            .secure(secure)
            .same_site(SameSite::Lax)
            .finish();
        if let Err(e) = res.response_mut().add_cookie(&cookie) {
            tracing::warn!(error = %e, "Failed to attach CSRF cookie");
        }
        return Ok(res);
    }

    let expected = match req.cookie(CSRF_COOKIE) {
        Some(c) if !c.value().is_empty() => c.value().to_string(),
        _ => {
            let resp = AppError::forbidden("缺少 CSRF token").error_response();
            return Ok(req.into_response(resp));
        }
    };

    let submitted = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .filter(|s| !s.is_empty());

    match submitted {
        Some(s) => {
            if !constant_time_eq(s.as_bytes(), expected.as_bytes()) {
                let resp = AppError::forbidden("CSRF 验证失败").error_response();
                return Ok(req.into_response(resp));
            }
        }
        // The violation form reader checks the field before writing anything.
        None if *req.method() == Method::POST && req.path() == form_path && is_multipart(&req) => {
            req.extensions_mut().insert(CsrfPending(expected));
        }
        None => {
            let resp = AppError::forbidden("CSRF 验证失败").error_response();
            return Ok(req.into_response(resp));
        }
    }

    next.call(req).await
}

impl FromRequest for CsrfToken {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = req
            .extensions()
            .get::<CsrfToken>()
            .cloned()
            .unwrap_or_else(|| CsrfToken(String::new()));
        ready(Ok(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, http::StatusCode, middleware::from_fn, web};
    use actix_web::test as actix_test;

    fn test_config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    async fn echo_token(token: CsrfToken) -> HttpResponse {
        HttpResponse::Ok().body(token.0)
    }

    async fn mutate(pending: Option<web::ReqData<CsrfPending>>) -> HttpResponse {
        match pending {
            Some(_) => HttpResponse::Accepted().finish(),
            None => HttpResponse::Ok().finish(),
        }
    }

    macro_rules! csrf_app {
        () => {
            actix_test::init_service(
                App::new()
                    .app_data(web::Data::new(test_config()))
                    .wrap(from_fn(csrf_middleware))
                    .route("/page", web::get().to(echo_token))
                    .route("/api/violations", web::post().to(mutate))
                    .route("/api/users", web::post().to(mutate)),
            )
            .await
        };
    }

    #[test]
    fn tokens_are_64_hex_chars_and_fresh() {
        let a = generate_csrf_token();
        let b = generate_csrf_token();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[actix_web::test]
    async fn safe_request_sets_readable_cookie_matching_page_token() {
        let app = csrf_app!();

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/page").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == CSRF_COOKIE)
            .map(|c| c.into_owned())
            .unwrap();
        assert_ne!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(3600)));

        let body = actix_test::read_body(resp).await;
        assert_eq!(body, cookie.value().as_bytes());
    }

    #[actix_web::test]
    async fn post_without_cookie_is_forbidden() {
        let app = csrf_app!();

        let req = actix_test::TestRequest::post()
            .uri("/api/users")
            .insert_header((CSRF_HEADER, "abc"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn post_with_mismatched_header_is_forbidden() {
        let app = csrf_app!();

        let req = actix_test::TestRequest::post()
            .uri("/api/users")
            .cookie(Cookie::new(CSRF_COOKIE, "abc"))
            .insert_header((CSRF_HEADER, "abd"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = actix_test::TestRequest::post()
            .uri("/api/users")
            .cookie(Cookie::new(CSRF_COOKIE, "abc"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn post_with_matching_header_passes() {
        let app = csrf_app!();

        let req = actix_test::TestRequest::post()
            .uri("/api/users")
            .cookie(Cookie::new(CSRF_COOKIE, "abc"))
            .insert_header((CSRF_HEADER, "abc"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn multipart_form_defers_to_field_check_only_on_violation_form() {
        let app = csrf_app!();

        let req = actix_test::TestRequest::post()
            .uri("/api/violations")
            .cookie(Cookie::new(CSRF_COOKIE, "abc"))
            .insert_header((header::CONTENT_TYPE, "multipart/form-data; boundary=x"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

        let req = actix_test::TestRequest::post()
            .uri("/api/users")
            .cookie(Cookie::new(CSRF_COOKIE, "abc"))
            .insert_header((header::CONTENT_TYPE, "multipart/form-data; boundary=x"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn pending_check_requires_exact_match() {
        let pending = CsrfPending("abc".into());

        assert!(pending.verify(Some("abc")).is_ok());
        assert!(pending.verify(Some("abcd")).is_err());
        assert!(pending.verify(Some("")).is_err());
        assert!(pending.verify(None).is_err());
    }
}
