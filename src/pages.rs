use crate::auth::{auth::AuthUser, csrf::CsrfToken};
use actix_web::{HttpResponse, http::header, web};

const INDEX_HTML: &str = include_str!("../templates/index.html");
const LOGIN_HTML: &str = include_str!("../templates/login.html");
const PUBLIC_HTML: &str = include_str!("../templates/public.html");
const RECORD_HTML: &str = include_str!("../templates/record.html");
const AUDIT_HTML: &str = include_str!("../templates/audit.html");
const EXPORT_HTML: &str = include_str!("../templates/export.html");
const APP_JS: &str = include_str!("../templates/app.js");

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fills `{{csrf_token}}` and `{{username}}`.
pub fn render(template: &str, csrf: &str, user: Option<&AuthUser>) -> String {
    let username = user.map(|u| escape_html(&u.username)).unwrap_or_default();
    template
        .replace("{{csrf_token}}", &escape_html(csrf))
        .replace("{{username}}", &username)
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn redirect_to_login() -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, "/login"))
        .finish()
}

fn protected(template: &str, csrf: &CsrfToken, user: Option<AuthUser>) -> HttpResponse {
    match user {
        Some(user) => html(render(template, &csrf.0, Some(&user))),
        None => redirect_to_login(),
    }
}

pub async fn index(csrf: CsrfToken) -> HttpResponse {
    html(render(INDEX_HTML, &csrf.0, None))
}

pub async fn login(csrf: CsrfToken) -> HttpResponse {
    html(render(LOGIN_HTML, &csrf.0, None))
}

pub async fn public(csrf: CsrfToken) -> HttpResponse {
    html(render(PUBLIC_HTML, &csrf.0, None))
}

pub async fn record(csrf: CsrfToken, user: Option<AuthUser>) -> HttpResponse {
    protected(RECORD_HTML, &csrf, user)
}

pub async fn audit(csrf: CsrfToken, user: Option<AuthUser>) -> HttpResponse {
    protected(AUDIT_HTML, &csrf, user)
}

pub async fn export(csrf: CsrfToken, user: Option<AuthUser>) -> HttpResponse {
    protected(EXPORT_HTML, &csrf, user)
}

pub async fn app_js() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/javascript; charset=utf-8")
        .body(APP_JS)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/login", web::get().to(login))
        .route("/public", web::get().to(public))
        .route("/record", web::get().to(record))
        .route("/audit", web::get().to(audit))
        .route("/export", web::get().to(export))
        .route("/static/js/app.js", web::get().to(app_js));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{csrf::csrf_middleware, jwt::generate_token};
    use crate::config::Config;
    use crate::model::role::Role;
    use actix_web::{App, http::StatusCode, middleware::from_fn};
    use actix_web::test as actix_test;

    #[test]
    fn render_escapes_the_username() {
        let user = AuthUser {
            user_id: 1,
            username: "<b>bob</b>".into(),
            role: Role::Staff,
        };
        let out = render("{{username}}|{{csrf_token}}", "abc123", Some(&user));
        assert_eq!(out, "&lt;b&gt;bob&lt;/b&gt;|abc123");
    }

    #[test]
    fn every_template_embeds_the_csrf_token() {
        for t in [INDEX_HTML, LOGIN_HTML, PUBLIC_HTML, RECORD_HTML, AUDIT_HTML, EXPORT_HTML] {
            assert!(t.contains("{{csrf_token}}"));
        }
    }

    #[test]
    fn script_echoes_the_current_cookie_not_the_page_token() {
        assert!(APP_JS.contains("document.cookie"));
        assert!(APP_JS.contains("csrf_token="));
        assert!(APP_JS.contains("'X-CSRF-Token'"));
        assert!(RECORD_HTML.contains("csrf_token.value = App.csrf()"));
    }

    #[actix_web::test]
    async fn pages_carry_the_minted_token() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(Config::from_lookup(|_| None).unwrap()))
                .wrap(from_fn(csrf_middleware))
                .configure(configure),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/login").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == "csrf_token")
            .map(|c| c.value().to_string())
            .unwrap();
        let body = String::from_utf8(actix_test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains(&cookie));
    }

    #[actix_web::test]
    async fn protected_pages_redirect_anonymous_visitors() {
        let config = Config::from_lookup(|_| None).unwrap();
        let token = generate_token(3, "carol".into(), Role::Staff, &config.jwt_secret, 600).unwrap();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(config))
                .configure(configure),
        )
        .await;

        for page in ["/record", "/audit", "/export"] {
            let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri(page).to_request()).await;
            assert_eq!(resp.status(), StatusCode::FOUND);
            assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/login");
        }

        let req = actix_test::TestRequest::get()
            .uri("/record")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = String::from_utf8(actix_test::read_body(resp).await.to_vec()).unwrap();
        assert!(body.contains("carol"));
    }
}
