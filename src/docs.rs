use crate::api::stats::StatsResponse;
use crate::api::user::UserListResponse;
use crate::api::violation::{ViolationForm, ViolationListResponse};
use crate::model::role::Role;
use crate::model::user::User;
use crate::model::violation::Violation;
use crate::models::{CreateUserReq, LoginReqDto, ResetPasswordReq};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dormitory Violation API",
        version = "1.0.0",
        description = r#"
## 宿舍违纪管理系统

Staff record dormitory rule violations with an optional photo; the day's
records are published on a public board and can be exported as CSV.

### Security
- JWT in the `token` cookie or an `Authorization: Bearer` header.
- Every `POST`/`DELETE` must echo the `csrf_token` cookie in `X-CSRF-Token`
  (the multipart violation form may send it as a `csrf_token` field instead).
- `/users` endpoints are admin only.

### Errors
Every failure has the body `{"error": "<message>"}`.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,

        crate::api::violation::create_violation,
        crate::api::violation::list_violations,
        crate::api::violation::today_violations,
        crate::api::violation::delete_violation,
        crate::api::violation::violation_photo,
        crate::api::violation::export_csv,

        crate::api::user::list_users,
        crate::api::user::create_user,
        crate::api::user::delete_user,
        crate::api::user::reset_password,

        crate::api::stats::get_stats
    ),
    components(
        schemas(
            LoginReqDto,
            CreateUserReq,
            ResetPasswordReq,
            Role,
            User,
            UserListResponse,
            Violation,
            ViolationForm,
            ViolationListResponse,
            StatsResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, logout and identity"),
        (name = "Violation", description = "Violation records and photos"),
        (name = "User", description = "Account management (admin)"),
        (name = "Stats", description = "Dashboard counters"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
