use crate::{
    api::{stats, user, violation},
    auth::{
        handlers,
        middleware::{admin_middleware, auth_middleware},
    },
    config::Config,
    pages,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::anyhow;

pub type LoginLimiter = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Per-IP bucket of `requests_per_min`, refilled evenly over the minute.
pub fn build_limiter(requests_per_min: u32) -> anyhow::Result<LoginLimiter> {
    let burst = requests_per_min.max(1);
    let per_ms = (60_000 / u64::from(burst)).max(1);

    GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid login rate limit: {}", requests_per_min))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, login_limiter: &LoginLimiter) {
    pages::configure(cfg);

    cfg.service(
        web::scope(&config.api_prefix)
            // Public
            .service(
                web::resource("/login")
                    .wrap(Governor::new(login_limiter))
                    .route(web::post().to(handlers::login)),
            )
            .route("/logout", web::post().to(handlers::logout))
            .route("/violations/today", web::get().to(violation::today_violations))
            // Authenticated
            .service(
                web::scope("")
                    .wrap(from_fn(auth_middleware))
                    .route("/me", web::get().to(handlers::me))
                    .route("/stats", web::get().to(stats::get_stats))
                    .service(
                        web::resource("/violations")
                            .route(web::post().to(violation::create_violation))
                            .route(web::get().to(violation::list_violations)),
                    )
                    // before /{id} so "export" is never read as an id
                    .route("/violations/export", web::get().to(violation::export_csv))
                    .route("/violations/{id}", web::delete().to(violation::delete_violation))
                    .route("/violations/{id}/photo", web::get().to(violation::violation_photo))
                    // Admin only
                    .service(
                        web::scope("/users")
                            .wrap(from_fn(admin_middleware))
                            .service(
                                web::resource("")
                                    .route(web::get().to(user::list_users))
                                    .route(web::post().to(user::create_user)),
                            )
                            .route("/{id}", web::delete().to(user::delete_user))
                            .route(
                                "/{id}/reset-password",
                                web::post().to(user::reset_password),
                            ),
                    ),
            ),
    );
}
