use actix_web::middleware::{DefaultHeaders, Logger, NormalizePath, from_fn};
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer, ResponseError};
use anyhow::Context;
use dotenvy::dotenv;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod pages;
mod routes;
mod utils;

use crate::auth::csrf::csrf_middleware;
use crate::docs::ApiDoc;
use crate::error::AppError;
use crate::utils::photo::PhotoStore;
use config::Config;
use tracing::info;
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn bad_request(err: impl std::fmt::Display) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected request input");
    let resp = AppError::bad_request(format!("参数错误: {}", err)).error_response();
    actix_web::error::InternalError::from_response(err.to_string(), resp).into()
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!("Server starting...");

    let pool = db::init_db(&config).await?;
    db::migrate(&pool).await?;
    db::seed_admin(&pool, &config).await?;

    let store = PhotoStore::new(config.upload_dir.clone());
    store
        .ensure_dir()
        .with_context(|| format!("cannot create upload dir {}", config.upload_dir.display()))?;

    // Shared by every worker so the per-IP budget is global.
    let login_limiter = routes::build_limiter(config.rate_login_per_min)?;

    let server_addr = config.server_addr.clone();
    info!(addr = %server_addr, prefix = %config.api_prefix, "Listening");

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(csrf_middleware))
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard so JS/CSS assets match
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(store.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _| bad_request(err)))
            .app_data(web::QueryConfig::default().error_handler(|err, _| bad_request(err)))
            .app_data(web::PathConfig::default().error_handler(|err, _| bad_request(err)))
            .configure(|cfg| routes::configure(cfg, &config, &login_limiter))
    })
    .bind(&server_addr)
    .with_context(|| format!("cannot bind {}", server_addr))?
    .run()
    .await?;

    Ok(())
}
