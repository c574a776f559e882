use crate::{
    error::AppError,
    utils::db_utils::{SqlFilter, today_local},
};
use actix_web::{HttpResponse, web};
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    #[schema(example = 3)]
    pub today_count: i64,
    #[schema(example = 128)]
    pub total_count: i64,
    #[schema(example = 5)]
    pub user_count: i64,
}

/// Dashboard counters
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Counts computed on every call", body = StatsResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Stats",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_stats(pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let mut today = SqlFilter::new();
    today.created_on(today_local());

    let today_sql = format!("SELECT COUNT(*) FROM violations v {}", today.where_clause());
    let today_count = today
        .bind_scalar(sqlx::query_scalar::<_, i64>(&today_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let total_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM violations")
        .fetch_one(pool.get_ref())
        .await?;

    let user_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(StatsResponse {
        today_count,
        total_count,
        user_count,
    }))
}
