use crate::{
    auth::{
        auth::AuthUser,
        csrf::{CSRF_FIELD, CsrfPending},
    },
    config::Config,
    error::{AppError, parse_id},
    model::violation::{VIOLATION_COLUMNS, Violation},
    utils::{
        csv_export::{build_csv, export_filename},
        db_utils::{SqlFilter, parse_date, today_local},
        photo::{PhotoStore, allowed_extension, sniff_image_mime},
    },
};
use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{HttpResponse, http::header, web};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use std::io;
use tracing::{debug, error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

const MB: u64 = 1024 * 1024;

/// Upper bound on raw bytes read for any single text field.
const TEXT_FIELD_MAX_BYTES: usize = 16 * 1024;

/// Text fields of the submission form with their caps in characters.
pub const FIELD_LIMITS: [(&str, usize); 7] = [
    ("dorm", 20),
    ("student_name", 50),
    ("class_name", 50),
    ("period", 20),
    ("reason", 2000),
    ("department", 30),
    ("inspector", 100),
];

/// Multipart violation submission. An optional `photo` file part accompanies these fields.
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ViolationForm {
    #[schema(example = "3-402")]
    pub dorm: String,
    #[schema(example = "张三")]
    pub student_name: String,
    #[schema(example = "高二(3)班")]
    pub class_name: String,
    #[schema(example = "午休")]
    pub period: String,
    #[schema(example = "使用违规电器")]
    pub reason: String,
    #[schema(example = "宿管部")]
    pub department: String,
    #[schema(example = "李四")]
    pub inspector: String,
    /// Only needed when the `X-CSRF-Token` header is not sent
    pub csrf_token: Option<String>,
}

impl ViolationForm {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "dorm" => self.dorm = value,
            "student_name" => self.student_name = value,
            "class_name" => self.class_name = value,
            "period" => self.period = value,
            "reason" => self.reason = value,
            "department" => self.department = value,
            "inspector" => self.inspector = value,
            CSRF_FIELD => self.csrf_token = Some(value),
            _ => debug!(field = %name, "Ignoring unknown form field"),
        }
    }

    fn get(&self, name: &str) -> &str {
        match name {
            "dorm" => &self.dorm,
            "student_name" => &self.student_name,
            "class_name" => &self.class_name,
            "period" => &self.period,
            "reason" => &self.reason,
            "department" => &self.department,
            "inspector" => &self.inspector,
            _ => "",
        }
    }

    /// Every field is required, trimmed and length-capped.
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, limit) in FIELD_LIMITS {
            let value = self.get(name);
            if value.is_empty() {
                return Err(AppError::bad_request(format!("请填写完整信息: {}", name)));
            }
            if value.chars().count() > limit {
                return Err(AppError::bad_request(format!(
                    "{} 长度不能超过 {} 个字符",
                    name, limit
                )));
            }
        }
        Ok(())
    }
}

/// Uploaded file part before validation.
#[derive(Debug)]
pub struct PhotoUpload {
    pub filename: String,
    pub data: Vec<u8>,
}

impl PhotoUpload {
    /// Returns the lowercased extension to store the file under.
    pub fn validate(&self, max_upload: u64) -> Result<String, AppError> {
        if self.data.len() as u64 > max_upload {
            return Err(size_error(max_upload));
        }

        let ext = allowed_extension(&self.filename)
            .ok_or_else(|| AppError::bad_request("仅支持 JPG/PNG/GIF/WebP 格式的图片"))?;

        let head = &self.data[..self.data.len().min(512)];
        if sniff_image_mime(head).is_none() {
            return Err(AppError::bad_request("文件类型不合法"));
        }

        Ok(ext)
    }
}

fn size_error(max_upload: u64) -> AppError {
    let mb = max_upload.div_ceil(MB).max(1);
    AppError::bad_request(format!("照片大小不能超过 {}MB", mb))
}

fn multipart_error(e: MultipartError) -> AppError {
    debug!(error = %e, "Malformed multipart body");
    AppError::bad_request("请填写完整信息")
}

/// Reads a part up to `cap` bytes; `Ok(None)` means the part was larger.
async fn read_capped(field: &mut Field, cap: usize) -> Result<Option<Vec<u8>>, AppError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if buf.len() + chunk.len() > cap {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Some(buf))
}

pub async fn read_violation_form(
    mut payload: Multipart,
    max_upload: u64,
) -> Result<(ViolationForm, Option<PhotoUpload>), AppError> {
    let mut form = ViolationForm::default();
    let mut photo = None;
    let photo_cap = usize::try_from(max_upload).unwrap_or(usize::MAX);

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let name = field.name().to_string();

        if name == "photo" {
            let filename = field
                .content_disposition()
                .get_filename()
                .unwrap_or_default()
                .to_string();

            let data = read_capped(&mut field, photo_cap)
                .await?
                .ok_or_else(|| size_error(max_upload))?;

            // An empty file input arrives with no filename and no bytes.
            if !filename.is_empty() && !data.is_empty() {
                photo = Some(PhotoUpload { filename, data });
            }
            continue;
        }

        let data = read_capped(&mut field, TEXT_FIELD_MAX_BYTES)
            .await?
            .ok_or_else(|| AppError::bad_request(format!("{} 长度不能超过限制", name)))?;
        let value = String::from_utf8(data)
            .map_err(|_| AppError::bad_request(format!("{} 不是有效的文本", name)))?;

        form.set(&name, value.trim().to_string());
    }

    Ok((form, photo))
}

async fn fetch_violations(
    pool: &MySqlPool,
    filter: &SqlFilter,
    order: &str,
    page: Option<&Pagination>,
) -> Result<Vec<Violation>, AppError> {
    let mut sql = format!(
        "SELECT {} FROM violations v LEFT JOIN users u ON v.created_by = u.id {} ORDER BY {}",
        VIOLATION_COLUMNS,
        filter.where_clause(),
        order
    );
    if page.is_some() {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    debug!(sql = %sql, bindings = ?filter.values, "Fetching violations");

    let mut query = filter.bind_as(sqlx::query_as::<_, Violation>(&sql));
    if let Some(p) = page {
        query = query.bind(p.limit).bind(p.offset());
    }

    query.fetch_all(pool).await.map_err(|e| {
        error!(error = %e, sql = %sql, "Failed to fetch violations");
        AppError::internal("查询失败")
    })
}

async fn count_violations(pool: &MySqlPool, filter: &SqlFilter) -> Result<i64, AppError> {
    let sql = format!("SELECT COUNT(*) FROM violations v {}", filter.where_clause());
    debug!(sql = %sql, bindings = ?filter.values, "Counting violations");

    filter
        .bind_scalar(sqlx::query_scalar::<_, i64>(&sql))
        .fetch_one(pool)
        .await
        .map_err(|e| {
            error!(error = %e, sql = %sql, "Failed to count violations");
            AppError::internal("查询失败")
        })
}

/// Create violation
#[utoipa::path(
    post,
    path = "/api/violations",
    request_body(
        content = ViolationForm,
        description = "Violation fields plus an optional `photo` file (jpg/jpeg/png/gif/webp, 5MB max)",
        content_type = "multipart/form-data"
    ),
    responses(
        (status = 200, description = "Violation recorded", body = Object, example = json!({
            "id": 42,
            "message": "提交成功"
        })),
        (status = 400, description = "Missing/oversized field or invalid photo"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "CSRF check failed")
    ),
    tag = "Violation",
    security(
        ("bearer_auth" = [])
    )
)]
#[instrument(name = "create_violation", skip_all, fields(user_id = auth.user_id))]
pub async fn create_violation(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    store: web::Data<PhotoStore>,
    csrf: Option<web::ReqData<CsrfPending>>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (form, photo) = read_violation_form(payload, config.max_upload).await?;

    if let Some(pending) = csrf {
        pending.verify(form.csrf_token.as_deref())?;
    }

    form.validate()?;

    let photo_path = match photo {
        Some(upload) => {
            let ext = upload.validate(config.max_upload)?;
            let store = store.clone();
            let user_id = auth.user_id;
            let name = web::block(move || store.save(user_id, &ext, &upload.data))
                .await?
                .map_err(|e| {
                    error!(error = %e, "Failed to save photo");
                    AppError::internal("文件保存失败")
                })?;
            debug!(photo = %name, "Photo stored");
            name
        }
        None => String::new(),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO violations
            (dorm, student_name, class_name, period, reason, department, inspector, photo_path, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&form.dorm)
    .bind(&form.student_name)
    .bind(&form.class_name)
    .bind(&form.period)
    .bind(&form.reason)
    .bind(&form.department)
    .bind(&form.inspector)
    .bind(&photo_path)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await;

    match result {
        Ok(res) => {
            let id = res.last_insert_id();
            info!(violation_id = id, "Violation recorded");
            Ok(HttpResponse::Ok().json(json!({ "id": id, "message": "提交成功" })))
        }
        Err(e) => {
            error!(error = %e, "Insert violation failed");
            if !photo_path.is_empty() {
                let store = store.clone();
                let _ = web::block(move || store.remove(&photo_path)).await;
            }
            Err(AppError::internal("保存失败"))
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ViolationQuery {
    /// Calendar day `YYYY-MM-DD`
    pub date: Option<String>,
    /// 1-based; invalid values fall back to 1
    pub page: Option<String>,
    /// 1-200; anything else falls back to 50
    pub limit: Option<String>,
    /// Substring of student name, class, dorm or reason
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u64 = 50;
    pub const MAX_LIMIT: u64 = 200;

    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p as u64)
            .unwrap_or(1);

        let limit = limit
            .and_then(|l| l.trim().parse::<i64>().ok())
            .filter(|l| (1..=Self::MAX_LIMIT as i64).contains(l))
            .map(|l| l as u64)
            .unwrap_or(Self::DEFAULT_LIMIT);

        Self { page, limit }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Serialize, ToSchema)]
pub struct ViolationListResponse {
    pub data: Vec<Violation>,
    #[schema(example = 128)]
    pub total: i64,
    #[schema(example = 1)]
    pub page: u64,
    #[schema(example = 50)]
    pub limit: u64,
}

fn parse_date_param(raw: Option<&str>) -> Result<Option<chrono::NaiveDate>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| AppError::bad_request("日期格式错误，应为 YYYY-MM-DD")),
        None => Ok(None),
    }
}

/// List violations
#[utoipa::path(
    get,
    path = "/api/violations",
    params(ViolationQuery),
    responses(
        (status = 200, description = "Paginated violations, newest first", body = ViolationListResponse),
        (status = 400, description = "Malformed date"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Violation",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_violations(
    pool: web::Data<MySqlPool>,
    query: web::Query<ViolationQuery>,
) -> Result<HttpResponse, AppError> {
    let pagination = Pagination::from_query(query.page.as_deref(), query.limit.as_deref());

    let mut filter = SqlFilter::new();
    if let Some(date) = parse_date_param(query.date.as_deref())? {
        filter.created_on(date);
    }
    if let Some(keyword) = query.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        filter.keyword(keyword);
    }

    let total = count_violations(pool.get_ref(), &filter).await?;
    let data = fetch_violations(
        pool.get_ref(),
        &filter,
        "v.created_at DESC, v.id DESC",
        Some(&pagination),
    )
    .await?;

    Ok(HttpResponse::Ok().json(ViolationListResponse {
        data,
        total,
        page: pagination.page,
        limit: pagination.limit,
    }))
}

/// Today's violations
#[utoipa::path(
    get,
    path = "/api/violations/today",
    responses(
        (status = 200, description = "All violations for the current local day", body = Object, example = json!({
            "data": [],
            "date": "2026-01-01",
            "count": 0
        }))
    ),
    tag = "Violation"
)]
pub async fn today_violations(pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let today = today_local();

    let mut filter = SqlFilter::new();
    filter.created_on(today);
    let data = fetch_violations(pool.get_ref(), &filter, "v.created_at DESC, v.id DESC", None).await?;

    Ok(HttpResponse::Ok().json(json!({
        "count": data.len(),
        "data": data,
        "date": today.format("%Y-%m-%d").to_string(),
    })))
}

/// Delete violation
#[utoipa::path(
    delete,
    path = "/api/violations/{id}",
    params(
        ("id" = u64, Path, description = "Violation ID")
    ),
    responses(
        (status = 200, description = "Deleted", body = Object, example = json!({
            "message": "删除成功"
        })),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "No such record", body = Object, example = json!({
            "error": "记录不存在"
        }))
    ),
    tag = "Violation",
    security(
        ("bearer_auth" = [])
    )
)]
#[instrument(name = "delete_violation", skip(auth, pool, store), fields(user_id = auth.user_id))]
pub async fn delete_violation(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    store: web::Data<PhotoStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id(&path)?;

    let photo_path: Option<String> =
        sqlx::query_scalar::<_, String>("SELECT photo_path FROM violations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool.get_ref())
            .await?;

    let Some(photo_path) = photo_path else {
        return Err(AppError::not_found("记录不存在"));
    };

    let result = sqlx::query("DELETE FROM violations WHERE id = ?")
        .bind(id)
        .execute(pool.get_ref())
        .await
        .map_err(|e| {
            error!(error = %e, violation_id = id, "Failed to delete violation");
            AppError::internal("删除失败")
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("记录不存在"));
    }

    // Not transactional with the row delete; a failure here leaves an orphaned file.
    if !photo_path.is_empty() {
        let store = store.clone();
        if let Err(e) = web::block(move || store.remove(&photo_path)).await {
            warn!(error = %e, violation_id = id, "Photo cleanup did not run");
        }
    }

    info!(violation_id = id, "Violation deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "删除成功" })))
}

/// Violation photo
#[utoipa::path(
    get,
    path = "/api/violations/{id}/photo",
    params(
        ("id" = u64, Path, description = "Violation ID")
    ),
    responses(
        (status = 200, description = "Stored image bytes, typed by file extension"),
        (status = 404, description = "Record or photo missing")
    ),
    tag = "Violation",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn violation_photo(
    pool: web::Data<MySqlPool>,
    store: web::Data<PhotoStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = parse_id(&path)?;

    let photo_path: Option<String> =
        sqlx::query_scalar::<_, String>("SELECT photo_path FROM violations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool.get_ref())
            .await?;

    let name = match photo_path {
        Some(p) if !p.is_empty() => p,
        _ => return Err(AppError::not_found("照片不存在")),
    };

    let store = store.clone();
    let read_name = name.clone();
    let data = match web::block(move || store.read(&read_name)).await? {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(AppError::not_found("照片文件不存在"));
        }
        Err(e) => {
            error!(error = %e, photo = %name, "Failed to read photo");
            return Err(AppError::internal("系统错误"));
        }
    };

    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    Ok(HttpResponse::Ok().content_type(mime.to_string()).body(data))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ExportQuery {
    /// Calendar day `YYYY-MM-DD`, defaults to today
    pub date: Option<String>,
}

/// Export violations as CSV
#[utoipa::path(
    get,
    path = "/api/violations/export",
    params(ExportQuery),
    responses(
        (status = 200, description = "UTF-8 CSV with BOM, oldest first", body = String, content_type = "text/csv"),
        (status = 400, description = "Malformed date")
    ),
    tag = "Violation",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn export_csv(
    pool: web::Data<MySqlPool>,
    query: web::Query<ExportQuery>,
) -> Result<HttpResponse, AppError> {
    let date = parse_date_param(query.date.as_deref())?.unwrap_or_else(today_local);
    let date_str = date.format("%Y-%m-%d").to_string();

    let mut filter = SqlFilter::new();
    filter.created_on(date);
    let rows = fetch_violations(pool.get_ref(), &filter, "v.created_at ASC, v.id ASC", None).await?;

    debug!(date = %date_str, rows = rows.len(), "Exporting violations");

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export_filename(&date_str)),
        ))
        .body(build_csv(&rows)))
}
