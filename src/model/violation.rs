use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A logged dormitory rule violation, joined with the creator's name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Violation {
    #[schema(example = 1)]
    pub id: u64,
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
    /// File name under the upload directory, empty when no photo was attached.
    #[schema(example = "1767225600000000000_1.jpg")]
    pub photo_path: String,
    #[schema(example = 1)]
    pub created_by: u64,
    #[schema(example = "系统管理员")]
    pub creator_name: String,
    #[schema(example = "2026-01-01T08:00:00Z", format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
}

/// Column list shared by every query that yields a [`Violation`].
pub const VIOLATION_COLUMNS: &str = r#"
    v.id, v.dorm, v.student_name, v.class_name, v.period, v.reason,
    v.department, v.inspector, v.photo_path, v.created_by, v.created_at,
    COALESCE(NULLIF(u.display_name, ''), u.username, '') AS creator_name
"#;
