use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::{
    MySql,
    mysql::MySqlArguments,
    query::{QueryAs, QueryScalar},
};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    DateTime(DateTime<Utc>),
}

/// ===============================
/// WHERE clause container
/// ===============================
#[derive(Debug, Default)]
pub struct SqlFilter {
    conditions: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: &str, values: impl IntoIterator<Item = SqlValue>) {
        self.conditions.push(condition.to_string());
        self.values.extend(values);
    }

    /// Violations created on `date` in server-local time.
    pub fn created_on(&mut self, date: NaiveDate) {
        let (start, end) = local_day_bounds(date);
        self.push(
            "v.created_at >= ? AND v.created_at < ?",
            [SqlValue::DateTime(start), SqlValue::DateTime(end)],
        );
    }

    /// Case-insensitive substring match across the searchable violation columns.
    pub fn keyword(&mut self, keyword: &str) {
        let like = format!("%{}%", escape_like(keyword));
        self.push(
            "(v.student_name LIKE ? OR v.class_name LIKE ? OR v.dorm LIKE ? OR v.reason LIKE ?)",
            std::iter::repeat(SqlValue::String(like)).take(4),
        );
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn bind_as<'q, O>(
        &self,
        mut query: QueryAs<'q, MySql, O, MySqlArguments>,
    ) -> QueryAs<'q, MySql, O, MySqlArguments> {
        for value in &self.values {
            query = match value.clone() {
                SqlValue::String(v) => query.bind(v),
                SqlValue::DateTime(v) => query.bind(v),
            };
        }
        query
    }

    pub fn bind_scalar<'q, O>(
        &self,
        mut query: QueryScalar<'q, MySql, O, MySqlArguments>,
    ) -> QueryScalar<'q, MySql, O, MySqlArguments> {
        for value in &self.values {
            query = match value.clone() {
                SqlValue::String(v) => query.bind(v),
                SqlValue::DateTime(v) => query.bind(v),
            };
        }
        query
    }
}

/// Escapes LIKE wildcards so the keyword matches literally (MySQL's default escape is `\`).
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Half-open UTC range `[start, end)` covering one local calendar day.
pub fn local_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(date);
    let end = match date.succ_opt() {
        Some(next) => local_midnight(next),
        None => start + chrono::Duration::days(1),
    };
    (start, end)
}

fn local_midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump.
        None => Utc.from_utc_datetime(&naive),
    }
}

pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

/// `YYYY-MM-DD`; anything else is rejected.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_where_clause() {
        let filter = SqlFilter::new();
        assert_eq!(filter.where_clause(), "");
        assert!(filter.values.is_empty());
    }

    #[test]
    fn conditions_are_joined_and_values_kept_in_order() {
        let mut filter = SqlFilter::new();
        filter.created_on(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        filter.keyword("张");

        assert_eq!(
            filter.where_clause(),
            "WHERE v.created_at >= ? AND v.created_at < ? AND \
             (v.student_name LIKE ? OR v.class_name LIKE ? OR v.dorm LIKE ? OR v.reason LIKE ?)"
        );
        assert_eq!(filter.values.len(), 6);
        assert!(matches!(filter.values[0], SqlValue::DateTime(_)));
        assert_eq!(filter.values[2], SqlValue::String("%张%".into()));
        assert_eq!(filter.values[5], SqlValue::String("%张%".into()));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn day_bounds_span_one_local_day() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        let (start, end) = local_day_bounds(date);

        assert!(start < end);
        assert_eq!(start.with_timezone(&Local).date_naive(), date);
        assert_eq!(end.with_timezone(&Local).date_naive(), date.succ_opt().unwrap());
    }

    #[test]
    fn parse_date_is_strict() {
        assert_eq!(parse_date("2026-01-31"), NaiveDate::from_ymd_opt(2026, 1, 31));
        assert_eq!(parse_date(" 2026-01-31 "), NaiveDate::from_ymd_opt(2026, 1, 31));
        assert_eq!(parse_date("2026-02-30"), None);
        assert_eq!(parse_date("31/01/2026"), None);
        assert_eq!(parse_date("today"), None);
    }
}
