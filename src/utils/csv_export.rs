use chrono::Local;

use crate::model::violation::Violation;

/// Lets spreadsheet tools detect UTF-8.
pub const BOM: &str = "\u{FEFF}";

pub const HEADER: &str = "ID,宿舍号,姓名,班级,时间段,违纪原因,部门,执勤人,记录时间,录入人";

pub fn export_filename(date: &str) -> String {
    format!("violations_{}.csv", date)
}

/// Quoted CSV field: quotes doubled, line breaks flattened to spaces.
pub fn quote_field(raw: &str) -> String {
    let flattened = raw.replace("\r\n", " ").replace(['\r', '\n'], " ");
    format!("\"{}\"", flattened.replace('"', "\"\""))
}

pub fn build_csv(rows: &[Violation]) -> String {
    let mut out = String::with_capacity(BOM.len() + HEADER.len() + 1 + rows.len() * 128);
    out.push_str(BOM);
    out.push_str(HEADER);
    out.push('\n');

    for v in rows {
        let created_at = v
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let fields = [
            v.id.to_string(),
            quote_field(&v.dorm),
            quote_field(&v.student_name),
            quote_field(&v.class_name),
            quote_field(&v.period),
            quote_field(&v.reason),
            quote_field(&v.department),
            quote_field(&v.inspector),
            quote_field(&created_at),
            quote_field(&v.creator_name),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn violation(reason: &str) -> Violation {
        Violation {
            id: 12,
            dorm: "3-402".into(),
            student_name: "张三".into(),
            class_name: "高二(3)班".into(),
            period: "午休".into(),
            reason: reason.into(),
            department: "宿管部".into(),
            inspector: "李四".into(),
            photo_path: String::new(),
            created_by: 1,
            creator_name: "系统管理员".into(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 4, 5, 6).unwrap(),
        }
    }

    #[test]
    fn output_starts_with_bom_and_fixed_header() {
        let csv = build_csv(&[]);

        assert!(csv.starts_with('\u{FEFF}'));
        assert_eq!(csv.as_bytes()[..3], [0xEF, 0xBB, 0xBF]);
        assert_eq!(csv.trim_start_matches(BOM), format!("{}\n", HEADER));
        assert_eq!(HEADER.split(',').count(), 10);
    }

    #[test]
    fn reason_quotes_are_doubled_and_newlines_flattened() {
        let csv = build_csv(&[violation("说了\"不\"\n还顶嘴\r\n再犯")]);
        let row = csv.lines().nth(1).unwrap();

        assert!(row.contains("\"说了\"\"不\"\" 还顶嘴 再犯\""));
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn row_has_ten_columns_in_header_order() {
        let v = violation("晚归");
        let csv = build_csv(&[v.clone()]);
        let row = csv.lines().nth(1).unwrap();
        let expected_time = v
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        assert_eq!(
            row,
            format!(
                "12,\"3-402\",\"张三\",\"高二(3)班\",\"午休\",\"晚归\",\"宿管部\",\"李四\",\"{}\",\"系统管理员\"",
                expected_time
            )
        );
    }

    #[test]
    fn filename_embeds_the_date() {
        assert_eq!(export_filename("2026-03-01"), "violations_2026-03-01.csv");
    }
}
