//! Rendering of reports to downloadable bytes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use brokerlens_core::error::{AnalyticsError, AnalyticsResult};

/// Exported files stay downloadable for a day.
pub const EXPORT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
    Pdf,
    Excel,
    Powerpoint,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            "excel" | "xlsx" => Some(Self::Excel),
            "powerpoint" | "pptx" => Some(Self::Powerpoint),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Excel => "excel",
            Self::Powerpoint => "powerpoint",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Excel => "xlsx",
            Self::Powerpoint => "pptx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Pdf => "application/pdf",
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Powerpoint => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }

    /// Only JSON and CSV have an in-process renderer.
    pub fn ensure_supported(self) -> AnalyticsResult<Self> {
        match self {
            Self::Json | Self::Csv => Ok(self),
            other => Err(AnalyticsError::UnsupportedFormat(other.as_str().to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedFile {
    pub id: String,
    pub filename: String,
    pub format: ExportFormat,
    pub content_type: String,
    pub download_url: String,
    pub size: usize,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ExportedFile {
    pub fn new(
        id: &str,
        stem: &str,
        format: ExportFormat,
        base_url: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        let filename = format!("{stem}.{}", format.extension());
        Self {
            id: id.to_string(),
            download_url: format!("{}/{filename}", base_url.trim_end_matches('/')),
            filename,
            format,
            content_type: format.content_type().to_string(),
            size: bytes.len(),
            generated_at: now,
            expires_at: now + Duration::hours(EXPORT_TTL_HOURS),
            bytes,
        }
    }
}

/// A flat `section,metric,value` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub section: String,
    pub metric: String,
    pub value: String,
}

impl ExportRow {
    pub fn new(section: &str, metric: impl Into<String>, value: impl ToString) -> Self {
        Self {
            section: section.to_string(),
            metric: metric.into(),
            value: value.to_string(),
        }
    }
}

/// Spreadsheet apps treat a leading `=`, `+`, `-`, `@`, TAB or CR as a
/// formula; a leading quote forces a literal.
fn sanitize_csv_field(val: &str) -> std::borrow::Cow<'_, str> {
    if val.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        std::borrow::Cow::Owned(format!("'{val}"))
    } else {
        std::borrow::Cow::Borrowed(val)
    }
}

pub fn build_csv(rows: &[ExportRow]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(rows.len().saturating_mul(64)));
    wtr.write_record(["section", "metric", "value"])
        .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    for row in rows {
        // Numbers keep their sign; only text cells are guarded.
        let value = if row.value.parse::<f64>().is_ok() {
            std::borrow::Cow::Borrowed(row.value.as_str())
        } else {
            sanitize_csv_field(&row.value)
        };
        wtr.write_record([
            sanitize_csv_field(&row.section).as_ref(),
            sanitize_csv_field(&row.metric).as_ref(),
            value.as_ref(),
        ])
        .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush failed: {e}"))
}

/// Flatten a JSON document into rows, joining nested keys with `.` and
/// array positions with `[i]`. Nulls are skipped.
pub fn flatten(section: &str, value: &serde_json::Value) -> Vec<ExportRow> {
    fn walk(section: &str, path: String, value: &serde_json::Value, out: &mut Vec<ExportRow>) {
        use serde_json::Value;
        match value {
            Value::Null => {}
            Value::Object(map) => {
                for (key, child) in map {
                    let next = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    walk(section, next, child, out);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    walk(section, format!("{path}[{i}]"), child, out);
                }
            }
            Value::String(text) => out.push(ExportRow::new(section, path, text)),
            other => out.push(ExportRow::new(section, path, other)),
        }
    }
    let mut rows = Vec::new();
    walk(section, String::new(), value, &mut rows);
    rows
}

pub fn build_json<T: Serialize>(value: &T) -> AnalyticsResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_prefixes_are_neutralised() {
        let rows = vec![
            ExportRow::new("kpis", "conversion_rate", 3.25),
            ExportRow::new("kpis", "=HYPERLINK(\"x\")", "ok"),
            ExportRow::new("trend", "revenue_change", -4.5),
        ];
        let text = String::from_utf8(build_csv(&rows).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "section,metric,value");
        assert_eq!(lines[1], "kpis,conversion_rate,3.25");
        assert!(lines[2].starts_with("kpis,\"'=HYPERLINK"));
        assert_eq!(lines[3], "trend,revenue_change,-4.5");
    }

    #[test]
    fn nested_documents_flatten_to_dotted_paths() {
        let doc = serde_json::json!({
            "overview": {"health_score": 92.5, "last_update": null},
            "alerts": [{"message": "slow"}],
        });
        let rows = flatten("dashboard", &doc);
        let metrics: Vec<&str> = rows.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(metrics, vec!["alerts[0].message", "overview.health_score"]);
        assert_eq!(rows[0].value, "slow");
        assert_eq!(rows[1].value, "92.5");
    }

    #[test]
    fn binary_office_formats_are_rejected() {
        assert!(ExportFormat::Json.ensure_supported().is_ok());
        assert!(ExportFormat::Csv.ensure_supported().is_ok());
        for format in [ExportFormat::Pdf, ExportFormat::Excel, ExportFormat::Powerpoint] {
            assert!(matches!(
                format.ensure_supported(),
                Err(AnalyticsError::UnsupportedFormat(_))
            ));
        }
    }

    #[test]
    fn download_url_sits_under_the_export_base() {
        let now = Utc::now();
        let file = ExportedFile::new(
            "report_1",
            "report_1",
            ExportFormat::Csv,
            "http://localhost:3000/exports/",
            b"a,b".to_vec(),
            now,
        );
        assert_eq!(file.download_url, "http://localhost:3000/exports/report_1.csv");
        assert_eq!(file.size, 3);
        assert_eq!(file.expires_at - now, Duration::hours(24));
    }
}
