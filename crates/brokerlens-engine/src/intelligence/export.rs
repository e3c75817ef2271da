use chrono::Utc;
use serde_json::Value;
use tracing::info;

use brokerlens_core::error::{AnalyticsError, AnalyticsResult};

use crate::export::{build_csv, build_json, flatten, ExportFormat, ExportedFile};

use super::BusinessIntelligence;

impl BusinessIntelligence {
    /// Render a previously generated report. CSV flattens each top-level
    /// report field into its own section.
    pub async fn export_report(
        &self,
        report_id: &str,
        format: ExportFormat,
    ) -> AnalyticsResult<ExportedFile> {
        let report = self
            .get_report(report_id)
            .await
            .ok_or_else(|| AnalyticsError::not_found(format!("Report {report_id}")))?;
        let format = format.ensure_supported()?;

        let bytes = match format {
            ExportFormat::Csv => {
                let rows: Vec<_> = match serde_json::to_value(&report)? {
                    Value::Object(fields) => fields
                        .iter()
                        .flat_map(|(section, value)| flatten(section, value))
                        .collect(),
                    other => flatten("report", &other),
                };
                build_csv(&rows)?
            }
            _ => build_json(&report)?,
        };
        let file = ExportedFile::new(
            &report.id,
            &format!("bi_report_{}", report.id),
            format,
            &self.export_base_url,
            bytes,
            Utc::now(),
        );
        info!(
            report_id,
            format = format.as_str(),
            size = file.size,
            "business report exported"
        );
        Ok(file)
    }
}
