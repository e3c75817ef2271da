use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use brokerlens_core::error::AnalyticsResult;
use brokerlens_core::time::{generate_id, TimeRange};

use crate::export::{build_csv, build_json, flatten, ExportFormat, ExportedFile};
use crate::tracker::BehaviorFilters;

use super::dashboard::Audience;
use super::AnalyticsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSection {
    Overview,
    Behavior,
    Conversions,
    Experiments,
    Correlations,
    Insights,
    Health,
}

impl ReportSection {
    pub const ALL: [ReportSection; 7] = [
        Self::Overview,
        Self::Behavior,
        Self::Conversions,
        Self::Experiments,
        Self::Correlations,
        Self::Insights,
        Self::Health,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Behavior => "behavior",
            Self::Conversions => "conversions",
            Self::Experiments => "experiments",
            Self::Correlations => "correlations",
            Self::Insights => "insights",
            Self::Health => "health",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMetadata {
    pub size: usize,
    pub sections: Vec<ReportSection>,
    pub format: ExportFormat,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedReportExport {
    pub report_id: String,
    pub download_url: String,
    pub metadata: ReportMetadata,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl AnalyticsAggregator {
    async fn report_section(
        &self,
        section: ReportSection,
        range: Option<TimeRange>,
    ) -> AnalyticsResult<Value> {
        let value = match section {
            ReportSection::Overview => {
                let dashboard = self.get_analytics_dashboard(Audience::Operational).await;
                serde_json::to_value(dashboard.overview)?
            }
            ReportSection::Behavior => serde_json::to_value(
                self.tracker
                    .get_behavior_insights(range, &BehaviorFilters::default())
                    .await,
            )?,
            ReportSection::Conversions => {
                let insights = self.optimizer.get_optimization_insights(None, range).await?;
                serde_json::to_value(insights)?
            }
            ReportSection::Experiments => {
                let tests: Vec<Value> = self
                    .experiments
                    .list_tests()
                    .await
                    .iter()
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "name": t.name,
                            "status": t.status.as_str(),
                            "winner": t.results.as_ref().and_then(|r| r.winner.clone()),
                        })
                    })
                    .collect();
                Value::Array(tests)
            }
            ReportSection::Correlations => {
                serde_json::to_value(self.get_analytics_correlations(range, None, None).await)?
            }
            ReportSection::Insights => {
                serde_json::to_value(self.get_cross_service_insights(None, None, None).await)?
            }
            ReportSection::Health => serde_json::to_value(self.get_analytics_health().await)?,
        };
        Ok(value)
    }

    /// Render the selected sections (all when `None`) to a downloadable
    /// JSON or CSV document.
    pub async fn export_unified_report(
        &self,
        format: ExportFormat,
        range: Option<TimeRange>,
        sections: Option<Vec<ReportSection>>,
    ) -> AnalyticsResult<UnifiedReportExport> {
        let format = format.ensure_supported()?;
        let mut sections = sections
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ReportSection::ALL.to_vec());
        let mut seen = HashSet::new();
        sections.retain(|s| seen.insert(*s));

        let mut body = Map::new();
        for section in &sections {
            body.insert(
                section.as_str().to_string(),
                self.report_section(*section, range).await?,
            );
        }

        let report_id = generate_id("unified_report");
        let now = Utc::now();
        let content = match format {
            ExportFormat::Csv => {
                let rows: Vec<_> = body
                    .iter()
                    .flat_map(|(name, value)| flatten(name, value))
                    .collect();
                build_csv(&rows)?
            }
            _ => build_json(&json!({
                "report_id": report_id,
                "generated_at": now,
                "time_range": range,
                "sections": body,
            }))?,
        };

        let file = ExportedFile::new(
            &report_id,
            &report_id,
            format,
            &self.export_base_url,
            content,
            now,
        );
        info!(
            report_id = %report_id,
            format = format.as_str(),
            size = file.size,
            "unified report exported"
        );
        Ok(UnifiedReportExport {
            report_id,
            download_url: file.download_url,
            metadata: ReportMetadata {
                size: file.size,
                sections,
                format,
                generated_at: file.generated_at,
                expires_at: file.expires_at,
            },
            content: file.bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_parse_by_snake_case_name() {
        assert_eq!(ReportSection::parse("health"), Some(ReportSection::Health));
        assert_eq!(ReportSection::parse("Health"), None);
        for section in ReportSection::ALL {
            assert_eq!(ReportSection::parse(section.as_str()), Some(section));
        }
    }
}
