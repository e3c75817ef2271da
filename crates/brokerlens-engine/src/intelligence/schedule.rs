use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::time::generate_id;

use crate::export::ExportFormat;

use super::report::ReportConfig;
use super::BusinessIntelligence;

const SCHEDULE_TTL: StdDuration = StdDuration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl ReportFrequency {
    pub fn period(&self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRequest {
    pub frequency: ReportFrequency,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub format: Option<ExportFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSchedule {
    pub id: String,
    pub config: ReportConfig,
    pub frequency: ReportFrequency,
    pub recipients: Vec<String>,
    pub format: ExportFormat,
    pub last_generated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReportSchedule {
    /// A schedule that never ran is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last_generated
            .map_or(true, |last| now - last >= self.frequency.period())
    }
}

impl BusinessIntelligence {
    pub async fn schedule_report(
        &self,
        config: ReportConfig,
        request: ScheduleRequest,
    ) -> AnalyticsResult<String> {
        if request.recipients.is_empty() {
            return Err(AnalyticsError::validation(
                "A scheduled report needs at least one recipient",
            ));
        }
        let format = request
            .format
            .unwrap_or(ExportFormat::Json)
            .ensure_supported()?;
        let schedule = ReportSchedule {
            id: generate_id("schedule"),
            config,
            frequency: request.frequency,
            recipients: request.recipients,
            format,
            last_generated: None,
            created_at: Utc::now(),
        };
        cache::store(
            self.cache.as_ref(),
            &format!("report_schedule:{}", schedule.id),
            &schedule,
            CacheOptions::ttl(SCHEDULE_TTL).tagged("report_schedules"),
        )
        .await;
        info!(
            schedule_id = %schedule.id,
            frequency = ?schedule.frequency,
            recipients = schedule.recipients.len(),
            "report scheduled"
        );
        let id = schedule.id.clone();
        self.schedules.write().await.insert(id.clone(), schedule);
        Ok(id)
    }

    pub async fn schedules(&self) -> Vec<ReportSchedule> {
        let mut schedules: Vec<ReportSchedule> =
            self.schedules.read().await.values().cloned().collect();
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        schedules
    }

    /// Generate and deliver every due schedule. Returns how many were
    /// delivered; failures stay due for the next pass.
    pub async fn process_scheduled_reports(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<ReportSchedule> = self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();

        let mut delivered = 0;
        for schedule in due {
            let outcome = async {
                let report = self.generate_report(&schedule.config).await?;
                let payload = serde_json::to_value(&report)?;
                self.delivery
                    .deliver(&schedule.id, &schedule.recipients, &payload)
                    .await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;
            match outcome {
                Ok(()) => {
                    if let Some(entry) = self.schedules.write().await.get_mut(&schedule.id) {
                        entry.last_generated = Some(now);
                    }
                    delivered += 1;
                }
                Err(e) => warn!(schedule_id = %schedule.id, error = %e, "scheduled report failed"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(frequency: ReportFrequency, last: Option<DateTime<Utc>>) -> ReportSchedule {
        ReportSchedule {
            id: "schedule_1".into(),
            config: ReportConfig::default(),
            frequency,
            recipients: vec!["ops@example.com".into()],
            format: ExportFormat::Json,
            last_generated: last,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn never_generated_schedules_are_due() {
        assert!(schedule(ReportFrequency::Monthly, None).is_due(Utc::now()));
    }

    #[test]
    fn due_after_a_full_period() {
        let now = Utc::now();
        let weekly = schedule(ReportFrequency::Weekly, Some(now - Duration::days(6)));
        assert!(!weekly.is_due(now));
        assert!(weekly.is_due(now + Duration::days(1)));
        let daily = schedule(ReportFrequency::Daily, Some(now - Duration::hours(25)));
        assert!(daily.is_due(now));
    }
}
