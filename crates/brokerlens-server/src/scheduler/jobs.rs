use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Background maintenance work, each with its own cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    DrainInteractions,
    ExpireSessions,
    OptimizationQueue,
    TestQueue,
    AggregationQueue,
    HealthCheck,
    Correlations,
    Insights,
    ScheduledReports,
}

impl Job {
    pub const ALL: [Job; 9] = [
        Job::DrainInteractions,
        Job::ExpireSessions,
        Job::OptimizationQueue,
        Job::TestQueue,
        Job::AggregationQueue,
        Job::HealthCheck,
        Job::Correlations,
        Job::Insights,
        Job::ScheduledReports,
    ];

    pub fn period(&self) -> Duration {
        match self {
            Job::DrainInteractions => Duration::seconds(10),
            Job::ExpireSessions | Job::OptimizationQueue | Job::TestQueue => Duration::seconds(60),
            Job::AggregationQueue => Duration::seconds(30),
            Job::HealthCheck => Duration::minutes(5),
            Job::Correlations => Duration::minutes(15),
            Job::Insights => Duration::minutes(10),
            Job::ScheduledReports => Duration::hours(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Job::DrainInteractions => "drain_interactions",
            Job::ExpireSessions => "expire_sessions",
            Job::OptimizationQueue => "optimization_queue",
            Job::TestQueue => "test_queue",
            Job::AggregationQueue => "aggregation_queue",
            Job::HealthCheck => "health_check",
            Job::Correlations => "correlations",
            Job::Insights => "insights",
            Job::ScheduledReports => "scheduled_reports",
        }
    }
}

/// Last start time of every job. A job that never ran is due immediately.
#[derive(Debug, Default)]
pub struct JobClock {
    last_run: HashMap<Job, DateTime<Utc>>,
}

impl JobClock {
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Job> {
        Job::ALL
            .into_iter()
            .filter(|job| {
                self.last_run
                    .get(job)
                    .map_or(true, |last| now - *last >= job.period())
            })
            .collect()
    }

    pub fn mark(&mut self, job: Job, at: DateTime<Utc>) {
        self.last_run.insert(job, at);
    }
}
