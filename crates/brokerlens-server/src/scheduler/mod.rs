use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use brokerlens_engine::tracker::QUEUE_BATCH;

use crate::state::AppState;

pub mod jobs;

pub use jobs::{Job, JobClock};

/// Run one job to completion and return how many items it handled.
async fn run_job(state: &AppState, job: Job, now: DateTime<Utc>) -> usize {
    let services = &state.services;
    match job {
        Job::DrainInteractions => services.tracker.drain_analytics_queue(QUEUE_BATCH).await,
        Job::ExpireSessions => services.tracker.expire_idle_sessions(now).await,
        Job::OptimizationQueue => services.optimizer.process_optimization_queue().await,
        Job::TestQueue => services.experiments.process_test_queue(now).await,
        Job::AggregationQueue => services.aggregator.process_aggregation_queue().await,
        Job::HealthCheck => services.aggregator.get_analytics_health().await.services.len(),
        Job::Correlations => services.aggregator.reanalyze_correlations().await.remaining,
        Job::Insights => services.aggregator.regenerate_insights().await,
        Job::ScheduledReports => services.intelligence.process_scheduled_reports(now).await,
    }
}

/// Run every job that is due at `now`, one after another.
///
/// Each job is bounded by the configured timeout; a job that overruns is
/// abandoned and retried on its next period. Returns the jobs that completed,
/// or an error when every due job timed out.
pub async fn process_once(
    state: &Arc<AppState>,
    clock: &mut JobClock,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<(Job, usize)>> {
    let timeout = state.config.job_timeout();
    let due = clock.due(now);
    let mut completed = Vec::new();
    for &job in &due {
        clock.mark(job, now);
        match tokio::time::timeout(timeout, run_job(state, job, now)).await {
            Ok(handled) => {
                debug!(job = job.as_str(), handled, "scheduler job finished");
                completed.push((job, handled));
            }
            Err(_) => {
                warn!(
                    job = job.as_str(),
                    timeout_secs = timeout.as_secs(),
                    "scheduler job timed out"
                );
            }
        }
    }
    if completed.is_empty() && !due.is_empty() {
        anyhow::bail!("all {} due scheduler jobs timed out", due.len());
    }
    Ok(completed)
}

pub async fn run_scheduler_loop(state: Arc<AppState>) {
    let tick = state.config.scheduler_tick();
    info!(tick_seconds = tick.as_secs(), "Analytics scheduler started");
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut clock = JobClock::default();
    loop {
        interval.tick().await;
        if let Err(err) = process_once(&state, &mut clock, Utc::now()).await {
            error!(error = %err, "analytics scheduler iteration failed");
        }
    }
}
