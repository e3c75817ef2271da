//! Session lifecycle and raw event capture.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use brokerlens_core::cache::{self, CacheOptions, CacheStore};
use brokerlens_core::collaborators::{PageAudit, SeoAuditor};
use brokerlens_core::error::{AnalyticsError, AnalyticsResult};
use brokerlens_core::session::{
    ConversionEvent, ConversionKind, Coordinates, DeviceType, Interaction, InteractionKind,
    SeoAttribution, SeoContext, Session, SessionPerformance, StartSessionOptions, TrafficSource,
};
use brokerlens_core::time::{generate_id, TimeRange};
use brokerlens_core::traffic::{
    classify_medium, compute_device_id, is_seo_page, query_param, seo_category, seo_country,
    traffic_source_name,
};

mod insights;
mod journey;

pub use insights::{
    compute_insights, count_funnel, engagement_score, funnel_depth, BehaviorFilters,
    BehaviorInsights, ContentPerformance, FunnelAnalysis, FunnelStepStats, Opportunity,
    OpportunityKind, SeoCorrelation,
};
pub use journey::{JourneyStep, SeoImpact, StepSeoMetrics, UserJourney};

/// Live feeds keep only the most recent entries.
pub const LIVE_FEED_CAPACITY: usize = 100;
/// Interactions accepted per queue drain.
pub const QUEUE_BATCH: usize = 100;
const MAX_QUEUE_LEN: usize = 10_000;
const MAX_COMPLETED_SESSIONS: usize = 50_000;
const SEO_AUDIT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionInput {
    pub kind: InteractionKind,
    pub page_url: String,
    #[serde(default)]
    pub element_id: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Client-side event time; server time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InteractionInput {
    pub fn new(kind: InteractionKind, page_url: impl Into<String>) -> Self {
        Self {
            kind,
            page_url: page_url.into(),
            element_id: None,
            coordinates: None,
            metadata: HashMap::new(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionInput {
    pub kind: ConversionKind,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversionInput {
    pub fn new(kind: ConversionKind, value: Option<f64>) -> Self {
        Self {
            kind,
            value,
            currency: None,
            metadata: HashMap::new(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveInteraction {
    pub session_id: String,
    pub kind: InteractionKind,
    pub page_url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveConversion {
    pub session_id: String,
    pub event: ConversionEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageActivity {
    pub url: String,
    pub active_users: usize,
    pub interactions: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighBounceRate,
    SlowPageLoad,
    HighExitRate,
    ConversionDrop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub affected_pages: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealTimeMetrics {
    pub active_users: usize,
    pub current_sessions: usize,
    pub live_interactions: Vec<LiveInteraction>,
    pub recent_conversions: Vec<LiveConversion>,
    pub top_pages: Vec<PageActivity>,
    pub performance_alerts: Vec<PerformanceAlert>,
    /// Totals per interaction kind over drained queue batches.
    pub processed_interactions: HashMap<String, u64>,
}

#[derive(Default)]
struct LiveFeed {
    interactions: VecDeque<LiveInteraction>,
    conversions: VecDeque<LiveConversion>,
}

fn push_capped<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

fn session_key(session_id: &str) -> String {
    format!("user_session:{session_id}")
}

pub struct UserBehaviorTracker {
    cache: Arc<dyn CacheStore>,
    seo: Arc<dyn SeoAuditor>,
    session_ttl: Duration,
    active: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    completed: RwLock<VecDeque<Session>>,
    live: Mutex<LiveFeed>,
    queue: Mutex<VecDeque<LiveInteraction>>,
    processed: Mutex<HashMap<String, u64>>,
}

impl UserBehaviorTracker {
    pub fn new(cache: Arc<dyn CacheStore>, seo: Arc<dyn SeoAuditor>, session_ttl: Duration) -> Self {
        Self {
            cache,
            seo,
            session_ttl,
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(VecDeque::new()),
            live: Mutex::new(LiveFeed::default()),
            queue: Mutex::new(VecDeque::new()),
            processed: Mutex::new(HashMap::new()),
        }
    }

    /// Audit for `url`, cached for an hour.
    pub(crate) async fn page_audit(&self, url: &str) -> anyhow::Result<PageAudit> {
        let key = format!("seo_audit:{url}");
        if let Some(audit) = cache::cached::<PageAudit>(self.cache.as_ref(), &key).await {
            return Ok(audit);
        }
        let audit = self.seo.audit_page(url).await?;
        cache::store(
            self.cache.as_ref(),
            &key,
            &audit,
            CacheOptions::ttl(SEO_AUDIT_TTL).tagged("seo_audits"),
        )
        .await;
        Ok(audit)
    }

    async fn seo_context(&self, url: &str) -> Option<SeoContext> {
        match self.page_audit(url).await {
            Ok(audit) => Some(SeoContext {
                meta_tags: audit.technical_seo.meta_tags,
                structured_data: audit.technical_seo.structured_data,
                content_score: audit.content_quality.overall_score,
            }),
            Err(e) => {
                warn!(page_url = %url, error = %e, "SEO context unavailable");
                None
            }
        }
    }

    async fn cache_session(&self, session: &Session) {
        cache::store(
            self.cache.as_ref(),
            &session_key(&session.session_id),
            session,
            CacheOptions::ttl(self.session_ttl).tagged("user_sessions"),
        )
        .await;
    }

    async fn active_handle(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.active.read().await.get(session_id).cloned()
    }

    pub async fn start_session(&self, options: StartSessionOptions) -> String {
        let now = Utc::now();
        let session_id = generate_id("session");
        let landing = options
            .landing_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let referrer = options.referrer.clone().filter(|r| !r.trim().is_empty());

        let utm_medium = query_param(&landing, "utm_medium");
        let medium = options
            .medium
            .unwrap_or_else(|| classify_medium(referrer.as_deref(), utm_medium.as_deref()));
        let keyword = options
            .keyword
            .clone()
            .or_else(|| query_param(&landing, "keyword"))
            .or_else(|| query_param(&landing, "q"))
            .or_else(|| referrer.as_deref().and_then(|r| query_param(r, "q")));
        let source = TrafficSource {
            medium,
            source: options
                .source
                .clone()
                .or_else(|| query_param(&landing, "utm_source"))
                .unwrap_or_else(|| traffic_source_name(referrer.as_deref())),
            campaign: options
                .campaign
                .clone()
                .or_else(|| query_param(&landing, "utm_campaign")),
            keyword: keyword.clone(),
            referrer: referrer.clone(),
            landing_page: landing.clone(),
            seo_page: is_seo_page(&landing).then(|| landing.clone()),
        };

        let mut attribution = SeoAttribution {
            entry_page: landing.clone(),
            seo_category: seo_category(&landing),
            seo_country: seo_country(&landing),
            search_query: keyword,
            ..SeoAttribution::default()
        };
        let mut setup_error = None;
        match self.page_audit(&landing).await {
            Ok(audit) => {
                attribution.meta_tags_used = audit.technical_seo.meta_tags;
                attribution.structured_data_types = audit.technical_seo.structured_data;
                attribution.content_quality_score = Some(audit.content_quality.overall_score);
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "SEO attribution failed");
                setup_error = Some(format!("SEO attribution unavailable: {e}"));
            }
        }

        let user_agent = options.user_agent.clone().unwrap_or_default();
        let device_id = options.device_id.clone().unwrap_or_else(|| {
            match options.ip_address.as_deref() {
                Some(ip) => compute_device_id(ip, &user_agent),
                None => generate_id("device"),
            }
        });

        let session = Session {
            session_id: session_id.clone(),
            user_id: options.user_id.clone(),
            device_id,
            device_type: DeviceType::from_user_agent(&user_agent),
            start_time: now,
            last_activity: now,
            total_duration_ms: 0,
            page_views: 1,
            current_page: landing,
            interactions: Vec::new(),
            source,
            seo_attribution: attribution,
            conversion_events: Vec::new(),
            performance: SessionPerformance::default(),
            ended_at: None,
            error: setup_error,
        };

        self.cache_session(&session).await;
        info!(
            session_id = %session_id,
            medium = session.source.medium.as_str(),
            source = %session.source.source,
            "session started"
        );
        self.active
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        session_id
    }

    /// Append an interaction. Returns `false` for an unknown session.
    pub async fn track_interaction(&self, session_id: &str, input: InteractionInput) -> bool {
        let Some(handle) = self.active_handle(session_id).await else {
            debug!(session_id, "interaction for unknown session ignored");
            return false;
        };
        let seo_context = if is_seo_page(&input.page_url) {
            self.seo_context(&input.page_url).await
        } else {
            None
        };
        let interaction = Interaction {
            kind: input.kind,
            timestamp: input.timestamp.unwrap_or_else(Utc::now),
            page_url: input.page_url,
            element_id: input.element_id,
            coordinates: input.coordinates,
            metadata: input.metadata,
            seo_context,
        };
        let live = LiveInteraction {
            session_id: session_id.to_string(),
            kind: interaction.kind,
            page_url: interaction.page_url.clone(),
            timestamp: interaction.timestamp,
        };

        let snapshot = {
            let mut session = handle.lock().await;
            if interaction.timestamp > session.last_activity {
                session.last_activity = interaction.timestamp;
            }
            session.total_duration_ms = (session.last_activity - session.start_time)
                .num_milliseconds()
                .max(0);
            if session.current_page != interaction.page_url {
                session.page_views += 1;
                session.current_page = interaction.page_url.clone();
            }
            if interaction.kind == InteractionKind::Error {
                session.performance.error_count += 1;
            }
            session.interactions.push(interaction);
            session.clone()
        };

        push_capped(
            &mut self.live.lock().await.interactions,
            live.clone(),
            LIVE_FEED_CAPACITY,
        );
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= MAX_QUEUE_LEN {
                queue.pop_front();
                warn!(max = MAX_QUEUE_LEN, "analytics queue full, dropping oldest interaction");
            }
            queue.push_back(live);
        }
        self.cache_session(&snapshot).await;
        true
    }

    pub async fn track_conversion(
        &self,
        session_id: &str,
        input: ConversionInput,
    ) -> Option<ConversionEvent> {
        let Some(handle) = self.active_handle(session_id).await else {
            debug!(session_id, "conversion for unknown session ignored");
            return None;
        };
        let (event, snapshot) = {
            let mut session = handle.lock().await;
            let timestamp = input.timestamp.unwrap_or_else(Utc::now);
            let event = ConversionEvent {
                kind: input.kind,
                timestamp,
                value: input.value,
                currency: input.currency.unwrap_or_else(|| "USD".to_string()),
                seo_attribution: session.seo_attribution.clone(),
                funnel_step: session.funnel_step(),
                metadata: input.metadata,
            };
            if timestamp > session.last_activity {
                session.last_activity = timestamp;
            }
            session.conversion_events.push(event.clone());
            (event, session.clone())
        };

        push_capped(
            &mut self.live.lock().await.conversions,
            LiveConversion {
                session_id: session_id.to_string(),
                event: event.clone(),
            },
            LIVE_FEED_CAPACITY,
        );
        self.cache_session(&snapshot).await;
        info!(
            session_id,
            kind = ?event.kind,
            value = event.value.unwrap_or(0.0),
            funnel_step = event.funnel_step,
            "conversion tracked"
        );
        Some(event)
    }

    fn finalize(session: &mut Session, ended_at: DateTime<Utc>) {
        session.ended_at = Some(ended_at);
        session.total_duration_ms = (ended_at.max(session.last_activity) - session.start_time)
            .num_milliseconds()
            .max(0);
    }

    async fn retire(&self, mut session: Session) {
        self.cache_session(&session).await;
        session.interactions.shrink_to_fit();
        let mut completed = self.completed.write().await;
        if completed.len() >= MAX_COMPLETED_SESSIONS {
            completed.pop_front();
        }
        completed.push_back(session);
    }

    /// Close a session: fix its final duration and move it out of the active set.
    pub async fn end_session(&self, session_id: &str) -> AnalyticsResult<Session> {
        let handle = self
            .active
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| AnalyticsError::not_found(format!("Session {session_id}")))?;
        let session = {
            let mut session = handle.lock().await;
            Self::finalize(&mut session, Utc::now());
            session.clone()
        };
        info!(
            session_id,
            duration_ms = session.total_duration_ms,
            page_views = session.page_views,
            converted = session.converted(),
            "session ended"
        );
        self.retire(session.clone()).await;
        Ok(session)
    }

    /// Finalize sessions idle for longer than the session TTL.
    pub async fn expire_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let handles: Vec<(String, Arc<Mutex<Session>>)> = self
            .active
            .read()
            .await
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect();

        let mut idle = Vec::new();
        for (id, handle) in handles {
            if handle.lock().await.last_activity + ttl < now {
                idle.push(id);
            }
        }

        let mut expired = 0;
        for id in idle {
            let Some(handle) = self.active.write().await.remove(&id) else {
                continue;
            };
            let session = {
                let mut session = handle.lock().await;
                let last = session.last_activity;
                Self::finalize(&mut session, last);
                session.clone()
            };
            self.retire(session).await;
            expired += 1;
        }
        if expired > 0 {
            info!(expired, "idle sessions finalized");
        }
        expired
    }

    /// Look up a session, active or completed.
    pub async fn find_session(&self, session_id: &str) -> Option<Session> {
        if let Some(handle) = self.active_handle(session_id).await {
            return Some(handle.lock().await.clone());
        }
        self.completed
            .read()
            .await
            .iter()
            .rev()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Snapshot of every tracked session started inside `range`.
    pub async fn sessions(&self, range: Option<TimeRange>) -> Vec<Session> {
        let handles: Vec<Arc<Mutex<Session>>> =
            self.active.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.clone());
        }
        out.extend(self.completed.read().await.iter().cloned());
        if let Some(range) = range {
            out.retain(|s| range.contains(s.start_time));
        }
        out.sort_by_key(|s| s.start_time);
        out
    }

    pub async fn active_session_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Process up to `batch` queued interactions into per-kind totals.
    pub async fn drain_analytics_queue(&self, batch: usize) -> usize {
        let drained: Vec<LiveInteraction> = {
            let mut queue = self.queue.lock().await;
            let n = batch.min(queue.len());
            queue.drain(..n).collect()
        };
        if drained.is_empty() {
            return 0;
        }
        let mut totals = self.processed.lock().await;
        for item in &drained {
            *totals.entry(item.kind.as_str().to_string()).or_insert(0) += 1;
        }
        debug!(processed = drained.len(), "analytics batch processed");
        drained.len()
    }

    pub async fn queued_interactions(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn get_real_time_metrics(&self) -> RealTimeMetrics {
        let now = Utc::now();
        let active: Vec<Session> = {
            let handles: Vec<Arc<Mutex<Session>>> =
                self.active.read().await.values().cloned().collect();
            let mut out = Vec::with_capacity(handles.len());
            for handle in handles {
                out.push(handle.lock().await.clone());
            }
            out
        };
        let active_users = active
            .iter()
            .map(|s| s.user_id.clone().unwrap_or_else(|| s.device_id.clone()))
            .collect::<HashSet<_>>()
            .len();

        let (live_interactions, recent_conversions) = {
            let live = self.live.lock().await;
            (
                live.interactions.iter().cloned().collect::<Vec<_>>(),
                live.conversions.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let mut per_page: HashMap<String, (HashSet<String>, usize)> = HashMap::new();
        for item in &live_interactions {
            let entry = per_page.entry(item.page_url.clone()).or_default();
            entry.0.insert(item.session_id.clone());
            entry.1 += 1;
        }
        let mut page_conversions: HashMap<&str, usize> = HashMap::new();
        for session in &active {
            if session.converted() {
                *page_conversions.entry(session.current_page.as_str()).or_insert(0) += 1;
            }
        }
        let mut top_pages: Vec<PageActivity> = per_page
            .into_iter()
            .map(|(url, (sessions, interactions))| {
                let conversions = page_conversions.get(url.as_str()).copied().unwrap_or(0);
                PageActivity {
                    conversion_rate: brokerlens_core::stats::percent(
                        conversions as f64,
                        sessions.len() as f64,
                    ),
                    active_users: sessions.len(),
                    interactions,
                    url,
                }
            })
            .collect();
        top_pages.sort_by(|a, b| b.interactions.cmp(&a.interactions).then(a.url.cmp(&b.url)));
        top_pages.truncate(10);

        let all = self.sessions(None).await;
        let performance_alerts = insights::landing_page_bounce(&all)
            .into_iter()
            .filter(|p| p.sessions >= insights::MIN_BOUNCE_SAMPLE && p.bounce_rate > 70.0)
            .map(|p| PerformanceAlert {
                kind: AlertKind::HighBounceRate,
                severity: if p.bounce_rate > 85.0 {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                },
                message: format!(
                    "Bounce rate {:.1}% on {} over {} sessions",
                    p.bounce_rate, p.page, p.sessions
                ),
                affected_pages: vec![p.page],
                timestamp: now,
            })
            .collect();

        RealTimeMetrics {
            active_users,
            current_sessions: active.len(),
            live_interactions,
            recent_conversions,
            top_pages,
            performance_alerts,
            processed_interactions: self.processed.lock().await.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlens_core::collaborators::StaticSeoAuditor;

    use crate::memory_cache::MemoryCache;

    fn tracker(ttl: Duration) -> UserBehaviorTracker {
        UserBehaviorTracker::new(
            Arc::new(MemoryCache::new(1_000)),
            Arc::new(StaticSeoAuditor::default()),
            ttl,
        )
    }

    async fn interaction_count(tracker: &UserBehaviorTracker, session_id: &str) -> usize {
        tracker
            .find_session(session_id)
            .await
            .map(|s| s.interactions.len())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn unknown_session_is_a_no_op() {
        let tracker = tracker(Duration::from_secs(60));
        let tracked = tracker
            .track_interaction("missing", InteractionInput::new(InteractionKind::Click, "/"))
            .await;
        assert!(!tracked);
        assert!(tracker
            .track_conversion("missing", ConversionInput::new(ConversionKind::Signup, None))
            .await
            .is_none());
        assert_eq!(tracker.queued_interactions().await, 0);
        assert!(tracker.find_session("missing").await.is_none());
    }

    #[tokio::test]
    async fn interactions_only_grow_even_with_stale_timestamps() {
        let tracker = tracker(Duration::from_secs(60));
        let session_id = tracker.start_session(StartSessionOptions::default()).await;
        let now = Utc::now();
        let stamps = [
            now,
            now - chrono::Duration::minutes(5),
            now + chrono::Duration::seconds(3),
            now - chrono::Duration::hours(1),
        ];

        let mut previous = interaction_count(&tracker, &session_id).await;
        for stamp in stamps {
            let input = InteractionInput::new(InteractionKind::Scroll, "/brokers").at(stamp);
            assert!(tracker.track_interaction(&session_id, input).await);
            let count = interaction_count(&tracker, &session_id).await;
            assert_eq!(count, previous + 1);
            previous = count;
        }

        let session = tracker.find_session(&session_id).await.unwrap();
        // Older client stamps never move last activity backwards.
        assert_eq!(session.last_activity, now + chrono::Duration::seconds(3));
        assert_eq!(tracker.queued_interactions().await, 4);
    }

    #[tokio::test]
    async fn idle_sessions_expire_after_the_ttl() {
        let tracker = tracker(Duration::from_secs(30 * 60));
        let idle = tracker.start_session(StartSessionOptions::default()).await;
        let fresh = tracker.start_session(StartSessionOptions::default()).await;
        let later = Utc::now() + chrono::Duration::minutes(31);
        assert!(
            tracker
                .track_interaction(
                    &fresh,
                    InteractionInput::new(InteractionKind::Click, "/").at(later)
                )
                .await
        );

        assert_eq!(tracker.expire_idle_sessions(later).await, 1);
        assert_eq!(tracker.active_session_count().await, 1);
        let retired = tracker.find_session(&idle).await.unwrap();
        assert_eq!(retired.ended_at, Some(retired.last_activity));
        assert!(
            !tracker
                .track_interaction(&idle, InteractionInput::new(InteractionKind::Click, "/"))
                .await
        );

        // Nothing else is past its TTL yet.
        assert_eq!(tracker.expire_idle_sessions(later).await, 0);
    }
}
