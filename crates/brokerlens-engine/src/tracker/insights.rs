use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::error::AnalyticsResult;
use brokerlens_core::priority::Priority;
use brokerlens_core::session::{DeviceType, Session};
use brokerlens_core::stats::{mean, percent};
use brokerlens_core::time::TimeRange;
use brokerlens_core::traffic::{url_path, TrafficMedium};

use super::UserBehaviorTracker;

/// Landing pages need this many sessions before their bounce rate counts.
pub(crate) const MIN_BOUNCE_SAMPLE: usize = 10;
/// Pages need this many visits before their conversion rate counts.
pub(crate) const MIN_CONVERSION_SAMPLE: usize = 50;
const MAX_CONVERSION_OPPORTUNITIES: usize = 5;
const MAX_OPPORTUNITIES: usize = 10;
const TOP_CONTENT: usize = 10;

const INSIGHTS_TTL: Duration = Duration::from_secs(10 * 60);
const SEO_CORRELATION_TTL: Duration = Duration::from_secs(15 * 60);
const FUNNEL_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BehaviorFilters {
    pub seo_category: Option<String>,
    /// Matched against the session's traffic source name.
    pub traffic_source: Option<String>,
    pub device_type: Option<DeviceType>,
}

impl BehaviorFilters {
    pub fn matches(&self, session: &Session) -> bool {
        if let Some(category) = &self.seo_category {
            if session.seo_attribution.seo_category.as_ref() != Some(category) {
                return false;
            }
        }
        if let Some(source) = &self.traffic_source {
            if &session.source.source != source {
                return false;
            }
        }
        if let Some(device) = self.device_type {
            if session.device_type != device {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Content,
    Performance,
    Seo,
    Conversion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    pub kind: OpportunityKind,
    pub priority: Priority,
    pub description: String,
    pub potential_impact: f64,
    pub implementation: String,
    pub affected_pages: Vec<String>,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentPerformance {
    pub page_url: String,
    pub visits: usize,
    pub interactions: usize,
    pub conversions: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BehaviorInsights {
    pub total_sessions: usize,
    pub overall_engagement: f64,
    pub bounce_rate: f64,
    pub average_session_duration_ms: f64,
    pub pages_per_session: f64,
    pub conversion_rate: f64,
    pub seo_effectiveness: f64,
    pub top_performing_content: Vec<ContentPerformance>,
    pub optimization_opportunities: Vec<Opportunity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoCorrelation {
    pub page_url: String,
    pub seo_score: f64,
    pub engagement_score: f64,
    pub conversion_rate: f64,
    pub bounce_rate: f64,
    pub average_session_duration_ms: f64,
    pub sessions: usize,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunnelStepStats {
    pub url: String,
    pub sessions: usize,
    /// Fraction of the previous step's sessions (of all sessions for the
    /// first step) that reached this one.
    pub conversion_rate: f64,
    pub drop_off_rate: f64,
    pub organic_share: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunnelAnalysis {
    pub total_sessions: usize,
    pub steps: Vec<FunnelStepStats>,
    pub overall_conversion_rate: f64,
    pub drop_off_points: Vec<usize>,
}

pub(crate) struct LandingBounce {
    pub page: String,
    pub sessions: usize,
    pub bounce_rate: f64,
}

/// Bounce rate per landing page, ordered by page.
pub(crate) fn landing_page_bounce(sessions: &[Session]) -> Vec<LandingBounce> {
    let mut by_page: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for session in sessions {
        let entry = by_page.entry(session.source.landing_page.as_str()).or_default();
        entry.0 += 1;
        if session.is_bounce() {
            entry.1 += 1;
        }
    }
    by_page
        .into_iter()
        .map(|(page, (total, bounced))| LandingBounce {
            page: page.to_string(),
            sessions: total,
            bounce_rate: percent(bounced as f64, total as f64),
        })
        .collect()
}

/// Mean of interaction, duration and page-depth sub-scores, each capped at 100.
pub fn engagement_score(sessions: &[Session]) -> f64 {
    if sessions.is_empty() {
        return 0.0;
    }
    let n = sessions.len() as f64;
    let interactions = sessions.iter().map(|s| s.interactions.len()).sum::<usize>() as f64 / n;
    let minutes = sessions.iter().map(|s| s.total_duration_ms).sum::<i64>() as f64 / n / 60_000.0;
    let pages = sessions.iter().map(|s| s.page_views as f64).sum::<f64>() / n;
    let parts = [
        (interactions * 5.0).min(100.0),
        (minutes * 10.0).min(100.0),
        (pages * 20.0).min(100.0),
    ];
    mean(&parts).unwrap_or(0.0)
}

#[derive(Default)]
struct PageStats {
    visits: usize,
    interactions: usize,
    conversions: usize,
}

fn page_stats(sessions: &[Session]) -> HashMap<String, PageStats> {
    let mut pages: HashMap<String, PageStats> = HashMap::new();
    for session in sessions {
        let visited: HashSet<String> = session.page_sequence().into_iter().collect();
        for page in visited {
            pages.entry(page).or_default().visits += 1;
        }
        for interaction in &session.interactions {
            pages
                .entry(interaction.page_url.clone())
                .or_default()
                .interactions += 1;
        }
        if session.converted() {
            pages
                .entry(session.current_page.clone())
                .or_default()
                .conversions += session.conversion_events.len();
        }
    }
    pages
}

/// Aggregate insights over `sessions`. Empty input yields all zeros.
pub fn compute_insights(sessions: &[Session]) -> BehaviorInsights {
    if sessions.is_empty() {
        return BehaviorInsights::default();
    }
    let n = sessions.len() as f64;
    let bounces = sessions.iter().filter(|s| s.is_bounce()).count();
    let converted = sessions.iter().filter(|s| s.converted()).count();
    let seo_sessions: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.seo_attribution.seo_category.is_some())
        .collect();
    let seo_converted = seo_sessions.iter().filter(|s| s.converted()).count();

    let stats = page_stats(sessions);
    let mut top: Vec<ContentPerformance> = stats
        .iter()
        .map(|(page, s)| ContentPerformance {
            page_url: page.clone(),
            visits: s.visits,
            interactions: s.interactions,
            conversions: s.conversions,
            score: (s.conversions * 100 + s.interactions * 10 + s.visits) as f64,
        })
        .collect();
    top.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.page_url.cmp(&b.page_url)));
    top.truncate(TOP_CONTENT);

    let mut opportunities: Vec<Opportunity> = Vec::new();
    let mut bouncy: Vec<LandingBounce> = landing_page_bounce(sessions)
        .into_iter()
        .filter(|p| p.sessions >= MIN_BOUNCE_SAMPLE && p.bounce_rate > 70.0)
        .collect();
    bouncy.sort_by(|a, b| b.bounce_rate.total_cmp(&a.bounce_rate));
    for page in bouncy {
        opportunities.push(Opportunity {
            kind: OpportunityKind::Content,
            priority: Priority::High,
            description: format!(
                "High bounce rate ({:.1}%) on landing page {}",
                page.bounce_rate, page.page
            ),
            potential_impact: 85.0,
            implementation: "Improve above-the-fold content and add clear next steps".to_string(),
            affected_pages: vec![page.page],
            sample_size: page.sessions,
        });
    }

    let mut weak: Vec<(&String, &PageStats, f64)> = stats
        .iter()
        .filter(|(_, s)| s.visits >= MIN_CONVERSION_SAMPLE)
        .map(|(page, s)| (page, s, percent(s.conversions as f64, s.visits as f64)))
        .filter(|(_, _, rate)| *rate < 2.0)
        .collect();
    weak.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(b.0)));
    for (page, s, rate) in weak.into_iter().take(MAX_CONVERSION_OPPORTUNITIES) {
        opportunities.push(Opportunity {
            kind: OpportunityKind::Conversion,
            priority: Priority::Medium,
            description: format!("Low conversion rate ({rate:.2}%) on {page}"),
            potential_impact: 60.0,
            implementation: "Strengthen calls to action and simplify the signup path".to_string(),
            affected_pages: vec![page.clone()],
            sample_size: s.visits,
        });
    }
    opportunities.truncate(MAX_OPPORTUNITIES);

    BehaviorInsights {
        total_sessions: sessions.len(),
        overall_engagement: engagement_score(sessions),
        bounce_rate: percent(bounces as f64, n),
        average_session_duration_ms: sessions.iter().map(|s| s.total_duration_ms).sum::<i64>()
            as f64
            / n,
        pages_per_session: sessions.iter().map(|s| s.page_views as f64).sum::<f64>() / n,
        conversion_rate: percent(converted as f64, n),
        seo_effectiveness: percent(seo_converted as f64, seo_sessions.len() as f64),
        top_performing_content: top,
        optimization_opportunities: opportunities,
    }
}

fn path_matches(page: &str, step: &str) -> bool {
    url_path(page).starts_with(&url_path(step))
}

/// Number of leading `steps` the session visited, in order.
pub fn funnel_depth(session: &Session, steps: &[String]) -> usize {
    let pages = session.page_sequence();
    let mut cursor = 0;
    for (i, step) in steps.iter().enumerate() {
        match pages[cursor..].iter().position(|p| path_matches(p, step)) {
            Some(offset) => cursor += offset + 1,
            None => return i,
        }
    }
    steps.len()
}

/// Step-to-step counting: a session reaches step `i` when its page
/// sequence visits every earlier step, in order.
pub fn count_funnel(sessions: &[Session], steps: &[String]) -> FunnelAnalysis {
    let mut reached = vec![0usize; steps.len()];
    let mut organic = vec![0usize; steps.len()];
    for session in sessions {
        let depth = funnel_depth(session, steps);
        let is_organic = session.source.medium == TrafficMedium::Organic;
        for (count, organic_count) in reached.iter_mut().zip(organic.iter_mut()).take(depth) {
            *count += 1;
            if is_organic {
                *organic_count += 1;
            }
        }
    }

    let total = sessions.len();
    let mut previous = total;
    let mut stats = Vec::with_capacity(steps.len());
    let mut drop_off_points = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let rate = if previous == 0 {
            0.0
        } else {
            reached[i] as f64 / previous as f64
        };
        if i > 0 && previous > 0 && rate < 0.5 {
            drop_off_points.push(i);
        }
        stats.push(FunnelStepStats {
            url: step.clone(),
            sessions: reached[i],
            conversion_rate: rate,
            drop_off_rate: (1.0 - rate) * 100.0,
            organic_share: percent(organic[i] as f64, reached[i] as f64),
        });
        previous = reached[i];
    }

    FunnelAnalysis {
        total_sessions: total,
        overall_conversion_rate: match reached.last() {
            Some(last) => percent(*last as f64, total as f64),
            None => 0.0,
        },
        steps: stats,
        drop_off_points,
    }
}

impl UserBehaviorTracker {
    pub async fn get_behavior_insights(
        &self,
        range: Option<TimeRange>,
        filters: &BehaviorFilters,
    ) -> BehaviorInsights {
        let key = format!(
            "behavior_insights:{}:{}",
            serde_json::to_string(&range).unwrap_or_default(),
            serde_json::to_string(filters).unwrap_or_default()
        );
        if let Some(hit) = cache::cached::<BehaviorInsights>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let mut sessions = self.sessions(range).await;
        sessions.retain(|s| filters.matches(s));
        let insights = compute_insights(&sessions);
        cache::store(
            self.cache.as_ref(),
            &key,
            &insights,
            CacheOptions::ttl(INSIGHTS_TTL).tagged("behavior_insights"),
        )
        .await;
        insights
    }

    pub async fn get_seo_correlation(&self, page_url: &str) -> AnalyticsResult<SeoCorrelation> {
        let key = format!("seo_correlation:{page_url}");
        if let Some(hit) = cache::cached::<SeoCorrelation>(self.cache.as_ref(), &key).await {
            return Ok(hit);
        }
        let audit = self.page_audit(page_url).await?;
        let target = url_path(page_url);
        let sessions: Vec<Session> = self
            .sessions(None)
            .await
            .into_iter()
            .filter(|s| s.page_sequence().iter().any(|p| url_path(p) == target))
            .collect();
        let n = sessions.len() as f64;
        let conversion_rate = percent(sessions.iter().filter(|s| s.converted()).count() as f64, n);
        let bounce_rate = percent(sessions.iter().filter(|s| s.is_bounce()).count() as f64, n);

        let mut recommendations = Vec::new();
        if bounce_rate > 60.0 {
            recommendations.push("Improve content engagement to reduce bounce rate".to_string());
        }
        if audit.overall_score < 70.0 {
            recommendations
                .push("Optimize on-page SEO: titles, meta descriptions and schema".to_string());
        }
        if conversion_rate < 2.0 {
            recommendations.push("Strengthen calls to action to lift conversion".to_string());
        }

        let correlation = SeoCorrelation {
            page_url: page_url.to_string(),
            seo_score: audit.overall_score,
            engagement_score: engagement_score(&sessions),
            conversion_rate,
            bounce_rate,
            average_session_duration_ms: if sessions.is_empty() {
                0.0
            } else {
                sessions.iter().map(|s| s.total_duration_ms).sum::<i64>() as f64 / n
            },
            sessions: sessions.len(),
            recommendations,
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &correlation,
            CacheOptions::ttl(SEO_CORRELATION_TTL).tagged("seo_correlations"),
        )
        .await;
        Ok(correlation)
    }

    /// Uncached funnel counting over every tracked session.
    pub async fn funnel_counts(&self, steps: &[String]) -> FunnelAnalysis {
        count_funnel(&self.sessions(None).await, steps)
    }

    pub async fn get_funnel_analysis(&self, steps: &[String]) -> FunnelAnalysis {
        let key = format!("funnel_analysis:{}", steps.join("|"));
        if let Some(hit) = cache::cached::<FunnelAnalysis>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let analysis = self.funnel_counts(steps).await;
        cache::store(
            self.cache.as_ref(),
            &key,
            &analysis,
            CacheOptions::ttl(FUNNEL_TTL).tagged("funnel_analysis"),
        )
        .await;
        analysis
    }
}
