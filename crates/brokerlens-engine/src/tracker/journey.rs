use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::session::{ConversionEvent, InteractionKind, Session};
use brokerlens_core::traffic::is_seo_page;

use super::UserBehaviorTracker;

const JOURNEY_TTL: Duration = Duration::from_secs(5 * 60);
const CONVERSION_WINDOW_SECS: i64 = 60;
const SEO_ATTRIBUTION_WINDOW_SECS: i64 = 5 * 60;
const DROP_OFF_GAP_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepSeoMetrics {
    pub seo_score: f64,
    pub content_score: f64,
    pub technical_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JourneyStep {
    pub page_url: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub duration_ms: i64,
    pub scroll_depth: f64,
    pub interactions: usize,
    pub is_seo_page: bool,
    pub seo_metrics: StepSeoMetrics,
    pub exit_point: bool,
    pub conversion: Option<ConversionEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoImpact {
    pub seo_pages_visited: usize,
    pub total_seo_engagement: usize,
    pub conversion_from_seo: bool,
    pub seo_revenue_attribution: f64,
    pub keyword_attribution: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserJourney {
    pub session_id: String,
    pub user_id: Option<String>,
    pub steps: Vec<JourneyStep>,
    pub total_duration_ms: i64,
    pub converted: bool,
    pub seo_impact: SeoImpact,
    pub drop_off_points: Vec<usize>,
}

/// Group a session's interactions by page, in first-seen order.
pub fn build_journey(session: &Session, seo: &HashMap<String, StepSeoMetrics>) -> UserJourney {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, interaction) in session.interactions.iter().enumerate() {
        let page = interaction.page_url.as_str();
        groups
            .entry(page)
            .or_insert_with(|| {
                order.push(page);
                Vec::new()
            })
            .push(i);
    }
    let exit_page = session.interactions.last().map(|i| i.page_url.as_str());

    let steps: Vec<JourneyStep> = order
        .iter()
        .map(|page| {
            let members = &groups[page];
            let times: Vec<DateTime<Utc>> = members
                .iter()
                .map(|i| session.interactions[*i].timestamp)
                .collect();
            let first_seen = times.iter().min().copied().unwrap_or(session.start_time);
            let last_seen = times.iter().max().copied().unwrap_or(first_seen);
            let scrolls = members
                .iter()
                .filter(|i| session.interactions[**i].kind == InteractionKind::Scroll)
                .count();
            let conversion = session
                .conversion_events
                .iter()
                .find(|c| {
                    let delta = (c.timestamp - first_seen).num_seconds();
                    (0..=CONVERSION_WINDOW_SECS).contains(&delta)
                })
                .cloned();
            JourneyStep {
                page_url: page.to_string(),
                first_seen,
                last_seen,
                duration_ms: if members.len() < 2 {
                    0
                } else {
                    (last_seen - first_seen).num_milliseconds()
                },
                scroll_depth: (scrolls as f64 * 10.0).min(100.0),
                interactions: members.len(),
                is_seo_page: is_seo_page(page),
                seo_metrics: seo.get(*page).cloned().unwrap_or_default(),
                exit_point: exit_page == Some(*page),
                conversion,
            }
        })
        .collect();

    let seo_steps: Vec<&JourneyStep> = steps.iter().filter(|s| s.is_seo_page).collect();
    let conversion_from_seo = session.conversion_events.iter().any(|c| {
        seo_steps.iter().any(|s| {
            c.timestamp >= s.first_seen
                && (c.timestamp - s.last_seen).num_seconds() <= SEO_ATTRIBUTION_WINDOW_SECS
        })
    });
    let mut keywords: Vec<String> = Vec::new();
    for kw in [
        session.source.keyword.as_ref(),
        session.seo_attribution.search_query.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        if !keywords.contains(kw) {
            keywords.push(kw.clone());
        }
    }

    let drop_off_points = steps
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| (pair[1].first_seen - pair[0].last_seen).num_seconds() > DROP_OFF_GAP_SECS)
        .map(|(i, _)| i)
        .collect();

    UserJourney {
        session_id: session.session_id.clone(),
        user_id: session.user_id.clone(),
        total_duration_ms: session.total_duration_ms,
        converted: session.converted(),
        seo_impact: SeoImpact {
            seo_pages_visited: seo_steps.len(),
            total_seo_engagement: seo_steps.iter().map(|s| s.interactions).sum(),
            conversion_from_seo,
            seo_revenue_attribution: session.revenue(),
            keyword_attribution: keywords,
        },
        steps,
        drop_off_points,
    }
}

impl UserBehaviorTracker {
    pub async fn get_user_journey(&self, session_id: &str) -> Option<UserJourney> {
        let key = format!("user_journey:{session_id}");
        if let Some(hit) = cache::cached::<UserJourney>(self.cache.as_ref(), &key).await {
            return Some(hit);
        }
        let session = self.find_session(session_id).await?;

        let mut seo = HashMap::new();
        for interaction in &session.interactions {
            if seo.contains_key(&interaction.page_url) {
                continue;
            }
            let metrics = match self.page_audit(&interaction.page_url).await {
                Ok(audit) => StepSeoMetrics {
                    seo_score: audit.overall_score,
                    content_score: audit.content_quality.overall_score,
                    technical_score: audit.technical_seo.score,
                },
                Err(e) => {
                    warn!(page_url = %interaction.page_url, error = %e, "step SEO metrics unavailable");
                    StepSeoMetrics::default()
                }
            };
            seo.insert(interaction.page_url.clone(), metrics);
        }

        let journey = build_journey(&session, &seo);
        cache::store(
            self.cache.as_ref(),
            &key,
            &journey,
            CacheOptions::ttl(JOURNEY_TTL)
                .tagged("user_journeys")
                .tagged(session_id),
        )
        .await;
        Some(journey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlens_core::session::{
        ConversionKind, DeviceType, Interaction, SeoAttribution, SessionPerformance,
        TrafficSource,
    };
    use brokerlens_core::traffic::TrafficMedium;
    use chrono::Duration as ChronoDuration;

    fn at(base: DateTime<Utc>, secs: i64, kind: InteractionKind, page: &str) -> Interaction {
        Interaction {
            kind,
            timestamp: base + ChronoDuration::seconds(secs),
            page_url: page.to_string(),
            element_id: None,
            coordinates: None,
            metadata: HashMap::new(),
            seo_context: None,
        }
    }

    fn session(interactions: Vec<Interaction>, conversions: Vec<ConversionEvent>) -> Session {
        let start = interactions
            .first()
            .map(|i| i.timestamp)
            .unwrap_or_else(Utc::now);
        Session {
            session_id: "s1".into(),
            user_id: Some("u1".into()),
            device_id: "d1".into(),
            device_type: DeviceType::Desktop,
            start_time: start,
            last_activity: start,
            total_duration_ms: 0,
            page_views: 1,
            current_page: "/".into(),
            interactions,
            source: TrafficSource {
                medium: TrafficMedium::Organic,
                source: "www.google.com".into(),
                campaign: None,
                keyword: Some("ecn broker".into()),
                referrer: None,
                landing_page: "/best-brokers/ecn".into(),
                seo_page: Some("/best-brokers/ecn".into()),
            },
            seo_attribution: SeoAttribution {
                search_query: Some("ecn broker".into()),
                ..SeoAttribution::default()
            },
            conversion_events: conversions,
            performance: SessionPerformance::default(),
            ended_at: None,
            error: None,
        }
    }

    #[test]
    fn steps_group_by_page_in_first_seen_order() {
        let base = Utc::now();
        let s = session(
            vec![
                at(base, 0, InteractionKind::PageView, "/best-brokers/ecn"),
                at(base, 5, InteractionKind::Scroll, "/best-brokers/ecn"),
                at(base, 9, InteractionKind::Scroll, "/best-brokers/ecn"),
                at(base, 20, InteractionKind::Click, "/compare"),
                at(base, 30, InteractionKind::Click, "/best-brokers/ecn"),
            ],
            Vec::new(),
        );
        let journey = build_journey(&s, &HashMap::new());
        assert_eq!(journey.steps.len(), 2);
        assert_eq!(journey.steps[0].page_url, "/best-brokers/ecn");
        assert_eq!(journey.steps[0].interactions, 4);
        assert_eq!(journey.steps[0].duration_ms, 30_000);
        assert!((journey.steps[0].scroll_depth - 20.0).abs() < 1e-9);
        assert!(journey.steps[0].exit_point);
        assert_eq!(journey.steps[1].duration_ms, 0);
        assert!(!journey.steps[1].exit_point);
        assert_eq!(journey.seo_impact.seo_pages_visited, 1);
        assert_eq!(journey.seo_impact.keyword_attribution, vec!["ecn broker"]);
    }

    #[test]
    fn conversion_near_seo_step_is_attributed() {
        let base = Utc::now();
        let conversion = ConversionEvent {
            kind: ConversionKind::Signup,
            timestamp: base + ChronoDuration::seconds(40),
            value: Some(50.0),
            currency: "USD".into(),
            seo_attribution: SeoAttribution::default(),
            funnel_step: 4,
            metadata: HashMap::new(),
        };
        let s = session(
            vec![
                at(base, 0, InteractionKind::PageView, "/best-brokers/ecn"),
                at(base, 30, InteractionKind::FormSubmit, "/signup"),
            ],
            vec![conversion],
        );
        let journey = build_journey(&s, &HashMap::new());
        assert!(journey.seo_impact.conversion_from_seo);
        assert!((journey.seo_impact.seo_revenue_attribution - 50.0).abs() < 1e-9);
        assert!(journey.steps[0].conversion.is_some());
        assert!(journey.steps[1].conversion.is_some());
    }

    #[test]
    fn long_gaps_mark_drop_off_points() {
        let base = Utc::now();
        let s = session(
            vec![
                at(base, 0, InteractionKind::PageView, "/a"),
                at(base, 10, InteractionKind::PageView, "/b"),
                at(base, 10 + 6 * 60, InteractionKind::PageView, "/c"),
            ],
            Vec::new(),
        );
        let journey = build_journey(&s, &HashMap::new());
        assert_eq!(journey.drop_off_points, vec![1]);
    }
}
