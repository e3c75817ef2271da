//! Multi-touch and revenue attribution over tracked sessions.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use brokerlens_core::cache::{self, CacheOptions};
use brokerlens_core::session::Session;
use brokerlens_core::stats::percent;
use brokerlens_core::time::TimeRange;
use brokerlens_core::traffic::TrafficMedium;

use crate::tracker::funnel_depth;

use super::{AttributionRow, ConversionOptimizer, Funnel};

const MULTI_CHANNEL_TTL: Duration = Duration::from_secs(30 * 60);
const REVENUE_TTL: Duration = Duration::from_secs(20 * 60);
const TOP_PATHS: usize = 10;
const PATH_PAGES: usize = 5;
const TOP_ENTRY_PAGES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelAttribution {
    pub channel: String,
    pub sessions: usize,
    pub conversions: usize,
    pub conversion_rate: f64,
    /// Model shares, in percent of all converting sessions.
    pub first_touch: f64,
    pub last_touch: f64,
    pub linear: f64,
    pub time_decay: f64,
    pub position_based: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryPage {
    pub page_url: String,
    pub sessions: usize,
    pub conversions: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TouchpointAnalysis {
    pub average_touchpoints_to_convert: f64,
    pub single_touch_conversions: usize,
    pub multi_touch_conversions: usize,
    pub average_pages_per_session: f64,
    pub top_entry_pages: Vec<EntryPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JourneyPath {
    pub pages: Vec<String>,
    pub sessions: usize,
    pub conversions: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiChannelAttribution {
    pub range: Option<TimeRange>,
    pub total_sessions: usize,
    pub total_conversions: usize,
    pub channels: Vec<ChannelAttribution>,
    pub touchpoints: TouchpointAnalysis,
    pub journey_paths: Vec<JourneyPath>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevenueGroup {
    #[default]
    Channel,
    Funnel,
    Page,
    Keyword,
}

impl RevenueGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueGroup::Channel => "channel",
            RevenueGroup::Funnel => "funnel",
            RevenueGroup::Page => "page",
            RevenueGroup::Keyword => "keyword",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "channel" => Some(RevenueGroup::Channel),
            "funnel" => Some(RevenueGroup::Funnel),
            "page" => Some(RevenueGroup::Page),
            "keyword" => Some(RevenueGroup::Keyword),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevenueAttribution {
    pub group_by: RevenueGroup,
    pub rows: Vec<AttributionRow>,
    pub total_revenue: f64,
    /// Percent of revenue from organic sessions.
    pub seo_share: f64,
}

/// Credit weights for `n` ordered touches under each model.
struct Weights {
    linear: Vec<f64>,
    time_decay: Vec<f64>,
    position_based: Vec<f64>,
}

fn weights(n: usize) -> Weights {
    if n == 0 {
        return Weights {
            linear: Vec::new(),
            time_decay: Vec::new(),
            position_based: Vec::new(),
        };
    }
    let linear = vec![1.0 / n as f64; n];

    // Each earlier touch is worth half the one after it.
    let raw: Vec<f64> = (0..n).map(|k| 0.5f64.powi((n - 1 - k) as i32)).collect();
    let total: f64 = raw.iter().sum();
    let time_decay = raw.iter().map(|w| w / total).collect();

    let position_based = match n {
        1 => vec![1.0],
        2 => vec![0.5, 0.5],
        _ => {
            let middle = 0.2 / (n - 2) as f64;
            let mut w = vec![middle; n];
            w[0] = 0.4;
            w[n - 1] = 0.4;
            w
        }
    };
    Weights {
        linear,
        time_decay,
        position_based,
    }
}

fn visitor_key(session: &Session) -> &str {
    session.user_id.as_deref().unwrap_or(&session.device_id)
}

#[derive(Default)]
struct Credit {
    sessions: usize,
    conversions: usize,
    first: f64,
    last: f64,
    linear: f64,
    time_decay: f64,
    position: f64,
    revenue: f64,
}

/// Per-channel credit for every converting session, using the visitor's
/// sessions up to and including it as the touch sequence.
pub fn channel_attribution(sessions: &[Session]) -> Vec<ChannelAttribution> {
    let mut histories: HashMap<&str, Vec<&Session>> = HashMap::new();
    for session in sessions {
        histories.entry(visitor_key(session)).or_default().push(session);
    }
    for history in histories.values_mut() {
        history.sort_by_key(|s| s.start_time);
    }

    let mut credit: HashMap<TrafficMedium, Credit> = HashMap::new();
    for session in sessions {
        let entry = credit.entry(session.source.medium).or_default();
        entry.sessions += 1;
        if session.converted() {
            entry.conversions += 1;
            entry.revenue += session.revenue();
        }
    }

    let mut converting = 0usize;
    for history in histories.values() {
        for (idx, session) in history.iter().enumerate() {
            if !session.converted() {
                continue;
            }
            converting += 1;
            let touches = &history[..=idx];
            let w = weights(touches.len());
            for (k, touch) in touches.iter().enumerate() {
                let entry = credit.entry(touch.source.medium).or_default();
                if k == 0 {
                    entry.first += 1.0;
                }
                if k == touches.len() - 1 {
                    entry.last += 1.0;
                }
                entry.linear += w.linear[k];
                entry.time_decay += w.time_decay[k];
                entry.position += w.position_based[k];
            }
        }
    }

    let total = converting as f64;
    let mut rows: Vec<ChannelAttribution> = credit
        .into_iter()
        .map(|(medium, c)| ChannelAttribution {
            channel: medium.as_str().to_string(),
            sessions: c.sessions,
            conversions: c.conversions,
            conversion_rate: percent(c.conversions as f64, c.sessions as f64),
            first_touch: percent(c.first, total),
            last_touch: percent(c.last, total),
            linear: percent(c.linear, total),
            time_decay: percent(c.time_decay, total),
            position_based: percent(c.position, total),
            revenue: c.revenue,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.linear
            .total_cmp(&a.linear)
            .then(b.sessions.cmp(&a.sessions))
            .then(a.channel.cmp(&b.channel))
    });
    rows
}

pub fn touchpoint_analysis(sessions: &[Session]) -> TouchpointAnalysis {
    let mut histories: HashMap<&str, Vec<&Session>> = HashMap::new();
    for session in sessions {
        histories.entry(visitor_key(session)).or_default().push(session);
    }
    let mut touch_counts = Vec::new();
    for history in histories.values_mut() {
        history.sort_by_key(|s| s.start_time);
        for (idx, session) in history.iter().enumerate() {
            if session.converted() {
                touch_counts.push(idx + 1);
            }
        }
    }

    let mut entries: HashMap<&str, (usize, usize)> = HashMap::new();
    for session in sessions {
        let e = entries.entry(session.source.landing_page.as_str()).or_default();
        e.0 += 1;
        if session.converted() {
            e.1 += 1;
        }
    }
    let mut top_entry_pages: Vec<EntryPage> = entries
        .into_iter()
        .map(|(page, (visits, conversions))| EntryPage {
            page_url: page.to_string(),
            sessions: visits,
            conversions,
            conversion_rate: percent(conversions as f64, visits as f64),
        })
        .collect();
    top_entry_pages.sort_by(|a, b| b.sessions.cmp(&a.sessions).then(a.page_url.cmp(&b.page_url)));
    top_entry_pages.truncate(TOP_ENTRY_PAGES);

    let pages: usize = sessions.iter().map(|s| s.page_sequence().len()).sum();
    TouchpointAnalysis {
        average_touchpoints_to_convert: if touch_counts.is_empty() {
            0.0
        } else {
            touch_counts.iter().sum::<usize>() as f64 / touch_counts.len() as f64
        },
        single_touch_conversions: touch_counts.iter().filter(|n| **n == 1).count(),
        multi_touch_conversions: touch_counts.iter().filter(|n| **n > 1).count(),
        average_pages_per_session: if sessions.is_empty() {
            0.0
        } else {
            pages as f64 / sessions.len() as f64
        },
        top_entry_pages,
    }
}

/// Most common page paths, truncated to their first few pages.
pub fn journey_paths(sessions: &[Session]) -> Vec<JourneyPath> {
    let mut paths: HashMap<Vec<String>, (usize, usize)> = HashMap::new();
    for session in sessions {
        let mut pages = session.page_sequence();
        pages.truncate(PATH_PAGES);
        let e = paths.entry(pages).or_default();
        e.0 += 1;
        if session.converted() {
            e.1 += 1;
        }
    }
    let mut out: Vec<JourneyPath> = paths
        .into_iter()
        .map(|(pages, (visits, conversions))| JourneyPath {
            pages,
            sessions: visits,
            conversions,
            conversion_rate: percent(conversions as f64, visits as f64),
        })
        .collect();
    out.sort_by(|a, b| b.sessions.cmp(&a.sessions).then(a.pages.cmp(&b.pages)));
    out.truncate(TOP_PATHS);
    out
}

/// Sum conversions and revenue of converting sessions per group key.
pub(crate) fn group_revenue<F>(sessions: &[Session], key: F) -> Vec<AttributionRow>
where
    F: Fn(&Session) -> String,
{
    let mut groups: HashMap<String, (usize, f64)> = HashMap::new();
    for session in sessions.iter().filter(|s| s.converted()) {
        let e = groups.entry(key(session)).or_default();
        e.0 += session.conversion_events.len();
        e.1 += session.revenue();
    }
    let total: f64 = groups.values().map(|(_, revenue)| revenue).sum();
    let mut rows: Vec<AttributionRow> = groups
        .into_iter()
        .map(|(channel, (conversions, revenue))| AttributionRow {
            share: percent(revenue, total),
            channel,
            conversions,
            revenue,
        })
        .collect();
    rows.sort_by(|a, b| b.revenue.total_cmp(&a.revenue).then(a.channel.cmp(&b.channel)));
    rows
}

/// The funnel a session progressed deepest into, by name.
fn deepest_funnel(session: &Session, funnels: &[(String, Vec<String>)]) -> String {
    let mut best: Option<(&str, usize)> = None;
    for (name, steps) in funnels {
        let depth = funnel_depth(session, steps);
        if depth > 0 && best.map_or(true, |(_, d)| depth > d) {
            best = Some((name, depth));
        }
    }
    best.map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

pub fn revenue_attribution(
    sessions: &[Session],
    group_by: RevenueGroup,
    funnels: &[Funnel],
) -> RevenueAttribution {
    let rows = match group_by {
        RevenueGroup::Channel => group_revenue(sessions, |s| s.source.medium.as_str().to_string()),
        RevenueGroup::Funnel => {
            let steps: Vec<(String, Vec<String>)> = funnels
                .iter()
                .map(|f| (f.name.clone(), f.step_urls()))
                .collect();
            group_revenue(sessions, |s| deepest_funnel(s, &steps))
        }
        RevenueGroup::Page => group_revenue(sessions, |s| s.source.landing_page.clone()),
        RevenueGroup::Keyword => group_revenue(sessions, |s| {
            s.source
                .keyword
                .clone()
                .or_else(|| s.seo_attribution.search_query.clone())
                .unwrap_or_else(|| "(not provided)".to_string())
        }),
    };
    let total_revenue: f64 = rows.iter().map(|r| r.revenue).sum();
    let organic_revenue: f64 = sessions
        .iter()
        .filter(|s| s.source.medium == TrafficMedium::Organic)
        .map(|s| s.revenue())
        .sum();
    RevenueAttribution {
        group_by,
        rows,
        total_revenue,
        seo_share: percent(organic_revenue, total_revenue),
    }
}

fn range_key(range: Option<TimeRange>) -> String {
    match range {
        Some(r) => format!("{}:{}", r.start.timestamp(), r.end.timestamp()),
        None => "all".to_string(),
    }
}

impl ConversionOptimizer {
    pub async fn get_multi_channel_attribution(
        &self,
        range: Option<TimeRange>,
    ) -> MultiChannelAttribution {
        let key = format!("multi_channel_attribution:{}", range_key(range));
        if let Some(hit) = cache::cached::<MultiChannelAttribution>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let sessions = self.tracker.sessions(range).await;
        let attribution = MultiChannelAttribution {
            range,
            total_sessions: sessions.len(),
            total_conversions: sessions.iter().map(|s| s.conversion_events.len()).sum(),
            channels: channel_attribution(&sessions),
            touchpoints: touchpoint_analysis(&sessions),
            journey_paths: journey_paths(&sessions),
            generated_at: Utc::now(),
        };
        cache::store(
            self.cache.as_ref(),
            &key,
            &attribution,
            CacheOptions::ttl(MULTI_CHANNEL_TTL).tagged("attribution"),
        )
        .await;
        debug!(sessions = sessions.len(), channels = attribution.channels.len(), "multi-channel attribution computed");
        attribution
    }

    pub async fn get_revenue_attribution(
        &self,
        range: Option<TimeRange>,
        group_by: RevenueGroup,
    ) -> RevenueAttribution {
        let key = format!(
            "revenue_attribution:{}:{}",
            group_by.as_str(),
            range_key(range)
        );
        if let Some(hit) = cache::cached::<RevenueAttribution>(self.cache.as_ref(), &key).await {
            return hit;
        }
        let sessions = self.tracker.sessions(range).await;
        let funnels = self.list_funnels().await;
        let attribution = revenue_attribution(&sessions, group_by, &funnels);
        cache::store(
            self.cache.as_ref(),
            &key,
            &attribution,
            CacheOptions::ttl(REVENUE_TTL).tagged("attribution"),
        )
        .await;
        attribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlens_core::session::{
        ConversionEvent, ConversionKind, DeviceType, Interaction, InteractionKind,
        SeoAttribution, SessionPerformance, TrafficSource,
    };
    use chrono::Duration as ChronoDuration;

    use crate::optimizer::FunnelConfig;

    fn session(
        id: &str,
        user: &str,
        medium: TrafficMedium,
        offset_hours: i64,
        pages: &[&str],
        revenue: Option<f64>,
    ) -> Session {
        let start = Utc::now() - ChronoDuration::hours(48) + ChronoDuration::hours(offset_hours);
        let interactions = pages
            .iter()
            .map(|p| Interaction {
                kind: InteractionKind::PageView,
                timestamp: start,
                page_url: p.to_string(),
                element_id: None,
                coordinates: None,
                metadata: HashMap::new(),
                seo_context: None,
            })
            .collect();
        let conversion_events = revenue
            .map(|value| {
                vec![ConversionEvent {
                    kind: ConversionKind::Signup,
                    timestamp: start,
                    value: Some(value),
                    currency: "USD".into(),
                    seo_attribution: SeoAttribution::default(),
                    funnel_step: 4,
                    metadata: HashMap::new(),
                }]
            })
            .unwrap_or_default();
        Session {
            session_id: id.into(),
            user_id: Some(user.into()),
            device_id: format!("device_{user}"),
            device_type: DeviceType::Desktop,
            start_time: start,
            last_activity: start,
            total_duration_ms: 0,
            page_views: pages.len() as u32,
            current_page: pages.last().map(|p| p.to_string()).unwrap_or_default(),
            interactions,
            source: TrafficSource {
                medium,
                source: medium.as_str().into(),
                campaign: None,
                keyword: None,
                referrer: None,
                landing_page: pages.first().map(|p| p.to_string()).unwrap_or_default(),
                seo_page: None,
            },
            seo_attribution: SeoAttribution::default(),
            conversion_events,
            performance: SessionPerformance::default(),
            ended_at: None,
            error: None,
        }
    }

    fn share(rows: &[ChannelAttribution], channel: &str) -> ChannelAttribution {
        rows.iter()
            .find(|r| r.channel == channel)
            .cloned()
            .expect("channel row")
    }

    #[test]
    fn position_based_weights_split_forty_forty_twenty() {
        let w = weights(4);
        assert_eq!(w.position_based, vec![0.4, 0.1, 0.1, 0.4]);
        let td_total: f64 = w.time_decay.iter().sum();
        assert!((td_total - 1.0).abs() < 1e-9);
        assert!(w.time_decay[3] > w.time_decay[2]);
        assert!((w.time_decay[3] / w.time_decay[2] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn multi_touch_credit_spans_visitor_sessions() {
        let sessions = vec![
            session("s1", "u1", TrafficMedium::Organic, 0, &["/best-brokers"], None),
            session("s2", "u1", TrafficMedium::Email, 5, &["/signup"], Some(50.0)),
        ];
        let rows = channel_attribution(&sessions);
        let organic = share(&rows, "organic");
        let email = share(&rows, "email");
        assert!((organic.first_touch - 100.0).abs() < 1e-9);
        assert!((email.last_touch - 100.0).abs() < 1e-9);
        assert!((organic.linear - 50.0).abs() < 1e-9);
        assert!((email.time_decay - 200.0 / 3.0).abs() < 1e-9);
        assert!((email.conversion_rate - 100.0).abs() < 1e-9);
        assert_eq!(organic.conversions, 0);

        let touch = touchpoint_analysis(&sessions);
        assert_eq!(touch.multi_touch_conversions, 1);
        assert!((touch.average_touchpoints_to_convert - 2.0).abs() < 1e-9);
    }

    #[test]
    fn revenue_groups_by_keyword_and_funnel() {
        let mut with_keyword = session(
            "s1",
            "u1",
            TrafficMedium::Organic,
            0,
            &["/best-brokers", "/best-brokers/ecn", "/compare"],
            Some(80.0),
        );
        with_keyword.source.keyword = Some("ecn broker".into());
        let plain = session("s2", "u2", TrafficMedium::Direct, 1, &["/about"], Some(20.0));
        let sessions = vec![with_keyword, plain];

        let by_keyword = revenue_attribution(&sessions, RevenueGroup::Keyword, &[]);
        assert_eq!(by_keyword.rows[0].channel, "ecn broker");
        assert_eq!(by_keyword.rows[1].channel, "(not provided)");
        assert!((by_keyword.total_revenue - 100.0).abs() < 1e-9);
        assert!((by_keyword.seo_share - 80.0).abs() < 1e-9);
        assert!((by_keyword.rows[0].share - 80.0).abs() < 1e-9);

        let funnel = Funnel::from_config(
            FunnelConfig {
                name: Some("Comparison".into()),
                ..FunnelConfig::default()
            },
            Utc::now(),
        );
        let by_funnel = revenue_attribution(&sessions, RevenueGroup::Funnel, &[funnel]);
        let names: Vec<&str> = by_funnel.rows.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(names, vec!["Comparison", "(none)"]);
    }

    #[test]
    fn journey_paths_keep_first_five_pages() {
        let long = session(
            "s1",
            "u1",
            TrafficMedium::Direct,
            0,
            &["/a", "/b", "/c", "/d", "/e", "/f"],
            None,
        );
        let paths = journey_paths(&[long]);
        assert_eq!(paths[0].pages.len(), 5);
        assert_eq!(paths[0].sessions, 1);
    }
}
