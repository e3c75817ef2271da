use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traffic::TrafficMedium;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Click,
    Scroll,
    Hover,
    Focus,
    FormSubmit,
    FormInput,
    Download,
    VideoPlay,
    Search,
    PageView,
    PageLoad,
    Error,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Click => "click",
            InteractionKind::Scroll => "scroll",
            InteractionKind::Hover => "hover",
            InteractionKind::Focus => "focus",
            InteractionKind::FormSubmit => "form_submit",
            InteractionKind::FormInput => "form_input",
            InteractionKind::Download => "download",
            InteractionKind::VideoPlay => "video_play",
            InteractionKind::Search => "search",
            InteractionKind::PageView => "page_view",
            InteractionKind::PageLoad => "page_load",
            InteractionKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    Lead,
    Signup,
    Purchase,
    Download,
    Contact,
    ViewProduct,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// SEO facts about a page, read from the auditor when the interaction
/// was recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoContext {
    pub meta_tags: Vec<String>,
    pub structured_data: Vec<String>,
    pub content_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
    pub page_url: String,
    pub element_id: Option<String>,
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub seo_context: Option<SeoContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrafficSource {
    pub medium: TrafficMedium,
    pub source: String,
    pub campaign: Option<String>,
    pub keyword: Option<String>,
    pub referrer: Option<String>,
    pub landing_page: String,
    pub seo_page: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeoAttribution {
    pub entry_page: String,
    pub seo_category: Option<String>,
    pub seo_country: Option<String>,
    pub search_query: Option<String>,
    pub ranking_position: Option<u32>,
    pub meta_tags_used: Vec<String>,
    pub structured_data_types: Vec<String>,
    pub content_quality_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionEvent {
    pub kind: ConversionKind,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub currency: String,
    pub seo_attribution: SeoAttribution,
    /// Stage 1..=4: awareness, interest, consideration, conversion.
    pub funnel_step: u8,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionPerformance {
    pub average_page_load_ms: f64,
    pub cache_hit_rate: f64,
    pub total_data_transfer: f64,
    pub error_count: u32,
    pub performance_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl DeviceType {
    /// Coarse device class from a User-Agent header.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.is_empty() {
            DeviceType::Unknown
        } else if ua.contains("ipad") || ua.contains("tablet") {
            DeviceType::Tablet
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
            DeviceType::Mobile
        } else {
            DeviceType::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<String>,
    pub device_id: String,
    pub device_type: DeviceType,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub total_duration_ms: i64,
    pub page_views: u32,
    pub current_page: String,
    pub interactions: Vec<Interaction>,
    pub source: TrafficSource,
    pub seo_attribution: SeoAttribution,
    pub conversion_events: Vec<ConversionEvent>,
    pub performance: SessionPerformance,
    pub ended_at: Option<DateTime<Utc>>,
    /// Set when session setup succeeded only partially.
    pub error: Option<String>,
}

impl Session {
    pub fn converted(&self) -> bool {
        !self.conversion_events.is_empty()
    }

    pub fn is_bounce(&self) -> bool {
        self.page_views == 1
    }

    pub fn revenue(&self) -> f64 {
        self.conversion_events
            .iter()
            .filter_map(|c| c.value)
            .sum()
    }

    /// Distinct pages in first-visit order, starting with the landing page.
    pub fn page_sequence(&self) -> Vec<String> {
        let mut pages: Vec<String> = vec![self.source.landing_page.clone()];
        for interaction in &self.interactions {
            if pages.last() != Some(&interaction.page_url) {
                pages.push(interaction.page_url.clone());
            }
        }
        pages
    }

    pub fn count_kind(&self, kind: InteractionKind) -> usize {
        self.interactions.iter().filter(|i| i.kind == kind).count()
    }

    /// Funnel stage reached so far, derived from clicks and form submissions.
    pub fn funnel_step(&self) -> u8 {
        let clicks = self.count_kind(InteractionKind::Click);
        if self.count_kind(InteractionKind::FormSubmit) > 0 {
            4
        } else if clicks > 3 {
            3
        } else if clicks > 1 {
            2
        } else {
            1
        }
    }
}

/// Input for starting a session. Everything is optional; the tracker fills
/// in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartSessionOptions {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub landing_url: Option<String>,
    pub referrer: Option<String>,
    pub medium: Option<TrafficMedium>,
    pub source: Option<String>,
    pub campaign: Option<String>,
    pub keyword: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(kind: InteractionKind, page: &str) -> Interaction {
        Interaction {
            kind,
            timestamp: Utc::now(),
            page_url: page.to_string(),
            element_id: None,
            coordinates: None,
            metadata: HashMap::new(),
            seo_context: None,
        }
    }

    fn session() -> Session {
        let now = Utc::now();
        Session {
            session_id: "s1".into(),
            user_id: None,
            device_id: "d1".into(),
            device_type: DeviceType::Desktop,
            start_time: now,
            last_activity: now,
            total_duration_ms: 0,
            page_views: 1,
            current_page: "/best-brokers".into(),
            interactions: Vec::new(),
            source: TrafficSource {
                medium: TrafficMedium::Direct,
                source: "direct".into(),
                campaign: None,
                keyword: None,
                referrer: None,
                landing_page: "/best-brokers".into(),
                seo_page: None,
            },
            seo_attribution: SeoAttribution::default(),
            conversion_events: Vec::new(),
            performance: SessionPerformance::default(),
            ended_at: None,
            error: None,
        }
    }

    #[test]
    fn funnel_step_follows_click_and_form_thresholds() {
        let mut s = session();
        assert_eq!(s.funnel_step(), 1);
        s.interactions.push(interaction(InteractionKind::Click, "/a"));
        s.interactions.push(interaction(InteractionKind::Click, "/a"));
        assert_eq!(s.funnel_step(), 2);
        s.interactions.push(interaction(InteractionKind::Click, "/a"));
        s.interactions.push(interaction(InteractionKind::Click, "/a"));
        assert_eq!(s.funnel_step(), 3);
        s.interactions.push(interaction(InteractionKind::FormSubmit, "/signup"));
        assert_eq!(s.funnel_step(), 4);
    }

    #[test]
    fn page_sequence_collapses_consecutive_repeats() {
        let mut s = session();
        s.interactions.push(interaction(InteractionKind::Click, "/best-brokers"));
        s.interactions.push(interaction(InteractionKind::Scroll, "/compare"));
        s.interactions.push(interaction(InteractionKind::Click, "/compare"));
        s.interactions.push(interaction(InteractionKind::Click, "/signup"));
        assert_eq!(
            s.page_sequence(),
            vec!["/best-brokers", "/compare", "/signup"]
        );
    }

    #[test]
    fn device_type_from_user_agent() {
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile"),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (iPad; CPU OS 17_0)"),
            DeviceType::Tablet
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (X11; Linux x86_64) Chrome/120"),
            DeviceType::Desktop
        );
        assert_eq!(DeviceType::from_user_agent(""), DeviceType::Unknown);
    }
}
