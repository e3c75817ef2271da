use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

const SEARCH_ENGINES: [&str; 5] = ["google", "bing", "yahoo", "duckduckgo", "baidu"];
const SOCIAL_PLATFORMS: [&str; 5] = ["facebook", "twitter", "linkedin", "instagram", "youtube"];
const SEO_PATH_PATTERNS: [&str; 3] = ["/best-brokers/", "/country/", "/category/"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrafficMedium {
    Organic,
    Direct,
    Referral,
    Social,
    Email,
    Paid,
}

impl TrafficMedium {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficMedium::Organic => "organic",
            TrafficMedium::Direct => "direct",
            TrafficMedium::Referral => "referral",
            TrafficMedium::Social => "social",
            TrafficMedium::Email => "email",
            TrafficMedium::Paid => "paid",
        }
    }

    /// Map a free-form `utm_medium` value onto a known medium.
    pub fn from_utm(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "organic" | "seo" => TrafficMedium::Organic,
            "direct" | "none" | "(none)" => TrafficMedium::Direct,
            "social" | "social-network" | "social-media" | "sm" => TrafficMedium::Social,
            "email" | "e-mail" | "newsletter" => TrafficMedium::Email,
            "cpc" | "ppc" | "paid" | "paidsearch" | "display" | "cpm" | "banner" => {
                TrafficMedium::Paid
            }
            _ => TrafficMedium::Referral,
        }
    }
}

/// Parse an absolute or site-relative URL.
fn parse_loose(raw: &str) -> Option<Url> {
    Url::parse(raw).ok().or_else(|| {
        Url::parse("http://localhost")
            .ok()
            .and_then(|base| base.join(raw).ok())
    })
}

/// First value of query parameter `name` in `url`, ignoring empty values.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = parse_loose(url)?;
    let value = parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Path component of `url` ("/" when absent or unparseable).
pub fn url_path(url: &str) -> String {
    parse_loose(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Classify where a visit came from.
///
/// An explicit `utm_medium` wins; then an empty referrer is direct, search
/// engines are organic, social platforms are social, and everything else is
/// a referral.
pub fn classify_medium(referrer: Option<&str>, utm_medium: Option<&str>) -> TrafficMedium {
    if let Some(utm) = utm_medium.filter(|m| !m.trim().is_empty()) {
        return TrafficMedium::from_utm(utm);
    }
    let referrer = match referrer.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_ascii_lowercase(),
        _ => return TrafficMedium::Direct,
    };
    if SEARCH_ENGINES.iter().any(|engine| referrer.contains(engine)) {
        TrafficMedium::Organic
    } else if SOCIAL_PLATFORMS.iter().any(|p| referrer.contains(p)) {
        TrafficMedium::Social
    } else {
        TrafficMedium::Referral
    }
}

/// Source label: the referrer host, `direct` with no referrer, or `unknown`
/// when the referrer is not a URL.
pub fn traffic_source_name(referrer: Option<&str>) -> String {
    match referrer.map(str::trim) {
        None | Some("") => "direct".to_string(),
        Some(raw) => Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

pub fn is_seo_page(url: &str) -> bool {
    SEO_PATH_PATTERNS.iter().any(|p| url.contains(p))
}

/// Path segment following `marker`, e.g. `ecn` in `/best-brokers/ecn/uk`.
fn segment_after(url: &str, marker: &str) -> Option<String> {
    let start = url.find(marker)? + marker.len();
    let rest = &url[start..];
    let segment: String = rest
        .chars()
        .take_while(|c| *c != '/' && *c != '?' && *c != '#')
        .collect();
    if segment.is_empty() {
        None
    } else {
        Some(segment)
    }
}

pub fn seo_category(url: &str) -> Option<String> {
    segment_after(url, "/best-brokers/")
}

pub fn seo_country(url: &str) -> Option<String> {
    segment_after(url, "/country/")
}

/// Stable device identifier from request properties.
///
/// Formula: sha256(ip + user_agent)[0..8] encoded as 16 hex chars.
pub fn compute_device_id(ip: &str, user_agent: &str) -> String {
    let input = format!("{ip}{user_agent}");
    let hash = Sha256::digest(input.as_bytes());
    format!("device_{}", hex::encode(&hash[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_referrer_without_utm_is_direct() {
        assert_eq!(classify_medium(None, None), TrafficMedium::Direct);
        assert_eq!(classify_medium(Some(""), None), TrafficMedium::Direct);
    }

    #[test]
    fn utm_medium_overrides_referrer() {
        assert_eq!(
            classify_medium(Some("https://www.google.com/"), Some("cpc")),
            TrafficMedium::Paid
        );
        assert_eq!(
            classify_medium(None, Some("newsletter")),
            TrafficMedium::Email
        );
    }

    #[test]
    fn search_and_social_referrers_are_classified() {
        assert_eq!(
            classify_medium(Some("https://www.google.com/search?q=ecn+broker"), None),
            TrafficMedium::Organic
        );
        assert_eq!(
            classify_medium(Some("https://duckduckgo.com/"), None),
            TrafficMedium::Organic
        );
        assert_eq!(
            classify_medium(Some("https://m.facebook.com/"), None),
            TrafficMedium::Social
        );
        assert_eq!(
            classify_medium(Some("https://forexforum.example/thread/1"), None),
            TrafficMedium::Referral
        );
    }

    #[test]
    fn source_name_is_referrer_host() {
        assert_eq!(traffic_source_name(None), "direct");
        assert_eq!(
            traffic_source_name(Some("https://www.Google.com/search?q=x")),
            "www.google.com"
        );
        assert_eq!(traffic_source_name(Some("not a url")), "unknown");
    }

    #[test]
    fn query_param_reads_relative_and_absolute_urls() {
        assert_eq!(
            query_param("/best-brokers/ecn?utm_medium=cpc&q=spreads", "q").as_deref(),
            Some("spreads")
        );
        assert_eq!(
            query_param("https://site.example/?keyword=mt4", "keyword").as_deref(),
            Some("mt4")
        );
        assert_eq!(query_param("/compare?q=", "q"), None);
    }

    #[test]
    fn seo_segments_are_extracted() {
        let url = "https://site.example/best-brokers/ecn/?ref=1";
        assert!(is_seo_page(url));
        assert_eq!(seo_category(url).as_deref(), Some("ecn"));
        assert_eq!(seo_country("/country/uk").as_deref(), Some("uk"));
        assert_eq!(seo_category("/best-brokers"), None);
        assert!(!is_seo_page("/compare"));
    }

    #[test]
    fn device_id_is_stable_and_prefixed() {
        let a = compute_device_id("1.2.3.4", "Mozilla/5.0");
        let b = compute_device_id("1.2.3.4", "Mozilla/5.0");
        assert_eq!(a, b);
        assert!(a.starts_with("device_"));
        assert_eq!(a.len(), "device_".len() + 16);
    }
}
