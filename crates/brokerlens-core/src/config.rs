use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cache_max_entries: u64,
    pub session_ttl_minutes: u64,
    pub scheduler_tick_seconds: u64,
    pub job_timeout_seconds: u64,
    pub correlation_cap: usize,
    pub export_base_url: String,
    pub cors_origins: Vec<String>,
    /// Expected visitors per day, used to turn sample sizes into durations.
    pub daily_visitors: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            cache_max_entries: 10_000,
            session_ttl_minutes: 30,
            scheduler_tick_seconds: 10,
            job_timeout_seconds: 30,
            correlation_cap: 500,
            export_base_url: "http://localhost:3000/exports".to_string(),
            cors_origins: Vec::new(),
            daily_visitors: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            port: std::env::var("BROKERLENS_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            cache_max_entries: std::env::var("BROKERLENS_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(defaults.cache_max_entries),
            session_ttl_minutes: std::env::var("BROKERLENS_SESSION_TTL_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(defaults.session_ttl_minutes),
            scheduler_tick_seconds: std::env::var("BROKERLENS_SCHEDULER_TICK_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.clamp(1, 3600))
                .unwrap_or(defaults.scheduler_tick_seconds),
            job_timeout_seconds: std::env::var("BROKERLENS_JOB_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.max(1))
                .unwrap_or(defaults.job_timeout_seconds),
            correlation_cap: std::env::var("BROKERLENS_CORRELATION_CAP")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(defaults.correlation_cap),
            export_base_url: std::env::var("BROKERLENS_EXPORT_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.export_base_url),
            cors_origins: std::env::var("BROKERLENS_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            daily_visitors: std::env::var("BROKERLENS_DAILY_VISITORS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.daily_visitors),
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes * 60)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.session_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(cfg.scheduler_tick(), Duration::from_secs(10));
        assert_eq!(cfg.correlation_cap, 500);
        assert_eq!(cfg.daily_visitors, 100);
    }
}
