use std::sync::Arc;

use brokerlens_core::config::Config;
use brokerlens_engine::services::AnalyticsServices;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Every analytics service. Each one is an `Arc`, so handlers and the
    /// scheduler share the same instances.
    pub services: AnalyticsServices,
}

impl AppState {
    /// State backed by the in-process cache and fixed-data collaborators.
    pub fn new(config: Config) -> Self {
        let services = AnalyticsServices::local(&config);
        Self::with_services(config, services)
    }

    pub fn with_services(config: Config, services: AnalyticsServices) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }
}
