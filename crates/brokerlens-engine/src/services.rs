use std::sync::Arc;

use brokerlens_core::cache::CacheStore;
use brokerlens_core::collaborators::{
    AnomalyDetector, CompetitiveSource, Forecaster, LinearTrendForecaster, LogReportDelivery,
    PerformanceMonitor, ReportDelivery, SampleRatioMismatchDetector, SeoAuditor,
    StaticCompetitiveSource, StaticPerformanceMonitor, StaticSeoAuditor,
};
use brokerlens_core::config::Config;

use crate::aggregator::{AggregatorDeps, AnalyticsAggregator};
use crate::experiments::ABTestingFramework;
use crate::intelligence::{BiDeps, BusinessIntelligence};
use crate::memory_cache::MemoryCache;
use crate::optimizer::ConversionOptimizer;
use crate::tracker::UserBehaviorTracker;

/// External collaborators the services are built on.
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn CacheStore>,
    pub seo: Arc<dyn SeoAuditor>,
    pub performance: Arc<dyn PerformanceMonitor>,
    pub forecaster: Arc<dyn Forecaster>,
    pub competitive: Arc<dyn CompetitiveSource>,
    pub delivery: Arc<dyn ReportDelivery>,
    pub detector: Arc<dyn AnomalyDetector>,
}

impl Collaborators {
    /// In-process cache and fixed-data collaborators.
    pub fn local(config: &Config) -> Self {
        Self {
            cache: Arc::new(MemoryCache::new(config.cache_max_entries)),
            seo: Arc::new(StaticSeoAuditor::default()),
            performance: Arc::new(StaticPerformanceMonitor::default()),
            forecaster: Arc::new(LinearTrendForecaster),
            competitive: Arc::new(StaticCompetitiveSource),
            delivery: Arc::new(LogReportDelivery),
            detector: Arc::new(SampleRatioMismatchDetector::default()),
        }
    }
}

/// Every analytics service, wired in dependency order.
#[derive(Clone)]
pub struct AnalyticsServices {
    pub cache: Arc<dyn CacheStore>,
    pub tracker: Arc<UserBehaviorTracker>,
    pub optimizer: Arc<ConversionOptimizer>,
    pub experiments: Arc<ABTestingFramework>,
    pub aggregator: Arc<AnalyticsAggregator>,
    pub intelligence: Arc<BusinessIntelligence>,
}

impl AnalyticsServices {
    pub fn new(config: &Config, deps: Collaborators) -> Self {
        let tracker = Arc::new(UserBehaviorTracker::new(
            deps.cache.clone(),
            deps.seo.clone(),
            config.session_ttl(),
        ));
        let optimizer = Arc::new(ConversionOptimizer::new(
            deps.cache.clone(),
            tracker.clone(),
            deps.seo.clone(),
            deps.forecaster.clone(),
            deps.competitive.clone(),
        ));
        let experiments = Arc::new(ABTestingFramework::new(
            deps.cache.clone(),
            tracker.clone(),
            optimizer.clone(),
            deps.detector.clone(),
            config.daily_visitors,
        ));
        let aggregator = Arc::new(AnalyticsAggregator::new(AggregatorDeps {
            cache: deps.cache.clone(),
            tracker: tracker.clone(),
            optimizer: optimizer.clone(),
            experiments: experiments.clone(),
            seo: deps.seo.clone(),
            performance: deps.performance.clone(),
            competitive: deps.competitive.clone(),
            correlation_cap: config.correlation_cap,
            export_base_url: config.export_base_url.clone(),
        }));
        let intelligence = Arc::new(BusinessIntelligence::new(BiDeps {
            cache: deps.cache.clone(),
            tracker: tracker.clone(),
            optimizer: optimizer.clone(),
            experiments: experiments.clone(),
            aggregator: aggregator.clone(),
            seo: deps.seo,
            competitive: deps.competitive,
            forecaster: deps.forecaster,
            delivery: deps.delivery,
            export_base_url: config.export_base_url.clone(),
        }));
        Self {
            cache: deps.cache,
            tracker,
            optimizer,
            experiments,
            aggregator,
            intelligence,
        }
    }

    pub fn local(config: &Config) -> Self {
        Self::new(config, Collaborators::local(config))
    }
}
