//! Analytics services for the broker comparison site: behavior tracking,
//! conversion optimization, A/B testing, cross-service aggregation and
//! business intelligence.

pub mod aggregator;
pub mod experiments;
pub mod export;
pub mod intelligence;
pub mod memory_cache;
pub mod optimizer;
pub mod services;
pub mod tracker;
