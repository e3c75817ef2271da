pub mod analytics;
pub mod experiments;
pub mod funnels;
pub mod health;
pub mod insights;
pub mod reports;
pub mod sessions;
