pub mod cache;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod priority;
pub mod session;
pub mod stats;
pub mod time;
pub mod traffic;
