use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::model::Variant;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignmentContext {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub test_id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

/// Stable position of a user within a test, in `[0, 1)`.
///
/// Uses the first 8 bytes of `sha256(user_id + test_id)`.
pub fn bucket(user_id: &str, test_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(test_id.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // 53 bits keep the division exact and strictly below 1.
    (u64::from_be_bytes(prefix) >> 11) as f64 / (1u64 << 53) as f64
}

/// Walk the cumulative traffic split until it passes `fraction`.
pub fn pick_variant(variants: &[Variant], fraction: f64) -> Option<&Variant> {
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.traffic_percentage / 100.0;
        if fraction < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}
