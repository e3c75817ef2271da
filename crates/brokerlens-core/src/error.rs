use thiserror::Error;

/// Errors surfaced by the analytics services.
///
/// Validation and lookup failures propagate to the caller. Failures of
/// downstream collaborators during aggregation never reach this type; they
/// are logged and replaced by degraded snapshots instead.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("approval required: {0}")]
    ApprovalRequired(String),

    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

impl AnalyticsError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_passed_through_verbatim() {
        let err = AnalyticsError::validation("Test name is required");
        assert_eq!(err.to_string(), "Test name is required");
    }

    #[test]
    fn not_found_names_the_missing_entity() {
        let err = AnalyticsError::not_found("Test test_1");
        assert_eq!(err.to_string(), "Test test_1 not found");
    }
}
