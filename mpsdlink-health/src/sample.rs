use chrono::{DateTime, Utc};

/// Result of one health probe evaluation for a single subject.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    pub healthy: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthSample {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            reason: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}
