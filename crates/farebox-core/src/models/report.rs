//! Sync pass result model

use serde::{Deserialize, Serialize};

/// Outcome of one reconciliation pass
///
/// Constructed fresh per sync attempt, broadcast to observers, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// True when the pass completed with an empty error list
    pub success: bool,
    /// Log entries confirmed against the authoritative store
    pub synced_transactions: usize,
    /// Passenger snapshots pulled in phase 2
    pub synced_passengers: usize,
    /// Ordered human-readable failure descriptions
    pub errors: Vec<String>,
    /// Start of the pass (unix ms)
    pub timestamp: i64,
}

impl SyncReport {
    /// Start a report for a pass beginning now
    #[must_use]
    pub fn started_now() -> Self {
        Self {
            success: false,
            synced_transactions: 0,
            synced_passengers: 0,
            errors: Vec::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Report for a pass that could not start (guard failure)
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        let mut report = Self::started_now();
        report.errors.push(reason.into());
        report
    }
}
