//! Engine configuration for the offline ledger and sync policies.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default pending-log capacity before the overflow policy applies
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 500;
/// Default window after which a completed sync counts as stale
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_secs(60 * 60);
/// Default age after which an unsynced entry is treated as potentially conflicted
pub const DEFAULT_CONFLICT_AGE: Duration = Duration::from_secs(24 * 60 * 60);
/// Default automatic sync timer interval
pub const DEFAULT_AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// What `append_log` does once the transaction log reaches capacity.
///
/// The source system silently dropped the oldest entries, including unsynced
/// ones — a latent data-loss hazard. The policy is explicit here so the host
/// application has to choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOverflowPolicy {
    /// Retain only the most recent entries, discarding the oldest (legacy behavior)
    DropOldest,
    /// Refuse the append with `Error::LogFull`
    RejectNew,
    /// Never truncate
    Unbounded,
}

/// Tunable policies for the store, sync engine, and facade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Transaction log capacity
    pub max_log_entries: usize,
    /// Behavior at capacity
    pub overflow_policy: LogOverflowPolicy,
    /// `needs_sync` turns true once the last sync is older than this
    pub staleness_window: Duration,
    /// Unsynced entries older than this are flagged as potentially conflicted
    pub conflict_age_threshold: Duration,
    /// Fixed timer interval for automatic sync while online and authenticated
    pub auto_sync_interval: Duration,
    /// Balances at or below this count as "low" in facade filters and stats
    pub low_balance_threshold: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            overflow_policy: LogOverflowPolicy::DropOldest,
            staleness_window: DEFAULT_STALENESS_WINDOW,
            conflict_age_threshold: DEFAULT_CONFLICT_AGE,
            auto_sync_interval: DEFAULT_AUTO_SYNC_INTERVAL,
            low_balance_threshold: Decimal::new(500, 2), // 5.00
        }
    }
}

impl EngineConfig {
    /// Set the transaction log capacity
    #[must_use]
    pub const fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    /// Set the overflow policy
    #[must_use]
    pub const fn with_overflow_policy(mut self, policy: LogOverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set the staleness window
    #[must_use]
    pub const fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Set the conflict age threshold
    #[must_use]
    pub const fn with_conflict_age_threshold(mut self, threshold: Duration) -> Self {
        self.conflict_age_threshold = threshold;
        self
    }

    /// Set the automatic sync interval
    #[must_use]
    pub const fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = interval;
        self
    }

    /// Set the low-balance threshold
    #[must_use]
    pub const fn with_low_balance_threshold(mut self, threshold: Decimal) -> Self {
        self.low_balance_threshold = threshold;
        self
    }
}
