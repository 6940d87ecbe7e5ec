//! Local record store: snapshots, transaction log, last-sync scalar
//!
//! Three logical keys live in one key/value table, each independently
//! serialized and independently recoverable. Read failures (missing key,
//! corrupt JSON, storage error) degrade to empty defaults with a warning,
//! so callers behave as if nothing were cached instead of crashing.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::{EngineConfig, LogOverflowPolicy};
use crate::error::{Error, Result};
use crate::models::{OfflineTransaction, PassengerSnapshot, TransactionId};

use super::Database;

const SNAPSHOTS_KEY: &str = "passengers";
const LOG_KEY: &str = "transaction_log";
const LAST_SYNC_KEY: &str = "last_sync_time";

/// Shared handle to the single-writer record store
pub type StoreHandle = Arc<Mutex<RecordStore>>;

/// What happened to an accepted log append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Entry appended within capacity
    Appended,
    /// Entry appended; this many oldest entries were discarded to fit the cap
    DroppedOldest(usize),
    /// Storage write failed; the entry was not persisted (already logged)
    Failed,
}

/// Durable, synchronous access to the two logical tables and the sync scalar
pub struct RecordStore {
    db: Database,
    max_log_entries: usize,
    overflow_policy: LogOverflowPolicy,
}

impl RecordStore {
    /// Create a store over an open database with the given log policies
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        Self {
            db,
            max_log_entries: config.max_log_entries,
            overflow_policy: config.overflow_policy,
        }
    }

    /// Wrap this store in the shared async handle used across components
    #[must_use]
    pub fn into_handle(self) -> StoreHandle {
        Arc::new(Mutex::new(self))
    }

    /// Underlying database, exposed for fault injection in tests
    #[cfg(test)]
    pub(crate) const fn database(&self) -> &Database {
        &self.db
    }

    /// Read the cached passenger snapshot set
    pub fn read_snapshots(&self) -> Vec<PassengerSnapshot> {
        self.read_or_default(SNAPSHOTS_KEY)
    }

    /// Full replace of the snapshot set (after a successful sync pull)
    pub fn write_snapshots(&self, snapshots: &[PassengerSnapshot]) {
        self.write_logged(SNAPSHOTS_KEY, &snapshots);
    }

    /// Find one cached snapshot by passenger ID
    pub fn find_snapshot(&self, passenger_id: &str) -> Option<PassengerSnapshot> {
        self.read_snapshots()
            .into_iter()
            .find(|p| p.id == passenger_id)
    }

    /// Replace one cached snapshot in place; returns false when absent
    pub fn update_snapshot(&self, passenger: &PassengerSnapshot) -> bool {
        let mut snapshots = self.read_snapshots();
        let Some(slot) = snapshots.iter_mut().find(|p| p.id == passenger.id) else {
            return false;
        };
        *slot = passenger.clone();
        self.write_logged(SNAPSHOTS_KEY, &snapshots);
        true
    }

    /// Read the full transaction log in insertion order
    pub fn read_log(&self) -> Vec<OfflineTransaction> {
        self.read_or_default(LOG_KEY)
    }

    /// Unsynced entries in insertion order
    pub fn pending_entries(&self) -> Vec<OfflineTransaction> {
        self.read_log().into_iter().filter(|t| !t.synced).collect()
    }

    /// Number of unsynced entries
    pub fn pending_count(&self) -> usize {
        self.read_log().iter().filter(|t| !t.synced).count()
    }

    /// Append an entry, enforcing the configured capacity policy
    ///
    /// The only error surfaced is [`Error::LogFull`] under
    /// [`LogOverflowPolicy::RejectNew`], and only when the UNSYNCED backlog
    /// reaches the cap; synced audit history never blocks new mutations.
    /// Storage failures degrade to [`AppendOutcome::Failed`] after being
    /// logged.
    pub fn append_log(&self, entry: OfflineTransaction) -> Result<AppendOutcome> {
        let mut log = self.read_log();

        if matches!(self.overflow_policy, LogOverflowPolicy::RejectNew) {
            let pending = log.iter().filter(|t| !t.synced).count();
            if pending >= self.max_log_entries {
                return Err(Error::LogFull(self.max_log_entries));
            }
        }

        log.push(entry);

        let mut dropped = 0;
        match self.overflow_policy {
            LogOverflowPolicy::DropOldest if log.len() > self.max_log_entries => {
                dropped = log.len() - self.max_log_entries;
                for discarded in log.drain(..dropped) {
                    if discarded.synced {
                        tracing::debug!(id = %discarded.id, "Dropped synced log entry at capacity");
                    } else {
                        tracing::warn!(
                            id = %discarded.id,
                            passenger_id = %discarded.passenger_id,
                            amount = %discarded.amount,
                            "Dropped UNSYNCED log entry at capacity; this mutation is lost"
                        );
                    }
                }
            }
            LogOverflowPolicy::RejectNew if log.len() > self.max_log_entries => {
                // Over the cap only because of synced audit history; prune
                // the oldest synced entries to make room
                let mut excess = log.len() - self.max_log_entries;
                log.retain(|t| {
                    if excess > 0 && t.synced {
                        excess -= 1;
                        dropped += 1;
                        tracing::debug!(id = %t.id, "Dropped synced log entry at capacity");
                        false
                    } else {
                        true
                    }
                });
            }
            _ => {}
        }

        if self.write_logged(LOG_KEY, &log) {
            if dropped > 0 {
                Ok(AppendOutcome::DroppedOldest(dropped))
            } else {
                Ok(AppendOutcome::Appended)
            }
        } else {
            Ok(AppendOutcome::Failed)
        }
    }

    /// Flip one entry's `synced` flag to true; returns false when absent
    pub fn mark_synced(&self, id: &TransactionId) -> bool {
        let mut log = self.read_log();
        let Some(entry) = log.iter_mut().find(|t| t.id == *id) else {
            return false;
        };
        entry.synced = true;
        self.write_logged(LOG_KEY, &log)
    }

    /// Remove one entry outright (permanently unresolvable); returns false when absent
    pub fn remove_log_entry(&self, id: &TransactionId) -> bool {
        let mut log = self.read_log();
        let before = log.len();
        log.retain(|t| t.id != *id);
        if log.len() == before {
            return false;
        }
        self.write_logged(LOG_KEY, &log)
    }

    /// Clear every entry's `synced` flag so the next pass re-pushes the full log
    ///
    /// Returns the number of entries flipped back to pending.
    pub fn reset_synced_flags(&self) -> usize {
        let mut log = self.read_log();
        let mut flipped = 0;
        for entry in &mut log {
            if entry.synced {
                entry.synced = false;
                flipped += 1;
            }
        }
        if flipped > 0 {
            self.write_logged(LOG_KEY, &log);
        }
        flipped
    }

    /// Timestamp of the last successful sync (unix ms), if any
    pub fn read_last_sync_time(&self) -> Option<i64> {
        self.read_value(LAST_SYNC_KEY).unwrap_or_else(|error| {
            tracing::warn!(key = LAST_SYNC_KEY, %error, "Store read failed; treating as never synced");
            None
        })
    }

    /// Record the start timestamp of a fully successful sync pass
    pub fn write_last_sync_time(&self, timestamp: i64) {
        self.write_logged(LAST_SYNC_KEY, &timestamp);
    }

    fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.read_value(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(error) => {
                tracing::warn!(key, %error, "Store read failed; degrading to empty default");
                T::default()
            }
        }
    }

    fn read_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = match self.db.connection().query_row(
            "SELECT value FROM kv_store WHERE key = ?",
            rusqlite::params![key],
            |row| row.get(0),
        ) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Serialize and write one key; logs and reports failure instead of erroring
    fn write_logged<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.write_value(key, value) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(key, %error, "Store write failed; value not persisted");
                false
            }
        }
    }

    fn write_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.db.connection().execute(
            "INSERT OR REPLACE INTO kv_store (key, value) VALUES (?, ?)",
            rusqlite::params![key, raw],
        )?;
        Ok(())
    }
}
