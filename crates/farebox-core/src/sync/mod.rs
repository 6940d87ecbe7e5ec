//! Sync engine: the push-then-pull reconciliation protocol
//!
//! One pass pushes every pending log entry against the authoritative store
//! in insertion order, then pulls a fresh snapshot set scoped to the current
//! user, then records the last-sync timestamp when nothing failed. Per-entry
//! failures are isolated; each phase commits independently with no rollback.
//!
//! The `Idle`/`Syncing` guard is a single-process lock only. Two application
//! instances sharing a store (the multi-tab case) can still race each other's
//! push and snapshot replace; that limitation is documented, not fixed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::StoreHandle;
use crate::error::Error;
use crate::models::{
    CurrentUser, OfflineTransaction, Role, SyncReport, TransactionId, TransactionType,
};
use crate::remote::{AuthoritativeStore, PassengerScope};
use crate::session::{AuthSession, Sessions};

/// What to do with unsynced entries older than the conflict age threshold
///
/// The source system only ever logged these; resolution is pluggable here so
/// the gap is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Log each entry and leave it pending (default, advisory only)
    FlagForReview,
    /// Remove the entries from the log
    Discard,
    /// Keep only entries still valid against the current cached balance
    Revalidate,
}

/// Point-in-time view of the engine for UI indicators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub is_online: bool,
    pub is_authenticated: bool,
    pub pending_count: usize,
    pub last_sync_time: Option<i64>,
}

type Observer = Box<dyn Fn(&SyncReport) + Send + Sync>;

/// The reconciliation engine
///
/// Constructor-injected and explicitly owned; holds no global state.
pub struct SyncEngine {
    store: StoreHandle,
    remote: Arc<dyn AuthoritativeStore>,
    sessions: Sessions,
    monitor: ConnectivityMonitor,
    config: EngineConfig,
    guard: Mutex<()>,
    observers: std::sync::Mutex<Vec<Observer>>,
}

impl SyncEngine {
    pub fn new(
        store: StoreHandle,
        remote: Arc<dyn AuthoritativeStore>,
        sessions: Sessions,
        monitor: ConnectivityMonitor,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remote,
            sessions,
            monitor,
            config,
            guard: Mutex::new(()),
            observers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for sync pass results
    pub fn subscribe(&self, observer: impl Fn(&SyncReport) + Send + Sync + 'static) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(Box::new(observer));
        }
    }

    /// Run one reconciliation pass
    ///
    /// Guard failures (already syncing, offline, unauthenticated) return an
    /// immediate failed report without entering the syncing state; those are
    /// returned to the caller only. Every pass that actually runs is
    /// broadcast to observers after the engine is idle again, success or not.
    pub async fn sync_now(&self) -> SyncReport {
        let Ok(lock) = self.guard.try_lock() else {
            return SyncReport::rejected("sync already in progress");
        };
        if !self.monitor.is_online() {
            return SyncReport::rejected(Error::NetworkUnavailable.to_string());
        }
        let Some(session) = self.sessions.current() else {
            return SyncReport::rejected(Error::NotAuthenticated.to_string());
        };

        let mut report = SyncReport::started_now();
        tracing::debug!("Sync pass starting");

        // Phase 1 must fully complete before phase 2: the authoritative pull
        // has to reflect the pushes.
        self.push_pending(&mut report).await;
        self.pull_snapshots(&session, &mut report).await;

        if report.errors.is_empty() {
            report.success = true;
            self.store.lock().await.write_last_sync_time(report.timestamp);
        }

        tracing::info!(
            success = report.success,
            synced_transactions = report.synced_transactions,
            synced_passengers = report.synced_passengers,
            errors = report.errors.len(),
            "Sync pass finished"
        );

        drop(lock);
        self.notify(&report);
        report
    }

    /// Clear all synced flags, then run a pass that re-pushes the entire log
    pub async fn force_sync_all(&self) -> SyncReport {
        let flipped = self.store.lock().await.reset_synced_flags();
        tracing::debug!(flipped, "Reset synced flags for forced re-push");
        self.sync_now().await
    }

    /// Phase 1 — transaction push, entries attempted strictly in log order
    async fn push_pending(&self, report: &mut SyncReport) {
        let pending = self.store.lock().await.pending_entries();
        tracing::debug!(count = pending.len(), "Pushing pending transactions");

        for entry in pending {
            match self.push_entry(&entry).await {
                Ok(()) => {
                    self.store.lock().await.mark_synced(&entry.id);
                    report.synced_transactions += 1;
                }
                Err(error) if error.is_not_found() => {
                    // Target account is gone server-side; the entry is
                    // permanently unresolvable and not counted as an error.
                    tracing::warn!(
                        id = %entry.id,
                        passenger_id = %entry.passenger_id,
                        "Passenger deleted on server; dropping log entry"
                    );
                    self.store.lock().await.remove_log_entry(&entry.id);
                }
                Err(error) => {
                    // Stays unsynced and is retried on the next pass
                    report
                        .errors
                        .push(format!("transaction {}: {error}", entry.id));
                }
            }
        }
    }

    /// Re-issue one logged command against the authoritative store
    async fn push_entry(&self, entry: &OfflineTransaction) -> crate::remote::RemoteResult<()> {
        match entry.transaction_type {
            TransactionType::Boarding => {
                self.remote
                    .board_passenger(
                        &entry.passenger_id,
                        &entry.conductor_id,
                        &entry.route_id,
                        -entry.amount,
                    )
                    .await?;
            }
            TransactionType::Topup => {
                self.remote
                    .topup_passenger(&entry.passenger_id, entry.amount, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Phase 2 — passenger pull and full snapshot replace
    async fn pull_snapshots(&self, session: &AuthSession, report: &mut SyncReport) {
        let user = match self.resolve_user(session).await {
            Ok(user) => user,
            Err(error) => {
                report.errors.push(format!("pull: {error}"));
                return;
            }
        };

        let scope = match scope_for(&user) {
            Ok(scope) => scope,
            Err(error) => {
                report.errors.push(format!("pull: {error}"));
                return;
            }
        };

        match self.remote.list_passengers(&scope).await {
            Ok(passengers) => {
                report.synced_passengers = passengers.len();
                // The server's balances win: everything locally known was
                // already pushed in phase 1.
                self.store.lock().await.write_snapshots(&passengers);
            }
            Err(error) => {
                report.errors.push(format!("pull: {error}"));
            }
        }
    }

    /// Resolve the pull user from the cached session, falling back to the server
    async fn resolve_user(&self, session: &AuthSession) -> crate::error::Result<CurrentUser> {
        if session.user.role != Role::Unknown {
            return Ok(session.user.clone());
        }
        match self.remote.get_current_user().await? {
            Some(user) => Ok(user),
            None => Err(Error::NotAuthenticated),
        }
    }

    /// True when a sync is warranted: pending entries, no completed sync yet,
    /// or a last sync older than the staleness window. Always false while
    /// unauthenticated.
    pub async fn needs_sync(&self) -> bool {
        if !self.sessions.is_authenticated() {
            return false;
        }
        let store = self.store.lock().await;
        if store.pending_count() > 0 {
            return true;
        }
        match store.read_last_sync_time() {
            None => true,
            Some(last) => {
                let age_ms = chrono::Utc::now().timestamp_millis() - last;
                age_ms > duration_ms(self.config.staleness_window)
            }
        }
    }

    /// Unsynced entries older than the conflict age threshold
    pub async fn stale_entries(&self) -> Vec<OfflineTransaction> {
        let now = chrono::Utc::now().timestamp_millis();
        let threshold = duration_ms(self.config.conflict_age_threshold);
        self.store
            .lock()
            .await
            .pending_entries()
            .into_iter()
            .filter(|entry| entry.age_ms(now) > threshold)
            .collect()
    }

    /// Apply a conflict policy to stale entries; returns the affected IDs
    pub async fn resolve_stale(&self, policy: ConflictPolicy) -> Vec<TransactionId> {
        let stale = self.stale_entries().await;
        if stale.is_empty() {
            return Vec::new();
        }

        let store = self.store.lock().await;
        let mut affected = Vec::new();
        for entry in stale {
            match policy {
                ConflictPolicy::FlagForReview => {
                    tracing::warn!(
                        id = %entry.id,
                        passenger_id = %entry.passenger_id,
                        timestamp = entry.timestamp,
                        "Unsynced entry exceeds conflict age; flagged for review"
                    );
                    affected.push(entry.id);
                }
                ConflictPolicy::Discard => {
                    tracing::warn!(id = %entry.id, "Discarding stale unsynced entry");
                    store.remove_log_entry(&entry.id);
                    Self::roll_back(&store, &entry);
                    affected.push(entry.id);
                }
                ConflictPolicy::Revalidate => {
                    if !Self::still_valid(&store, &entry) {
                        tracing::warn!(
                            id = %entry.id,
                            "Stale entry no longer valid against cached balance; discarding"
                        );
                        store.remove_log_entry(&entry.id);
                        Self::roll_back(&store, &entry);
                        affected.push(entry.id);
                    }
                }
            }
        }
        affected
    }

    /// A discarded entry's optimistic delta is removed from the cached
    /// snapshot so the balance returns to its pre-entry value
    fn roll_back(store: &crate::db::RecordStore, entry: &OfflineTransaction) {
        if let Some(mut passenger) = store.find_snapshot(&entry.passenger_id) {
            passenger.apply_delta(-entry.amount);
            store.update_snapshot(&passenger);
        }
    }

    /// Re-validation check: passenger still cached and, for boardings, the
    /// current balance could still cover the fare
    fn still_valid(store: &crate::db::RecordStore, entry: &OfflineTransaction) -> bool {
        let Some(passenger) = store.find_snapshot(&entry.passenger_id) else {
            return false;
        };
        match entry.transaction_type {
            TransactionType::Boarding => passenger.current_balance >= -entry.amount,
            TransactionType::Topup => true,
        }
    }

    /// Current engine status for UI indicators
    pub async fn sync_status(&self) -> SyncStatus {
        let is_syncing = self.guard.try_lock().is_err();
        let store = self.store.lock().await;
        SyncStatus {
            is_syncing,
            is_online: self.monitor.is_online(),
            is_authenticated: self.sessions.is_authenticated(),
            pending_count: store.pending_count(),
            last_sync_time: store.read_last_sync_time(),
        }
    }

    /// Number of unsynced entries
    pub async fn pending_count(&self) -> usize {
        self.store.lock().await.pending_count()
    }

    /// The unsynced entries themselves, oldest first
    pub async fn pending_entries(&self) -> Vec<OfflineTransaction> {
        self.store.lock().await.pending_entries()
    }

    /// Timestamp of the last fully successful pass (unix ms)
    pub async fn last_sync_time(&self) -> Option<i64> {
        self.store.lock().await.read_last_sync_time()
    }

    /// Wait (bounded) for any in-flight pass to return to idle
    ///
    /// There is no mid-sync cancellation; the timeout bounds only this wait,
    /// not the underlying push/pull calls.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.guard.lock())
            .await
            .is_ok()
    }

    /// Spawn the automatic sync driver: a fixed timer plus one sync per
    /// offline-to-online edge, both gated on an authenticated session
    pub fn spawn_auto_sync(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut connectivity = self.monitor.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.auto_sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; treat it as the startup sync.
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if engine.monitor.is_online() && engine.sessions.is_authenticated() {
                            engine.sync_now().await;
                        }
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *connectivity.borrow_and_update();
                        if online && engine.sessions.is_authenticated() {
                            tracing::debug!("Came online; triggering sync");
                            engine.sync_now().await;
                        }
                    }
                }
            }
        })
    }

    fn notify(&self, report: &SyncReport) {
        if let Ok(observers) = self.observers.lock() {
            for observer in observers.iter() {
                observer(report);
            }
        }
    }
}

fn scope_for(user: &CurrentUser) -> crate::error::Result<PassengerScope> {
    match user.role {
        Role::Admin => Ok(PassengerScope::All),
        Role::Conductor => user
            .assigned_route_id
            .clone()
            .map(PassengerScope::Route)
            .ok_or_else(|| Error::UnknownRole("conductor without route assignment".to_string())),
        Role::Unknown => Err(Error::UnknownRole("unrecognized role".to_string())),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis() as i64
}

#[cfg(test)]
mod tests;
