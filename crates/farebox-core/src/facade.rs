//! Client-facing query/command facade
//!
//! Thin coordination layer consumed by UI-level code: passenger listing with
//! client-side filter/sort, selection state, and the boarding/top-up/CRUD
//! operations, each routed to the network-backed path when online or the
//! optimistic applier when offline.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::applier::MutationApplier;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::StoreHandle;
use crate::error::{Error, Result};
use crate::models::{OfflineTransaction, PassengerSnapshot, SyncReport};
use crate::remote::{AuthoritativeStore, PassengerUpsert, RemoteError};
use crate::session::Sessions;
use crate::sync::{SyncEngine, SyncStatus};

/// Balance band used for filtering and statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceTier {
    /// Below zero
    Negative,
    /// Zero up to the configured low-balance threshold
    Low,
    /// Above the threshold
    Healthy,
}

/// Sort order for passenger listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassengerSort {
    /// Alphabetical by full name
    #[default]
    Name,
    /// Lowest balance first
    Balance,
    /// Grouped by ministry
    Ministry,
    /// Grouped by route
    Route,
}

/// Client-side passenger filter
#[derive(Debug, Clone, Default)]
pub struct PassengerFilter {
    /// Case-insensitive substring of the full name
    pub name_contains: Option<String>,
    /// Exact ministry match
    pub ministry: Option<String>,
    /// Exact route match
    pub route_id: Option<String>,
    /// Balance band
    pub balance_tier: Option<BalanceTier>,
    /// Drop inactive accounts
    pub active_only: bool,
    /// Sort order
    pub sort: PassengerSort,
}

/// Result of a boarding or top-up issued through the facade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// Snapshot after the operation
    pub passenger: PassengerSnapshot,
    /// The pending log entry, present only when the offline path ran
    pub transaction: Option<OfflineTransaction>,
    /// True when the operation was applied optimistically
    pub offline: bool,
}

/// Aggregate figures for dashboards and indicators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassengerStats {
    pub total: usize,
    pub active: usize,
    pub total_balance: Decimal,
    pub low_balance: usize,
    pub negative_balance: usize,
    pub pending_transactions: usize,
}

/// The surface consumed by UI-level code
///
/// All collaborators are constructor-injected; the service holds no global
/// state beyond its own selection.
pub struct PassengerService {
    store: StoreHandle,
    applier: MutationApplier,
    engine: Arc<SyncEngine>,
    remote: Arc<dyn AuthoritativeStore>,
    monitor: ConnectivityMonitor,
    sessions: Sessions,
    config: EngineConfig,
    selected: std::sync::Mutex<Option<String>>,
}

impl PassengerService {
    pub fn new(
        store: StoreHandle,
        engine: Arc<SyncEngine>,
        remote: Arc<dyn AuthoritativeStore>,
        monitor: ConnectivityMonitor,
        sessions: Sessions,
        config: EngineConfig,
    ) -> Self {
        Self {
            applier: MutationApplier::new(store.clone()),
            store,
            engine,
            remote,
            monitor,
            sessions,
            config,
            selected: std::sync::Mutex::new(None),
        }
    }

    /// Cached passengers matching the filter, in the requested order
    pub async fn passengers(&self, filter: &PassengerFilter) -> Vec<PassengerSnapshot> {
        let mut passengers = self.store.lock().await.read_snapshots();

        if let Some(name) = &filter.name_contains {
            let needle = name.to_lowercase();
            passengers.retain(|p| p.full_name.to_lowercase().contains(&needle));
        }
        if let Some(ministry) = &filter.ministry {
            passengers.retain(|p| p.ministry == *ministry);
        }
        if let Some(route_id) = &filter.route_id {
            passengers.retain(|p| p.route_id == *route_id);
        }
        if let Some(tier) = filter.balance_tier {
            passengers.retain(|p| self.tier_of(p.current_balance) == tier);
        }
        if filter.active_only {
            passengers.retain(|p| p.is_active);
        }

        match filter.sort {
            PassengerSort::Name => passengers.sort_by(|a, b| a.full_name.cmp(&b.full_name)),
            PassengerSort::Balance => {
                passengers.sort_by(|a, b| a.current_balance.cmp(&b.current_balance));
            }
            PassengerSort::Ministry => {
                passengers.sort_by(|a, b| {
                    a.ministry.cmp(&b.ministry).then(a.full_name.cmp(&b.full_name))
                });
            }
            PassengerSort::Route => {
                passengers.sort_by(|a, b| {
                    a.route_id.cmp(&b.route_id).then(a.full_name.cmp(&b.full_name))
                });
            }
        }
        passengers
    }

    /// Balance band of an amount under the configured threshold
    pub fn tier_of(&self, balance: Decimal) -> BalanceTier {
        if balance < Decimal::ZERO {
            BalanceTier::Negative
        } else if balance <= self.config.low_balance_threshold {
            BalanceTier::Low
        } else {
            BalanceTier::Healthy
        }
    }

    /// Select a cached passenger by ID
    pub async fn select(&self, passenger_id: &str) -> Result<()> {
        let exists = self.store.lock().await.find_snapshot(passenger_id).is_some();
        if !exists {
            return Err(Error::PassengerNotFound(passenger_id.to_string()));
        }
        if let Ok(mut selected) = self.selected.lock() {
            *selected = Some(passenger_id.to_string());
        }
        Ok(())
    }

    /// Currently selected passenger, if still cached
    pub async fn selected(&self) -> Option<PassengerSnapshot> {
        let id = self.selected.lock().ok()?.clone()?;
        self.store.lock().await.find_snapshot(&id)
    }

    /// Drop the selection
    pub fn clear_selection(&self) {
        if let Ok(mut selected) = self.selected.lock() {
            *selected = None;
        }
    }

    /// Record a boarding, online when possible, optimistically otherwise
    pub async fn board(&self, passenger_id: &str, fare: Decimal) -> Result<OperationOutcome> {
        let (conductor_id, route_id) = self.operator_identity(passenger_id).await?;

        if fare <= Decimal::ZERO {
            return Err(Error::InvalidAmount(fare));
        }

        if self.monitor.is_online() {
            match self
                .remote
                .board_passenger(passenger_id, &conductor_id, &route_id, fare)
                .await
            {
                Ok(balance) => return self.confirm_remote(passenger_id, balance).await,
                Err(RemoteError::NotFound) => {
                    return Err(Error::PassengerNotFound(passenger_id.to_string()));
                }
                Err(error) => {
                    // Cached data exists, so degrade to the offline path and
                    // let the next sync reconcile (stale-data behavior).
                    tracing::warn!(%error, "Online boarding failed; applying offline");
                }
            }
        }

        let outcome = self
            .applier
            .apply_boarding(passenger_id, &conductor_id, &route_id, fare)
            .await?;
        Ok(OperationOutcome {
            passenger: outcome.passenger,
            transaction: Some(outcome.transaction),
            offline: true,
        })
    }

    /// Record a top-up, online when possible, optimistically otherwise
    pub async fn topup(&self, passenger_id: &str, amount: Decimal) -> Result<OperationOutcome> {
        let (conductor_id, route_id) = self.operator_identity(passenger_id).await?;

        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        if self.monitor.is_online() {
            match self.remote.topup_passenger(passenger_id, amount, None).await {
                Ok(balance) => return self.confirm_remote(passenger_id, balance).await,
                Err(RemoteError::NotFound) => {
                    return Err(Error::PassengerNotFound(passenger_id.to_string()));
                }
                Err(error) => {
                    tracing::warn!(%error, "Online top-up failed; applying offline");
                }
            }
        }

        let outcome = self
            .applier
            .apply_topup(passenger_id, amount, &conductor_id, &route_id)
            .await?;
        Ok(OperationOutcome {
            passenger: outcome.passenger,
            transaction: Some(outcome.transaction),
            offline: true,
        })
    }

    /// Create a passenger through the online path and cache it
    pub async fn create_passenger(&self, fields: &PassengerUpsert) -> Result<PassengerSnapshot> {
        self.require_online()?;
        let created = self.remote.create_passenger(fields).await?;
        let store = self.store.lock().await;
        let mut snapshots = store.read_snapshots();
        snapshots.push(created.clone());
        store.write_snapshots(&snapshots);
        Ok(created)
    }

    /// Update a passenger through the online path and refresh the cache
    pub async fn update_passenger(
        &self,
        passenger_id: &str,
        fields: &PassengerUpsert,
    ) -> Result<PassengerSnapshot> {
        self.require_online()?;
        let updated = self.remote.update_passenger(passenger_id, fields).await?;
        self.store.lock().await.update_snapshot(&updated);
        Ok(updated)
    }

    /// Delete a passenger through the online path and evict it from the cache
    pub async fn delete_passenger(&self, passenger_id: &str) -> Result<()> {
        self.require_online()?;
        self.remote.delete_passenger(passenger_id).await?;
        let store = self.store.lock().await;
        let mut snapshots = store.read_snapshots();
        snapshots.retain(|p| p.id != passenger_id);
        store.write_snapshots(&snapshots);
        if let Ok(mut selected) = self.selected.lock() {
            if selected.as_deref() == Some(passenger_id) {
                *selected = None;
            }
        }
        Ok(())
    }

    /// Aggregate statistics over the cached snapshot set
    pub async fn stats(&self) -> PassengerStats {
        let store = self.store.lock().await;
        let passengers = store.read_snapshots();
        let mut stats = PassengerStats {
            total: passengers.len(),
            active: 0,
            total_balance: Decimal::ZERO,
            low_balance: 0,
            negative_balance: 0,
            pending_transactions: store.pending_count(),
        };
        for p in &passengers {
            if p.is_active {
                stats.active += 1;
            }
            stats.total_balance += p.current_balance;
            match self.tier_of(p.current_balance) {
                BalanceTier::Negative => stats.negative_balance += 1,
                BalanceTier::Low => stats.low_balance += 1,
                BalanceTier::Healthy => {}
            }
        }
        stats
    }

    /// Run one reconciliation pass now
    pub async fn sync_now(&self) -> SyncReport {
        self.engine.sync_now().await
    }

    /// Re-push the entire log then reconcile
    pub async fn force_sync_all(&self) -> SyncReport {
        self.engine.force_sync_all().await
    }

    /// Engine status for indicators
    pub async fn sync_status(&self) -> SyncStatus {
        self.engine.sync_status().await
    }

    /// Unsynced entry count for the pending badge
    pub async fn pending_count(&self) -> usize {
        self.engine.pending_count().await
    }

    /// Last fully successful sync (unix ms)
    pub async fn last_sync_time(&self) -> Option<i64> {
        self.engine.last_sync_time().await
    }

    /// Whether a sync is warranted
    pub async fn needs_sync(&self) -> bool {
        self.engine.needs_sync().await
    }

    /// Wait (bounded) for an in-flight sync to finish
    pub async fn wait_sync_idle(&self, timeout: Duration) -> bool {
        self.engine.wait_idle(timeout).await
    }

    /// Conductor identity and route for a recorded transaction
    async fn operator_identity(&self, passenger_id: &str) -> Result<(String, String)> {
        let session = self.sessions.current().ok_or(Error::NotAuthenticated)?;
        let conductor_id = session
            .user
            .conductor_id
            .clone()
            .unwrap_or_else(|| session.user.id.clone());
        let route_id = match session.user.assigned_route_id.clone() {
            Some(route) => route,
            None => self
                .store
                .lock()
                .await
                .find_snapshot(passenger_id)
                .map(|p| p.route_id)
                .ok_or_else(|| Error::PassengerNotFound(passenger_id.to_string()))?,
        };
        Ok((conductor_id, route_id))
    }

    /// Write a server-confirmed balance through to the cache
    async fn confirm_remote(&self, passenger_id: &str, balance: Decimal) -> Result<OperationOutcome> {
        let store = self.store.lock().await;
        let passenger = match store.find_snapshot(passenger_id) {
            Some(mut passenger) => {
                passenger.confirm_balance(balance);
                store.update_snapshot(&passenger);
                passenger
            }
            None => {
                // The server already moved money; cache a minimal snapshot
                // and let the next pull fill in the rest
                tracing::warn!(
                    passenger_id,
                    "Server confirmed an operation for a passenger missing from the cache"
                );
                let passenger = PassengerSnapshot {
                    id: passenger_id.to_string(),
                    full_name: String::new(),
                    current_balance: balance,
                    route_id: String::new(),
                    ministry: String::new(),
                    boarding_area: String::new(),
                    legacy_passenger_id: None,
                    is_active: true,
                    updated_at: chrono::Utc::now().timestamp_millis(),
                };
                let mut snapshots = store.read_snapshots();
                snapshots.push(passenger.clone());
                store.write_snapshots(&snapshots);
                passenger
            }
        };
        Ok(OperationOutcome {
            passenger,
            transaction: None,
            offline: false,
        })
    }

    fn require_online(&self) -> Result<()> {
        if self.monitor.is_online() {
            Ok(())
        } else {
            Err(Error::NetworkUnavailable)
        }
    }
}
