//! farebox-core - Core library for Farebox
//!
//! Offline-first fare collection: a durable local record store, optimistic
//! balance mutations, connectivity tracking, and a reconciliation engine that
//! pushes the pending transaction log to the authoritative server and pulls
//! snapshots back. Consumed by the CLI and any future UI shells.

pub mod applier;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod facade;
pub mod models;
pub mod remote;
pub mod session;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use applier::{MutationApplier, MutationOutcome};
pub use config::{EngineConfig, LogOverflowPolicy};
pub use connectivity::{ConnectivityMonitor, Transition};
pub use db::{Database, RecordStore, StoreHandle};
pub use error::{Error, Result};
pub use facade::{
    BalanceTier, OperationOutcome, PassengerFilter, PassengerService, PassengerSort, PassengerStats,
};
pub use models::{
    CurrentUser, OfflineTransaction, PassengerSnapshot, Role, SyncReport, TransactionId,
    TransactionType,
};
pub use remote::{AuthoritativeStore, HttpAuthoritativeStore, PassengerScope, RemoteError};
pub use session::{AuthSession, Sessions};
pub use sync::{ConflictPolicy, SyncEngine, SyncStatus};
