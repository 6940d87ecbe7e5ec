//! Error types for farebox-core

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using farebox-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in farebox-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Boarding precondition: cached balance cannot cover the fare
    #[error("Insufficient balance: fare {required} exceeds available {available}")]
    InsufficientBalance {
        /// Fare that was requested
        required: Decimal,
        /// Balance currently cached for the passenger
        available: Decimal,
    },

    /// Top-up/boarding precondition: amount must be strictly positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Passenger not present in the local record store
    #[error("Passenger not found: {0}")]
    PassengerNotFound(String),

    /// Sync cannot start while the device is offline
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Sync cannot start without a valid session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Transaction log is at capacity and the overflow policy rejects new writes
    #[error("Transaction log is full ({0} entries)")]
    LogFull(usize),

    /// Current user has a role the sync scope rules do not recognize
    #[error("Unknown user role: {0}")]
    UnknownRole(String),

    /// Authoritative store rejected or failed a request
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistent-store failure that could not be degraded to a default
    #[error("Storage error: {0}")]
    Storage(String),
}
