//! Offline transaction log entry model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for an offline transaction, using UUID v7 (time-sortable)
///
/// Assigned once by the client at creation and never reassigned, so the same
/// entry keeps its identity across sync retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Create a new unique transaction ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of financial event recorded against a passenger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Fare deduction recorded when a passenger uses the service
    Boarding,
    /// Positive balance adjustment
    Topup,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boarding => write!(f, "boarding"),
            Self::Topup => write!(f, "topup"),
        }
    }
}

/// A locally-initiated financial event, immutable once synced
///
/// `amount` is signed: negative for a fare deduction, positive for a top-up.
/// `balance_after = balance_before + amount` always holds; both balances are
/// computed at creation time from the then-current local snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineTransaction {
    /// Client-generated unique identifier
    pub id: TransactionId,
    /// Target passenger account (server-assigned ID)
    pub passenger_id: String,
    /// Conductor who recorded the event
    pub conductor_id: String,
    /// Route the event was recorded on
    pub route_id: String,
    /// Boarding or top-up
    pub transaction_type: TransactionType,
    /// Signed delta applied to the balance
    pub amount: Decimal,
    /// Cached balance before the event
    pub balance_before: Decimal,
    /// Cached balance after the event
    pub balance_after: Decimal,
    /// Client clock, unix milliseconds
    pub timestamp: i64,
    /// Confirmed against the authoritative store
    pub synced: bool,
}

impl OfflineTransaction {
    /// Create a new unsynced log entry, deriving `balance_after` from the delta
    #[must_use]
    pub fn new(
        passenger_id: impl Into<String>,
        conductor_id: impl Into<String>,
        route_id: impl Into<String>,
        transaction_type: TransactionType,
        amount: Decimal,
        balance_before: Decimal,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            passenger_id: passenger_id.into(),
            conductor_id: conductor_id.into(),
            route_id: route_id.into(),
            transaction_type,
            amount,
            balance_before,
            balance_after: balance_before + amount,
            timestamp: chrono::Utc::now().timestamp_millis(),
            synced: false,
        }
    }

    /// Check the creation-time balance invariant
    #[must_use]
    pub fn balances_consistent(&self) -> bool {
        self.balance_after - self.balance_before == self.amount
    }

    /// Age of this entry relative to `now` (unix ms), in milliseconds
    #[must_use]
    pub const fn age_ms(&self, now: i64) -> i64 {
        now - self.timestamp
    }
}
