//! Data models for Farebox

mod passenger;
mod report;
mod transaction;
mod user;

pub use passenger::PassengerSnapshot;
pub use report::SyncReport;
pub use transaction::{OfflineTransaction, TransactionId, TransactionType};
pub use user::{CurrentUser, Role};
