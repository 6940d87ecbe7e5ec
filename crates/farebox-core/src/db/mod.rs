//! Local persistence layer for Farebox

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{AppendOutcome, RecordStore, StoreHandle};
