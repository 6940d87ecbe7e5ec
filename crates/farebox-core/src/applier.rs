//! Optimistic mutation applier
//!
//! Applies boardings and top-ups against the locally cached balance and
//! durably logs the intent, without waiting for network confirmation. The
//! sole writer of optimistic balance state; never contacts the network.

use rust_decimal::Decimal;

use crate::db::{AppendOutcome, StoreHandle};
use crate::error::{Error, Result};
use crate::models::{OfflineTransaction, PassengerSnapshot, TransactionType};

/// Result of a locally applied mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    /// The unsynced log entry recording the intent
    pub transaction: OfflineTransaction,
    /// The snapshot after the local balance update
    pub passenger: PassengerSnapshot,
}

/// Applies financial mutations to the local record store
#[derive(Clone)]
pub struct MutationApplier {
    store: StoreHandle,
}

impl MutationApplier {
    pub const fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Deduct a fare from the cached balance and log a boarding
    ///
    /// Fails with [`Error::InsufficientBalance`] when the cached balance
    /// cannot cover the fare; no negative-balance boarding is permitted
    /// offline. The balance is left untouched and nothing is logged.
    pub async fn apply_boarding(
        &self,
        passenger_id: &str,
        conductor_id: &str,
        route_id: &str,
        fare: Decimal,
    ) -> Result<MutationOutcome> {
        if fare <= Decimal::ZERO {
            return Err(Error::InvalidAmount(fare));
        }

        let store = self.store.lock().await;
        let mut passenger = store
            .find_snapshot(passenger_id)
            .ok_or_else(|| Error::PassengerNotFound(passenger_id.to_string()))?;

        if passenger.current_balance < fare {
            return Err(Error::InsufficientBalance {
                required: fare,
                available: passenger.current_balance,
            });
        }

        let transaction = OfflineTransaction::new(
            passenger_id,
            conductor_id,
            route_id,
            TransactionType::Boarding,
            -fare,
            passenger.current_balance,
        );
        Self::commit(&store, transaction, &mut passenger)
    }

    /// Credit a top-up to the cached balance and log it
    ///
    /// Fails with [`Error::InvalidAmount`] unless `amount > 0`. Top-ups have
    /// no balance precondition; accounts already negative through server-side
    /// paths can be topped up offline.
    pub async fn apply_topup(
        &self,
        passenger_id: &str,
        amount: Decimal,
        conductor_id: &str,
        route_id: &str,
    ) -> Result<MutationOutcome> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let store = self.store.lock().await;
        let mut passenger = store
            .find_snapshot(passenger_id)
            .ok_or_else(|| Error::PassengerNotFound(passenger_id.to_string()))?;

        let transaction = OfflineTransaction::new(
            passenger_id,
            conductor_id,
            route_id,
            TransactionType::Topup,
            amount,
            passenger.current_balance,
        );
        Self::commit(&store, transaction, &mut passenger)
    }

    /// Log the entry and mutate the cached snapshot in one lock scope
    fn commit(
        store: &crate::db::RecordStore,
        transaction: OfflineTransaction,
        passenger: &mut PassengerSnapshot,
    ) -> Result<MutationOutcome> {
        debug_assert!(transaction.balances_consistent());

        match store.append_log(transaction.clone())? {
            AppendOutcome::Appended => {}
            AppendOutcome::DroppedOldest(count) => {
                tracing::warn!(count, "Log capacity reached; oldest entries discarded");
            }
            AppendOutcome::Failed => {
                // Without a logged entry the balance change would vanish at
                // the next pull, so refuse the mutation outright
                tracing::error!(id = %transaction.id, "Log append not persisted; mutation refused");
                return Err(Error::Storage(
                    "transaction log append was not persisted".to_string(),
                ));
            }
        }

        passenger.confirm_balance(transaction.balance_after);
        store.update_snapshot(passenger);

        tracing::debug!(
            id = %transaction.id,
            passenger_id = %transaction.passenger_id,
            kind = %transaction.transaction_type,
            amount = %transaction.amount,
            "Applied offline mutation"
        );

        Ok(MutationOutcome {
            transaction,
            passenger: passenger.clone(),
        })
    }
}
