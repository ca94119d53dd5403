use salon_common::Points;

use crate::{
    db_types::{PointTransaction, PointTxType},
    traits::{data_objects::PointUseResult, StorageError},
};

/// The append-only loyalty point ledger. A user's balance is the sum of their entries and never goes negative.
#[allow(async_fn_in_trait)]
pub trait PointLedgerDatabase: Clone {
    async fn fetch_point_balance(&self, user_id: &str) -> Result<Points, StorageError>;

    /// Newest first.
    async fn fetch_point_history(&self, user_id: &str) -> Result<Vec<PointTransaction>, StorageError>;

    /// Debits `amount` points, provided the balance covers it. The balance check and the debit are one statement,
    /// so concurrent debits can never overdraw the ledger.
    async fn use_points(
        &self,
        user_id: &str,
        amount: Points,
        reservation_id: Option<i64>,
        memo: Option<&str>,
    ) -> Result<PointUseResult, StorageError>;

    /// Credits points. Only `Granted` credits may be made without a reservation.
    async fn credit_points(
        &self,
        user_id: &str,
        tx_type: PointTxType,
        amount: Points,
        reservation_id: Option<i64>,
        memo: Option<&str>,
    ) -> Result<PointTransaction, StorageError>;
}
