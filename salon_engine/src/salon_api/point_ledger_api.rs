use std::fmt::Debug;

use log::*;
use salon_common::Points;

use crate::{
    db_types::{PointTransaction, PointTxType},
    reservation_objects::PointSummary,
    salon_api::errors::ReservationError,
    traits::{PointLedgerDatabase, PointUseResult},
};

/// Loyalty point balances and history.
///
/// Points are earned when a reservation completes and spent at booking time; both of those happen inside the
/// reservation flows. This API is the read side, plus manual debits and administrator grants.
pub struct PointLedgerApi<B> {
    db: B,
}

impl<B> Debug for PointLedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PointLedgerApi")
    }
}

impl<B> PointLedgerApi<B>
where B: PointLedgerDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn balance(&self, user_id: &str) -> Result<Points, ReservationError> {
        let balance = self.db.fetch_point_balance(user_id).await?;
        Ok(balance)
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<PointTransaction>, ReservationError> {
        let history = self.db.fetch_point_history(user_id).await?;
        Ok(history)
    }

    pub async fn summary(&self, user_id: &str) -> Result<PointSummary, ReservationError> {
        let balance = self.balance(user_id).await?;
        let history = self.history(user_id).await?;
        Ok(PointSummary { user_id: user_id.to_string(), balance, history })
    }

    /// Spends points outside of a booking. Fails with [`ReservationError::InsufficientBalance`] if the balance does
    /// not cover `amount`; concurrent calls can never overdraw it.
    pub async fn use_points(
        &self,
        user_id: &str,
        amount: Points,
        memo: Option<&str>,
    ) -> Result<PointTransaction, ReservationError> {
        if !amount.is_positive() {
            return Err(ReservationError::Validation(format!("Cannot use {amount}")));
        }
        match self.db.use_points(user_id, amount, None, memo).await? {
            PointUseResult::Applied(tx) => {
                debug!("🪙️ {user_id} used {amount}");
                Ok(tx)
            },
            PointUseResult::InsufficientBalance(balance) => {
                debug!("🪙️ {user_id} tried to use {amount} but only has {balance}");
                Err(ReservationError::InsufficientBalance(balance))
            },
        }
    }

    /// Credits points to a user by hand.
    pub async fn grant(&self, user_id: &str, amount: Points, memo: &str) -> Result<PointTransaction, ReservationError> {
        if !amount.is_positive() {
            return Err(ReservationError::Validation(format!("Cannot grant {amount}")));
        }
        let tx = self.db.credit_points(user_id, PointTxType::Granted, amount, None, Some(memo)).await?;
        info!("🪙️ {amount} granted to {user_id}: {memo}");
        Ok(tx)
    }
}
