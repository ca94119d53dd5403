use chrono::{DateTime, Utc};

use crate::{
    db_types::{Payment, PaymentLeg, NewPayment, Refund, SettlementJournalEntry},
    traits::{
        data_objects::{InsertPaymentResult, PaymentOutcome, SettlementPolicy, SettlementResult},
        StorageError,
    },
};

/// Storage behaviour for payments and refunds.
///
/// A payment is written as `pending` once the gateway has opened a checkout session for it, and moves exactly once
/// to `completed` or `failed`. [`PaymentDatabase::settle_payment`] is the single place where that move happens,
/// whether it was triggered by the customer's confirmation, a webhook, or reconciliation.
#[allow(async_fn_in_trait)]
pub trait PaymentDatabase: Clone {
    /// Records a new pending card payment. If the leg already has a live (pending or completed) card payment, that
    /// payment is returned instead and nothing is written.
    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<InsertPaymentResult, StorageError>;

    async fn fetch_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, StorageError>;

    async fn fetch_payment_by_key(&self, payment_key: &str) -> Result<Option<Payment>, StorageError>;

    async fn fetch_payments_for_reservation(&self, reservation_id: i64) -> Result<Vec<Payment>, StorageError>;

    /// The pending or completed card payment for the given leg, if there is one.
    async fn fetch_live_payment(&self, reservation_id: i64, leg: PaymentLeg) -> Result<Option<Payment>, StorageError>;

    /// Moves a pending payment to its terminal status and applies the consequences to the reservation in the same
    /// transaction:
    /// * completed deposit: payment status becomes `deposit_paid` (or `fully_paid`), and with auto-confirmation
    ///   the reservation moves `requested → confirmed`.
    /// * completed final payment: `confirmed → completed`, points are earned, payment status becomes `fully_paid`.
    /// * completed payment on an already cancelled reservation: a full refund is queued.
    /// * failed payment: only the payment row changes.
    ///
    /// Returns [`SettlementResult::AlreadySettled`] if the payment was not pending.
    async fn settle_payment(
        &self,
        payment_id: i64,
        outcome: PaymentOutcome,
        policy: SettlementPolicy,
    ) -> Result<SettlementResult, StorageError>;

    /// Pending card payments created before `cutoff`.
    async fn fetch_stale_pending_payments(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, StorageError>;

    async fn fetch_refunds_for_reservation(&self, reservation_id: i64) -> Result<Vec<Refund>, StorageError>;

    /// Refunds waiting to be executed at the gateway, optionally for a single reservation.
    async fn fetch_pending_refunds(&self, reservation_id: Option<i64>) -> Result<Vec<Refund>, StorageError>;

    /// Marks a pending refund as completed and recalculates the reservation's payment status.
    /// Returns `None` if the refund was not pending.
    async fn complete_refund(&self, refund_id: i64, gateway_reference: &str) -> Result<Option<Refund>, StorageError>;

    /// Marks a pending refund as failed. Returns `None` if the refund was not pending.
    async fn fail_refund(&self, refund_id: i64, reason: &str) -> Result<Option<Refund>, StorageError>;

    async fn fetch_settlement_journal(&self, reservation_id: i64) -> Result<Vec<SettlementJournalEntry>, StorageError>;
}
