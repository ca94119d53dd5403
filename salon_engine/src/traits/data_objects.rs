use salon_common::Points;
use serde::{Deserialize, Serialize};

use crate::db_types::{
    CancellingParty,
    NewRefund,
    Payment,
    PaymentStatus,
    PointTransaction,
    Refund,
    Reservation,
    ReservationStatus,
    WebhookRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertReservationResult {
    Inserted(Reservation),
    /// Another active reservation overlaps the requested window.
    SlotUnavailable,
    /// The customer tried to redeem more points than they hold. Carries the current balance.
    InsufficientPoints(Points),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPaymentResult {
    Inserted(Payment),
    /// A pending or completed payment already exists for this leg.
    LegOccupied(Payment),
}

/// The outcome of a write guarded by an optimistic version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult<T> {
    Applied(T),
    /// The reservation changed after it was read. Nothing was written.
    Stale,
}

/// Move reservation `reservation_id` to `to`, provided it is still at `expected_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub reservation_id: i64,
    pub expected_version: i64,
    pub to: ReservationStatus,
}

impl StatusChange {
    pub fn new(reservation: &Reservation, to: ReservationStatus) -> Self {
        Self { reservation_id: reservation.id, expected_version: reservation.version, to }
    }
}

/// Everything that happens atomically when a reservation is completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPlan {
    pub change: StatusChange,
    pub points_earned: Points,
}

/// Everything that happens atomically when a reservation is cancelled or marked as a no-show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosurePlan {
    pub change: StatusChange,
    pub cancelled_by: Option<CancellingParty>,
    pub reason: Option<String>,
    pub refunds: Vec<NewRefund>,
    pub restore_points: Points,
    pub compensation_points: Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureOutcome {
    pub previous_status: ReservationStatus,
    pub reservation: Reservation,
    pub refunds: Vec<Refund>,
    pub points_restored: Points,
    pub points_compensated: Points,
}

/// What the gateway said about a pending payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Completed { payment_key: Option<String> },
    Failed { reason: String },
}

impl PaymentOutcome {
    pub fn status(&self) -> PaymentStatus {
        match self {
            Self::Completed { .. } => PaymentStatus::Completed,
            Self::Failed { .. } => PaymentStatus::Failed,
        }
    }
}

/// Tunables consulted while applying a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    pub auto_confirm_on_deposit: bool,
    pub point_earn_rate_bps: i64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self { auto_confirm_on_deposit: true, point_earn_rate_bps: 100 }
    }
}

/// The effects of one payment reaching a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub payment: Payment,
    pub previous_status: ReservationStatus,
    pub reservation: Reservation,
    /// Set when the money arrived for a reservation that had already been cancelled.
    pub refund: Option<Refund>,
    pub points_earned: Points,
}

impl Settlement {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.reservation.status
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    Settled(Box<Settlement>),
    /// The payment had already left `pending`. Carries the payment as it is now.
    AlreadySettled(Payment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointUseResult {
    Applied(PointTransaction),
    InsufficientBalance(Points),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookGateResult {
    /// The event changed state (or was recorded as informational) for the first time.
    Applied { record: WebhookRecord, settlement: Option<Box<Settlement>>, refund: Option<Refund> },
    /// A redelivery of an event that was already applied, or a result the synchronous flow already recorded.
    AlreadyApplied(WebhookRecord),
    Rejected(WebhookRecord),
}
