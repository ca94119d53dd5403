use salon_common::{Money, Points};
use serde::{Deserialize, Serialize};

use crate::db_types::{Payment, Refund, Reservation, ReservationStatus};

/// A reservation moved from one lifecycle status to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationChangedEvent {
    pub previous_status: ReservationStatus,
    pub reservation: Reservation,
}

impl ReservationChangedEvent {
    pub fn new(previous_status: ReservationStatus, reservation: Reservation) -> Self {
        Self { previous_status, reservation }
    }
}

/// A payment left `pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettledEvent {
    pub payment: Payment,
    pub reservation: Reservation,
    pub points_earned: Points,
}

impl PaymentSettledEvent {
    pub fn new(payment: Payment, reservation: Reservation, points_earned: Points) -> Self {
        Self { payment, reservation, points_earned }
    }
}

/// A refund was queued or changed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundIssuedEvent {
    pub refund: Refund,
}

impl RefundIssuedEvent {
    pub fn new(refund: Refund) -> Self {
        Self { refund }
    }

    pub fn amount(&self) -> Money {
        self.refund.refunded_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    ReservationChanged(ReservationChangedEvent),
    PaymentSettled(PaymentSettledEvent),
    RefundIssued(RefundIssuedEvent),
}
