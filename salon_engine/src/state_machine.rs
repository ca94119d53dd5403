//! # Reservation state machine
//!
//! ```text
//!   requested ──confirm──▶ confirmed ──complete──▶ completed
//!       │                      │  └────no_show────▶ no_show
//!       ├──cancel (customer)───┼──────────────────▶ cancelled_by_user
//!       └──cancel (shop)───────┴──────────────────▶ cancelled_by_shop
//! ```
//!
//! Every edge has a guard that depends on the reservation's money position and the clock. Checking a transition
//! here never changes anything; the storage layer applies the accepted transition with an optimistic version check
//! so that a decision made on a stale snapshot is discarded.
use chrono::{DateTime, Utc};
use salon_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{Payment, PaymentMethod, Reservation, ReservationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Confirm,
    Complete,
    CancelByCustomer,
    CancelByShop,
    MarkNoShow,
}

impl Transition {
    pub fn target(&self) -> ReservationStatus {
        match self {
            Self::Confirm => ReservationStatus::Confirmed,
            Self::Complete => ReservationStatus::Completed,
            Self::CancelByCustomer => ReservationStatus::CancelledByUser,
            Self::CancelByShop => ReservationStatus::CancelledByShop,
            Self::MarkNoShow => ReservationStatus::NoShow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A reservation cannot move from {from} to {to}")]
    IllegalEdge { from: ReservationStatus, to: ReservationStatus },
    #[error("The deposit of {0} has not been paid")]
    DepositOutstanding(Money),
    #[error("The final balance of {0} has not been settled")]
    FinalOutstanding(Money),
    #[error("The appointment has already started")]
    AppointmentStarted,
    #[error("The appointment has not started yet")]
    AppointmentNotStarted,
}

/// Returns true if the graph has an edge `from → to`. Guards are not considered.
pub fn is_legal_edge(from: ReservationStatus, to: ReservationStatus) -> bool {
    use ReservationStatus::*;
    matches!(
        (from, to),
        (Requested, Confirmed) |
            (Confirmed, Completed) |
            (Requested, CancelledByUser) |
            (Confirmed, CancelledByUser) |
            (Requested, CancelledByShop) |
            (Confirmed, CancelledByShop) |
            (Confirmed, NoShow)
    )
}

/// What has been settled against a reservation so far, derived from its payment rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub deposit_paid: Money,
    pub points_paid: Money,
    pub final_card_paid: Money,
    pub deposit_outstanding: Money,
    pub final_outstanding: Money,
}

impl SettlementSummary {
    pub fn new(reservation: &Reservation, payments: &[Payment]) -> Self {
        let completed = payments.iter().filter(|p| p.is_completed() && p.reservation_id == reservation.id);
        let mut summary = Self::default();
        for p in completed {
            match (p.is_deposit, p.payment_method) {
                (true, _) => summary.deposit_paid += p.amount,
                (false, PaymentMethod::Points) => summary.points_paid += p.amount,
                (false, PaymentMethod::Card) => summary.final_card_paid += p.amount,
            }
        }
        summary.deposit_outstanding = reservation.deposit_amount.saturating_sub(summary.deposit_paid);
        summary.final_outstanding =
            reservation.remaining_amount.saturating_sub(summary.points_paid + summary.final_card_paid);
        summary
    }

    pub fn total_paid(&self) -> Money {
        self.deposit_paid + self.points_paid + self.final_card_paid
    }

    pub fn is_deposit_settled(&self) -> bool {
        self.deposit_outstanding.is_zero()
    }

    pub fn is_fully_settled(&self) -> bool {
        self.deposit_outstanding.is_zero() && self.final_outstanding.is_zero()
    }
}

/// Evaluates the edge and guard for `transition` from the reservation's current state.
///
/// Guards:
/// * `confirm` requires the deposit to be settled (trivially true when no deposit is required).
/// * `complete` requires the final balance to be settled.
/// * a customer may only cancel strictly before the appointment starts.
/// * `no_show` can only be declared once the appointment has started.
pub fn check_transition(
    reservation: &Reservation,
    transition: Transition,
    settlement: &SettlementSummary,
    now: DateTime<Utc>,
) -> Result<ReservationStatus, TransitionError> {
    let from = reservation.status;
    let to = transition.target();
    if !is_legal_edge(from, to) {
        return Err(TransitionError::IllegalEdge { from, to });
    }
    match transition {
        Transition::Confirm if !settlement.is_deposit_settled() => {
            Err(TransitionError::DepositOutstanding(settlement.deposit_outstanding))
        },
        Transition::Complete if !settlement.is_fully_settled() => {
            Err(TransitionError::FinalOutstanding(settlement.final_outstanding + settlement.deposit_outstanding))
        },
        Transition::CancelByCustomer if now >= reservation.starts_at => Err(TransitionError::AppointmentStarted),
        Transition::MarkNoShow if now < reservation.starts_at => Err(TransitionError::AppointmentNotStarted),
        _ => Ok(to),
    }
}
