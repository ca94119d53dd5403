use salon_common::Points;
use thiserror::Error;

use crate::{gateway::GatewayError, state_machine::TransitionError, traits::StorageError};

/// Every failure the engine reports to its callers. Each variant carries a stable machine-readable [`code`].
///
/// [`code`]: ReservationError::code
#[derive(Debug, Clone, Error)]
pub enum ReservationError {
    #[error("Invalid request. {0}")]
    Validation(String),
    #[error("The requested time slot is no longer available")]
    SlotUnavailable,
    #[error("Reservation #{0} was changed by someone else. Reload it and try again")]
    StaleState(i64),
    #[error("Transition not allowed. {0}")]
    InvalidTransition(#[from] TransitionError),
    #[error("Not enough points. The current balance is {0}")]
    InsufficientBalance(Points),
    #[error("Amount mismatch. {0}")]
    AmountMismatch(String),
    #[error("Forbidden. {0}")]
    Forbidden(String),
    #[error("Not found. {0}")]
    NotFound(String),
    #[error("The payment gateway did not answer in time. The payment will be reconciled later")]
    GatewayTimeout,
    #[error("The payment gateway is unavailable. {0}")]
    GatewayUnavailable(String),
    #[error("The payment was declined. {code}: {message}")]
    GatewayDeclined { code: String, message: String },
    #[error("Internal error. {0}")]
    Internal(String),
}

impl ReservationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SlotUnavailable => "SLOT_UNAVAILABLE",
            Self::StaleState(_) => "STALE_STATE",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            Self::AmountMismatch(_) => "AMOUNT_MISMATCH",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            Self::GatewayDeclined { .. } => "GATEWAY_DECLINED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// The caller may retry the same request later without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayTimeout | Self::GatewayUnavailable(_) | Self::StaleState(_))
    }
}

impl From<StorageError> for ReservationError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ReservationNotFound(id) => Self::NotFound(format!("Reservation #{id} does not exist")),
            StorageError::PaymentNotFound(p) => Self::NotFound(format!("Payment {p} does not exist")),
            StorageError::RefundNotFound(id) => Self::NotFound(format!("Refund #{id} does not exist")),
            StorageError::IntegrityViolation(msg) => Self::Validation(msg),
            StorageError::DatabaseError(msg) | StorageError::CorruptData(msg) => Self::Internal(msg),
        }
    }
}

impl From<GatewayError> for ReservationError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout => Self::GatewayTimeout,
            GatewayError::Unreachable(msg) | GatewayError::InvalidResponse(msg) => Self::GatewayUnavailable(msg),
            GatewayError::Declined { code, message } => Self::GatewayDeclined { code, message },
        }
    }
}
