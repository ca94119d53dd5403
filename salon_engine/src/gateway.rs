//! The boundary between the settlement engine and an external card-payment gateway.
//!
//! The engine never talks HTTP. A server wires in an implementation of [`PaymentGateway`] that wraps a concrete
//! provider client. Calls across this boundary are never made while a database transaction is open.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use salon_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{ConversionError, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("The payment gateway did not answer in time")]
    Timeout,
    #[error("The payment gateway could not be reached: {0}")]
    Unreachable(String),
    #[error("The payment gateway declined the request. {code}: {message}")]
    Declined { code: String, message: String },
    #[error("The payment gateway sent a response we could not understand: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Outcome unknown: the gateway may or may not have acted on the request.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable(_) | Self::InvalidResponse(_))
    }
}

/// Payment states as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayPaymentStatus {
    Ready,
    InProgress,
    WaitingForDeposit,
    Done,
    Canceled,
    PartialCanceled,
    Aborted,
    Expired,
}

impl GatewayPaymentStatus {
    /// Maps the gateway's view of a payment onto our settlement states. Statuses that say nothing about the
    /// outcome of the payment itself map to `None`.
    pub fn settlement_status(&self) -> Option<PaymentStatus> {
        match self {
            Self::Done => Some(PaymentStatus::Completed),
            Self::Aborted | Self::Expired => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_refund_notice(&self) -> bool {
        matches!(self, Self::Canceled | Self::PartialCanceled)
    }
}

impl Display for GatewayPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "READY",
            Self::InProgress => "IN_PROGRESS",
            Self::WaitingForDeposit => "WAITING_FOR_DEPOSIT",
            Self::Done => "DONE",
            Self::Canceled => "CANCELED",
            Self::PartialCanceled => "PARTIAL_CANCELED",
            Self::Aborted => "ABORTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

impl FromStr for GatewayPaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_uppercase()))
            .map_err(|_| ConversionError(format!("Unknown gateway payment status: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub order_id: String,
    pub order_name: String,
    pub amount: Money,
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub payment_key: String,
    pub order_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub payment_key: String,
    pub order_id: String,
    pub status: GatewayPaymentStatus,
    pub total_amount: Money,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundInstruction {
    pub payment_key: String,
    pub amount: Money,
    pub reason: String,
    /// Replays with the same key must not refund twice.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub transaction_key: String,
    pub refunded_amount: Money,
}

#[allow(async_fn_in_trait)]
pub trait PaymentGateway {
    /// Opens a checkout session for a payment leg.
    async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError>;

    /// Asks the gateway to approve a payment the customer has authorised.
    async fn confirm(&self, payment_key: &str, order_id: &str, amount: Money) -> Result<GatewayPayment, GatewayError>;

    /// Looks up the gateway's current view of a payment.
    async fn fetch_status(&self, payment_key: &str) -> Result<GatewayPayment, GatewayError>;

    /// Returns `instruction.amount` of a completed payment to the customer.
    async fn refund(&self, instruction: &RefundInstruction) -> Result<GatewayRefund, GatewayError>;
}
