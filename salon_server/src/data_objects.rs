//! Request and response bodies of the REST API.
//!
//! Bodies the API defines itself use camelCase field names. Engine records (reservations, payments, refunds) are
//! returned as the engine serializes them.
use chrono::{DateTime, NaiveDate, Utc};
use salon_common::{Money, Points};
use salon_engine::{
    db_types::{
        Payment,
        Refund,
        Reservation,
        ReservationPaymentStatus,
        ReservationStatus,
        WebhookEvent,
        WebhookOutcome,
    },
    reservation_objects::{BookingRequest, ConfirmPaymentRequest, PaymentInitiation, ServiceSelection},
    slots::parse_minute,
    traits::{ClosureOutcome, WebhookGateResult},
    ReservationError,
};
use serde::{Deserialize, Serialize};

//----------------------------------------------   Booking  ----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLine {
    pub service_id: String,
    #[serde(default = "one")]
    pub quantity: i64,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservationRequest {
    pub shop_id: String,
    pub services: Vec<ServiceLine>,
    pub date: NaiveDate,
    /// Local start time, `HH:MM`
    pub time: String,
    #[serde(default)]
    pub points_to_use: i64,
    pub memo: Option<String>,
}

impl NewReservationRequest {
    /// Builds the engine's booking request for `customer_id`. The customer always comes from the caller's identity,
    /// never from the body.
    pub fn into_booking(self, customer_id: &str) -> Result<BookingRequest, ReservationError> {
        let start_minute = parse_minute(&self.time)
            .ok_or_else(|| ReservationError::Validation(format!("{} is not a valid HH:MM start time", self.time)))?;
        let services = self
            .services
            .into_iter()
            .map(|s| ServiceSelection { service_id: s.service_id, quantity: s.quantity })
            .collect();
        Ok(BookingRequest {
            customer_id: customer_id.to_string(),
            shop_id: self.shop_id,
            services,
            date: self.date,
            start_minute,
            points_to_use: Points::from(self.points_to_use),
            memo: self.memo,
        })
    }
}

/// A checkout the customer must complete with the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInfo {
    pub payment_key: Option<String>,
    pub order_id: String,
    pub amount: Money,
    pub checkout_url: Option<String>,
    /// True if an earlier, still open checkout was handed back.
    pub reused: bool,
}

impl From<PaymentInitiation> for CheckoutInfo {
    fn from(value: PaymentInitiation) -> Self {
        let PaymentInitiation { payment, reused } = value;
        Self::from_payment(payment, reused)
    }
}

impl CheckoutInfo {
    pub fn from_payment(payment: Payment, reused: bool) -> Self {
        Self {
            payment_key: payment.payment_key,
            order_id: payment.order_id,
            amount: payment.amount,
            checkout_url: payment.checkout_url,
            reused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub reservation_id: i64,
    pub status: ReservationStatus,
    pub payment_status: ReservationPaymentStatus,
    pub starts_at: DateTime<Utc>,
    pub total_amount: Money,
    pub deposit_amount: Money,
    pub final_card_amount: Money,
    pub points_used: Points,
    /// Absent when no deposit is due, or if the checkout could not be opened. In the latter case the customer can
    /// retry through the deposit payment endpoint.
    pub deposit: Option<CheckoutInfo>,
}

impl BookingResponse {
    pub fn new(reservation: &Reservation, deposit: Option<CheckoutInfo>) -> Self {
        Self {
            reservation_id: reservation.id,
            status: reservation.status,
            payment_status: reservation.payment_status,
            starts_at: reservation.starts_at,
            total_amount: reservation.total_amount,
            deposit_amount: reservation.deposit_amount,
            final_card_amount: reservation.final_card_amount(),
            points_used: reservation.points_used,
            deposit,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationListParams {
    pub date: Option<NaiveDate>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityParams {
    pub date: NaiveDate,
    /// Minutes
    pub duration: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub shop_id: String,
    pub date: NaiveDate,
    pub duration_minutes: i64,
    pub open: bool,
    pub start_times: Vec<String>,
}

//----------------------------------------------   Lifecycle  ----------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureResponse {
    pub reservation: Reservation,
    pub refunds: Vec<Refund>,
    pub points_restored: Points,
    pub points_compensated: Points,
}

impl ClosureResponse {
    /// `refunds` replaces the refunds in `outcome`, which may have moved on since the reservation was closed.
    pub fn new(outcome: ClosureOutcome, refunds: Vec<Refund>) -> Self {
        Self {
            reservation: outcome.reservation,
            refunds,
            points_restored: outcome.points_restored,
            points_compensated: outcome.points_compensated,
        }
    }
}

/// Sent with 202 when a reservation cannot be completed before the customer pays the rest of the bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalPaymentRequired {
    pub reservation_id: i64,
    pub message: String,
    pub checkout: CheckoutInfo,
}

//----------------------------------------------   Payments  ----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentBody {
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
}

impl From<ConfirmPaymentBody> for ConfirmPaymentRequest {
    fn from(value: ConfirmPaymentBody) -> Self {
        Self { payment_key: value.payment_key, order_id: value.order_id, amount: Money::from(value.amount) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileParams {
    /// Only pending records older than this many minutes are checked. Defaults to the server setting.
    pub older_than_mins: Option<i64>,
}

//----------------------------------------------   Webhooks  ----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_id: String,
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub status: String,
    pub amount: Option<i64>,
}

impl From<WebhookPayload> for WebhookEvent {
    fn from(value: WebhookPayload) -> Self {
        Self {
            event_id: value.event_id,
            payment_key: value.payment_key,
            order_id: value.order_id,
            status: value.status,
            amount: value.amount.map(Money::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub event_id: String,
    /// `applied`, `ignored` or `rejected`
    pub result: String,
    pub reason: Option<String>,
}

impl From<&WebhookGateResult> for WebhookResponse {
    fn from(value: &WebhookGateResult) -> Self {
        let (record, result) = match value {
            WebhookGateResult::Applied { record, .. } => (record, "applied"),
            WebhookGateResult::AlreadyApplied(record) => (record, "ignored"),
            WebhookGateResult::Rejected(record) => (record, "rejected"),
        };
        let reason = match record.outcome {
            WebhookOutcome::Applied => None,
            _ => record.reason.clone(),
        };
        Self { event_id: record.event_id.clone(), result: result.to_string(), reason }
    }
}
