use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use salon_common::{Money, Points};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------  ReservationStatus  ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// The customer has booked the slot. The shop has not confirmed it yet.
    Requested,
    /// The shop has accepted the booking (or the deposit was paid and auto-confirmation is on).
    Confirmed,
    /// The service was rendered and the bill is fully settled.
    Completed,
    /// Cancelled by the customer before the appointment started.
    CancelledByUser,
    /// Cancelled (or rejected) by the shop or an administrator.
    CancelledByShop,
    /// The customer did not turn up for a confirmed appointment.
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::CancelledByUser => "cancelled_by_user",
            Self::CancelledByShop => "cancelled_by_shop",
            Self::NoShow => "no_show",
        }
    }

    /// No further transitions are possible from a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Requested | Self::Confirmed)
    }

    /// Reservations in these states hold their time slot.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, Self::Requested | Self::Confirmed | Self::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledByUser | Self::CancelledByShop)
    }
}

impl Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled_by_user" => Ok(Self::CancelledByUser),
            "cancelled_by_shop" => Ok(Self::CancelledByShop),
            "no_show" => Ok(Self::NoShow),
            s => Err(ConversionError(format!("Invalid reservation status: {s}"))),
        }
    }
}

//-------------------------------------- ReservationPaymentStatus ----------------------------------------------------
/// The aggregate money position of a reservation, derived from its payments and refunds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationPaymentStatus {
    Unpaid,
    DepositPaid,
    FullyPaid,
    PartiallyRefunded,
    Refunded,
}

impl Display for ReservationPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unpaid => "unpaid",
            Self::DepositPaid => "deposit_paid",
            Self::FullyPaid => "fully_paid",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

//--------------------------------------    PaymentStatus     ---------------------------------------------------------
/// Status of a single settlement event. `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------    PaymentMethod     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    /// Settled through the external card-payment gateway.
    Card,
    /// Settled by redeeming loyalty points at booking time.
    Points,
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Card => write!(f, "CARD"),
            Self::Points => write!(f, "POINTS"),
        }
    }
}

//--------------------------------------      PaymentLeg      ---------------------------------------------------------
/// A reservation is settled in two legs: an up-front deposit and the final balance after the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentLeg {
    Deposit,
    Final,
}

impl PaymentLeg {
    pub fn is_deposit(&self) -> bool {
        matches!(self, Self::Deposit)
    }
}

impl Display for PaymentLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Final => write!(f, "final"),
        }
    }
}

impl FromStr for PaymentLeg {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "final" => Ok(Self::Final),
            s => Err(ConversionError(format!("Invalid payment leg: {s}"))),
        }
    }
}

//--------------------------------------     RefundStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

//--------------------------------------   CancellingParty    ---------------------------------------------------------
/// Which side of the booking initiated a cancellation. Administrators cancel on the shop's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CancellingParty {
    Customer,
    Shop,
}

impl CancellingParty {
    pub fn cancelled_status(&self) -> ReservationStatus {
        match self {
            Self::Customer => ReservationStatus::CancelledByUser,
            Self::Shop => ReservationStatus::CancelledByShop,
        }
    }
}

impl Display for CancellingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Shop => write!(f, "shop"),
        }
    }
}

//--------------------------------------     PointTxType      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PointTxType {
    /// Redeemed against a reservation. Always a negative amount.
    Used,
    /// Earned on completion of a reservation.
    Earned,
    /// Returned after the reservation that used them was cancelled or missed.
    Restored,
    /// Goodwill credit after a shop-side cancellation.
    Compensation,
    /// Manual credit by an administrator.
    Granted,
}

impl Display for PointTxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Used => "used",
            Self::Earned => "earned",
            Self::Restored => "restored",
            Self::Compensation => "compensation",
            Self::Granted => "granted",
        };
        f.write_str(s)
    }
}

//--------------------------------------    WebhookOutcome    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Received,
    Applied,
    Rejected,
}

//--------------------------------------     Reservation      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub customer_id: String,
    pub shop_id: String,
    pub reservation_date: NaiveDate,
    /// Minutes from local midnight. The window is `[start_minute, end_minute)`.
    pub start_minute: i64,
    pub end_minute: i64,
    pub starts_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub payment_status: ReservationPaymentStatus,
    pub total_amount: Money,
    pub deposit_amount: Money,
    pub remaining_amount: Money,
    pub points_used: Points,
    pub points_earned: Points,
    pub version: i64,
    pub memo: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// The amount the final card payment must cover: the remaining balance less any points redeemed at booking.
    pub fn final_card_amount(&self) -> Money {
        self.remaining_amount - self.points_used.as_money()
    }

    pub fn requires_deposit(&self) -> bool {
        self.deposit_amount.is_positive()
    }

    pub fn amount_for_leg(&self, leg: PaymentLeg) -> Money {
        match leg {
            PaymentLeg::Deposit => self.deposit_amount,
            PaymentLeg::Final => self.final_card_amount(),
        }
    }
}

//--------------------------------------  ReservationService  ---------------------------------------------------------
/// A line item on a reservation: a snapshot of the catalog at booking time.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ReservationService {
    pub id: i64,
    pub reservation_id: i64,
    pub position: i64,
    pub service_id: String,
    pub service_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub total_price: Money,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservationService {
    pub service_id: String,
    pub service_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub duration_minutes: i64,
}

impl NewReservationService {
    pub fn total_price(&self) -> Money {
        self.unit_price * self.quantity
    }

    pub fn total_duration(&self) -> i64 {
        self.duration_minutes * self.quantity
    }
}

//--------------------------------------    NewReservation    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub customer_id: String,
    pub shop_id: String,
    pub reservation_date: NaiveDate,
    pub start_minute: i64,
    pub end_minute: i64,
    pub starts_at: DateTime<Utc>,
    pub total_amount: Money,
    pub deposit_amount: Money,
    pub points_used: Points,
    pub memo: Option<String>,
    pub services: Vec<NewReservationService>,
}

impl NewReservation {
    pub fn remaining_amount(&self) -> Money {
        self.total_amount - self.deposit_amount
    }

    /// The payment status a reservation starts with. A booking with nothing left to pay by card is settled at birth.
    pub fn initial_payment_status(&self) -> ReservationPaymentStatus {
        let final_due = self.remaining_amount() - self.points_used.as_money();
        if self.deposit_amount.is_zero() && final_due.is_zero() {
            ReservationPaymentStatus::FullyPaid
        } else {
            ReservationPaymentStatus::Unpaid
        }
    }
}

//--------------------------------------       Payment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub reservation_id: i64,
    pub amount: Money,
    pub is_deposit: bool,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_key: Option<String>,
    pub order_id: String,
    pub checkout_url: Option<String>,
    pub failure_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn leg(&self) -> PaymentLeg {
        if self.is_deposit {
            PaymentLeg::Deposit
        } else {
            PaymentLeg::Final
        }
    }

    pub fn is_completed(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }

    pub fn is_pending(&self) -> bool {
        self.payment_status == PaymentStatus::Pending
    }

    pub fn is_card(&self) -> bool {
        self.payment_method == PaymentMethod::Card
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub reservation_id: i64,
    pub amount: Money,
    pub leg: PaymentLeg,
    pub payment_key: Option<String>,
    pub order_id: String,
    pub checkout_url: Option<String>,
}

impl NewPayment {
    pub fn new(reservation_id: i64, leg: PaymentLeg, amount: Money, order_id: String) -> Self {
        Self { reservation_id, amount, leg, payment_key: None, order_id, checkout_url: None }
    }

    pub fn with_payment_key<S: Into<String>>(mut self, key: S) -> Self {
        self.payment_key = Some(key.into());
        self
    }

    pub fn with_checkout_url(mut self, url: Option<String>) -> Self {
        self.checkout_url = url;
        self
    }
}

/// Generates a fresh gateway order id for a payment leg. Order ids are unique per attempt.
pub fn new_order_id(reservation_id: i64, leg: PaymentLeg) -> String {
    let nonce: u32 = rand::random();
    format!("rsv{reservation_id}-{leg}-{nonce:08x}")
}

//--------------------------------------        Refund        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub payment_id: i64,
    pub reservation_id: i64,
    /// The paid amount being reversed
    pub requested_amount: Money,
    /// What actually goes back to the customer, after the cancellation fee
    pub refunded_amount: Money,
    pub fee_amount: Money,
    pub reason: String,
    pub policy_tier: String,
    pub cancelled_by: CancellingParty,
    pub refund_status: RefundStatus,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefund {
    pub payment_id: i64,
    pub reservation_id: i64,
    pub requested_amount: Money,
    pub refunded_amount: Money,
    pub reason: String,
    pub policy_tier: String,
    pub cancelled_by: CancellingParty,
}

impl NewRefund {
    pub fn fee_amount(&self) -> Money {
        self.requested_amount - self.refunded_amount
    }
}

//--------------------------------------   PointTransaction   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PointTransaction {
    pub id: i64,
    pub user_id: String,
    pub tx_type: PointTxType,
    /// Signed. Negative for `Used` entries, positive otherwise.
    pub amount: Points,
    pub reservation_id: Option<i64>,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    WebhookRecord     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub event_id: String,
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub reported_status: String,
    pub amount: Option<Money>,
    pub outcome: WebhookOutcome,
    pub payment_id: Option<i64>,
    pub reason: Option<String>,
    pub deliveries: i64,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A payment status notification pushed by the gateway, after signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub status: String,
    pub amount: Option<Money>,
}

//--------------------------------------    StatusLogEntry    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub id: i64,
    pub reservation_id: i64,
    pub from_status: Option<ReservationStatus>,
    pub to_status: ReservationStatus,
    pub changed_at: DateTime<Utc>,
}

//-------------------------------------- SettlementJournalEntry -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SettlementJournalEntry {
    pub id: i64,
    pub entity: String,
    pub entity_id: i64,
    pub reservation_id: i64,
    pub status: String,
    pub amount: Money,
    pub recorded_at: DateTime<Utc>,
}

//--------------------------------------    DepositPolicy     ---------------------------------------------------------
/// How much of a service's price is collected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DepositPolicy {
    None,
    /// Whole-number percentage of the line total, rounded down.
    Percent(i64),
    /// Fixed amount per unit, never more than the line total.
    Fixed(Money),
    /// Deposit-only service: the full price is paid up front.
    Full,
}

impl DepositPolicy {
    pub fn from_columns(kind: &str, value: i64) -> Result<Self, ConversionError> {
        match kind {
            "none" => Ok(Self::None),
            "percent" if (0..=100).contains(&value) => Ok(Self::Percent(value)),
            "fixed" if value >= 0 => Ok(Self::Fixed(Money::from(value))),
            "full" => Ok(Self::Full),
            _ => Err(ConversionError(format!("Invalid deposit policy: {kind}({value})"))),
        }
    }

    pub fn deposit_for(&self, unit_price: Money, quantity: i64) -> Money {
        let line_total = unit_price * quantity;
        match self {
            Self::None => Money::zero(),
            Self::Percent(pct) => line_total.apply_bps(pct * 100),
            Self::Fixed(amount) => (*amount * quantity).min(line_total),
            Self::Full => line_total,
        }
    }
}

//--------------------------------------     ServiceQuote     ---------------------------------------------------------
/// Price, duration and deposit rule for a service, as published by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuote {
    pub service_id: String,
    pub shop_id: String,
    pub name: String,
    pub price: Money,
    pub duration_minutes: i64,
    pub deposit_policy: DepositPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open_minute: i64,
    pub close_minute: i64,
}
