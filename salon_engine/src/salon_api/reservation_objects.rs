use std::fmt::Display;

use chrono::{DateTime, NaiveDate, Utc};
use salon_common::{Money, Points};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Payment, PointTransaction, Refund, Reservation, ReservationService, ReservationStatus},
    slots::{format_minute, TimeWindow},
    state_machine::SettlementSummary,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReservationQueryFilter {
    pub customer_id: Option<String>,
    pub shop_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<Vec<ReservationStatus>>,
}

impl ReservationQueryFilter {
    pub fn with_customer_id<S: Into<String>>(mut self, customer_id: S) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_shop_id<S: Into<String>>(mut self, shop_id: S) -> Self {
        self.shop_id = Some(shop_id.into());
        self
    }

    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_status(mut self, status: ReservationStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.customer_id.is_none() &&
            self.shop_id.is_none() &&
            self.date.is_none() &&
            self.since.is_none() &&
            self.until.is_none() &&
            self.status.as_ref().map(|s| s.is_empty()).unwrap_or(true)
    }
}

impl Display for ReservationQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No filters.");
        }
        if let Some(cid) = &self.customer_id {
            write!(f, "customer_id: {cid}. ")?;
        }
        if let Some(shop) = &self.shop_id {
            write!(f, "shop_id: {shop}. ")?;
        }
        if let Some(date) = &self.date {
            write!(f, "date: {date}. ")?;
        }
        if let Some(since) = &self.since {
            write!(f, "since: {since}. ")?;
        }
        if let Some(until) = &self.until {
            write!(f, "until: {until}. ")?;
        }
        if let Some(statuses) = &self.status {
            let s = statuses.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",");
            write!(f, "status in [{s}]. ")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelection {
    pub service_id: String,
    pub quantity: i64,
}

/// Everything the engine needs to book a reservation. Prices and durations come from the catalog, never from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer_id: String,
    pub shop_id: String,
    pub services: Vec<ServiceSelection>,
    pub date: NaiveDate,
    /// Minutes after local midnight
    pub start_minute: i64,
    pub points_to_use: Points,
    pub memo: Option<String>,
}

/// A reservation with its line items and money trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationDetails {
    pub reservation: Reservation,
    pub services: Vec<ReservationService>,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
    pub settlement: SettlementSummary,
}

impl ReservationDetails {
    pub fn new(
        reservation: Reservation,
        services: Vec<ReservationService>,
        payments: Vec<Payment>,
        refunds: Vec<Refund>,
    ) -> Self {
        let settlement = SettlementSummary::new(&reservation, &payments);
        Self { reservation, services, payments, refunds, settlement }
    }

    pub fn total_refunded(&self) -> Money {
        self.refunds.iter().map(|r| r.refunded_amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub shop_id: String,
    pub date: NaiveDate,
    pub duration_minutes: i64,
    /// `None` when the shop is closed on this date
    pub opening_hours: Option<TimeWindow>,
    pub busy: Vec<TimeWindow>,
    pub start_minutes: Vec<i64>,
}

impl AvailabilityReport {
    pub fn start_times(&self) -> Vec<String> {
        self.start_minutes.iter().map(|m| format_minute(*m)).collect()
    }
}

/// The result of initiating a payment leg. `reused` is true if an earlier pending attempt was handed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub payment: Payment,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_key: String,
    pub order_id: String,
    pub amount: Money,
}

/// The result of confirming a payment with the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub payment: Payment,
    pub reservation: Reservation,
    /// True if the payment had already been settled (by an earlier confirmation or a webhook) and nothing changed.
    pub already_settled: bool,
    pub points_earned: Points,
    /// A full refund queued because the reservation was closed before the money arrived.
    pub refund: Option<Refund>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSummary {
    pub user_id: String,
    pub balance: Points,
    pub history: Vec<PointTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub payments_checked: usize,
    pub payments_completed: usize,
    pub payments_failed: usize,
    pub refunds_completed: usize,
    pub refunds_failed: usize,
    pub errors: Vec<String>,
}

impl Display for ReconciliationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} payments checked ({} completed, {} failed); {} refunds completed, {} failed; {} errors",
            self.payments_checked,
            self.payments_completed,
            self.payments_failed,
            self.refunds_completed,
            self.refunds_failed,
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_filter() {
        let filter = ReservationQueryFilter::default();
        assert!(filter.is_empty());
        assert_eq!(filter.to_string(), "No filters.");
        let filter = filter.with_shop_id("shop-1").with_status(ReservationStatus::Confirmed);
        assert!(!filter.is_empty());
        assert_eq!(filter.to_string(), "shop_id: shop-1. status in [confirmed]. ");
    }
}
