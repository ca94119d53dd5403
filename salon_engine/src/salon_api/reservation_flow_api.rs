use std::fmt::Debug;

use chrono::{DateTime, Datelike, Utc};
use log::*;
use salon_common::{Money, Points};

use crate::{
    db_types::{
        CancellingParty,
        NewRefund,
        NewReservation,
        NewReservationService,
        Reservation,
        ReservationStatus,
        StatusLogEntry,
    },
    events::{EventProducers, RefundIssuedEvent, ReservationChangedEvent},
    reservation_objects::{BookingRequest, ReservationDetails, ReservationQueryFilter},
    salon_api::{
        errors::ReservationError,
        policy::{BookingPolicy, MAX_SERVICE_QUANTITY},
    },
    slots::{local_to_utc, TimeWindow, MINUTES_PER_DAY},
    state_machine::{check_transition, SettlementSummary, Transition},
    traits::{
        ClosureOutcome,
        ClosurePlan,
        CompletionPlan,
        InsertReservationResult,
        PaymentDatabase,
        PointLedgerDatabase,
        ReservationDatabase,
        ServiceCatalog,
        StatusChange,
        TransitionResult,
    },
};

/// `ReservationFlowApi` drives a reservation through its lifecycle: booking, confirmation, completion, cancellation
/// and no-shows.
///
/// Every transition is checked against the state machine on a fresh snapshot of the reservation and its payments,
/// then applied with a version check. If the reservation changed in between, the call fails with
/// [`ReservationError::StaleState`] and nothing is written.
///
/// Methods that depend on the clock have an `_at` variant that takes the current time explicitly.
pub struct ReservationFlowApi<B> {
    db: B,
    policy: BookingPolicy,
    producers: EventProducers,
}

impl<B> Debug for ReservationFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReservationFlowApi")
    }
}

impl<B> ReservationFlowApi<B> {
    pub fn new(db: B, policy: BookingPolicy, producers: EventProducers) -> Self {
        Self { db, policy, producers }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> ReservationFlowApi<B>
where B: ReservationDatabase + PaymentDatabase + PointLedgerDatabase + ServiceCatalog
{
    pub async fn create_reservation(&self, request: BookingRequest) -> Result<Reservation, ReservationError> {
        self.create_reservation_at(request, Utc::now()).await
    }

    /// Books a reservation in `requested` status.
    ///
    /// Prices, durations and deposits are taken from the catalog. The booked window spans the combined duration of
    /// every line item, must fall inside the shop's opening hours and must start in the future. Points are debited
    /// in the same transaction as the insert; if the slot is taken, nothing is debited.
    pub async fn create_reservation_at(
        &self,
        request: BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ReservationError> {
        let new_reservation = self.price_booking(&request, now).await?;
        trace!(
            "📅️ Booking {} for {} at {}: total {}, deposit {}, points {}",
            TimeWindow::new(new_reservation.start_minute, new_reservation.end_minute),
            request.customer_id,
            request.shop_id,
            new_reservation.total_amount,
            new_reservation.deposit_amount,
            new_reservation.points_used
        );
        match self.db.insert_reservation(new_reservation).await? {
            InsertReservationResult::Inserted(reservation) => {
                info!(
                    "📅️ Reservation #{} booked for {} at {} on {} {}",
                    reservation.id,
                    reservation.customer_id,
                    reservation.shop_id,
                    reservation.reservation_date,
                    TimeWindow::new(reservation.start_minute, reservation.end_minute)
                );
                Ok(reservation)
            },
            InsertReservationResult::SlotUnavailable => {
                debug!("📅️ {} lost the slot at {} on {}", request.customer_id, request.shop_id, request.date);
                Err(ReservationError::SlotUnavailable)
            },
            InsertReservationResult::InsufficientPoints(balance) => Err(ReservationError::InsufficientBalance(balance)),
        }
    }

    /// Validates a booking request against the catalog and the clock and turns it into a priced reservation.
    async fn price_booking(
        &self,
        request: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<NewReservation, ReservationError> {
        if request.services.is_empty() {
            return Err(ReservationError::Validation("At least one service must be selected".into()));
        }
        if !(0..MINUTES_PER_DAY).contains(&request.start_minute) {
            return Err(ReservationError::Validation(format!("{} is not a valid start minute", request.start_minute)));
        }
        if request.points_to_use.value() < 0 {
            return Err(ReservationError::Validation("Points to use cannot be negative".into()));
        }
        let overflow = || ReservationError::Validation("The booking is too large to price".into());
        let mut services = Vec::with_capacity(request.services.len());
        let mut deposit = Money::zero();
        for selection in &request.services {
            if !(1..=MAX_SERVICE_QUANTITY).contains(&selection.quantity) {
                return Err(ReservationError::Validation(format!(
                    "Quantity for {} must be between 1 and {MAX_SERVICE_QUANTITY}",
                    selection.service_id
                )));
            }
            let quote =
                self.db.fetch_service_quote(&request.shop_id, &selection.service_id).await?.ok_or_else(|| {
                    ReservationError::Validation(format!(
                        "Service {} is not offered by shop {}",
                        selection.service_id, request.shop_id
                    ))
                })?;
            deposit = deposit
                .checked_add(quote.deposit_policy.deposit_for(quote.price, selection.quantity))
                .ok_or_else(overflow)?;
            services.push(NewReservationService {
                service_id: quote.service_id,
                service_name: quote.name,
                quantity: selection.quantity,
                unit_price: quote.price,
                duration_minutes: quote.duration_minutes,
            });
        }
        let total = services.iter().try_fold(Money::zero(), |acc, s| {
            s.unit_price.checked_mul(s.quantity).and_then(|line| acc.checked_add(line))
        });
        let total = total.ok_or_else(overflow)?;
        let duration = services
            .iter()
            .try_fold(0i64, |acc, s| s.duration_minutes.checked_mul(s.quantity).and_then(|d| acc.checked_add(d)))
            .ok_or_else(overflow)?;
        let window = TimeWindow::starting_at(request.start_minute, duration);
        if !window.is_valid() {
            return Err(ReservationError::Validation(format!("{window} does not fit in a single day")));
        }
        let hours = self
            .db
            .fetch_operating_hours(&request.shop_id, request.date.weekday())
            .await?
            .map(TimeWindow::from)
            .ok_or_else(|| ReservationError::Validation(format!("The shop is closed on {}", request.date)))?;
        if !hours.contains(&window) {
            return Err(ReservationError::Validation(format!("{window} is outside opening hours ({hours})")));
        }
        let starts_at = local_to_utc(request.date, window.start, &self.policy.utc_offset)
            .ok_or_else(|| ReservationError::Validation(format!("{} {window} is not a valid time", request.date)))?;
        if starts_at <= now {
            return Err(ReservationError::Validation("Reservations must start in the future".into()));
        }
        let deposit = deposit.min(total);
        let remaining = total - deposit;
        if request.points_to_use.as_money() > remaining {
            return Err(ReservationError::Validation(format!(
                "At most {remaining} can be paid with points on this reservation"
            )));
        }
        Ok(NewReservation {
            customer_id: request.customer_id.clone(),
            shop_id: request.shop_id.clone(),
            reservation_date: request.date,
            start_minute: window.start,
            end_minute: window.end,
            starts_at,
            total_amount: total,
            deposit_amount: deposit,
            points_used: request.points_to_use,
            memo: request.memo.clone(),
            services,
        })
    }

    pub async fn confirm_reservation(&self, id: i64) -> Result<Reservation, ReservationError> {
        self.confirm_reservation_at(id, Utc::now()).await
    }

    /// `requested → confirmed`. Requires the deposit (if any) to have been paid.
    pub async fn confirm_reservation_at(&self, id: i64, now: DateTime<Utc>) -> Result<Reservation, ReservationError> {
        let (reservation, settlement) = self.snapshot(id).await?;
        let to = check_transition(&reservation, Transition::Confirm, &settlement, now)?;
        let previous = reservation.status;
        let updated = match self.db.apply_status_change(StatusChange::new(&reservation, to)).await? {
            TransitionResult::Applied(r) => r,
            TransitionResult::Stale => return Err(ReservationError::StaleState(id)),
        };
        info!("📅️ Reservation #{id} confirmed");
        self.publish_change(previous, &updated).await;
        Ok(updated)
    }

    pub async fn complete_reservation(&self, id: i64) -> Result<Reservation, ReservationError> {
        self.complete_reservation_at(id, Utc::now()).await
    }

    /// `confirmed → completed`. Requires the full bill to be settled, and credits the customer's earned points.
    ///
    /// Reservations settled by a final card payment complete automatically when the payment settles, so this is
    /// mostly used for deposit-only and points-only bookings.
    pub async fn complete_reservation_at(&self, id: i64, now: DateTime<Utc>) -> Result<Reservation, ReservationError> {
        let (reservation, settlement) = self.snapshot(id).await?;
        let to = check_transition(&reservation, Transition::Complete, &settlement, now)?;
        let previous = reservation.status;
        let points_earned = Points::from(reservation.total_amount.apply_bps(self.policy.point_earn_rate_bps).value());
        let plan = CompletionPlan { change: StatusChange::new(&reservation, to), points_earned };
        let updated = match self.db.complete_reservation(plan).await? {
            TransitionResult::Applied(r) => r,
            TransitionResult::Stale => return Err(ReservationError::StaleState(id)),
        };
        info!("📅️ Reservation #{id} completed. {} earned {}", updated.customer_id, updated.points_earned);
        self.publish_change(previous, &updated).await;
        Ok(updated)
    }

    pub async fn mark_no_show(&self, id: i64) -> Result<ClosureOutcome, ReservationError> {
        self.mark_no_show_at(id, Utc::now()).await
    }

    /// `confirmed → no_show`, once the appointment has started. Payments are kept; points used at booking are
    /// returned.
    pub async fn mark_no_show_at(&self, id: i64, now: DateTime<Utc>) -> Result<ClosureOutcome, ReservationError> {
        let (reservation, settlement) = self.snapshot(id).await?;
        let to = check_transition(&reservation, Transition::MarkNoShow, &settlement, now)?;
        let plan = ClosurePlan {
            change: StatusChange::new(&reservation, to),
            cancelled_by: None,
            reason: Some("The customer did not show up".into()),
            refunds: Vec::new(),
            restore_points: reservation.points_used,
            compensation_points: Points::zero(),
        };
        let outcome = self.close(id, plan).await?;
        info!("📅️ Reservation #{id} marked as a no-show. {} points returned", outcome.points_restored);
        Ok(outcome)
    }

    pub async fn cancel_reservation(
        &self,
        id: i64,
        party: CancellingParty,
        reason: Option<String>,
    ) -> Result<ClosureOutcome, ReservationError> {
        self.cancel_reservation_at(id, party, reason, Utc::now()).await
    }

    /// Cancels a reservation on behalf of `party`.
    ///
    /// Each completed card payment gets a pending refund quoted by the refund policy for the time left until the
    /// appointment. Points used at booking are returned, and a shop-side cancellation also credits the configured
    /// compensation points. The refunds are only queued here; [`crate::PaymentFlowApi::execute_refunds`] sends them
    /// to the gateway.
    pub async fn cancel_reservation_at(
        &self,
        id: i64,
        party: CancellingParty,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ClosureOutcome, ReservationError> {
        let (reservation, settlement) = self.snapshot(id).await?;
        let transition = match party {
            CancellingParty::Customer => Transition::CancelByCustomer,
            CancellingParty::Shop => Transition::CancelByShop,
        };
        let to = check_transition(&reservation, transition, &settlement, now)?;
        let lead_time = reservation.starts_at - now;
        let refund_reason = reason.clone().unwrap_or_else(|| format!("Cancelled by {party}"));
        let refunds = self
            .db
            .fetch_payments_for_reservation(id)
            .await?
            .into_iter()
            .filter(|p| p.is_completed() && p.is_card())
            .map(|p| {
                let quote = self.policy.refund_policy.quote(party, lead_time, p.amount);
                debug!("↩️ Payment {} of {}: refund {} ({})", p.order_id, p.amount, quote.refund_amount, quote.tier);
                NewRefund {
                    payment_id: p.id,
                    reservation_id: id,
                    requested_amount: p.amount,
                    refunded_amount: quote.refund_amount,
                    reason: refund_reason.clone(),
                    policy_tier: quote.tier,
                    cancelled_by: party,
                }
            })
            .collect::<Vec<_>>();
        let compensation_points = match party {
            CancellingParty::Shop => self.policy.refund_policy.shop_compensation_points(),
            CancellingParty::Customer => Points::zero(),
        };
        let plan = ClosurePlan {
            change: StatusChange::new(&reservation, to),
            cancelled_by: Some(party),
            reason,
            refunds,
            restore_points: reservation.points_used,
            compensation_points,
        };
        let outcome = self.close(id, plan).await?;
        let refunded: Money = outcome.refunds.iter().map(|r| r.refunded_amount).sum();
        info!(
            "📅️ Reservation #{id} cancelled by {party}. {} refunds worth {refunded} queued, {} points returned, {} \
             compensation",
            outcome.refunds.len(),
            outcome.points_restored,
            outcome.points_compensated
        );
        Ok(outcome)
    }

    async fn close(&self, id: i64, plan: ClosurePlan) -> Result<ClosureOutcome, ReservationError> {
        let outcome = match self.db.close_reservation(plan).await? {
            TransitionResult::Applied(o) => o,
            TransitionResult::Stale => return Err(ReservationError::StaleState(id)),
        };
        self.publish_change(outcome.previous_status, &outcome.reservation).await;
        for refund in &outcome.refunds {
            self.producers.publish_refund_issued(RefundIssuedEvent::new(refund.clone())).await;
        }
        Ok(outcome)
    }

    pub async fn fetch_reservation(&self, id: i64) -> Result<Reservation, ReservationError> {
        self.db.fetch_reservation(id).await?.ok_or_else(|| ReservationError::NotFound(format!("Reservation #{id}")))
    }

    /// The reservation with its line items, payments and refunds.
    pub async fn fetch_details(&self, id: i64) -> Result<ReservationDetails, ReservationError> {
        let reservation = self.fetch_reservation(id).await?;
        let services = self.db.fetch_reservation_services(id).await?;
        let payments = self.db.fetch_payments_for_reservation(id).await?;
        let refunds = self.db.fetch_refunds_for_reservation(id).await?;
        Ok(ReservationDetails::new(reservation, services, payments, refunds))
    }

    pub async fn search_reservations(&self, filter: ReservationQueryFilter) -> Result<Vec<Reservation>, ReservationError> {
        trace!("📅️ Searching reservations. {filter}");
        let result = self.db.search_reservations(filter).await?;
        Ok(result)
    }

    pub async fn status_log(&self, id: i64) -> Result<Vec<StatusLogEntry>, ReservationError> {
        let log = self.db.fetch_status_log(id).await?;
        Ok(log)
    }

    async fn snapshot(&self, id: i64) -> Result<(Reservation, SettlementSummary), ReservationError> {
        let reservation = self.fetch_reservation(id).await?;
        let payments = self.db.fetch_payments_for_reservation(id).await?;
        let settlement = SettlementSummary::new(&reservation, &payments);
        Ok((reservation, settlement))
    }

    async fn publish_change(&self, previous: ReservationStatus, reservation: &Reservation) {
        if previous != reservation.status {
            let event = ReservationChangedEvent::new(previous, reservation.clone());
            self.producers.publish_reservation_changed(event).await;
        }
    }
}
