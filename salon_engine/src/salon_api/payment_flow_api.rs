use std::{fmt::Debug, future::Future, time::Duration};

use chrono::{DateTime, Utc};
use log::*;
use salon_common::Points;

use crate::{
    db_types::{
        new_order_id,
        NewPayment,
        Payment,
        PaymentLeg,
        PaymentStatus,
        Refund,
        RefundStatus,
        ReservationStatus,
    },
    events::{EventProducers, PaymentSettledEvent, RefundIssuedEvent, ReservationChangedEvent},
    gateway::{CheckoutRequest, GatewayError, PaymentGateway, RefundInstruction},
    reservation_objects::{ConfirmPaymentRequest, PaymentConfirmation, PaymentInitiation, ReconciliationReport},
    salon_api::{errors::ReservationError, policy::BookingPolicy},
    traits::{
        InsertPaymentResult,
        PaymentDatabase,
        PaymentOutcome,
        ReservationDatabase,
        Settlement,
        SettlementResult,
    },
};

/// `PaymentFlowApi` moves money between customers and shops through the external payment gateway.
///
/// Gateway calls never happen inside a database transaction, and every one of them is bounded by the policy's
/// gateway timeout. When the outcome of a call is unknown the local record is left untouched (`pending`) and
/// [`Self::reconcile`] resolves it later.
pub struct PaymentFlowApi<B, G> {
    db: B,
    gateway: G,
    policy: BookingPolicy,
    producers: EventProducers,
}

impl<B, G> Debug for PaymentFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi")
    }
}

impl<B, G> PaymentFlowApi<B, G> {
    pub fn new(db: B, gateway: G, policy: BookingPolicy, producers: EventProducers) -> Self {
        Self { db, gateway, policy, producers }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}

impl<B, G> PaymentFlowApi<B, G>
where
    B: ReservationDatabase + PaymentDatabase,
    G: PaymentGateway,
{
    /// Opens a checkout for one leg of a reservation.
    ///
    /// The deposit can be paid while the reservation is `requested`, and the final balance (less any points
    /// redeemed) while it is `confirmed`. If the leg already has a pending payment, that payment is handed back and
    /// the gateway is not called, so retries are safe. If the gateway cannot open a checkout, nothing is recorded.
    pub async fn initiate_payment(&self, reservation_id: i64, leg: PaymentLeg) -> Result<PaymentInitiation, ReservationError> {
        let reservation = self
            .db
            .fetch_reservation(reservation_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("Reservation #{reservation_id}")))?;
        let payable_status = match leg {
            PaymentLeg::Deposit => ReservationStatus::Requested,
            PaymentLeg::Final => ReservationStatus::Confirmed,
        };
        if reservation.status != payable_status {
            return Err(ReservationError::Validation(format!(
                "The {leg} payment can only be made while the reservation is {payable_status}. It is {}",
                reservation.status
            )));
        }
        let amount = reservation.amount_for_leg(leg);
        if !amount.is_positive() {
            return Err(ReservationError::Validation(format!("Reservation #{reservation_id} has no {leg} to pay")));
        }
        if let Some(existing) = self.db.fetch_live_payment(reservation_id, leg).await? {
            if existing.is_pending() {
                debug!("💳️ Reusing pending {leg} payment {} for reservation #{reservation_id}", existing.order_id);
                return Ok(PaymentInitiation { payment: existing, reused: true });
            }
            return Err(ReservationError::Validation(format!(
                "The {leg} for reservation #{reservation_id} has already been paid"
            )));
        }

        let order_id = new_order_id(reservation_id, leg);
        let request = CheckoutRequest {
            order_id: order_id.clone(),
            order_name: format!("Reservation #{reservation_id} {leg}"),
            amount,
            customer_id: reservation.customer_id.clone(),
        };
        let session = match self.call_gateway(self.gateway.initiate(&request)).await {
            Ok(s) => s,
            Err(GatewayError::Declined { code, message }) => {
                return Err(ReservationError::GatewayDeclined { code, message })
            },
            Err(e) => {
                warn!("💳️ Could not open a checkout for {order_id}: {e}");
                return Err(ReservationError::GatewayUnavailable(e.to_string()));
            },
        };
        let new_payment = NewPayment::new(reservation_id, leg, amount, order_id)
            .with_payment_key(session.payment_key)
            .with_checkout_url(session.checkout_url);
        match self.db.insert_pending_payment(new_payment).await? {
            InsertPaymentResult::Inserted(payment) => {
                info!("💳️ {leg} payment {} of {} opened for reservation #{reservation_id}", payment.order_id, amount);
                Ok(PaymentInitiation { payment, reused: false })
            },
            InsertPaymentResult::LegOccupied(payment) => {
                warn!(
                    "💳️ A concurrent request opened {} for the {leg} of reservation #{reservation_id} first. Using it.",
                    payment.order_id
                );
                Ok(PaymentInitiation { payment, reused: true })
            },
        }
    }

    /// Confirms a payment the customer has authorised at the gateway.
    ///
    /// * Unknown order ids, or a payment key that does not match the one on record, are `NOT_FOUND`.
    /// * An amount that differs from the recorded amount is rejected and the payment stays pending.
    /// * A payment that has already settled is returned as-is.
    /// * A declined payment is marked as failed and the decline is returned as an error.
    /// * If the gateway does not answer, the payment stays pending and [`ReservationError::GatewayTimeout`] is
    ///   returned. Reconciliation or a webhook will settle it.
    pub async fn confirm_payment(&self, request: ConfirmPaymentRequest) -> Result<PaymentConfirmation, ReservationError> {
        let payment = self
            .db
            .fetch_payment_by_order_id(&request.order_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("Payment {}", request.order_id)))?;
        if payment.payment_key.as_deref().is_some_and(|k| k != request.payment_key) {
            return Err(ReservationError::NotFound(format!(
                "Payment {} with key {}",
                request.order_id, request.payment_key
            )));
        }
        if request.amount != payment.amount {
            warn!("💳️ Confirmation for {} claims {} but {} is due", payment.order_id, request.amount, payment.amount);
            return Err(ReservationError::AmountMismatch(format!(
                "{} was requested for {} but {} is due",
                request.amount, payment.order_id, payment.amount
            )));
        }
        if !payment.is_pending() {
            debug!("💳️ Payment {} is already {}", payment.order_id, payment.payment_status);
            return self.already_settled(payment).await;
        }

        let confirmed =
            self.call_gateway(self.gateway.confirm(&request.payment_key, &payment.order_id, payment.amount)).await;
        let outcome = match confirmed {
            Ok(gp) => match gp.status.settlement_status() {
                Some(PaymentStatus::Completed) if gp.total_amount == payment.amount => {
                    PaymentOutcome::Completed { payment_key: Some(gp.payment_key) }
                },
                Some(PaymentStatus::Completed) => {
                    error!(
                        "💳️ The gateway approved {} for {} but {} was due. Leaving it for reconciliation",
                        gp.total_amount, payment.order_id, payment.amount
                    );
                    return Err(ReservationError::AmountMismatch(format!(
                        "The gateway approved {} but {} is due",
                        gp.total_amount, payment.amount
                    )));
                },
                Some(_) => PaymentOutcome::Failed { reason: format!("Gateway reported {}", gp.status) },
                None => {
                    info!("💳️ Payment {} is still {} at the gateway", payment.order_id, gp.status);
                    return Err(ReservationError::GatewayTimeout);
                },
            },
            Err(GatewayError::Declined { code, message }) => {
                let reason = format!("{code}: {message}");
                let outcome = PaymentOutcome::Failed { reason };
                if let SettlementResult::Settled(s) =
                    self.db.settle_payment(payment.id, outcome, self.policy.settlement_policy()).await?
                {
                    publish_settlement(&self.producers, &s).await;
                }
                info!("💳️ Payment {} was declined. {code}: {message}", payment.order_id);
                return Err(ReservationError::GatewayDeclined { code, message });
            },
            Err(e) => {
                warn!("💳️ Confirmation of {} is indeterminate ({e}). It stays pending", payment.order_id);
                return Err(ReservationError::GatewayTimeout);
            },
        };
        match self.db.settle_payment(payment.id, outcome, self.policy.settlement_policy()).await? {
            SettlementResult::Settled(settlement) => {
                publish_settlement(&self.producers, &settlement).await;
                let Settlement { payment, reservation, refund, points_earned, .. } = *settlement;
                Ok(PaymentConfirmation { payment, reservation, already_settled: false, points_earned, refund })
            },
            SettlementResult::AlreadySettled(payment) => self.already_settled(payment).await,
        }
    }

    async fn already_settled(&self, payment: Payment) -> Result<PaymentConfirmation, ReservationError> {
        let reservation = self
            .db
            .fetch_reservation(payment.reservation_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("Reservation #{}", payment.reservation_id)))?;
        Ok(PaymentConfirmation {
            payment,
            reservation,
            already_settled: true,
            points_earned: Points::zero(),
            refund: None,
        })
    }

    /// Sends pending refunds to the gateway, optionally only those of one reservation.
    ///
    /// Refunds with nothing to return (the whole payment was kept as a fee) are completed without calling the
    /// gateway. Each gateway call carries the idempotency key `refund-{id}`, so a refund retried after a timeout is
    /// never paid out twice. Declined refunds are marked as failed; refunds whose outcome is unknown stay pending.
    pub async fn execute_refunds(&self, reservation_id: Option<i64>) -> Result<ReconciliationReport, ReservationError> {
        let pending = self.db.fetch_pending_refunds(reservation_id).await?;
        let mut report = ReconciliationReport::default();
        for refund in pending {
            match self.execute_refund(&refund).await {
                Ok(Some(updated)) => {
                    match updated.refund_status {
                        RefundStatus::Completed => report.refunds_completed += 1,
                        RefundStatus::Failed => report.refunds_failed += 1,
                        RefundStatus::Pending => {},
                    }
                    self.producers.publish_refund_issued(RefundIssuedEvent::new(updated)).await;
                },
                Ok(None) => {},
                Err(e) => {
                    warn!("↩️ Refund #{} could not be executed: {e}", refund.id);
                    report.errors.push(format!("Refund #{}: {e}", refund.id));
                },
            }
        }
        Ok(report)
    }

    /// Returns the refund in its new state, or `None` if it is still pending (or someone else already moved it).
    async fn execute_refund(&self, refund: &Refund) -> Result<Option<Refund>, ReservationError> {
        if refund.refunded_amount.is_zero() {
            debug!("↩️ Refund #{} has nothing to return. Closing it", refund.id);
            return Ok(self.db.complete_refund(refund.id, "fee_only").await?);
        }
        let payment = self
            .db
            .fetch_payments_for_reservation(refund.reservation_id)
            .await?
            .into_iter()
            .find(|p| p.id == refund.payment_id)
            .ok_or_else(|| ReservationError::NotFound(format!("Payment #{} for refund #{}", refund.payment_id, refund.id)))?;
        let Some(payment_key) = payment.payment_key else {
            let reason = format!("Payment {} has no gateway key", payment.order_id);
            return Ok(self.db.fail_refund(refund.id, &reason).await?);
        };
        let instruction = RefundInstruction {
            payment_key,
            amount: refund.refunded_amount,
            reason: refund.reason.clone(),
            idempotency_key: format!("refund-{}", refund.id),
        };
        match self.call_gateway(self.gateway.refund(&instruction)).await {
            Ok(done) => {
                info!("↩️ Refund #{} of {} paid out ({})", refund.id, done.refunded_amount, done.transaction_key);
                Ok(self.db.complete_refund(refund.id, &done.transaction_key).await?)
            },
            Err(GatewayError::Declined { code, message }) => {
                warn!("↩️ Refund #{} was declined. {code}: {message}", refund.id);
                Ok(self.db.fail_refund(refund.id, &format!("{code}: {message}")).await?)
            },
            Err(e) => {
                warn!("↩️ Refund #{} outcome unknown ({e}). It stays pending", refund.id);
                Ok(None)
            },
        }
    }

    pub async fn reconcile(&self, older_than: chrono::Duration) -> Result<ReconciliationReport, ReservationError> {
        self.reconcile_at(Utc::now(), older_than).await
    }

    /// Resolves payments that have been pending for longer than `older_than` by asking the gateway for their status,
    /// then retries pending refunds.
    pub async fn reconcile_at(
        &self,
        now: DateTime<Utc>,
        older_than: chrono::Duration,
    ) -> Result<ReconciliationReport, ReservationError> {
        let stale = self.db.fetch_stale_pending_payments(now - older_than).await?;
        let mut report = ReconciliationReport::default();
        for payment in stale {
            report.payments_checked += 1;
            let Some(key) = payment.payment_key.clone() else {
                report.errors.push(format!("Payment {} has no gateway key", payment.order_id));
                continue;
            };
            let status = match self.call_gateway(self.gateway.fetch_status(&key)).await {
                Ok(s) => s,
                Err(e) => {
                    report.errors.push(format!("Payment {}: {e}", payment.order_id));
                    continue;
                },
            };
            let outcome = match status.status.settlement_status() {
                Some(PaymentStatus::Completed) if status.total_amount != payment.amount => {
                    error!(
                        "🕰️ The gateway holds {} for {} but {} was due. Leaving it pending",
                        status.total_amount, payment.order_id, payment.amount
                    );
                    report.errors.push(format!("Payment {}: amount mismatch", payment.order_id));
                    continue;
                },
                Some(PaymentStatus::Completed) => PaymentOutcome::Completed { payment_key: Some(status.payment_key) },
                Some(_) => PaymentOutcome::Failed { reason: format!("Gateway reported {}", status.status) },
                None => {
                    trace!("🕰️ Payment {} is still {} at the gateway", payment.order_id, status.status);
                    continue;
                },
            };
            match self.db.settle_payment(payment.id, outcome, self.policy.settlement_policy()).await {
                Ok(SettlementResult::Settled(s)) => {
                    match s.payment.payment_status {
                        PaymentStatus::Completed => report.payments_completed += 1,
                        _ => report.payments_failed += 1,
                    }
                    publish_settlement(&self.producers, &s).await;
                },
                Ok(SettlementResult::AlreadySettled(_)) => {},
                Err(e) => report.errors.push(format!("Payment {}: {e}", payment.order_id)),
            }
        }
        let refunds = self.execute_refunds(None).await?;
        report.refunds_completed = refunds.refunds_completed;
        report.refunds_failed = refunds.refunds_failed;
        report.errors.extend(refunds.errors);
        info!("🕰️ Reconciliation finished. {report}");
        Ok(report)
    }

    async fn call_gateway<T, F>(&self, call: F) -> Result<T, GatewayError>
    where F: Future<Output = Result<T, GatewayError>> {
        with_timeout(self.policy.gateway_timeout, call).await
    }
}

async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, GatewayError>
where F: Future<Output = Result<T, GatewayError>> {
    tokio::time::timeout(timeout, call).await.unwrap_or(Err(GatewayError::Timeout))
}

/// Notifies subscribers of everything a settlement changed. Only call this after the settlement has been committed.
pub(crate) async fn publish_settlement(producers: &EventProducers, settlement: &Settlement) {
    let event =
        PaymentSettledEvent::new(settlement.payment.clone(), settlement.reservation.clone(), settlement.points_earned);
    producers.publish_payment_settled(event).await;
    if settlement.status_changed() {
        let event = ReservationChangedEvent::new(settlement.previous_status, settlement.reservation.clone());
        producers.publish_reservation_changed(event).await;
    }
    if let Some(refund) = &settlement.refund {
        producers.publish_refund_issued(RefundIssuedEvent::new(refund.clone())).await;
    }
}
