use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use salon_common::{Money, Points};
use sqlx::SqliteConnection;

use super::{points, refunds, reservations};
use crate::{
    db_types::{
        CancellingParty,
        NewPayment,
        NewRefund,
        Payment,
        PaymentLeg,
        PaymentStatus,
        PointTxType,
        ReservationPaymentStatus,
        ReservationStatus,
        SettlementJournalEntry,
    },
    refund_policy::PAID_AFTER_CANCELLATION_TIER,
    state_machine::SettlementSummary,
    traits::{PaymentOutcome, Settlement, SettlementPolicy, SettlementResult, StorageError},
};

/// Inserts a pending card payment. Returns `None` if the leg already has a live payment; the partial unique index
/// on `(reservation_id, is_deposit, payment_method)` makes this check atomic.
pub async fn insert_pending(payment: &NewPayment, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let inserted: Option<Payment> = sqlx::query_as(
        r#"
        INSERT INTO payments (reservation_id, amount, is_deposit, payment_status, payment_method, payment_key, order_id, checkout_url)
        VALUES ($1, $2, $3, 'pending', 'CARD', $4, $5, $6)
        ON CONFLICT DO NOTHING
        RETURNING *;
        "#,
    )
    .bind(payment.reservation_id)
    .bind(payment.amount.value())
    .bind(payment.leg.is_deposit())
    .bind(&payment.payment_key)
    .bind(&payment.order_id)
    .bind(&payment.checkout_url)
    .fetch_optional(conn)
    .await?;
    if let Some(p) = &inserted {
        debug!("🗃️ Pending {} payment {} of {} recorded for reservation #{}", p.leg(), p.order_id, p.amount, p.reservation_id);
    }
    Ok(inserted)
}

/// Records points redeemed at booking as an already completed payment against the final leg.
pub async fn insert_points_payment(
    reservation_id: i64,
    points: Points,
    conn: &mut SqliteConnection,
) -> Result<Payment, sqlx::Error> {
    let payment = sqlx::query_as(
        r#"
        INSERT INTO payments (reservation_id, amount, is_deposit, payment_status, payment_method, order_id, approved_at)
        VALUES ($1, $2, 0, 'completed', 'POINTS', $3, CURRENT_TIMESTAMP)
        RETURNING *;
        "#,
    )
    .bind(reservation_id)
    .bind(points.value())
    .bind(format!("rsv{reservation_id}-points"))
    .fetch_one(conn)
    .await?;
    Ok(payment)
}

pub async fn fetch_payment(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_by_order_id(order_id: &str, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE order_id = $1").bind(order_id).fetch_optional(conn).await
}

pub async fn fetch_by_key(payment_key: &str, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE payment_key = $1").bind(payment_key).fetch_optional(conn).await
}

pub async fn fetch_for_reservation(
    reservation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM payments WHERE reservation_id = $1 ORDER BY id")
        .bind(reservation_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_live_for_leg(
    reservation_id: i64,
    leg: PaymentLeg,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM payments WHERE reservation_id = $1 AND is_deposit = $2 AND payment_method = 'CARD' AND \
         payment_status IN ('pending', 'completed')",
    )
    .bind(reservation_id)
    .bind(leg.is_deposit())
    .fetch_optional(conn)
    .await
}

pub async fn fetch_stale_pending(cutoff: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM payments WHERE payment_status = 'pending' AND payment_method = 'CARD' AND datetime(created_at) \
         <= datetime($1) ORDER BY id",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await
}

pub async fn fetch_settlement_journal(
    reservation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<SettlementJournalEntry>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM settlement_journal WHERE reservation_id = $1 ORDER BY id")
        .bind(reservation_id)
        .fetch_all(conn)
        .await
}

/// Moves a payment out of `pending`. This is the only statement that changes a payment's status, and it only ever
/// succeeds once per payment. Returns `None` if the payment was not pending.
pub async fn mark_terminal(
    id: i64,
    outcome: &PaymentOutcome,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let (key, reason) = match outcome {
        PaymentOutcome::Completed { payment_key } => (payment_key.as_deref(), None),
        PaymentOutcome::Failed { reason } => (None, Some(reason.as_str())),
    };
    sqlx::query_as(
        r#"
        UPDATE payments SET
            payment_status = $1,
            payment_key = COALESCE(payment_key, $2),
            failure_reason = $3,
            approved_at = CASE WHEN $1 = 'completed' THEN CURRENT_TIMESTAMP ELSE approved_at END,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4 AND payment_status = 'pending'
        RETURNING *;
        "#,
    )
    .bind(outcome.status().to_string())
    .bind(key)
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// The settlement transition. See [`crate::traits::PaymentDatabase::settle_payment`].
///
/// Must run inside a transaction. The first statement is the conditional status change of the payment, so by the
/// time the reservation is read this connection already holds the write lock.
pub async fn settle(
    payment_id: i64,
    outcome: PaymentOutcome,
    policy: SettlementPolicy,
    conn: &mut SqliteConnection,
) -> Result<SettlementResult, StorageError> {
    let payment = match mark_terminal(payment_id, &outcome, conn).await? {
        Some(p) => p,
        None => {
            let current =
                fetch_payment(payment_id, conn).await?.ok_or(StorageError::PaymentNotFound(payment_id.to_string()))?;
            debug!("💳️ Payment {} is already {}. Nothing to settle", current.order_id, current.payment_status);
            return Ok(SettlementResult::AlreadySettled(current));
        },
    };
    let reservation = reservations::fetch_reservation(payment.reservation_id, conn)
        .await?
        .ok_or(StorageError::ReservationNotFound(payment.reservation_id))?;
    let previous_status = reservation.status;

    if payment.payment_status == PaymentStatus::Failed {
        info!("💳️ Payment {} for reservation #{} failed", payment.order_id, reservation.id);
        let settlement = Settlement { payment, previous_status, reservation, refund: None, points_earned: Points::zero() };
        return Ok(SettlementResult::Settled(Box::new(settlement)));
    }

    if previous_status.is_terminal() && previous_status != ReservationStatus::Completed {
        warn!(
            "💳️ Payment {} of {} completed after reservation #{} was closed ({previous_status}). Queuing a full refund.",
            payment.order_id, payment.amount, reservation.id
        );
        let cancelled_by = match previous_status {
            ReservationStatus::CancelledByUser => CancellingParty::Customer,
            _ => CancellingParty::Shop,
        };
        let refund = NewRefund {
            payment_id: payment.id,
            reservation_id: reservation.id,
            requested_amount: payment.amount,
            refunded_amount: payment.amount,
            reason: format!("Payment completed after the reservation was {previous_status}"),
            policy_tier: PAID_AFTER_CANCELLATION_TIER.to_string(),
            cancelled_by,
        };
        let refund = refunds::insert_refund(&refund, conn).await?;
        let reservation = reservations::record_settlement(
            reservation.id,
            reservation.payment_status,
            None,
            Points::zero(),
            conn,
        )
        .await?;
        let settlement = Settlement { payment, previous_status, reservation, refund: Some(refund), points_earned: Points::zero() };
        return Ok(SettlementResult::Settled(Box::new(settlement)));
    }

    let payments = fetch_for_reservation(reservation.id, conn).await?;
    let summary = SettlementSummary::new(&reservation, &payments);
    let payment_status = if summary.is_fully_settled() {
        ReservationPaymentStatus::FullyPaid
    } else if summary.deposit_paid.is_positive() {
        ReservationPaymentStatus::DepositPaid
    } else {
        reservation.payment_status
    };
    let new_status = match (payment.leg(), previous_status) {
        (PaymentLeg::Deposit, ReservationStatus::Requested) if policy.auto_confirm_on_deposit => {
            Some(ReservationStatus::Confirmed)
        },
        (PaymentLeg::Final, ReservationStatus::Confirmed) if summary.is_fully_settled() => {
            Some(ReservationStatus::Completed)
        },
        _ => None,
    };
    let points_earned = if new_status == Some(ReservationStatus::Completed) {
        earn_points_for_completion(reservation.id, &reservation.customer_id, reservation.total_amount, policy, conn)
            .await?
    } else {
        Points::zero()
    };
    let reservation =
        reservations::record_settlement(reservation.id, payment_status, new_status, points_earned, conn).await?;
    debug!(
        "💳️ {} payment {} of {} settled. Reservation #{} is {} / {}",
        payment.leg(),
        payment.order_id,
        payment.amount,
        reservation.id,
        reservation.status,
        reservation.payment_status
    );
    let settlement = Settlement { payment, previous_status, reservation, refund: None, points_earned };
    Ok(SettlementResult::Settled(Box::new(settlement)))
}

/// `⌊total × rate⌋` points, credited once per reservation. Returns the number of points actually credited.
pub async fn earn_points_for_completion(
    reservation_id: i64,
    customer_id: &str,
    total: Money,
    policy: SettlementPolicy,
    conn: &mut SqliteConnection,
) -> Result<Points, StorageError> {
    let earned = Points::from(total.apply_bps(policy.point_earn_rate_bps).value());
    if !earned.is_positive() {
        return Ok(Points::zero());
    }
    let memo = format!("Earned on completion of reservation #{reservation_id}");
    let credited =
        points::credit(customer_id, PointTxType::Earned, earned, Some(reservation_id), Some(&memo), conn).await?;
    match credited {
        Some(tx) => {
            trace!("🪙️ {} earned {} on reservation #{reservation_id}", customer_id, tx.amount);
            Ok(tx.amount)
        },
        None => Ok(Points::zero()),
    }
}
