use log::debug;
use salon_common::Money;
use sqlx::SqliteConnection;

use super::reservations;
use crate::{
    db_types::{NewRefund, Refund, Reservation, ReservationPaymentStatus},
    traits::StorageError,
};

pub async fn insert_refund(refund: &NewRefund, conn: &mut SqliteConnection) -> Result<Refund, StorageError> {
    let refund: Refund = sqlx::query_as(
        r#"
        INSERT INTO refunds (
            payment_id, reservation_id, requested_amount, refunded_amount, fee_amount, reason, policy_tier, cancelled_by
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *;
        "#,
    )
    .bind(refund.payment_id)
    .bind(refund.reservation_id)
    .bind(refund.requested_amount.value())
    .bind(refund.refunded_amount.value())
    .bind(refund.fee_amount().value())
    .bind(&refund.reason)
    .bind(&refund.policy_tier)
    .bind(refund.cancelled_by.to_string())
    .fetch_one(conn)
    .await?;
    debug!(
        "🗃️ Refund #{} of {} (fee {}) queued for payment #{} [{}]",
        refund.id, refund.refunded_amount, refund.fee_amount, refund.payment_id, refund.policy_tier
    );
    Ok(refund)
}

pub async fn fetch_refund(id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refunds WHERE id = $1").bind(id).fetch_optional(conn).await
}

pub async fn fetch_for_reservation(reservation_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refunds WHERE reservation_id = $1 ORDER BY id")
        .bind(reservation_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_for_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM refunds WHERE payment_id = $1").bind(payment_id).fetch_optional(conn).await
}

/// Pending refunds, oldest first. Restricted to a single reservation if `reservation_id` is given.
pub async fn fetch_pending(reservation_id: Option<i64>, conn: &mut SqliteConnection) -> Result<Vec<Refund>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM refunds WHERE refund_status = 'pending' AND ($1 IS NULL OR reservation_id = $1) ORDER BY id",
    )
    .bind(reservation_id)
    .fetch_all(conn)
    .await
}

/// Marks a pending refund as completed. Returns `None` if the refund was not pending.
pub async fn mark_completed(
    id: i64,
    gateway_reference: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE refunds SET
            refund_status = 'completed',
            gateway_reference = COALESCE($1, gateway_reference),
            failure_reason = NULL,
            completed_at = CURRENT_TIMESTAMP,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND refund_status = 'pending'
        RETURNING *;
        "#,
    )
    .bind(gateway_reference)
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Marks a pending refund as failed. Returns `None` if the refund was not pending.
pub async fn mark_failed(id: i64, reason: &str, conn: &mut SqliteConnection) -> Result<Option<Refund>, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE refunds SET refund_status = 'failed', failure_reason = $1, updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND refund_status = 'pending'
        RETURNING *;
        "#,
    )
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Derives the reservation's payment status from its completed card payments and completed refunds.
/// A reservation is `refunded` once every won paid by card has gone back, and `partially_refunded` otherwise.
pub async fn recompute_payment_status(
    reservation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Reservation, StorageError> {
    let (paid, refunded): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COALESCE(SUM(amount), 0) FROM payments
             WHERE reservation_id = $1 AND payment_status = 'completed' AND payment_method = 'CARD'),
            (SELECT COALESCE(SUM(refunded_amount), 0) FROM refunds
             WHERE reservation_id = $1 AND refund_status = 'completed')
        "#,
    )
    .bind(reservation_id)
    .fetch_one(&mut *conn)
    .await?;
    let (paid, refunded) = (Money::from(paid), Money::from(refunded));
    let status = if refunded >= paid {
        ReservationPaymentStatus::Refunded
    } else {
        ReservationPaymentStatus::PartiallyRefunded
    };
    debug!("🗃️ Reservation #{reservation_id}: {refunded} of {paid} refunded. Payment status is now {status}");
    reservations::update_payment_status(reservation_id, status, conn).await
}
