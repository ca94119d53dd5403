use log::{debug, info, warn};
use sqlx::SqliteConnection;

use super::{payments, refunds};
use crate::{
    db_types::{Payment, PaymentStatus, RefundStatus, WebhookEvent, WebhookOutcome, WebhookRecord},
    gateway::GatewayPaymentStatus,
    traits::{PaymentOutcome, SettlementPolicy, SettlementResult, StorageError, WebhookGateResult},
};

/// Records a delivery of `event`. A first delivery inserts the event; a redelivery of an event that was not applied
/// resets it to `received` so that it is evaluated again.
///
/// Returns `None` if the event was already applied. In that case nothing is written.
pub async fn record_delivery(
    event: &WebhookEvent,
    conn: &mut SqliteConnection,
) -> Result<Option<WebhookRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO webhook_events (event_id, payment_key, order_id, reported_status, amount)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (event_id) DO UPDATE SET
            deliveries = deliveries + 1,
            payment_key = excluded.payment_key,
            order_id = excluded.order_id,
            reported_status = excluded.reported_status,
            amount = excluded.amount,
            outcome = 'received',
            reason = NULL,
            processed_at = NULL
        WHERE outcome <> 'applied'
        RETURNING *;
        "#,
    )
    .bind(&event.event_id)
    .bind(&event.payment_key)
    .bind(&event.order_id)
    .bind(&event.status)
    .bind(event.amount.map(|a| a.value()))
    .fetch_optional(conn)
    .await
}

pub async fn finalize(
    event_id: &str,
    outcome: WebhookOutcome,
    payment_id: Option<i64>,
    reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<WebhookRecord, StorageError> {
    let outcome = match outcome {
        WebhookOutcome::Received => "received",
        WebhookOutcome::Applied => "applied",
        WebhookOutcome::Rejected => "rejected",
    };
    let record: Option<WebhookRecord> = sqlx::query_as(
        r#"
        UPDATE webhook_events SET outcome = $1, payment_id = $2, reason = $3, processed_at = CURRENT_TIMESTAMP
        WHERE event_id = $4
        RETURNING *;
        "#,
    )
    .bind(outcome)
    .bind(payment_id)
    .bind(reason)
    .bind(event_id)
    .fetch_optional(conn)
    .await?;
    record.ok_or_else(|| StorageError::CorruptData(format!("Webhook event {event_id} vanished during processing")))
}

pub async fn fetch_webhook(event_id: &str, conn: &mut SqliteConnection) -> Result<Option<WebhookRecord>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM webhook_events WHERE event_id = $1").bind(event_id).fetch_optional(conn).await
}

/// Matches the event to a payment and applies it. Must be called inside a transaction.
///
/// The delivery is recorded first, so the transaction holds the write lock before anything is read.
pub async fn process_event(
    event: WebhookEvent,
    policy: SettlementPolicy,
    conn: &mut SqliteConnection,
) -> Result<WebhookGateResult, StorageError> {
    let Some(record) = record_delivery(&event, conn).await? else {
        let record = fetch_webhook(&event.event_id, conn)
            .await?
            .ok_or_else(|| StorageError::CorruptData(format!("Webhook event {} is missing", event.event_id)))?;
        debug!("🪝️ Webhook {} was already applied. Delivery #{} ignored", record.event_id, record.deliveries + 1);
        return Ok(WebhookGateResult::AlreadyApplied(record));
    };
    if record.deliveries > 1 {
        info!("🪝️ Webhook {} delivered again (#{}). Evaluating it afresh", record.event_id, record.deliveries);
    }

    let payment = match resolve_payment(&event, conn).await? {
        Ok(p) => p,
        Err(reason) => return reject(&event.event_id, None, &reason, conn).await,
    };
    let status = match event.status.parse::<GatewayPaymentStatus>() {
        Ok(s) => s,
        Err(_) => {
            let reason = format!("Unknown payment status {}", event.status);
            return reject(&event.event_id, Some(payment.id), &reason, conn).await;
        },
    };

    if status.is_refund_notice() {
        return apply_refund_notice(&event, &payment, conn).await;
    }

    let Some(target) = status.settlement_status() else {
        debug!("🪝️ Webhook {} reports {status} for {}. Nothing to settle", event.event_id, payment.order_id);
        let record = finalize(&event.event_id, WebhookOutcome::Applied, Some(payment.id), None, conn).await?;
        return Ok(WebhookGateResult::Applied { record, settlement: None, refund: None });
    };

    if payment.payment_status == target {
        debug!("🪝️ Payment {} is already {target}. Webhook {} has nothing to add", payment.order_id, event.event_id);
        let record = finalize(&event.event_id, WebhookOutcome::Applied, Some(payment.id), None, conn).await?;
        return Ok(WebhookGateResult::AlreadyApplied(record));
    }
    if payment.payment_status != PaymentStatus::Pending {
        let reason = format!("Payment is {} but the gateway reports {status}", payment.payment_status);
        return reject(&event.event_id, Some(payment.id), &reason, conn).await;
    }

    let outcome = match target {
        PaymentStatus::Completed => PaymentOutcome::Completed { payment_key: event.payment_key.clone() },
        _ => PaymentOutcome::Failed { reason: format!("Gateway reported {status}") },
    };
    let settlement = match payments::settle(payment.id, outcome, policy, conn).await? {
        SettlementResult::Settled(s) => Some(s),
        SettlementResult::AlreadySettled(_) => None,
    };
    let record = finalize(&event.event_id, WebhookOutcome::Applied, Some(payment.id), None, conn).await?;
    info!("🪝️ Webhook {} applied: payment {} is now {target}", record.event_id, payment.order_id);
    Ok(WebhookGateResult::Applied { record, settlement, refund: None })
}

/// Finds the payment an event refers to. The outer error is a storage failure; the inner one is a reason to reject
/// the event.
async fn resolve_payment(
    event: &WebhookEvent,
    conn: &mut SqliteConnection,
) -> Result<Result<Payment, String>, StorageError> {
    let by_order = match &event.order_id {
        Some(order_id) => payments::fetch_by_order_id(order_id, conn).await?,
        None => None,
    };
    let payment = match (by_order, &event.payment_key) {
        (Some(p), _) => p,
        (None, Some(key)) => match payments::fetch_by_key(key, conn).await? {
            Some(p) => p,
            None => return Ok(Err(format!("No payment matches key {key}"))),
        },
        (None, None) => return Ok(Err("No payment matches this event".to_string())),
    };
    if let (Some(reported), Some(recorded)) = (&event.payment_key, &payment.payment_key) {
        if reported != recorded {
            return Ok(Err(format!("Payment key {reported} does not match the key on record for {}", payment.order_id)));
        }
    }
    if let Some(amount) = event.amount {
        if amount != payment.amount {
            return Ok(Err(format!("Amount {amount} does not match the recorded amount {}", payment.amount)));
        }
    }
    Ok(Ok(payment))
}

async fn apply_refund_notice(
    event: &WebhookEvent,
    payment: &Payment,
    conn: &mut SqliteConnection,
) -> Result<WebhookGateResult, StorageError> {
    let Some(refund) = refunds::fetch_for_payment(payment.id, conn).await? else {
        let reason = format!("No refund was requested for payment {}", payment.order_id);
        return reject(&event.event_id, Some(payment.id), &reason, conn).await;
    };
    match refund.refund_status {
        RefundStatus::Completed => {
            let record = finalize(&event.event_id, WebhookOutcome::Applied, Some(payment.id), None, conn).await?;
            Ok(WebhookGateResult::AlreadyApplied(record))
        },
        RefundStatus::Failed => {
            let reason = format!("Refund #{} for payment {} is marked as failed", refund.id, payment.order_id);
            reject(&event.event_id, Some(payment.id), &reason, conn).await
        },
        RefundStatus::Pending => {
            let refund = refunds::mark_completed(refund.id, None, conn).await?.ok_or(StorageError::RefundNotFound(refund.id))?;
            refunds::recompute_payment_status(refund.reservation_id, conn).await?;
            let record = finalize(&event.event_id, WebhookOutcome::Applied, Some(payment.id), None, conn).await?;
            info!("🪝️ Webhook {} confirmed refund #{} of {}", record.event_id, refund.id, refund.refunded_amount);
            Ok(WebhookGateResult::Applied { record, settlement: None, refund: Some(refund) })
        },
    }
}

async fn reject(
    event_id: &str,
    payment_id: Option<i64>,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<WebhookGateResult, StorageError> {
    warn!("🪝️ Webhook {event_id} rejected. {reason}");
    let record = finalize(event_id, WebhookOutcome::Rejected, payment_id, Some(reason), conn).await?;
    Ok(WebhookGateResult::Rejected(record))
}
