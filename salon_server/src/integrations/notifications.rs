//! Engine event hooks for the server.
//!
//! Delivering messages to customers and shops is handled by another service, which tails the server log. The hooks
//! here write one structured line per event under the `salon::events` target. A hook failing never affects the state
//! change that triggered it, because events are only published after the change has been committed.
use futures::future::BoxFuture;
use log::*;
use salon_engine::events::{EventHandlers, EventHooks, PaymentSettledEvent, RefundIssuedEvent, ReservationChangedEvent};

pub const EVENT_BUFFER_SIZE: usize = 25;
const EVENT_TARGET: &str = "salon::events";

pub fn create_notification_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_reservation_changed(|ev| log_event(reservation_changed_line(&ev)));
    hooks.on_payment_settled(|ev| log_event(payment_settled_line(&ev)));
    hooks.on_refund_issued(|ev| log_event(refund_issued_line(&ev)));
    EventHandlers::new(EVENT_BUFFER_SIZE, hooks)
}

fn log_event(line: String) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        info!(target: EVENT_TARGET, "📬️ {line}");
    })
}

fn reservation_changed_line(ev: &ReservationChangedEvent) -> String {
    let r = &ev.reservation;
    format!(
        "reservation_changed id={} customer={} shop={} from={} to={} starts_at={}",
        r.id,
        r.customer_id,
        r.shop_id,
        ev.previous_status,
        r.status,
        r.starts_at.to_rfc3339()
    )
}

fn payment_settled_line(ev: &PaymentSettledEvent) -> String {
    let p = &ev.payment;
    format!(
        "payment_settled reservation={} customer={} order={} leg={} amount={} status={} points_earned={}",
        p.reservation_id,
        ev.reservation.customer_id,
        p.order_id,
        p.leg(),
        p.amount.value(),
        p.payment_status,
        ev.points_earned.value()
    )
}

fn refund_issued_line(ev: &RefundIssuedEvent) -> String {
    let r = &ev.refund;
    format!(
        "refund_issued reservation={} refund={} amount={} fee={} status={} cancelled_by={}",
        r.reservation_id,
        r.id,
        ev.amount().value(),
        r.fee_amount.value(),
        r.refund_status,
        r.cancelled_by
    )
}
