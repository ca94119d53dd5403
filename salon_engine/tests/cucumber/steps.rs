use chrono::Duration;
use cucumber::{then, when};
use salon_common::{Money, Points};
use salon_engine::{
    db_types::{CancellingParty, PaymentLeg, WebhookEvent},
    slots::parse_minute,
    test_utils::{
        fixtures::{booking, open_day},
        mock_gateway::MockBehaviour,
    },
    traits::WebhookGateResult,
};

use crate::cucumber::SalonWorld;

fn minute(time: &str) -> i64 {
    parse_minute(time).unwrap_or_else(|| panic!("{time} is not a valid HH:MM time"))
}

async fn book(world: &mut SalonWorld, customer: String, service: String, days: i64, time: String, points: i64) {
    let mut request = booking(&customer, &[(service.as_str(), 1)], open_day(days), minute(&time));
    request.points_to_use = Points::from(points);
    let result = world.salon().reservations.create_reservation(request).await;
    if let Some(reservation) = world.record(result) {
        world.reservations.insert(customer, reservation);
    }
}

fn leg(name: &str) -> PaymentLeg {
    match name {
        "deposit" => PaymentLeg::Deposit,
        "final" => PaymentLeg::Final,
        _ => panic!("Unknown payment leg {name}"),
    }
}

//--------------------------------------       Booking        ---------------------------------------------------------

#[when(expr = "{word} books a {word} in {int} days at {word}")]
async fn books(world: &mut SalonWorld, customer: String, service: String, days: i64, time: String) {
    book(world, customer.clone(), service, days, time, 0).await;
    if let Some(e) = &world.last_error {
        panic!("{customer} could not book: {e}");
    }
}

#[when(expr = "{word} books a {word} in {int} days at {word} using {int} points")]
async fn books_with_points(world: &mut SalonWorld, customer: String, service: String, days: i64, time: String, points: i64) {
    book(world, customer.clone(), service, days, time, points).await;
    if let Some(e) = &world.last_error {
        panic!("{customer} could not book: {e}");
    }
}

#[when(expr = "{word} tries to book a {word} in {int} days at {word}")]
async fn tries_to_book(world: &mut SalonWorld, customer: String, service: String, days: i64, time: String) {
    book(world, customer, service, days, time, 0).await;
}

#[when(expr = "{word} tries to book a {word} in {int} days at {word} using {int} points")]
async fn tries_to_book_with_points(
    world: &mut SalonWorld,
    customer: String,
    service: String,
    days: i64,
    time: String,
    points: i64,
) {
    book(world, customer, service, days, time, points).await;
}

//--------------------------------------       Payments       ---------------------------------------------------------

#[when(expr = "{word} pays the {word} balance")]
async fn pays_leg(world: &mut SalonWorld, customer: String, leg_name: String) {
    let id = world.reservation(&customer).id;
    let result = world.salon().pay(id, leg(&leg_name)).await;
    world.record(result).unwrap_or_else(|| panic!("Payment failed"));
    world.refresh(&customer).await;
}

#[when(expr = "{word} tries to pay the {word} balance")]
async fn tries_to_pay_leg(world: &mut SalonWorld, customer: String, leg_name: String) {
    let id = world.reservation(&customer).id;
    let result = world.salon().pay(id, leg(&leg_name)).await;
    world.record(result);
    world.refresh(&customer).await;
}

#[when(expr = "the gateway declines confirmations with {word}")]
async fn gateway_declines(world: &mut SalonWorld, code: String) {
    world.salon().gateway.set_confirm_behaviour(MockBehaviour::decline(&code, "Declined by the issuer"));
}

#[when("the gateway recovers")]
async fn gateway_recovers(world: &mut SalonWorld) {
    let gateway = &world.salon().gateway;
    gateway.set_confirm_behaviour(MockBehaviour::Approve);
    gateway.set_refund_behaviour(MockBehaviour::Approve);
}

#[when("the gateway stops answering refund requests")]
async fn gateway_refunds_time_out(world: &mut SalonWorld) {
    world.salon().gateway.set_refund_behaviour(MockBehaviour::Timeout);
}

#[when(expr = "{word} opens a checkout for the {word} balance")]
async fn opens_checkout(world: &mut SalonWorld, customer: String, leg_name: String) {
    let id = world.reservation(&customer).id;
    world.salon().payments.initiate_payment(id, leg(&leg_name)).await.expect("Error opening checkout");
}

#[when("pending refunds are executed")]
async fn execute_refunds(world: &mut SalonWorld) {
    world.salon().payments.execute_refunds(None).await.expect("Error executing refunds");
}

//--------------------------------------     Cancellation     ---------------------------------------------------------

#[when(expr = "{word} cancels {int} hours before the appointment")]
async fn customer_cancels(world: &mut SalonWorld, customer: String, hours: i64) {
    let reservation = world.reservation(&customer).clone();
    let now = reservation.starts_at - Duration::hours(hours);
    let result = world
        .salon()
        .reservations
        .cancel_reservation_at(reservation.id, CancellingParty::Customer, None, now)
        .await;
    world.record(result);
    world.refresh(&customer).await;
}

#[when(expr = "the shop cancels the reservation for {word}")]
async fn shop_cancels(world: &mut SalonWorld, customer: String) {
    let id = world.reservation(&customer).id;
    let result =
        world.salon().reservations.cancel_reservation(id, CancellingParty::Shop, Some("Stylist unavailable".into())).await;
    world.record(result);
    world.refresh(&customer).await;
}

#[when(expr = "the salon marks {word} as a no-show")]
async fn no_show(world: &mut SalonWorld, customer: String) {
    let reservation = world.reservation(&customer).clone();
    let result = world.salon().reservations.mark_no_show_at(reservation.id, reservation.starts_at + Duration::minutes(20)).await;
    world.record(result);
    world.refresh(&customer).await;
}

//--------------------------------------       Webhooks       ---------------------------------------------------------

#[when(expr = "the gateway sends event {word} reporting {word} for the {word} payment of {word}")]
async fn gateway_sends(world: &mut SalonWorld, event_id: String, status: String, leg_name: String, customer: String) {
    let id = world.reservation(&customer).id;
    let details = world.salon().reservations.fetch_details(id).await.expect("Error fetching reservation");
    let leg = leg(&leg_name);
    let payment = details
        .payments
        .iter()
        .rev()
        .find(|p| p.leg() == leg && p.is_card())
        .unwrap_or_else(|| panic!("{customer} has no {leg} payment"));
    let event = WebhookEvent {
        event_id,
        payment_key: payment.payment_key.clone(),
        order_id: Some(payment.order_id.clone()),
        status,
        amount: Some(payment.amount),
    };
    let result = world.salon().webhooks.handle_event(event).await.expect("Error handling webhook");
    world.last_webhook = Some(result);
    world.refresh(&customer).await;
}

//--------------------------------------     Expectations     ---------------------------------------------------------

#[then(expr = "the reservation for {word} is {word}")]
async fn reservation_status(world: &mut SalonWorld, customer: String, status: String) {
    let reservation = world.refresh(&customer).await;
    assert_eq!(reservation.status.to_string(), status);
}

#[then(expr = "the reservation for {word} has payment status {word}")]
async fn reservation_payment_status(world: &mut SalonWorld, customer: String, status: String) {
    let reservation = world.refresh(&customer).await;
    assert_eq!(reservation.payment_status.to_string(), status);
}

#[then(expr = "the reservation for {word} requires a deposit of {int} won")]
async fn reservation_deposit(world: &mut SalonWorld, customer: String, amount: i64) {
    assert_eq!(world.reservation(&customer).deposit_amount, Money::from(amount));
}

#[then(expr = "the final card payment for {word} is {int} won")]
async fn final_card_amount(world: &mut SalonWorld, customer: String, amount: i64) {
    assert_eq!(world.reservation(&customer).final_card_amount(), Money::from(amount));
}

#[then(expr = "{word} has a point balance of {int}")]
async fn point_balance(world: &mut SalonWorld, customer: String, points: i64) {
    let balance = world.salon().points.balance(&customer).await.expect("Error fetching balance");
    assert_eq!(balance, Points::from(points));
}

#[then(expr = "the last request failed with {word}")]
async fn last_error(world: &mut SalonWorld, code: String) {
    let error = world.last_error.as_ref().expect("The last request succeeded");
    assert_eq!(error.code(), code, "{error}");
}

#[then("the last request succeeded")]
async fn last_success(world: &mut SalonWorld) {
    if let Some(e) = &world.last_error {
        panic!("The last request failed: {e}");
    }
}

#[then(expr = "{word} is due a refund of {int} won after a fee of {int} won")]
async fn refund_quote(world: &mut SalonWorld, customer: String, refund: i64, fee: i64) {
    let id = world.reservation(&customer).id;
    let details = world.salon().reservations.fetch_details(id).await.expect("Error fetching reservation");
    let refunded: Money = details.refunds.iter().map(|r| r.refunded_amount).sum();
    let fees: Money = details.refunds.iter().map(|r| r.fee_amount).sum();
    assert_eq!(refunded, Money::from(refund));
    assert_eq!(fees, Money::from(fee));
}

#[then(expr = "the refund for {word} is {word}")]
async fn refund_status(world: &mut SalonWorld, customer: String, status: String) {
    let id = world.reservation(&customer).id;
    let details = world.salon().reservations.fetch_details(id).await.expect("Error fetching reservation");
    let refund = details.refunds.first().unwrap_or_else(|| panic!("{customer} has no refund"));
    assert_eq!(refund.refund_status.to_string(), status);
}

#[then(expr = "{word} has no refunds")]
async fn no_refunds(world: &mut SalonWorld, customer: String) {
    let id = world.reservation(&customer).id;
    let details = world.salon().reservations.fetch_details(id).await.expect("Error fetching reservation");
    assert!(details.refunds.is_empty());
}

#[then(expr = "the webhook was {word}")]
async fn webhook_result(world: &mut SalonWorld, outcome: String) {
    let result = world.last_webhook.as_ref().expect("No webhook has been sent");
    let actual = match result {
        WebhookGateResult::Applied { .. } => "applied",
        WebhookGateResult::AlreadyApplied(_) => "ignored",
        WebhookGateResult::Rejected(_) => "rejected",
    };
    assert_eq!(actual, outcome, "{result:?}");
}

#[then(expr = "the gateway has returned {int} won to {word}")]
async fn gateway_refunded(world: &mut SalonWorld, amount: i64, customer: String) {
    let id = world.reservation(&customer).id;
    let details = world.salon().reservations.fetch_details(id).await.expect("Error fetching reservation");
    let total: Money = details
        .payments
        .iter()
        .filter_map(|p| p.payment_key.as_deref())
        .map(|key| world.salon().gateway.refunded_total(key))
        .sum();
    assert_eq!(total, Money::from(amount));
}
