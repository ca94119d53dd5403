use actix_web::{http::StatusCode, test::TestRequest};
use salon_engine::{
    db_types::{PaymentLeg, ReservationPaymentStatus, ReservationStatus, WebhookOutcome},
    test_utils::fixtures::{booking, open_day, TestSalon, HAIRCUT},
};
use serde_json::{json, Value};

use super::helpers::{send, signed_webhook};

/// Books a haircut and opens its deposit checkout. Returns the reservation id and the checkout's order id and key.
async fn pending_deposit(salon: &TestSalon) -> (i64, String, String) {
    let reservation =
        salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 11 * 60)).await.unwrap();
    let payment = salon.payments.initiate_payment(reservation.id, PaymentLeg::Deposit).await.unwrap().payment;
    let key = payment.payment_key.clone().unwrap();
    (reservation.id, payment.order_id, key)
}

fn done_event(event_id: &str, order_id: &str, key: &str, amount: i64) -> Value {
    json!({
        "eventId": event_id,
        "paymentKey": key,
        "orderId": order_id,
        "status": "DONE",
        "amount": amount,
    })
}

#[actix_web::test]
async fn deposit_is_settled_once() {
    let salon = TestSalon::new().await;
    let (id, order_id, key) = pending_deposit(&salon).await;
    let event = done_event("evt-100", &order_id, &key, 6_000);

    let (status, body) = send(&salon, signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["eventId"], "evt-100");
    assert_eq!(body["result"], "applied");
    assert!(body["reason"].is_null());
    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Confirmed);
    assert_eq!(reservation.payment_status, ReservationPaymentStatus::DepositPaid);

    let (status, body) = send(&salon, signed_webhook(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ignored");

    // A different event reporting the same outcome changes nothing either
    let (status, body) = send(&salon, signed_webhook(&done_event("evt-101", &order_id, &key, 6_000))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ignored");
    let record = salon.webhooks.fetch_event("evt-100").await.unwrap().unwrap();
    assert_eq!(record.outcome, WebhookOutcome::Applied);
    assert_eq!(record.deliveries, 1);
    salon.close().await;
}

#[actix_web::test]
async fn unmatched_events_are_rejected() {
    let salon = TestSalon::new().await;
    let (id, order_id, key) = pending_deposit(&salon).await;

    let unknown = json!({"eventId": "evt-200", "paymentKey": "pk_nope", "status": "DONE", "amount": 6_000});
    let (status, body) = send(&salon, signed_webhook(&unknown)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["result"], "rejected");
    assert!(body["reason"].as_str().unwrap().contains("pk_nope"));

    let (_, body) = send(&salon, signed_webhook(&done_event("evt-201", &order_id, &key, 7_000))).await;
    assert_eq!(body["result"], "rejected");
    assert!(body["reason"].is_string());

    let (_, body) = send(&salon, signed_webhook(&done_event("evt-202", &order_id, "pk_other", 6_000))).await;
    assert_eq!(body["result"], "rejected");

    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Requested);
    assert_eq!(reservation.payment_status, ReservationPaymentStatus::Unpaid);
    salon.close().await;
}

#[actix_web::test]
async fn webhooks_must_be_signed() {
    let salon = TestSalon::new().await;
    let (id, order_id, key) = pending_deposit(&salon).await;
    let event = done_event("evt-300", &order_id, &key, 6_000);

    let unsigned = TestRequest::post().uri("/webhooks/payment").set_json(&event);
    let (status, _) = send(&salon, unsigned).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let forged = TestRequest::post()
        .uri("/webhooks/payment")
        .insert_header(("X-Gateway-Signature", "not-a-signature"))
        .set_json(&event);
    let (status, _) = send(&salon, forged).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Requested);
    assert!(salon.webhooks.fetch_event("evt-300").await.unwrap().is_none());
    salon.close().await;
}
