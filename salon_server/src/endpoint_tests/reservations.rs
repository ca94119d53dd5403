use actix_web::{http::StatusCode, test::TestRequest};
use salon_engine::{
    gateway::GatewayError,
    test_utils::{
        fixtures::{booking, closed_day, open_day, TestSalon, HAIRCUT, MANICURE, SHOP_ID},
        mock_gateway::MockBehaviour,
    },
};
use serde_json::{json, Value};

use super::{
    helpers::{as_user, send, send_with_gateway},
    mocks::MockCardGateway,
};
use crate::auth::{Identity, ROLE_HEADER, SIGNATURE_HEADER, USER_HEADER};

const TWO_PM: i64 = 14 * 60;

fn alice() -> Identity {
    Identity::customer("alice")
}

fn owner() -> Identity {
    Identity::shop_owner("owner-1", SHOP_ID)
}

fn new_booking(service: &str, days_ahead: i64, time: &str) -> Value {
    json!({
        "shopId": SHOP_ID,
        "services": [{"serviceId": service}],
        "date": open_day(days_ahead),
        "time": time,
        "memo": "Window seat please"
    })
}

fn post_booking(identity: &Identity, body: Value) -> TestRequest {
    as_user(TestRequest::post().uri("/api/reservations"), identity).set_json(body)
}

#[actix_web::test]
async fn book_haircut_with_deposit_checkout() {
    let salon = TestSalon::new().await;
    let (status, body) = send(&salon, post_booking(&alice(), new_booking(HAIRCUT, 3, "14:00"))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "requested");
    assert_eq!(body["totalAmount"], 30_000);
    assert_eq!(body["depositAmount"], 6_000);
    assert_eq!(body["finalCardAmount"], 24_000);
    let deposit = &body["deposit"];
    assert_eq!(deposit["amount"], 6_000);
    assert_eq!(deposit["reused"], false);
    assert!(deposit["checkoutUrl"].as_str().unwrap().starts_with("https://pay.example.test/checkout/"));
    assert_eq!(salon.gateway.initiate_calls(), 1);
    salon.close().await;
}

#[actix_web::test]
async fn booking_without_deposit_has_no_checkout() {
    let salon = TestSalon::new().await;
    let (status, body) = send(&salon, post_booking(&alice(), new_booking(MANICURE, 3, "11:30"))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["depositAmount"], 0);
    assert!(body["deposit"].is_null());
    assert_eq!(salon.gateway.initiate_calls(), 0);
    salon.close().await;
}

#[actix_web::test]
async fn booking_stands_when_deposit_checkout_fails() {
    let salon = TestSalon::new().await;
    let mut gateway = MockCardGateway::new();
    gateway.expect_initiate().times(1).returning(|_| Err(GatewayError::Unreachable("connection refused".into())));
    let req = post_booking(&alice(), new_booking(HAIRCUT, 3, "14:00"));
    let (status, body) = send_with_gateway(&salon.db, gateway, salon.policy.clone(), req).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["deposit"].is_null());
    let id = body["reservationId"].as_i64().unwrap();
    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.customer_id, "alice");
    salon.close().await;
}

#[actix_web::test]
async fn double_booking_is_a_conflict() {
    let salon = TestSalon::new().await;
    let (status, _) = send(&salon, post_booking(&alice(), new_booking(HAIRCUT, 3, "14:00"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let bob = Identity::customer("bob");
    let (status, body) = send(&salon, post_booking(&bob, new_booking(MANICURE, 3, "14:30"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SLOT_UNAVAILABLE");
    salon.close().await;
}

#[actix_web::test]
async fn invalid_bookings() {
    let salon = TestSalon::new().await;
    let (status, body) = send(&salon, post_booking(&alice(), new_booking(HAIRCUT, 3, "2pm"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let (status, body) = send(&salon, post_booking(&alice(), json!({"shopId": SHOP_ID}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let mut closed = new_booking(HAIRCUT, 3, "14:00");
    closed["date"] = json!(closed_day());
    let (status, body) = send(&salon, post_booking(&alice(), closed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    salon.close().await;
}

#[actix_web::test]
async fn only_customers_book() {
    let salon = TestSalon::new().await;
    let (status, body) = send(&salon, post_booking(&owner(), new_booking(HAIRCUT, 3, "14:00"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    salon.close().await;
}

#[actix_web::test]
async fn identity_is_required() {
    let salon = TestSalon::new().await;
    let req = TestRequest::get().uri("/api/reservations");
    let (status, body) = send(&salon, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let forged = TestRequest::get()
        .uri("/api/reservations")
        .insert_header((USER_HEADER, "alice"))
        .insert_header((ROLE_HEADER, "admin"))
        .insert_header((SIGNATURE_HEADER, alice().sign(super::helpers::IDENTITY_SECRET)));
    let (status, _) = send(&salon, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    salon.close().await;
}

#[actix_web::test]
async fn availability_excludes_booked_windows() {
    let salon = TestSalon::new().await;
    let date = open_day(3);
    salon.reservations.create_reservation(booking("bob", &[(HAIRCUT, 1)], date, TWO_PM)).await.unwrap();
    let uri = format!("/api/shops/{SHOP_ID}/availability?date={date}&duration=60");
    let (status, body) = send(&salon, as_user(TestRequest::get().uri(&uri), &alice())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["open"], true);
    let starts = body["startTimes"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect::<Vec<_>>();
    assert_eq!(starts.first(), Some(&"10:00"));
    assert_eq!(starts.last(), Some(&"19:00"));
    assert!(starts.contains(&"13:00"));
    assert!(!starts.contains(&"13:30"));
    assert!(!starts.contains(&"14:00"));
    assert!(!starts.contains(&"14:30"));
    assert!(starts.contains(&"15:00"));

    let uri = format!("/api/shops/{SHOP_ID}/availability?date={}&duration=60", closed_day());
    let (_, body) = send(&salon, as_user(TestRequest::get().uri(&uri), &alice())).await;
    assert_eq!(body["open"], false);
    assert_eq!(body["startTimes"], json!([]));
    salon.close().await;
}

#[actix_web::test]
async fn reservations_are_scoped_to_the_caller() {
    let salon = TestSalon::new().await;
    let date = open_day(3);
    let mine = salon.reservations.create_reservation(booking("alice", &[(MANICURE, 1)], date, 600)).await.unwrap();
    salon.reservations.create_reservation(booking("bob", &[(MANICURE, 1)], date, 660)).await.unwrap();

    let (status, body) = send(&salon, as_user(TestRequest::get().uri("/api/reservations"), &alice())).await;
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], mine.id);

    let (_, body) = send(&salon, as_user(TestRequest::get().uri("/api/reservations"), &owner())).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    let other_shop = Identity::shop_owner("owner-2", "hongdae-02");
    let (_, body) = send(&salon, as_user(TestRequest::get().uri("/api/reservations"), &other_shop)).await;
    assert_eq!(body.as_array().unwrap().len(), 0);

    let uri = format!("/api/reservations/{}", mine.id);
    let (status, body) = send(&salon, as_user(TestRequest::get().uri(&uri), &alice())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reservation"]["memo"], Value::Null);
    assert_eq!(body["services"][0]["service_id"], MANICURE);
    let (status, _) = send(&salon, as_user(TestRequest::get().uri(&uri), &Identity::customer("bob"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&salon, as_user(TestRequest::get().uri("/api/reservations/9999"), &alice())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    salon.close().await;
}

#[actix_web::test]
async fn shop_confirms_reservation() {
    let salon = TestSalon::new().await;
    let r = salon.reservations.create_reservation(booking("alice", &[(MANICURE, 1)], open_day(3), 600)).await.unwrap();
    let uri = format!("/api/reservations/{}/confirm", r.id);

    let (status, _) = send(&salon, as_user(TestRequest::put().uri(&uri), &alice())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let other_shop = Identity::shop_owner("owner-2", "hongdae-02");
    let (status, _) = send(&salon, as_user(TestRequest::put().uri(&uri), &other_shop)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "confirmed");
    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let uri = format!("/api/reservations/{}/history", r.id);
    let (status, body) = send(&salon, as_user(TestRequest::get().uri(&uri), &alice())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.as_array().unwrap().is_empty());
    salon.close().await;
}

#[actix_web::test]
async fn unpaid_deposit_blocks_confirmation() {
    let salon = TestSalon::new().await;
    let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(3), 600)).await.unwrap();
    let uri = format!("/api/reservations/{}/confirm", r.id);
    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    salon.close().await;
}

#[actix_web::test]
async fn customer_cancellation_refunds_the_deposit() {
    let salon = TestSalon::new().await;
    let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(3), TWO_PM)).await.unwrap();
    let paid = salon.pay(r.id, salon_engine::db_types::PaymentLeg::Deposit).await.unwrap();
    assert_eq!(paid.reservation.status.to_string(), "confirmed");

    let uri = format!("/api/reservations/{}/cancel", r.id);
    let req = as_user(TestRequest::put().uri(&uri), &alice()).set_json(json!({"reason": "Change of plans"}));
    let (status, body) = send(&salon, req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["reservation"]["status"], "cancelled_by_user");
    assert_eq!(body["reservation"]["cancellation_reason"], "Change of plans");
    let refund = &body["refunds"][0];
    assert_eq!(refund["refunded_amount"], 6_000);
    assert_eq!(refund["fee_amount"], 0);
    assert_eq!(refund["refund_status"], "completed");
    let key = paid.payment.payment_key.unwrap();
    assert_eq!(salon.gateway.refunded_total(&key).value(), 6_000);
    salon.close().await;
}

#[actix_web::test]
async fn cancellation_stands_when_refund_is_delayed() {
    let salon = TestSalon::new().await;
    let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(3), TWO_PM)).await.unwrap();
    salon.pay(r.id, salon_engine::db_types::PaymentLeg::Deposit).await.unwrap();
    salon.gateway.set_refund_behaviour(MockBehaviour::Timeout);

    let uri = format!("/api/reservations/{}/cancel", r.id);
    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["reservation"]["status"], "cancelled_by_shop");
    assert_eq!(body["refunds"][0]["refund_status"], "pending");
    salon.close().await;
}

#[actix_web::test]
async fn no_show_before_start_is_rejected() {
    let salon = TestSalon::new().await;
    let r = salon.reservations.create_reservation(booking("alice", &[(MANICURE, 1)], open_day(3), 600)).await.unwrap();
    salon.reservations.confirm_reservation(r.id).await.unwrap();
    let uri = format!("/api/reservations/{}/no_show", r.id);
    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    salon.close().await;
}
