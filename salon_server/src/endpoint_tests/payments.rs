use actix_web::{http::StatusCode, test::TestRequest};
use salon_engine::{
    db_types::{PaymentLeg, ReservationStatus},
    test_utils::{
        fixtures::{booking, open_day, TestSalon, HAIRCUT, SHOP_ID},
        mock_gateway::MockBehaviour,
    },
};
use serde_json::{json, Value};

use super::helpers::{as_user, send};
use crate::auth::Identity;

fn alice() -> Identity {
    Identity::customer("alice")
}

fn owner() -> Identity {
    Identity::shop_owner("owner-1", SHOP_ID)
}

async fn book_haircut(salon: &TestSalon) -> i64 {
    salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(3), 14 * 60)).await.unwrap().id
}

fn confirm_body(checkout: &Value, amount: i64) -> Value {
    json!({
        "paymentKey": checkout["paymentKey"],
        "orderId": checkout["orderId"],
        "amount": amount,
    })
}

#[actix_web::test]
async fn deposit_checkout_is_reused() {
    let salon = TestSalon::new().await;
    let id = book_haircut(&salon).await;
    let uri = format!("/api/reservations/{id}/payments/deposit");

    let (status, first) = send(&salon, as_user(TestRequest::post().uri(&uri), &alice())).await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["amount"], 6_000);
    assert_eq!(first["reused"], false);
    let (status, second) = send(&salon, as_user(TestRequest::post().uri(&uri), &alice())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["reused"], true);
    assert_eq!(second["orderId"], first["orderId"]);
    assert_eq!(salon.gateway.initiate_calls(), 1);

    let (status, _) = send(&salon, as_user(TestRequest::post().uri(&uri), &Identity::customer("bob"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&salon, as_user(TestRequest::post().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    salon.close().await;
}

#[actix_web::test]
async fn confirm_deposit_payment() {
    let salon = TestSalon::new().await;
    let id = book_haircut(&salon).await;
    let uri = format!("/api/reservations/{id}/payments/deposit");
    let (_, checkout) = send(&salon, as_user(TestRequest::post().uri(&uri), &alice())).await;

    let confirm = |identity: &Identity, body: Value| {
        as_user(TestRequest::post().uri("/api/payments/confirm"), identity).set_json(body)
    };
    let (status, body) = send(&salon, confirm(&Identity::customer("bob"), confirm_body(&checkout, 6_000))).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    let (status, body) = send(&salon, confirm(&alice(), confirm_body(&checkout, 5_000))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "AMOUNT_MISMATCH");

    let (status, body) = send(&salon, confirm(&alice(), confirm_body(&checkout, 6_000))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["already_settled"], false);
    assert_eq!(body["payment"]["payment_status"], "completed");
    assert_eq!(body["reservation"]["status"], "confirmed");
    assert_eq!(body["reservation"]["payment_status"], "deposit_paid");

    let (status, body) = send(&salon, confirm(&alice(), confirm_body(&checkout, 6_000))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_settled"], true);
    assert_eq!(salon.gateway.confirm_calls(), 1);

    let unknown = json!({"paymentKey": "pk_nope", "orderId": "nope", "amount": 6_000});
    let (status, _) = send(&salon, confirm(&alice(), unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    salon.close().await;
}

#[actix_web::test]
async fn declined_payment() {
    let salon = TestSalon::new().await;
    let id = book_haircut(&salon).await;
    salon.gateway.set_confirm_behaviour(MockBehaviour::decline("REJECT_CARD_COMPANY", "Card limit exceeded"));
    let uri = format!("/api/reservations/{id}/payments/deposit");
    let (_, checkout) = send(&salon, as_user(TestRequest::post().uri(&uri), &alice())).await;
    let req = as_user(TestRequest::post().uri("/api/payments/confirm"), &alice()).set_json(confirm_body(&checkout, 6_000));
    let (status, body) = send(&salon, req).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "GATEWAY_DECLINED");
    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Requested);
    salon.close().await;
}

#[actix_web::test]
async fn lost_confirmation_is_reconciled() {
    let salon = TestSalon::new().await;
    let id = book_haircut(&salon).await;
    salon.gateway.set_confirm_behaviour(MockBehaviour::TimeoutAfterSuccess);
    let uri = format!("/api/reservations/{id}/payments/deposit");
    let (_, checkout) = send(&salon, as_user(TestRequest::post().uri(&uri), &alice())).await;
    let req = as_user(TestRequest::post().uri("/api/payments/confirm"), &alice()).set_json(confirm_body(&checkout, 6_000));
    let (status, body) = send(&salon, req).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "GATEWAY_TIMEOUT");

    let reconcile = TestRequest::post().uri("/api/admin/reconcile?olderThanMins=0");
    let (status, _) = send(&salon, as_user(reconcile, &owner())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let reconcile = TestRequest::post().uri("/api/admin/reconcile?olderThanMins=0");
    let (status, report) = send(&salon, as_user(reconcile, &Identity::admin("ops"))).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["payments_checked"], 1);
    assert_eq!(report["payments_completed"], 1);
    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Confirmed);
    salon.close().await;
}

#[actix_web::test]
async fn completion_waits_for_the_final_payment() {
    let salon = TestSalon::new().await;
    let id = book_haircut(&salon).await;
    salon.pay(id, PaymentLeg::Deposit).await.unwrap();

    let uri = format!("/api/reservations/{id}/complete");
    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["reservationId"], id);
    assert_eq!(body["checkout"]["amount"], 24_000);
    let reservation = salon.reservations.fetch_reservation(id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Confirmed);

    // Settling the final payment completes the reservation
    let confirmation = salon.pay(id, PaymentLeg::Final).await.unwrap();
    assert_eq!(confirmation.payment.order_id, body["checkout"]["orderId"].as_str().unwrap());
    assert_eq!(confirmation.reservation.status, ReservationStatus::Completed);
    let (status, body) = send(&salon, as_user(TestRequest::put().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "INVALID_TRANSITION");

    let (status, points) = send(&salon, as_user(TestRequest::get().uri("/api/points"), &alice())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(points["balance"], 300);
    assert_eq!(points["history"][0]["tx_type"], "earned");
    let (status, _) = send(&salon, as_user(TestRequest::get().uri("/api/points"), &owner())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    salon.close().await;
}

#[actix_web::test]
async fn shop_opens_final_checkout_at_the_counter() {
    let salon = TestSalon::new().await;
    let id = book_haircut(&salon).await;
    let uri = format!("/api/reservations/{id}/payments/final");
    let (status, body) = send(&salon, as_user(TestRequest::post().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "VALIDATION_ERROR");

    salon.pay(id, PaymentLeg::Deposit).await.unwrap();
    let (status, body) = send(&salon, as_user(TestRequest::post().uri(&uri), &owner())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["amount"], 24_000);
    salon.close().await;
}
