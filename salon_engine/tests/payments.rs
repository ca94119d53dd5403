use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use salon_common::Money;
use salon_engine::{
    db_types::{
        CancellingParty,
        Payment,
        PaymentLeg,
        PaymentStatus,
        RefundStatus,
        ReservationPaymentStatus,
        ReservationStatus,
    },
    events::EventProducers,
    gateway::GatewayPaymentStatus,
    refund_policy::{FeeTier, RefundPolicy, PAID_AFTER_CANCELLATION_TIER},
    reservation_objects::ConfirmPaymentRequest,
    test_utils::{fixtures::*, mock_gateway::MockBehaviour},
    BookingPolicy,
    ReservationError,
};
use tokio::runtime::Runtime;

fn run<F: std::future::Future<Output = ()>>(f: F) {
    let sys = Runtime::new().unwrap();
    sys.block_on(f);
}

fn confirm_request(payment: &Payment) -> ConfirmPaymentRequest {
    ConfirmPaymentRequest {
        payment_key: payment.payment_key.clone().unwrap(),
        order_id: payment.order_id.clone(),
        amount: payment.amount,
    }
}

#[test]
fn initiating_twice_reuses_the_pending_payment() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 600)).await.unwrap();
        let first = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap();
        assert!(!first.reused);
        assert_eq!(first.payment.payment_status, PaymentStatus::Pending);
        assert!(first.payment.checkout_url.is_some());
        let second = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.payment.id, first.payment.id);
        assert_eq!(salon.gateway.initiate_calls(), 1);
        salon.close().await;
    });
}

#[test]
fn gateway_failures_when_opening_a_checkout_record_nothing() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 600)).await.unwrap();
        salon.gateway.set_initiate_behaviour(MockBehaviour::Unreachable);
        let err = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap_err();
        assert!(matches!(err, ReservationError::GatewayUnavailable(_)), "{err}");
        assert!(err.is_retryable());
        salon.gateway.set_initiate_behaviour(MockBehaviour::decline("INVALID_CARD_COMPANY", "Unsupported card"));
        let err = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap_err();
        assert_eq!(err.code(), "GATEWAY_DECLINED");
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert!(details.payments.is_empty());

        salon.gateway.set_initiate_behaviour(MockBehaviour::Approve);
        let ok = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap();
        assert!(!ok.reused);
        salon.close().await;
    });
}

#[test]
fn a_declined_payment_can_be_retried() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(COLORING, 1)], open_day(2), 600)).await.unwrap();
        let first = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap().payment;
        salon.gateway.set_confirm_behaviour(MockBehaviour::decline("REJECT_CARD_PAYMENT", "Limit exceeded"));
        let err = salon.payments.confirm_payment(confirm_request(&first)).await.unwrap_err();
        assert!(matches!(err, ReservationError::GatewayDeclined { ref code, .. } if code == "REJECT_CARD_PAYMENT"));
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.payments[0].payment_status, PaymentStatus::Failed);
        assert_eq!(details.reservation.status, ReservationStatus::Requested);
        assert!(details.payments[0].failure_reason.as_deref().unwrap().contains("Limit exceeded"));

        salon.gateway.set_confirm_behaviour(MockBehaviour::Approve);
        let retry = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap();
        assert!(!retry.reused);
        assert_ne!(retry.payment.order_id, first.order_id);
        let done = salon.payments.confirm_payment(confirm_request(&retry.payment)).await.unwrap();
        assert_eq!(done.reservation.status, ReservationStatus::Confirmed);
        salon.close().await;
    });
}

#[test]
fn confirmation_checks_the_request_against_the_record() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 600)).await.unwrap();
        let payment = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap().payment;

        let mut wrong_amount = confirm_request(&payment);
        wrong_amount.amount = Money::from(1_000);
        let err = salon.payments.confirm_payment(wrong_amount).await.unwrap_err();
        assert!(matches!(err, ReservationError::AmountMismatch(_)), "{err}");

        let mut wrong_key = confirm_request(&payment);
        wrong_key.payment_key = "pk_forged".into();
        let err = salon.payments.confirm_payment(wrong_key).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotFound(_)), "{err}");

        let mut unknown = confirm_request(&payment);
        unknown.order_id = "rsv0-deposit-deadbeef".into();
        let err = salon.payments.confirm_payment(unknown).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotFound(_)), "{err}");
        assert_eq!(salon.gateway.confirm_calls(), 0);

        let done = salon.payments.confirm_payment(confirm_request(&payment)).await.unwrap();
        assert!(!done.already_settled);
        let again = salon.payments.confirm_payment(confirm_request(&payment)).await.unwrap();
        assert!(again.already_settled);
        assert_eq!(again.payment.payment_status, PaymentStatus::Completed);
        assert_eq!(salon.gateway.confirm_calls(), 1);
        salon.close().await;
    });
}

#[test]
fn a_lost_confirmation_is_settled_by_reconciliation() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 600)).await.unwrap();
        let payment = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap().payment;
        salon.gateway.set_confirm_behaviour(MockBehaviour::TimeoutAfterSuccess);
        let err = salon.payments.confirm_payment(confirm_request(&payment)).await.unwrap_err();
        assert!(matches!(err, ReservationError::GatewayTimeout));
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.payments[0].payment_status, PaymentStatus::Pending);
        assert_eq!(details.reservation.status, ReservationStatus::Requested);

        // Too recent to be picked up
        let report = salon.payments.reconcile_at(Utc::now(), Duration::minutes(10)).await.unwrap();
        assert_eq!(report.payments_checked, 0);

        let report = salon.payments.reconcile_at(Utc::now() + Duration::hours(1), Duration::minutes(10)).await.unwrap();
        assert_eq!(report.payments_checked, 1);
        assert_eq!(report.payments_completed, 1);
        assert!(report.errors.is_empty(), "{report}");
        let r = salon.reservations.fetch_reservation(r.id).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(r.payment_status, ReservationPaymentStatus::DepositPaid);
        salon.close().await;
    });
}

#[test]
fn reconciliation_fails_abandoned_checkouts() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 600)).await.unwrap();
        let payment = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap().payment;
        let key = payment.payment_key.clone().unwrap();

        let later = Utc::now() + Duration::hours(1);
        let report = salon.payments.reconcile_at(later, Duration::minutes(10)).await.unwrap();
        assert_eq!(report.payments_checked, 1);
        assert_eq!(report.payments_completed + report.payments_failed, 0);

        salon.gateway.set_status(&key, GatewayPaymentStatus::Expired);
        let report = salon.payments.reconcile_at(later, Duration::minutes(10)).await.unwrap();
        assert_eq!(report.payments_failed, 1);
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.payments[0].payment_status, PaymentStatus::Failed);
        assert_eq!(details.reservation.status, ReservationStatus::Requested);
        salon.close().await;
    });
}

#[test]
fn slow_gateways_time_out() {
    run(async {
        let policy = BookingPolicy::default().with_gateway_timeout(StdDuration::from_millis(50));
        let salon = TestSalon::with_policy(policy, EventProducers::default()).await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(2), 600)).await.unwrap();
        let payment = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap().payment;
        salon.gateway.set_delay(Some(StdDuration::from_millis(500)));
        let err = salon.payments.confirm_payment(confirm_request(&payment)).await.unwrap_err();
        assert!(matches!(err, ReservationError::GatewayTimeout), "{err}");
        salon.gateway.set_delay(None);
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.payments[0].payment_status, PaymentStatus::Pending);
        salon.close().await;
    });
}

#[test]
fn refunds_are_paid_out_once() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(SCALP_CARE, 1)], open_day(4), 600)).await.unwrap();
        assert_eq!(r.deposit_amount, Money::from(50_000));
        let paid = salon.pay(r.id, PaymentLeg::Deposit).await.unwrap();
        let key = paid.payment.payment_key.clone().unwrap();
        salon.reservations.cancel_reservation(r.id, CancellingParty::Customer, None).await.unwrap();

        salon.gateway.set_refund_behaviour(MockBehaviour::TimeoutAfterSuccess);
        let report = salon.payments.execute_refunds(Some(r.id)).await.unwrap();
        assert_eq!(report.refunds_completed, 0);
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.refunds[0].refund_status, RefundStatus::Pending);

        salon.gateway.set_refund_behaviour(MockBehaviour::Approve);
        let report = salon.payments.execute_refunds(Some(r.id)).await.unwrap();
        assert_eq!(report.refunds_completed, 1);
        assert_eq!(salon.gateway.refund_calls(), 2);
        assert_eq!(salon.gateway.refunded_total(&key), Money::from(50_000));
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.refunds[0].refund_status, RefundStatus::Completed);
        let expected_reference = format!("rf_refund-{}", details.refunds[0].id);
        assert_eq!(details.refunds[0].gateway_reference.as_deref(), Some(expected_reference.as_str()));
        assert_eq!(details.reservation.payment_status, ReservationPaymentStatus::Refunded);
        assert_eq!(details.total_refunded(), Money::from(50_000));
        salon.close().await;
    });
}

#[test]
fn declined_refunds_are_marked_failed() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(4), 600)).await.unwrap();
        salon.pay(r.id, PaymentLeg::Deposit).await.unwrap();
        salon.reservations.cancel_reservation(r.id, CancellingParty::Shop, None).await.unwrap();
        salon.gateway.set_refund_behaviour(MockBehaviour::decline("NOT_CANCELABLE_PAYMENT", "Settlement closed"));
        let report = salon.payments.execute_refunds(None).await.unwrap();
        assert_eq!(report.refunds_failed, 1);
        let details = salon.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.refunds[0].refund_status, RefundStatus::Failed);
        assert!(details.refunds[0].failure_reason.as_deref().unwrap().starts_with("NOT_CANCELABLE_PAYMENT"));
        // Failed refunds are not retried automatically
        salon.gateway.set_refund_behaviour(MockBehaviour::Approve);
        let report = salon.payments.execute_refunds(None).await.unwrap();
        assert_eq!(report.refunds_completed, 0);
        salon.close().await;
    });
}

#[test]
fn money_arriving_after_cancellation_is_sent_back() {
    run(async {
        let salon = TestSalon::new().await;
        let r = salon.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(3), 600)).await.unwrap();
        let payment = salon.payments.initiate_payment(r.id, PaymentLeg::Deposit).await.unwrap().payment;
        let outcome = salon.reservations.cancel_reservation(r.id, CancellingParty::Customer, None).await.unwrap();
        assert!(outcome.refunds.is_empty());

        let late = salon.payments.confirm_payment(confirm_request(&payment)).await.unwrap();
        assert_eq!(late.payment.payment_status, PaymentStatus::Completed);
        assert_eq!(late.reservation.status, ReservationStatus::CancelledByUser);
        let refund = late.refund.expect("A refund should have been queued");
        assert_eq!(refund.refunded_amount, Money::from(6_000));
        assert_eq!(refund.policy_tier, PAID_AFTER_CANCELLATION_TIER);
        assert_eq!(refund.cancelled_by, CancellingParty::Customer);

        salon.payments.execute_refunds(Some(r.id)).await.unwrap();
        let r = salon.reservations.fetch_reservation(r.id).await.unwrap();
        assert_eq!(r.payment_status, ReservationPaymentStatus::Refunded);
        salon.close().await;
    });
}

#[test]
fn zero_value_refunds_close_without_the_gateway() {
    run(async {
        let refund_policy = RefundPolicy::new(Duration::hours(24), vec![FeeTier::new(Duration::zero(), 10_000)]);
        let policy = BookingPolicy::default().with_refund_policy(refund_policy);
        let strict = TestSalon::with_policy(policy, EventProducers::default()).await;
        let r = strict.reservations.create_reservation(booking("alice", &[(HAIRCUT, 1)], open_day(3), 600)).await.unwrap();
        strict.pay(r.id, PaymentLeg::Deposit).await.unwrap();
        let outcome = strict
            .reservations
            .cancel_reservation_at(r.id, CancellingParty::Customer, None, r.starts_at - Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(outcome.refunds[0].refunded_amount, Money::zero());
        assert_eq!(outcome.refunds[0].fee_amount, Money::from(6_000));
        let report = strict.payments.execute_refunds(None).await.unwrap();
        assert_eq!(report.refunds_completed, 1);
        assert_eq!(strict.gateway.refund_calls(), 0);
        let details = strict.reservations.fetch_details(r.id).await.unwrap();
        assert_eq!(details.refunds[0].gateway_reference.as_deref(), Some("fee_only"));
        assert_eq!(details.reservation.payment_status, ReservationPaymentStatus::PartiallyRefunded);
        strict.close().await;
    });
}
