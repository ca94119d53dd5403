//! Connects the settlement engine to the card-payment gateway's REST API.
//!
//! [`GatewayAdapter`] implements the engine's [`PaymentGateway`] trait on top of [`GatewayApi`], translating request
//! and response objects and folding the HTTP client's errors into the engine's [`GatewayError`] taxonomy. Refunds are
//! sent as partial cancellations carrying the engine's idempotency key, so a replayed refund never pays out twice.
use chrono::Utc;
use log::*;
use salon_common::Money;
use salon_engine::gateway::{
    CheckoutRequest,
    CheckoutSession,
    GatewayError,
    GatewayPayment,
    GatewayPaymentStatus,
    GatewayRefund,
    PaymentGateway,
    RefundInstruction,
};
use salon_gateway::{
    CancelPaymentRequest,
    ConfirmPaymentRequest,
    GatewayApi,
    GatewayApiError,
    GatewayConfig,
    GatewayPaymentObject,
    NewCheckout,
};

#[derive(Clone)]
pub struct GatewayAdapter {
    api: GatewayApi,
}

impl GatewayAdapter {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayApiError> {
        let api = GatewayApi::new(config)?;
        Ok(Self { api })
    }
}

impl PaymentGateway for GatewayAdapter {
    async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        let checkout = NewCheckout::card(
            request.order_id.as_str(),
            request.order_name.as_str(),
            request.customer_id.as_str(),
            request.amount,
        );
        let payment = self.api.create_checkout(&checkout).await.map_err(gateway_error)?;
        Ok(CheckoutSession {
            checkout_url: payment.checkout_url().map(String::from),
            payment_key: payment.payment_key,
            order_id: payment.order_id,
        })
    }

    async fn confirm(&self, payment_key: &str, order_id: &str, amount: Money) -> Result<GatewayPayment, GatewayError> {
        let request =
            ConfirmPaymentRequest { payment_key: payment_key.to_string(), order_id: order_id.to_string(), amount };
        let payment = self.api.confirm_payment(&request).await.map_err(gateway_error)?;
        gateway_payment(payment)
    }

    async fn fetch_status(&self, payment_key: &str) -> Result<GatewayPayment, GatewayError> {
        let payment = self.api.fetch_payment(payment_key).await.map_err(gateway_error)?;
        gateway_payment(payment)
    }

    async fn refund(&self, instruction: &RefundInstruction) -> Result<GatewayRefund, GatewayError> {
        let request =
            CancelPaymentRequest { cancel_reason: instruction.reason.clone(), cancel_amount: Some(instruction.amount) };
        let payment = self
            .api
            .cancel_payment(&instruction.payment_key, &request, &instruction.idempotency_key)
            .await
            .map_err(gateway_error)?;
        let cancel = payment.last_cancel().ok_or_else(|| {
            GatewayError::InvalidResponse(format!(
                "Payment {} was cancelled but the gateway reported no cancellation",
                payment.payment_key
            ))
        })?;
        Ok(GatewayRefund { transaction_key: cancel.transaction_key.clone(), refunded_amount: cancel.cancel_amount })
    }
}

fn gateway_payment(payment: GatewayPaymentObject) -> Result<GatewayPayment, GatewayError> {
    let status = payment.status.parse::<GatewayPaymentStatus>().map_err(|e| {
        warn!("💳️ Payment {} has a status we do not know: {}", payment.payment_key, payment.status);
        GatewayError::InvalidResponse(e.to_string())
    })?;
    Ok(GatewayPayment {
        payment_key: payment.payment_key,
        order_id: payment.order_id,
        status,
        total_amount: payment.total_amount,
        approved_at: payment.approved_at.map(|t| t.with_timezone(&Utc)),
    })
}

/// A refusal (4xx) means the gateway did not act on the request. Anything else leaves the outcome unknown.
fn gateway_error(e: GatewayApiError) -> GatewayError {
    debug!("💳️ Gateway call failed. {e}");
    match e {
        GatewayApiError::Timeout => GatewayError::Timeout,
        GatewayApiError::QueryError { status, code, message } if status < 500 => {
            GatewayError::Declined { code, message }
        },
        GatewayApiError::QueryError { status, code, message } => {
            GatewayError::Unreachable(format!("Error {status}. {code}: {message}"))
        },
        GatewayApiError::ConnectionError(s) | GatewayApiError::Initialization(s) => GatewayError::Unreachable(s),
        GatewayApiError::RestResponseError(s) | GatewayApiError::JsonError(s) => GatewayError::InvalidResponse(s),
    }
}

#[cfg(test)]
mod test {
    use salon_common::Secret;
    use salon_engine::db_types::{new_order_id, PaymentLeg};

    use super::*;

    fn payment_json(status: &str) -> GatewayPaymentObject {
        serde_json::from_str(&format!(
            r#"{{
                "paymentKey": "pk_123",
                "orderId": "res-1-deposit",
                "status": "{status}",
                "totalAmount": 6000,
                "approvedAt": "2026-10-14T10:00:00+09:00",
                "cancels": [{{"transactionKey": "tx_1", "cancelAmount": 6000, "cancelReason": "cancelled"}}]
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn converts_payment_objects() {
        let payment = gateway_payment(payment_json("DONE")).unwrap();
        assert_eq!(payment.status, GatewayPaymentStatus::Done);
        assert_eq!(payment.total_amount, Money::from(6000));
        assert_eq!(payment.approved_at.unwrap().to_rfc3339(), "2026-10-14T01:00:00+00:00");
        let err = gateway_payment(payment_json("PAID")).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[test]
    fn error_mapping() {
        let declined =
            GatewayApiError::QueryError { status: 400, code: "REJECT_CARD_COMPANY".into(), message: "no".into() };
        assert_eq!(gateway_error(declined), GatewayError::Declined {
            code: "REJECT_CARD_COMPANY".into(),
            message: "no".into()
        });
        let server_error = GatewayApiError::QueryError { status: 503, code: "UNKNOWN".into(), message: "down".into() };
        assert!(gateway_error(server_error).is_indeterminate());
        assert_eq!(gateway_error(GatewayApiError::Timeout), GatewayError::Timeout);
        assert!(matches!(gateway_error(GatewayApiError::JsonError("eof".into())), GatewayError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_indeterminate() {
        let config = GatewayConfig::new("http://127.0.0.1:9", Secret::new("sk_test".to_string()))
            .with_request_timeout(std::time::Duration::from_secs(2));
        let adapter = GatewayAdapter::new(config).unwrap();
        let request = CheckoutRequest {
            order_id: new_order_id(1, PaymentLeg::Deposit),
            order_name: "Haircut".into(),
            amount: Money::from(6000),
            customer_id: "alice".into(),
        };
        let err = adapter.initiate(&request).await.unwrap_err();
        assert!(err.is_indeterminate(), "{err}");
    }
}
