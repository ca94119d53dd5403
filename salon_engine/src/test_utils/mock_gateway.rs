//! An in-memory payment gateway whose behaviour can be scripted per test.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use salon_common::Money;

use crate::gateway::{
    CheckoutRequest,
    CheckoutSession,
    GatewayError,
    GatewayPayment,
    GatewayPaymentStatus,
    GatewayRefund,
    PaymentGateway,
    RefundInstruction,
};

/// What the mock does with the next calls of a given kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockBehaviour {
    #[default]
    Approve,
    Decline { code: String, message: String },
    /// Answers with [`GatewayError::Timeout`] without acting on the request.
    Timeout,
    /// Acts on the request, then answers with [`GatewayError::Timeout`], as if the response was lost.
    TimeoutAfterSuccess,
    Unreachable,
    /// Confirmation leaves the payment `IN_PROGRESS`.
    Pending,
}

impl MockBehaviour {
    pub fn decline(code: &str, message: &str) -> Self {
        Self::Decline { code: code.to_string(), message: message.to_string() }
    }
}

#[derive(Debug, Default)]
struct MockState {
    payments: HashMap<String, GatewayPayment>,
    refunds: HashMap<String, GatewayRefund>,
    refund_instructions: Vec<RefundInstruction>,
    initiate: MockBehaviour,
    confirm: MockBehaviour,
    refund: MockBehaviour,
    delay: Option<Duration>,
    initiate_calls: usize,
    confirm_calls: usize,
    refund_calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_initiate_behaviour(&self, behaviour: MockBehaviour) {
        self.state.lock().unwrap().initiate = behaviour;
    }

    pub fn set_confirm_behaviour(&self, behaviour: MockBehaviour) {
        self.state.lock().unwrap().confirm = behaviour;
    }

    pub fn set_refund_behaviour(&self, behaviour: MockBehaviour) {
        self.state.lock().unwrap().refund = behaviour;
    }

    /// Every call sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Changes what the gateway reports for a payment, e.g. to simulate a customer completing checkout out of band.
    pub fn set_status(&self, payment_key: &str, status: GatewayPaymentStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.payments.get_mut(payment_key) {
            p.status = status;
            if status == GatewayPaymentStatus::Done {
                p.approved_at = Some(Utc::now());
            }
        }
    }

    pub fn payment(&self, payment_key: &str) -> Option<GatewayPayment> {
        self.state.lock().unwrap().payments.get(payment_key).cloned()
    }

    pub fn refund_instructions(&self) -> Vec<RefundInstruction> {
        self.state.lock().unwrap().refund_instructions.clone()
    }

    /// Money actually returned for a payment. Replays of the same idempotency key are only counted once.
    pub fn refunded_total(&self, payment_key: &str) -> Money {
        let state = self.state.lock().unwrap();
        let mut seen = std::collections::HashSet::new();
        state
            .refund_instructions
            .iter()
            .filter(|r| r.payment_key == payment_key && seen.insert(r.idempotency_key.clone()))
            .filter(|r| state.refunds.contains_key(&r.idempotency_key))
            .map(|r| r.amount)
            .sum()
    }

    pub fn initiate_calls(&self) -> usize {
        self.state.lock().unwrap().initiate_calls
    }

    pub fn confirm_calls(&self) -> usize {
        self.state.lock().unwrap().confirm_calls
    }

    pub fn refund_calls(&self) -> usize {
        self.state.lock().unwrap().refund_calls
    }

    async fn pause(&self) {
        let delay = self.state.lock().unwrap().delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

fn refusal(behaviour: &MockBehaviour) -> Option<GatewayError> {
    match behaviour {
        MockBehaviour::Decline { code, message } => {
            Some(GatewayError::Declined { code: code.clone(), message: message.clone() })
        },
        MockBehaviour::Timeout => Some(GatewayError::Timeout),
        MockBehaviour::Unreachable => Some(GatewayError::Unreachable("connection refused".into())),
        _ => None,
    }
}

impl PaymentGateway for MockGateway {
    async fn initiate(&self, request: &CheckoutRequest) -> Result<CheckoutSession, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        state.initiate_calls += 1;
        if let Some(e) = refusal(&state.initiate) {
            return Err(e);
        }
        let payment_key = format!("pk_{}", request.order_id);
        let payment = GatewayPayment {
            payment_key: payment_key.clone(),
            order_id: request.order_id.clone(),
            status: GatewayPaymentStatus::Ready,
            total_amount: request.amount,
            approved_at: None,
        };
        state.payments.insert(payment_key.clone(), payment);
        if state.initiate == MockBehaviour::TimeoutAfterSuccess {
            return Err(GatewayError::Timeout);
        }
        Ok(CheckoutSession {
            payment_key,
            order_id: request.order_id.clone(),
            checkout_url: Some(format!("https://pay.example.test/checkout/{}", request.order_id)),
        })
    }

    async fn confirm(&self, payment_key: &str, order_id: &str, amount: Money) -> Result<GatewayPayment, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        state.confirm_calls += 1;
        let behaviour = state.confirm.clone();
        if matches!(behaviour, MockBehaviour::Timeout | MockBehaviour::Unreachable) {
            return Err(refusal(&behaviour).unwrap_or(GatewayError::Timeout));
        }
        let Some(payment) = state.payments.get_mut(payment_key) else {
            return Err(GatewayError::Declined { code: "NOT_FOUND_PAYMENT".into(), message: payment_key.into() });
        };
        if payment.order_id != order_id || payment.total_amount != amount {
            return Err(GatewayError::Declined { code: "INVALID_REQUEST".into(), message: "mismatch".into() });
        }
        match behaviour {
            MockBehaviour::Decline { code, message } => {
                payment.status = GatewayPaymentStatus::Aborted;
                Err(GatewayError::Declined { code, message })
            },
            MockBehaviour::Pending => {
                payment.status = GatewayPaymentStatus::InProgress;
                Ok(payment.clone())
            },
            MockBehaviour::TimeoutAfterSuccess => {
                payment.status = GatewayPaymentStatus::Done;
                payment.approved_at = Some(Utc::now());
                Err(GatewayError::Timeout)
            },
            _ => {
                payment.status = GatewayPaymentStatus::Done;
                payment.approved_at = Some(Utc::now());
                Ok(payment.clone())
            },
        }
    }

    async fn fetch_status(&self, payment_key: &str) -> Result<GatewayPayment, GatewayError> {
        self.pause().await;
        let state = self.state.lock().unwrap();
        state
            .payments
            .get(payment_key)
            .cloned()
            .ok_or_else(|| GatewayError::Declined { code: "NOT_FOUND_PAYMENT".into(), message: payment_key.into() })
    }

    async fn refund(&self, instruction: &RefundInstruction) -> Result<GatewayRefund, GatewayError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        state.refund_calls += 1;
        state.refund_instructions.push(instruction.clone());
        if let Some(done) = state.refunds.get(&instruction.idempotency_key) {
            return Ok(done.clone());
        }
        if let Some(e) = refusal(&state.refund) {
            return Err(e);
        }
        let done = GatewayRefund {
            transaction_key: format!("rf_{}", instruction.idempotency_key),
            refunded_amount: instruction.amount,
        };
        state.refunds.insert(instruction.idempotency_key.clone(), done.clone());
        if let Some(p) = state.payments.get_mut(&instruction.payment_key) {
            p.status = if instruction.amount == p.total_amount {
                GatewayPaymentStatus::Canceled
            } else {
                GatewayPaymentStatus::PartialCanceled
            };
        }
        if state.refund == MockBehaviour::TimeoutAfterSuccess {
            return Err(GatewayError::Timeout);
        }
        Ok(done)
    }
}
