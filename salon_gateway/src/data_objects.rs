use chrono::{DateTime, FixedOffset};
use salon_common::Money;
use serde::{Deserialize, Serialize};

/// Body of a request to open a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCheckout {
    pub amount: Money,
    pub order_id: String,
    pub order_name: String,
    pub customer_key: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_url: Option<String>,
}

impl NewCheckout {
    pub fn card<S: Into<String>>(order_id: S, order_name: S, customer_key: S, amount: Money) -> Self {
        Self {
            amount,
            order_id: order_id.into(),
            order_name: order_name.into(),
            customer_key: customer_key.into(),
            method: "CARD".to_string(),
            success_url: None,
            fail_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_key: String,
    pub order_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentRequest {
    pub cancel_reason: String,
    /// Omitted for a cancellation of the whole remaining balance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_amount: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLink {
    pub url: String,
}

/// A single cancellation (refund) against a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCancel {
    pub transaction_key: String,
    pub cancel_amount: Money,
    #[serde(default)]
    pub cancel_reason: String,
    pub canceled_at: Option<DateTime<FixedOffset>>,
}

/// The gateway's payment object. Only the fields the booking service reads are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPaymentObject {
    pub payment_key: String,
    pub order_id: String,
    #[serde(default)]
    pub order_name: String,
    pub status: String,
    pub total_amount: Money,
    #[serde(default)]
    pub balance_amount: Money,
    pub approved_at: Option<DateTime<FixedOffset>>,
    pub checkout: Option<CheckoutLink>,
    #[serde(default)]
    pub cancels: Vec<GatewayCancel>,
}

impl GatewayPaymentObject {
    pub fn checkout_url(&self) -> Option<&str> {
        self.checkout.as_ref().map(|c| c.url.as_str())
    }

    /// The most recent cancellation, if any.
    pub fn last_cancel(&self) -> Option<&GatewayCancel> {
        self.cancels.last()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GatewayErrorBody {
    pub code: String,
    pub message: String,
}
