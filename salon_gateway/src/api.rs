use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::GatewayConfig,
    data_objects::{CancelPaymentRequest, ConfirmPaymentRequest, GatewayPaymentObject, NewCheckout},
    helpers::{basic_auth_value, parse_error_body},
    GatewayApiError,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct GatewayApi {
    config: GatewayConfig,
    client: Arc<Client>,
}

impl GatewayApi {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        let val = HeaderValue::from_str(&basic_auth_value(config.secret_key.reveal()))
            .map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        headers.insert(AUTHORIZATION, val);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        idempotency_key: Option<&str>,
        body: Option<B>,
    ) -> Result<T, GatewayApiError> {
        let url = self.url(path);
        trace!("💳️ Sending gateway request: {method} {url}");
        let mut req = self.client.request(method, url);
        if let Some(key) = idempotency_key {
            req = req.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            trace!("💳️ Gateway request successful. {status}");
            response.json::<T>().await.map_err(|e| GatewayApiError::JsonError(e.to_string()))
        } else {
            let body = response.text().await?;
            Err(parse_error_body(status.as_u16(), &body))
        }
    }

    /// Opens a checkout session. The returned payment is in `READY` status and carries the checkout URL the customer
    /// must visit to authorise the payment.
    pub async fn create_checkout(&self, checkout: &NewCheckout) -> Result<GatewayPaymentObject, GatewayApiError> {
        debug!("💳️ Opening checkout for order {} ({})", checkout.order_id, checkout.amount);
        let result = self.rest_query(Method::POST, "/v1/payments", None, Some(checkout)).await?;
        info!("💳️ Opened checkout for order {}", checkout.order_id);
        Ok(result)
    }

    /// Approves a payment the customer has authorised. The gateway checks that the order id and amount match the
    /// checkout.
    pub async fn confirm_payment(
        &self,
        request: &ConfirmPaymentRequest,
    ) -> Result<GatewayPaymentObject, GatewayApiError> {
        debug!("💳️ Confirming payment {} for order {}", request.payment_key, request.order_id);
        let result: GatewayPaymentObject =
            self.rest_query(Method::POST, "/v1/payments/confirm", None, Some(request)).await?;
        info!("💳️ Payment {} is now {}", result.payment_key, result.status);
        Ok(result)
    }

    pub async fn fetch_payment(&self, payment_key: &str) -> Result<GatewayPaymentObject, GatewayApiError> {
        let path = format!("/v1/payments/{payment_key}");
        debug!("💳️ Fetching payment {payment_key}");
        self.rest_query::<GatewayPaymentObject, ()>(Method::GET, &path, None, None).await
    }

    /// Cancels all or part of a completed payment. Requests carrying an `idempotency_key` the gateway has already
    /// processed return the original result instead of refunding again.
    pub async fn cancel_payment(
        &self,
        payment_key: &str,
        request: &CancelPaymentRequest,
        idempotency_key: &str,
    ) -> Result<GatewayPaymentObject, GatewayApiError> {
        let path = format!("/v1/payments/{payment_key}/cancel");
        debug!("💳️ Cancelling payment {payment_key}. Amount: {:?}. Key: {idempotency_key}", request.cancel_amount);
        let result: GatewayPaymentObject =
            self.rest_query(Method::POST, &path, Some(idempotency_key), Some(request)).await?;
        info!("💳️ Payment {payment_key} is now {}", result.status);
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use salon_common::Secret;

    use super::*;

    #[test]
    fn urls() {
        let config = GatewayConfig::new("http://127.0.0.1:9999/", Secret::new("test_sk".to_string()));
        let api = GatewayApi::new(config).unwrap();
        assert_eq!(api.url("/v1/payments/confirm"), "http://127.0.0.1:9999/v1/payments/confirm");
    }

    #[tokio::test]
    async fn unreachable_gateway() {
        // Nothing listens on port 9 (discard) in the test environment
        let config = GatewayConfig::new("http://127.0.0.1:9", Secret::new("test_sk".to_string()));
        let api = GatewayApi::new(config).unwrap();
        let err = api.fetch_payment("pk_missing").await.unwrap_err();
        assert!(matches!(err, GatewayApiError::ConnectionError(_) | GatewayApiError::Timeout), "{err}");
        assert!(!err.is_rejection());
    }
}
