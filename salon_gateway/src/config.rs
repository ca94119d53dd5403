use std::time::Duration;

use log::*;
use salon_common::Secret;

pub const DEFAULT_GATEWAY_URL: &str = "https://api.tosspayments.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Scheme and host of the gateway API, without a trailing slash.
    pub base_url: String,
    pub secret_key: Secret<String>,
    /// Upper bound on a single HTTP round trip.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GATEWAY_URL.to_string(),
            secret_key: Secret::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    pub fn new<S: Into<String>>(base_url: S, secret_key: Secret<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, secret_key, ..Default::default() }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn new_from_env_or_default() -> Self {
        let base_url = std::env::var("SALON_GATEWAY_URL").unwrap_or_else(|_| {
            warn!("🪛️ SALON_GATEWAY_URL not set, using {DEFAULT_GATEWAY_URL}");
            DEFAULT_GATEWAY_URL.to_string()
        });
        let secret_key = Secret::new(std::env::var("SALON_GATEWAY_SECRET_KEY").unwrap_or_else(|_| {
            warn!("🪛️ SALON_GATEWAY_SECRET_KEY not set, using a (probably useless) test key");
            "test_sk_00000000000000000000".to_string()
        }));
        Self::new(base_url, secret_key)
    }
}
