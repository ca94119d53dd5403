use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("The gateway did not respond in time")]
    Timeout,
    #[error("Could not reach the gateway: {0}")]
    ConnectionError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Request failed. Error {status}. {code}: {message}")]
    QueryError { status: u16, code: String, message: String },
}

impl GatewayApiError {
    /// Whether the gateway refused the request outright, so it certainly had no effect.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::QueryError { status, .. } if *status < 500)
    }
}

impl From<reqwest::Error> for GatewayApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() || e.is_request() {
            Self::ConnectionError(e.to_string())
        } else if e.is_decode() {
            Self::JsonError(e.to_string())
        } else {
            Self::RestResponseError(e.to_string())
        }
    }
}
