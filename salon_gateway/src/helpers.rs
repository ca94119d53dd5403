use crate::{data_objects::GatewayErrorBody, GatewayApiError};

/// The `Authorization` header value for a merchant secret key: Basic auth with an empty password.
pub fn basic_auth_value(secret_key: &str) -> String {
    format!("Basic {}", base64::encode(format!("{secret_key}:")))
}

/// Turns a non-2xx response body into a [`GatewayApiError::QueryError`]. Bodies that are not the gateway's error
/// object are passed through as the message.
pub fn parse_error_body(status: u16, body: &str) -> GatewayApiError {
    match serde_json::from_str::<GatewayErrorBody>(body) {
        Ok(e) => GatewayApiError::QueryError { status, code: e.code, message: e.message },
        Err(_) => GatewayApiError::QueryError { status, code: "UNKNOWN".to_string(), message: body.to_string() },
    }
}
