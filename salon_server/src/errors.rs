use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use salon_engine::ReservationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("{0}")]
    ReservationError(#[from] ReservationError),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
}

impl ServerError {
    /// The stable machine-readable code sent to clients alongside the error message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReservationError(e) => e.code(),
            Self::InvalidRequestBody(_) | Self::InvalidRequestPath(_) => "VALIDATION_ERROR",
            Self::AuthenticationError(AuthError::InsufficientPermissions(_)) |
            Self::AuthenticationError(AuthError::ForbiddenPeer) |
            Self::AuthenticationError(AuthError::UnsignedWebhook(_)) => "FORBIDDEN",
            Self::AuthenticationError(_) => "UNAUTHORIZED",
            _ => "INTERNAL",
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(e) => match e {
                AuthError::MissingIdentity(_) => StatusCode::UNAUTHORIZED,
                AuthError::InvalidSignature => StatusCode::UNAUTHORIZED,
                AuthError::UnknownRole(_) => StatusCode::UNAUTHORIZED,
                AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
                AuthError::ForbiddenPeer => StatusCode::FORBIDDEN,
                AuthError::UnsignedWebhook(_) => StatusCode::FORBIDDEN,
            },
            Self::ReservationError(e) => reservation_error_status(e),
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "code": self.code(), "error": self.to_string() }).to_string())
    }
}

fn reservation_error_status(e: &ReservationError) -> StatusCode {
    match e {
        ReservationError::Validation(_) => StatusCode::BAD_REQUEST,
        ReservationError::InsufficientBalance(_) => StatusCode::BAD_REQUEST,
        ReservationError::AmountMismatch(_) => StatusCode::BAD_REQUEST,
        ReservationError::Forbidden(_) => StatusCode::FORBIDDEN,
        ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::SlotUnavailable => StatusCode::CONFLICT,
        ReservationError::StaleState(_) => StatusCode::CONFLICT,
        ReservationError::InvalidTransition(_) => StatusCode::CONFLICT,
        ReservationError::GatewayDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
        ReservationError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
        ReservationError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        ReservationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No identity was supplied with the request. {0}")]
    MissingIdentity(String),
    #[error("The identity signature is invalid.")]
    InvalidSignature,
    #[error("{0} is not a known role.")]
    UnknownRole(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("Requests from this address are not allowed.")]
    ForbiddenPeer,
    #[error("The webhook could not be authenticated. {0}")]
    UnsignedWebhook(String),
}
