//! A thin client for the card-payment gateway.
//!
//! The gateway speaks JSON over HTTPS and authenticates merchants with HTTP Basic auth, using the secret key as the
//! user name and an empty password. Only the four calls the booking service needs are wrapped: opening a checkout,
//! confirming an authorised payment, looking a payment up, and cancelling (refunding) all or part of it.
mod api;
mod config;
mod data_objects;
mod error;

pub mod helpers;

pub use api::GatewayApi;
pub use config::GatewayConfig;
pub use data_objects::{CancelPaymentRequest, ConfirmPaymentRequest, GatewayCancel, GatewayPaymentObject, NewCheckout};
pub use error::GatewayApiError;
