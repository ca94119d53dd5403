//! # Salon booking server
//! This crate hosts the REST server for the salon reservation engine. It is responsible for:
//! * Resolving the caller's identity from the headers forwarded by the upstream authenticator.
//! * Exposing availability, booking, lifecycle and payment endpoints backed by [`salon_engine`].
//! * Receiving payment notifications from the gateway and passing them through the webhook idempotency gate.
//! * Periodically reconciling pending payments and refunds with the gateway.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/api/...`: The booking API. Every call must carry a caller identity.
//! * `/webhooks/payment`: Payment notifications from the gateway. Signed with HMAC and optionally IP-whitelisted.

pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod reconciliation_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
