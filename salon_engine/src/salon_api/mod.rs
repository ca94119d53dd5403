//! # Salon engine public API
//!
//! The `salon_api` module exposes the programmatic API of the reservation and settlement engine.
//! The API is modular, so that clients can pick the functionality they need.
//!
//! * [`availability_api`] answers "when can I book?" for a shop and a day.
//! * [`reservation_flow_api`] books reservations and drives them through their lifecycle.
//! * [`payment_flow_api`] opens and confirms deposit and final payments, executes refunds and reconciles with the
//!   payment gateway.
//! * [`point_ledger_api`] reads and adjusts loyalty point balances.
//! * [`webhook_api`] applies gateway notifications exactly once.
//!
//! # API usage
//!
//! Every API is created by supplying a backend that implements the storage traits it needs. The payment flow also
//! needs a [`crate::gateway::PaymentGateway`].
//!
//! ```rust,ignore
//! use salon_engine::{BookingPolicy, ReservationFlowApi, SqliteDatabase, events::EventProducers};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = ReservationFlowApi::new(db, BookingPolicy::default(), EventProducers::default());
//! let reservation = api.create_reservation(booking).await?;
//! ```
pub mod availability_api;
pub mod errors;
pub mod payment_flow_api;
pub mod point_ledger_api;
pub mod policy;
pub mod reservation_flow_api;
pub mod reservation_objects;
pub mod webhook_api;
