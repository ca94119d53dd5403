//! Salon reservation engine
//!
//! The salon engine handles the life of a beauty-salon booking: finding a free slot, reserving it without ever
//! double-booking, collecting a deposit and the final balance through an external card-payment gateway, refunding
//! according to the cancellation policy, and keeping the customer's loyalty point ledger.
//!
//! The library is divided into these sections:
//! 1. Pure business rules: [`mod@slots`] (availability arithmetic), [`mod@state_machine`] (legal lifecycle
//!    transitions and their guards) and [`mod@refund_policy`] (how much of a payment goes back on cancellation).
//! 2. Storage contracts ([`mod@traits`]) and their SQLite implementation ([`SqliteDatabase`]). All multi-row effects
//!    happen in single transactions; the data types used in the database are defined in [`mod@db_types`].
//! 3. The public API ([`mod@salon_api`]), which ties the rules, the storage and the [`gateway::PaymentGateway`]
//!    together.
//!
//! The engine also emits events after state changes have been committed (see [`mod@events`]), so that notification
//! and other side effects can be hooked in without touching the flows.
pub mod db_types;
pub mod events;
pub mod gateway;
pub mod refund_policy;
pub mod salon_api;
pub mod slots;
pub mod state_machine;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use salon_api::{
    availability_api::AvailabilityApi,
    errors::ReservationError,
    payment_flow_api::PaymentFlowApi,
    point_ledger_api::PointLedgerApi,
    policy::{BookingPolicy, MAX_SERVICE_QUANTITY},
    reservation_flow_api::ReservationFlowApi,
    reservation_objects,
    webhook_api::WebhookApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    PaymentDatabase,
    PointLedgerDatabase,
    ReservationDatabase,
    ServiceCatalog,
    StorageError,
    WebhookDatabase,
};
