//! #  Storage contracts
//!
//! This module defines the interfaces that database *backends* must implement to support the settlement engine.
//!
//! * [`ReservationDatabase`] covers the reservation lifecycle: atomic slot-guarded booking, versioned status
//!   changes, completion and closure (cancellation / no-show) with their side effects, and the status audit log.
//! * [`PaymentDatabase`] covers payments and refunds, including the shared settlement transition.
//! * [`PointLedgerDatabase`] is the loyalty point ledger.
//! * [`WebhookDatabase`] is the exactly-once gate for gateway notifications.
//! * [`ServiceCatalog`] is read access to prices, durations, deposit rules and opening hours.
//!
//! The APIs in [`crate::salon_api`] are generic over these traits, so the business rules can be exercised against any
//! backend. [`crate::SqliteDatabase`] implements all of them.
mod data_objects;
mod errors;
mod payment_database;
mod point_ledger;
mod reservation_database;
mod service_catalog;
mod webhook_database;

pub use data_objects::{
    ClosureOutcome,
    ClosurePlan,
    CompletionPlan,
    InsertPaymentResult,
    InsertReservationResult,
    PaymentOutcome,
    PointUseResult,
    Settlement,
    SettlementPolicy,
    SettlementResult,
    StatusChange,
    TransitionResult,
    WebhookGateResult,
};
pub use errors::StorageError;
pub use payment_database::PaymentDatabase;
pub use point_ledger::PointLedgerDatabase;
pub use reservation_database::ReservationDatabase;
pub use service_catalog::ServiceCatalog;
pub use webhook_database::WebhookDatabase;
