use chrono::NaiveDate;

use crate::{
    db_types::{NewReservation, Reservation, ReservationService, StatusLogEntry},
    reservation_objects::ReservationQueryFilter,
    slots::TimeWindow,
    traits::{
        data_objects::{ClosureOutcome, ClosurePlan, CompletionPlan, InsertReservationResult, StatusChange, TransitionResult},
        StorageError,
    },
};

/// Storage behaviour for the reservation lifecycle.
///
/// Implementations must make every method that changes state atomic, and must apply status changes only if the
/// reservation is still at the version the caller read. Callers decide *whether* a transition is allowed (see
/// [`crate::state_machine`]); the backend guarantees that the decision was made on current data.
#[allow(async_fn_in_trait)]
pub trait ReservationDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Inserts a reservation in `requested` status, but only if no active reservation for the same shop overlaps
    /// the requested window. The overlap check and the insert are one atomic step.
    ///
    /// In the same transaction, the line items are stored and, if `points_used` is non-zero, the points are debited
    /// from the customer's ledger and recorded as a completed `POINTS` payment against the final leg.
    async fn insert_reservation(&self, reservation: NewReservation) -> Result<InsertReservationResult, StorageError>;

    async fn fetch_reservation(&self, id: i64) -> Result<Option<Reservation>, StorageError>;

    async fn fetch_reservation_services(&self, id: i64) -> Result<Vec<ReservationService>, StorageError>;

    /// Resulting reservations are ordered by date and start time, ascending.
    async fn search_reservations(&self, filter: ReservationQueryFilter) -> Result<Vec<Reservation>, StorageError>;

    /// The windows held by active reservations at `shop_id` on `date`.
    async fn fetch_busy_windows(&self, shop_id: &str, date: NaiveDate) -> Result<Vec<TimeWindow>, StorageError>;

    /// Applies a bare status change (e.g. `requested → confirmed`).
    async fn apply_status_change(&self, change: StatusChange) -> Result<TransitionResult<Reservation>, StorageError>;

    /// Moves the reservation to `completed` and credits earned points in one transaction.
    async fn complete_reservation(&self, plan: CompletionPlan) -> Result<TransitionResult<Reservation>, StorageError>;

    /// Cancels a reservation or marks it as a no-show. Pending refunds, restored points and compensation points in
    /// the plan are written in the same transaction as the status change.
    async fn close_reservation(&self, plan: ClosurePlan) -> Result<TransitionResult<ClosureOutcome>, StorageError>;

    /// Every status the reservation has passed through, oldest first.
    async fn fetch_status_log(&self, id: i64) -> Result<Vec<StatusLogEntry>, StorageError>;
}
