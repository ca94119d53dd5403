//! `SqliteDatabase` is the SQLite backend of the settlement engine.
//!
//! It implements all the storage traits defined in the [`crate::traits`] module.
use std::fmt::Debug;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use log::*;
use salon_common::Points;
use sqlx::SqlitePool;

use super::db::{catalog, db_url, new_pool, payments, points, refunds, reservations, webhooks};
use crate::{
    db_types::{
        DepositPolicy,
        NewPayment,
        NewReservation,
        OperatingHours,
        Payment,
        PaymentLeg,
        PointTransaction,
        PointTxType,
        Refund,
        Reservation,
        ReservationService,
        ServiceQuote,
        SettlementJournalEntry,
        StatusLogEntry,
        WebhookEvent,
        WebhookRecord,
    },
    reservation_objects::ReservationQueryFilter,
    slots::TimeWindow,
    traits::{
        ClosureOutcome,
        ClosurePlan,
        CompletionPlan,
        InsertPaymentResult,
        InsertReservationResult,
        PaymentDatabase,
        PaymentOutcome,
        PointLedgerDatabase,
        PointUseResult,
        ReservationDatabase,
        ServiceCatalog,
        SettlementPolicy,
        SettlementResult,
        StatusChange,
        StorageError,
        TransitionResult,
        WebhookDatabase,
        WebhookGateResult,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

//--------------------------------------   ReservationDatabase   -----------------------------------------------------
impl ReservationDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_reservation(&self, reservation: NewReservation) -> Result<InsertReservationResult, StorageError> {
        let mut tx = self.pool.begin().await?;
        let Some(saved) = reservations::insert_if_available(&reservation, &mut tx).await? else {
            debug!(
                "🗃️ {}-{} on {} at shop {} is taken",
                reservation.start_minute, reservation.end_minute, reservation.reservation_date, reservation.shop_id
            );
            return Ok(InsertReservationResult::SlotUnavailable);
        };
        reservations::insert_services(saved.id, &reservation.services, &mut tx).await?;
        if reservation.points_used.is_positive() {
            let memo = format!("Redeemed on reservation #{}", saved.id);
            let used =
                points::use_points(&saved.customer_id, reservation.points_used, Some(saved.id), Some(&memo), &mut tx)
                    .await?;
            if used.is_none() {
                let balance = points::fetch_balance(&saved.customer_id, &mut tx).await?;
                tx.rollback().await?;
                return Ok(InsertReservationResult::InsufficientPoints(balance));
            }
            payments::insert_points_payment(saved.id, reservation.points_used, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(InsertReservationResult::Inserted(saved))
    }

    async fn fetch_reservation(&self, id: i64) -> Result<Option<Reservation>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let reservation = reservations::fetch_reservation(id, &mut conn).await?;
        Ok(reservation)
    }

    async fn fetch_reservation_services(&self, id: i64) -> Result<Vec<ReservationService>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let services = reservations::fetch_services(id, &mut conn).await?;
        Ok(services)
    }

    async fn search_reservations(&self, filter: ReservationQueryFilter) -> Result<Vec<Reservation>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let result = reservations::search_reservations(filter, &mut conn).await?;
        Ok(result)
    }

    async fn fetch_busy_windows(&self, shop_id: &str, date: NaiveDate) -> Result<Vec<TimeWindow>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let windows = reservations::fetch_busy_windows(shop_id, date, &mut conn).await?;
        Ok(windows)
    }

    async fn apply_status_change(&self, change: StatusChange) -> Result<TransitionResult<Reservation>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let result = match reservations::update_status_versioned(&change, None, &mut conn).await? {
            Some(r) => TransitionResult::Applied(r),
            None => TransitionResult::Stale,
        };
        Ok(result)
    }

    async fn complete_reservation(&self, plan: CompletionPlan) -> Result<TransitionResult<Reservation>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut reservation) = reservations::update_status_versioned(&plan.change, None, &mut tx).await? else {
            return Ok(TransitionResult::Stale);
        };
        if plan.points_earned.is_positive() {
            let memo = format!("Earned on completion of reservation #{}", reservation.id);
            let credited = points::credit(
                &reservation.customer_id,
                PointTxType::Earned,
                plan.points_earned,
                Some(reservation.id),
                Some(&memo),
                &mut tx,
            )
            .await?;
            if let Some(entry) = credited {
                reservation = reservations::add_points_earned(reservation.id, entry.amount, &mut tx).await?;
            }
        }
        tx.commit().await?;
        Ok(TransitionResult::Applied(reservation))
    }

    async fn close_reservation(&self, plan: ClosurePlan) -> Result<TransitionResult<ClosureOutcome>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let Some(reservation) =
            reservations::update_status_versioned(&plan.change, plan.reason.as_deref(), &mut tx).await?
        else {
            return Ok(TransitionResult::Stale);
        };
        let previous_status = reservations::fetch_status_log(reservation.id, &mut tx)
            .await?
            .into_iter()
            .last()
            .and_then(|entry| entry.from_status)
            .ok_or_else(|| StorageError::CorruptData(format!("No status history for reservation #{}", reservation.id)))?;
        let mut saved_refunds = Vec::with_capacity(plan.refunds.len());
        for refund in &plan.refunds {
            saved_refunds.push(refunds::insert_refund(refund, &mut tx).await?);
        }
        let mut points_restored = Points::zero();
        if plan.restore_points.is_positive() {
            let memo = format!("Returned after reservation #{} was {}", reservation.id, reservation.status);
            let entry = points::credit(
                &reservation.customer_id,
                PointTxType::Restored,
                plan.restore_points,
                Some(reservation.id),
                Some(&memo),
                &mut tx,
            )
            .await?;
            points_restored = entry.map(|e| e.amount).unwrap_or_else(Points::zero);
        }
        let mut points_compensated = Points::zero();
        if plan.compensation_points.is_positive() {
            let memo = format!("Compensation for shop cancellation of reservation #{}", reservation.id);
            let entry = points::credit(
                &reservation.customer_id,
                PointTxType::Compensation,
                plan.compensation_points,
                Some(reservation.id),
                Some(&memo),
                &mut tx,
            )
            .await?;
            points_compensated = entry.map(|e| e.amount).unwrap_or_else(Points::zero);
        }
        tx.commit().await?;
        let outcome =
            ClosureOutcome { previous_status, reservation, refunds: saved_refunds, points_restored, points_compensated };
        Ok(TransitionResult::Applied(outcome))
    }

    async fn fetch_status_log(&self, id: i64) -> Result<Vec<StatusLogEntry>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let log = reservations::fetch_status_log(id, &mut conn).await?;
        Ok(log)
    }
}

//--------------------------------------     PaymentDatabase     -----------------------------------------------------
impl PaymentDatabase for SqliteDatabase {
    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<InsertPaymentResult, StorageError> {
        let mut tx = self.pool.begin().await?;
        if let Some(inserted) = payments::insert_pending(&payment, &mut tx).await? {
            tx.commit().await?;
            return Ok(InsertPaymentResult::Inserted(inserted));
        }
        let existing = payments::fetch_live_for_leg(payment.reservation_id, payment.leg, &mut tx).await?;
        tx.commit().await?;
        match existing {
            Some(p) => Ok(InsertPaymentResult::LegOccupied(p)),
            None => Err(StorageError::IntegrityViolation(format!(
                "Order id {} or its payment key is already in use",
                payment.order_id
            ))),
        }
    }

    async fn fetch_payment_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_by_order_id(order_id, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payment_by_key(&self, payment_key: &str) -> Result<Option<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_by_key(payment_key, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_payments_for_reservation(&self, reservation_id: i64) -> Result<Vec<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_for_reservation(reservation_id, &mut conn).await?;
        Ok(payments)
    }

    async fn fetch_live_payment(&self, reservation_id: i64, leg: PaymentLeg) -> Result<Option<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_live_for_leg(reservation_id, leg, &mut conn).await?;
        Ok(payment)
    }

    async fn settle_payment(
        &self,
        payment_id: i64,
        outcome: PaymentOutcome,
        policy: SettlementPolicy,
    ) -> Result<SettlementResult, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = payments::settle(payment_id, outcome, policy, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_stale_pending_payments(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let payments = payments::fetch_stale_pending(cutoff, &mut conn).await?;
        Ok(payments)
    }

    async fn fetch_refunds_for_reservation(&self, reservation_id: i64) -> Result<Vec<Refund>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let refunds = refunds::fetch_for_reservation(reservation_id, &mut conn).await?;
        Ok(refunds)
    }

    async fn fetch_pending_refunds(&self, reservation_id: Option<i64>) -> Result<Vec<Refund>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let refunds = refunds::fetch_pending(reservation_id, &mut conn).await?;
        Ok(refunds)
    }

    async fn complete_refund(&self, refund_id: i64, gateway_reference: &str) -> Result<Option<Refund>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let Some(refund) = refunds::mark_completed(refund_id, Some(gateway_reference), &mut tx).await? else {
            return Ok(None);
        };
        let reservation = refunds::recompute_payment_status(refund.reservation_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Refund #{refund_id} completed. Reservation #{} is {}", reservation.id, reservation.payment_status);
        Ok(Some(refund))
    }

    async fn fail_refund(&self, refund_id: i64, reason: &str) -> Result<Option<Refund>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let refund = refunds::mark_failed(refund_id, reason, &mut conn).await?;
        Ok(refund)
    }

    async fn fetch_settlement_journal(&self, reservation_id: i64) -> Result<Vec<SettlementJournalEntry>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let journal = payments::fetch_settlement_journal(reservation_id, &mut conn).await?;
        Ok(journal)
    }
}

//--------------------------------------   PointLedgerDatabase   -----------------------------------------------------
impl PointLedgerDatabase for SqliteDatabase {
    async fn fetch_point_balance(&self, user_id: &str) -> Result<Points, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let balance = points::fetch_balance(user_id, &mut conn).await?;
        Ok(balance)
    }

    async fn fetch_point_history(&self, user_id: &str) -> Result<Vec<PointTransaction>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let history = points::fetch_history(user_id, &mut conn).await?;
        Ok(history)
    }

    async fn use_points(
        &self,
        user_id: &str,
        amount: Points,
        reservation_id: Option<i64>,
        memo: Option<&str>,
    ) -> Result<PointUseResult, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = match points::use_points(user_id, amount, reservation_id, memo, &mut tx).await? {
            Some(entry) => PointUseResult::Applied(entry),
            None => PointUseResult::InsufficientBalance(points::fetch_balance(user_id, &mut tx).await?),
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn credit_points(
        &self,
        user_id: &str,
        tx_type: PointTxType,
        amount: Points,
        reservation_id: Option<i64>,
        memo: Option<&str>,
    ) -> Result<PointTransaction, StorageError> {
        if tx_type == PointTxType::Used || !amount.is_positive() {
            return Err(StorageError::IntegrityViolation(format!("{amount} cannot be credited as {tx_type}")));
        }
        let Some(rid) = reservation_id else {
            if tx_type != PointTxType::Granted {
                return Err(StorageError::IntegrityViolation(format!("{tx_type} points need a reservation")));
            }
            let mut conn = self.pool.acquire().await?;
            let entry = points::credit(user_id, tx_type, amount, None, memo, &mut conn).await?;
            return entry.ok_or_else(|| StorageError::CorruptData(format!("Grant to {user_id} was not recorded")));
        };
        let mut tx = self.pool.begin().await?;
        let entry = match points::credit(user_id, tx_type, amount, Some(rid), memo, &mut tx).await? {
            Some(entry) => entry,
            None => points::fetch_for_reservation(rid, tx_type, &mut tx).await?.ok_or_else(|| {
                StorageError::CorruptData(format!("{tx_type} entry for reservation #{rid} is missing"))
            })?,
        };
        tx.commit().await?;
        Ok(entry)
    }
}

//--------------------------------------     WebhookDatabase     -----------------------------------------------------
impl WebhookDatabase for SqliteDatabase {
    async fn process_webhook(
        &self,
        event: WebhookEvent,
        policy: SettlementPolicy,
    ) -> Result<WebhookGateResult, StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = webhooks::process_event(event, policy, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_webhook(&self, event_id: &str) -> Result<Option<WebhookRecord>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let record = webhooks::fetch_webhook(event_id, &mut conn).await?;
        Ok(record)
    }
}

//--------------------------------------      ServiceCatalog     -----------------------------------------------------
impl ServiceCatalog for SqliteDatabase {
    async fn fetch_service_quote(&self, shop_id: &str, service_id: &str) -> Result<Option<ServiceQuote>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_service_quote(shop_id, service_id, &mut conn).await
    }

    async fn fetch_operating_hours(
        &self,
        shop_id: &str,
        weekday: Weekday,
    ) -> Result<Option<OperatingHours>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_operating_hours(shop_id, weekday, &mut conn).await
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date. Migrations that have already been applied are skipped.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("Could not migrate the database. {e}")))?;
        info!("🗃️ Database schema is up to date");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Adds a service to a shop's catalog, or replaces it.
    pub async fn upsert_service(
        &self,
        shop_id: &str,
        service_id: &str,
        name: &str,
        price: i64,
        duration_minutes: i64,
        deposit: DepositPolicy,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::upsert_service(shop_id, service_id, name, price, duration_minutes, deposit, &mut conn).await
    }

    pub async fn set_operating_hours(
        &self,
        shop_id: &str,
        weekday: Weekday,
        open_minute: i64,
        close_minute: i64,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        catalog::set_operating_hours(shop_id, weekday, open_minute, close_minute, &mut conn).await
    }
}
