use chrono::NaiveDate;
use log::{debug, trace};
use salon_common::Points;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{
        NewReservation,
        NewReservationService,
        Reservation,
        ReservationPaymentStatus,
        ReservationService,
        ReservationStatus,
        StatusLogEntry,
    },
    reservation_objects::ReservationQueryFilter,
    slots::TimeWindow,
    traits::{StatusChange, StorageError},
};

/// Statuses that hold a time slot, as an SQL list.
const SLOT_HOLDING_STATUSES: &str = "('requested', 'confirmed', 'completed')";

/// Inserts the reservation if, and only if, no slot-holding reservation at the same shop overlaps `[start, end)` on
/// the same date. The existence check and the insert are a single statement, so two concurrent bookings for
/// overlapping windows can never both succeed.
///
/// Returns `None` if the slot is taken.
pub async fn insert_if_available(
    reservation: &NewReservation,
    conn: &mut SqliteConnection,
) -> Result<Option<Reservation>, StorageError> {
    let sql = format!(
        r#"
        INSERT INTO reservations (
            customer_id,
            shop_id,
            reservation_date,
            start_minute,
            end_minute,
            starts_at,
            status,
            payment_status,
            total_amount,
            deposit_amount,
            remaining_amount,
            points_used,
            memo
        )
        SELECT $1, $2, $3, $4, $5, $6, 'requested', $7, $8, $9, $10, $11, $12
        WHERE NOT EXISTS (
            SELECT 1 FROM reservations
            WHERE shop_id = $2
              AND reservation_date = $3
              AND status IN {SLOT_HOLDING_STATUSES}
              AND start_minute < $5
              AND $4 < end_minute
        )
        RETURNING *;
        "#
    );
    let inserted: Option<Reservation> = sqlx::query_as(&sql)
        .bind(&reservation.customer_id)
        .bind(&reservation.shop_id)
        .bind(reservation.reservation_date)
        .bind(reservation.start_minute)
        .bind(reservation.end_minute)
        .bind(reservation.starts_at)
        .bind(reservation.initial_payment_status().to_string())
        .bind(reservation.total_amount.value())
        .bind(reservation.deposit_amount.value())
        .bind(reservation.remaining_amount().value())
        .bind(reservation.points_used.value())
        .bind(&reservation.memo)
        .fetch_optional(conn)
        .await?;
    if let Some(r) = &inserted {
        debug!("🗃️ Reservation #{} saved for {} at shop {} on {}", r.id, r.customer_id, r.shop_id, r.reservation_date);
    }
    Ok(inserted)
}

pub async fn insert_services(
    reservation_id: i64,
    services: &[NewReservationService],
    conn: &mut SqliteConnection,
) -> Result<(), StorageError> {
    for (position, service) in services.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO reservation_services (
                reservation_id, position, service_id, service_name, quantity, unit_price, total_price, duration_minutes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(reservation_id)
        .bind(position as i64)
        .bind(&service.service_id)
        .bind(&service.service_name)
        .bind(service.quantity)
        .bind(service.unit_price.value())
        .bind(service.total_price().value())
        .bind(service.duration_minutes)
        .execute(&mut *conn)
        .await?;
    }
    trace!("🗃️ {} line items saved for reservation #{reservation_id}", services.len());
    Ok(())
}

pub async fn fetch_reservation(id: i64, conn: &mut SqliteConnection) -> Result<Option<Reservation>, sqlx::Error> {
    let reservation = sqlx::query_as("SELECT * FROM reservations WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(reservation)
}

pub async fn fetch_services(
    reservation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<ReservationService>, sqlx::Error> {
    let services = sqlx::query_as("SELECT * FROM reservation_services WHERE reservation_id = $1 ORDER BY position")
        .bind(reservation_id)
        .fetch_all(conn)
        .await?;
    Ok(services)
}

/// Fetches reservations according to criteria specified in the `ReservationQueryFilter`
///
/// Resulting reservations are ordered by date and start time in ascending order
pub async fn search_reservations(
    query: ReservationQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<Reservation>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM reservations ");
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(cid) = query.customer_id {
        where_clause.push("customer_id = ");
        where_clause.push_bind_unseparated(cid);
    }
    if let Some(shop_id) = query.shop_id {
        where_clause.push("shop_id = ");
        where_clause.push_bind_unseparated(shop_id);
    }
    if let Some(date) = query.date {
        where_clause.push("reservation_date = ");
        where_clause.push_bind_unseparated(date);
    }
    if let Some(since) = query.since {
        where_clause.push("datetime(starts_at) >= datetime(");
        where_clause.push_bind_unseparated(since);
        where_clause.push_unseparated(")");
    }
    if let Some(until) = query.until {
        where_clause.push("datetime(starts_at) <= datetime(");
        where_clause.push_bind_unseparated(until);
        where_clause.push_unseparated(")");
    }
    if let Some(statuses) = query.status.filter(|s| !s.is_empty()) {
        let status_clause = statuses.iter().map(|s| format!("'{}'", s.as_str())).collect::<Vec<_>>().join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    builder.push(" ORDER BY reservation_date ASC, start_minute ASC, id ASC");

    trace!("🗃️ Executing query: {}", builder.sql());
    let reservations = builder.build_query_as::<Reservation>().fetch_all(conn).await?;
    trace!("🗃️ Result of search_reservations: {}", reservations.len());
    Ok(reservations)
}

pub async fn fetch_busy_windows(
    shop_id: &str,
    date: NaiveDate,
    conn: &mut SqliteConnection,
) -> Result<Vec<TimeWindow>, sqlx::Error> {
    let sql = format!(
        "SELECT start_minute, end_minute FROM reservations WHERE shop_id = $1 AND reservation_date = $2 AND status IN \
         {SLOT_HOLDING_STATUSES} ORDER BY start_minute"
    );
    let rows: Vec<(i64, i64)> = sqlx::query_as(&sql).bind(shop_id).bind(date).fetch_all(conn).await?;
    Ok(rows.into_iter().map(|(start, end)| TimeWindow::new(start, end)).collect())
}

/// Applies `change` if the reservation is still at `change.expected_version`. The lifecycle timestamps follow the
/// target status. Returns `None` if the version moved on (or the reservation does not exist).
pub async fn update_status_versioned(
    change: &StatusChange,
    reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Reservation>, sqlx::Error> {
    let updated: Option<Reservation> = sqlx::query_as(
        r#"
        UPDATE reservations SET
            status = $1,
            version = version + 1,
            updated_at = CURRENT_TIMESTAMP,
            confirmed_at = CASE WHEN $1 = 'confirmed' THEN CURRENT_TIMESTAMP ELSE confirmed_at END,
            completed_at = CASE WHEN $1 = 'completed' THEN CURRENT_TIMESTAMP ELSE completed_at END,
            cancelled_at = CASE WHEN $1 IN ('cancelled_by_user', 'cancelled_by_shop', 'no_show')
                THEN CURRENT_TIMESTAMP ELSE cancelled_at END,
            cancellation_reason = COALESCE($2, cancellation_reason)
        WHERE id = $3 AND version = $4
        RETURNING *;
        "#,
    )
    .bind(change.to.as_str())
    .bind(reason)
    .bind(change.reservation_id)
    .bind(change.expected_version)
    .fetch_optional(conn)
    .await?;
    match &updated {
        Some(r) => debug!("🗃️ Reservation #{} is now {} (v{})", r.id, r.status, r.version),
        None => debug!(
            "🗃️ Reservation #{} was not at version {}. {} not applied",
            change.reservation_id, change.expected_version, change.to
        ),
    }
    Ok(updated)
}

/// Records the effect of a settled payment: the new aggregate payment status, an optional status change and any
/// earned points. Always bumps the version so that decisions taken on the pre-settlement snapshot go stale.
pub async fn record_settlement(
    id: i64,
    payment_status: ReservationPaymentStatus,
    new_status: Option<ReservationStatus>,
    points_earned: Points,
    conn: &mut SqliteConnection,
) -> Result<Reservation, StorageError> {
    let updated: Option<Reservation> = sqlx::query_as(
        r#"
        UPDATE reservations SET
            payment_status = $1,
            status = COALESCE($2, status),
            points_earned = points_earned + $3,
            version = version + 1,
            updated_at = CURRENT_TIMESTAMP,
            confirmed_at = CASE WHEN $2 = 'confirmed' THEN CURRENT_TIMESTAMP ELSE confirmed_at END,
            completed_at = CASE WHEN $2 = 'completed' THEN CURRENT_TIMESTAMP ELSE completed_at END
        WHERE id = $4
        RETURNING *;
        "#,
    )
    .bind(payment_status.to_string())
    .bind(new_status.map(|s| s.as_str()))
    .bind(points_earned.value())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(StorageError::ReservationNotFound(id))
}

pub async fn add_points_earned(id: i64, points: Points, conn: &mut SqliteConnection) -> Result<Reservation, StorageError> {
    let updated: Option<Reservation> =
        sqlx::query_as("UPDATE reservations SET points_earned = points_earned + $1 WHERE id = $2 RETURNING *")
            .bind(points.value())
            .bind(id)
            .fetch_optional(conn)
            .await?;
    updated.ok_or(StorageError::ReservationNotFound(id))
}

pub async fn update_payment_status(
    id: i64,
    payment_status: ReservationPaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Reservation, StorageError> {
    let updated: Option<Reservation> = sqlx::query_as(
        "UPDATE reservations SET payment_status = $1, version = version + 1, updated_at = CURRENT_TIMESTAMP WHERE id = \
         $2 RETURNING *",
    )
    .bind(payment_status.to_string())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(StorageError::ReservationNotFound(id))
}

pub async fn fetch_status_log(
    reservation_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<StatusLogEntry>, sqlx::Error> {
    let log = sqlx::query_as("SELECT * FROM reservation_status_log WHERE reservation_id = $1 ORDER BY id")
        .bind(reservation_id)
        .fetch_all(conn)
        .await?;
    Ok(log)
}
