use log::{debug, trace};
use salon_common::Points;
use sqlx::SqliteConnection;

use crate::db_types::{PointTransaction, PointTxType};

pub async fn fetch_balance(user_id: &str, conn: &mut SqliteConnection) -> Result<Points, sqlx::Error> {
    let balance: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0) FROM point_transactions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    Ok(Points::from(balance))
}

/// The user's point history, newest first.
pub async fn fetch_history(user_id: &str, conn: &mut SqliteConnection) -> Result<Vec<PointTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM point_transactions WHERE user_id = $1 ORDER BY id DESC")
        .bind(user_id)
        .fetch_all(conn)
        .await
}

pub async fn fetch_for_reservation(
    reservation_id: i64,
    tx_type: PointTxType,
    conn: &mut SqliteConnection,
) -> Result<Option<PointTransaction>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM point_transactions WHERE reservation_id = $1 AND tx_type = $2")
        .bind(reservation_id)
        .bind(tx_type.to_string())
        .fetch_optional(conn)
        .await
}

/// Debits `amount` points, if and only if the user's balance covers it. The balance check and the debit are one
/// statement. Returns `None` if the balance is too low.
pub async fn use_points(
    user_id: &str,
    amount: Points,
    reservation_id: Option<i64>,
    memo: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<PointTransaction>, sqlx::Error> {
    let tx: Option<PointTransaction> = sqlx::query_as(
        r#"
        INSERT INTO point_transactions (user_id, tx_type, amount, reservation_id, memo)
        SELECT $1, 'used', -$2, $3, $4
        WHERE (SELECT COALESCE(SUM(amount), 0) FROM point_transactions WHERE user_id = $1) >= $2
        RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(amount.value())
    .bind(reservation_id)
    .bind(memo)
    .fetch_optional(conn)
    .await?;
    match &tx {
        Some(t) => debug!("🗃️ {user_id} used {amount} (entry #{})", t.id),
        None => debug!("🗃️ {user_id} does not have {amount} to spend"),
    }
    Ok(tx)
}

/// Credits points to a user. Credits tied to a reservation are recorded at most once per type; a repeat returns
/// `None` and leaves the ledger untouched.
pub async fn credit(
    user_id: &str,
    tx_type: PointTxType,
    amount: Points,
    reservation_id: Option<i64>,
    memo: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<PointTransaction>, sqlx::Error> {
    let tx: Option<PointTransaction> = sqlx::query_as(
        r#"
        INSERT INTO point_transactions (user_id, tx_type, amount, reservation_id, memo)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(tx_type.to_string())
    .bind(amount.value())
    .bind(reservation_id)
    .bind(memo)
    .fetch_optional(conn)
    .await?;
    match &tx {
        Some(t) => trace!("🗃️ {} {} credited to {user_id} (entry #{})", tx_type, t.amount, t.id),
        None => debug!("🗃️ {tx_type} points for reservation {reservation_id:?} were already credited to {user_id}"),
    }
    Ok(tx)
}
