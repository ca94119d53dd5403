//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interaction are maintained by simple functions (rather than stateful structs) that accept a
//! `&mut SqliteConnection` argument. Callers can obtain a connection from a pool, or create an atomic transaction as
//! the need arises and call through to the functions without any other changes.
//!
//! SQLite allows a single writer at a time. A transaction that reads first and writes later has to upgrade its lock,
//! and fails immediately if another writer got in between. Every transaction in [`super::SqliteDatabase`] therefore
//! opens with the write that guards it (a conditional insert, a versioned update or a conditional status change), so
//! concurrent writers queue on the busy timeout instead of failing.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod catalog;
pub mod payments;
pub mod points;
pub mod refunds;
pub mod reservations;
pub mod webhooks;

const SQLITE_DB_URL: &str = "sqlite://data/salon_store.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn db_url() -> String {
    let result = env::var("SALON_DATABASE_URL").unwrap_or_else(|_| {
        info!("SALON_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}
