use chrono::Weekday;
use log::trace;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{DepositPolicy, OperatingHours, ServiceQuote},
    traits::StorageError,
};

#[derive(Debug, Clone, FromRow)]
struct ServiceRow {
    id: String,
    shop_id: String,
    name: String,
    price: i64,
    duration_minutes: i64,
    deposit_policy: String,
    deposit_value: i64,
}

impl TryFrom<ServiceRow> for ServiceQuote {
    type Error = StorageError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        let deposit_policy = DepositPolicy::from_columns(&row.deposit_policy, row.deposit_value)
            .map_err(|e| StorageError::CorruptData(e.to_string()))?;
        Ok(ServiceQuote {
            service_id: row.id,
            shop_id: row.shop_id,
            name: row.name,
            price: row.price.into(),
            duration_minutes: row.duration_minutes,
            deposit_policy,
        })
    }
}

pub async fn fetch_service_quote(
    shop_id: &str,
    service_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<ServiceQuote>, StorageError> {
    let row: Option<ServiceRow> = sqlx::query_as(
        "SELECT id, shop_id, name, price, duration_minutes, deposit_policy, deposit_value FROM shop_services WHERE id \
         = $1 AND shop_id = $2 AND active = 1",
    )
    .bind(service_id)
    .bind(shop_id)
    .fetch_optional(conn)
    .await?;
    row.map(ServiceQuote::try_from).transpose()
}

pub async fn fetch_operating_hours(
    shop_id: &str,
    weekday: Weekday,
    conn: &mut SqliteConnection,
) -> Result<Option<OperatingHours>, StorageError> {
    let hours = sqlx::query_as("SELECT open_minute, close_minute FROM shop_hours WHERE shop_id = $1 AND weekday = $2")
        .bind(shop_id)
        .bind(i64::from(weekday.num_days_from_monday()))
        .fetch_optional(conn)
        .await?;
    Ok(hours)
}

/// Inserts or replaces a catalog entry. Used to seed the catalog snapshot.
pub async fn upsert_service(
    shop_id: &str,
    service_id: &str,
    name: &str,
    price: i64,
    duration_minutes: i64,
    deposit: DepositPolicy,
    conn: &mut SqliteConnection,
) -> Result<(), StorageError> {
    let (kind, value) = match deposit {
        DepositPolicy::None => ("none", 0),
        DepositPolicy::Percent(p) => ("percent", p),
        DepositPolicy::Fixed(m) => ("fixed", m.value()),
        DepositPolicy::Full => ("full", 0),
    };
    sqlx::query(
        r#"
        INSERT INTO shop_services (id, shop_id, name, price, duration_minutes, deposit_policy, deposit_value)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            shop_id = excluded.shop_id,
            name = excluded.name,
            price = excluded.price,
            duration_minutes = excluded.duration_minutes,
            deposit_policy = excluded.deposit_policy,
            deposit_value = excluded.deposit_value,
            active = 1
        "#,
    )
    .bind(service_id)
    .bind(shop_id)
    .bind(name)
    .bind(price)
    .bind(duration_minutes)
    .bind(kind)
    .bind(value)
    .execute(conn)
    .await?;
    trace!("🗃️ Catalog entry {service_id} for shop {shop_id} saved");
    Ok(())
}

pub async fn set_operating_hours(
    shop_id: &str,
    weekday: Weekday,
    open_minute: i64,
    close_minute: i64,
    conn: &mut SqliteConnection,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO shop_hours (shop_id, weekday, open_minute, close_minute) VALUES ($1, $2, $3, $4)
        ON CONFLICT (shop_id, weekday) DO UPDATE SET open_minute = excluded.open_minute, close_minute = excluded.close_minute
        "#,
    )
    .bind(shop_id)
    .bind(i64::from(weekday.num_days_from_monday()))
    .bind(open_minute)
    .bind(close_minute)
    .execute(conn)
    .await?;
    Ok(())
}
