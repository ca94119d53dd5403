//! A seeded shop and a fully wired set of APIs for integration tests.
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use salon_common::{Money, Points};

use crate::{
    db_types::{DepositPolicy, PaymentLeg},
    events::EventProducers,
    reservation_objects::{BookingRequest, ConfirmPaymentRequest, PaymentConfirmation, ServiceSelection},
    slots::local_to_utc,
    test_utils::{
        mock_gateway::MockGateway,
        prepare_env::{prepare_test_env, random_db_path},
    },
    AvailabilityApi,
    BookingPolicy,
    PaymentFlowApi,
    PointLedgerApi,
    ReservationError,
    ReservationFlowApi,
    SqliteDatabase,
    WebhookApi,
};

pub const SHOP_ID: &str = "gangnam-01";
/// ₩30,000, 60 minutes, 20% deposit
pub const HAIRCUT: &str = "haircut";
/// ₩80,000, 120 minutes, ₩10,000 deposit
pub const COLORING: &str = "coloring";
/// ₩40,000, 30 minutes, no deposit
pub const MANICURE: &str = "manicure";
/// ₩50,000, 60 minutes, paid in full up front
pub const SCALP_CARE: &str = "scalp-care";

/// Opens at 10:00 and closes at 20:00, local time.
pub const OPEN_MINUTE: i64 = 10 * 60;
pub const CLOSE_MINUTE: i64 = 20 * 60;

pub async fn seed_shop(db: &SqliteDatabase, shop_id: &str) -> Result<(), ReservationError> {
    db.upsert_service(shop_id, HAIRCUT, "Haircut", 30_000, 60, DepositPolicy::Percent(20)).await?;
    db.upsert_service(shop_id, COLORING, "Coloring", 80_000, 120, DepositPolicy::Fixed(Money::from(10_000))).await?;
    db.upsert_service(shop_id, MANICURE, "Manicure", 40_000, 30, DepositPolicy::None).await?;
    db.upsert_service(shop_id, SCALP_CARE, "Scalp care", 50_000, 60, DepositPolicy::Full).await?;
    for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri, Weekday::Sat] {
        db.set_operating_hours(shop_id, day, OPEN_MINUTE, CLOSE_MINUTE).await?;
    }
    Ok(())
}

/// The first day at least `days_ahead` days from now on which the test shop is open. The shop is closed on Sundays.
pub fn open_day(days_ahead: i64) -> NaiveDate {
    let mut date = Utc::now().date_naive() + Duration::days(days_ahead);
    if date.weekday() == Weekday::Sun {
        date += Duration::days(1);
    }
    date
}

/// The next Sunday at least a day from now.
pub fn closed_day() -> NaiveDate {
    let mut date = Utc::now().date_naive() + Duration::days(1);
    while date.weekday() != Weekday::Sun {
        date += Duration::days(1);
    }
    date
}

pub fn booking(customer_id: &str, services: &[(&str, i64)], date: NaiveDate, start_minute: i64) -> BookingRequest {
    BookingRequest {
        customer_id: customer_id.to_string(),
        shop_id: SHOP_ID.to_string(),
        services: services
            .iter()
            .map(|(id, quantity)| ServiceSelection { service_id: id.to_string(), quantity: *quantity })
            .collect(),
        date,
        start_minute,
        points_to_use: Points::zero(),
        memo: None,
    }
}

/// Everything an integration test needs: a migrated database with [`SHOP_ID`] seeded, a scripted gateway and the
/// public APIs wired to both.
pub struct TestSalon {
    pub url: String,
    pub db: SqliteDatabase,
    pub gateway: MockGateway,
    pub policy: BookingPolicy,
    pub availability: AvailabilityApi<SqliteDatabase>,
    pub reservations: ReservationFlowApi<SqliteDatabase>,
    pub payments: PaymentFlowApi<SqliteDatabase, MockGateway>,
    pub points: PointLedgerApi<SqliteDatabase>,
    pub webhooks: WebhookApi<SqliteDatabase>,
}

impl TestSalon {
    pub async fn new() -> Self {
        Self::with_policy(BookingPolicy::default(), EventProducers::default()).await
    }

    pub async fn with_policy(policy: BookingPolicy, producers: EventProducers) -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 25).await.expect("Error creating database");
        seed_shop(&db, SHOP_ID).await.expect("Error seeding shop");
        let gateway = MockGateway::new();
        Self {
            availability: AvailabilityApi::new(db.clone(), policy.slot_minutes),
            reservations: ReservationFlowApi::new(db.clone(), policy.clone(), producers.clone()),
            payments: PaymentFlowApi::new(db.clone(), gateway.clone(), policy.clone(), producers.clone()),
            points: PointLedgerApi::new(db.clone()),
            webhooks: WebhookApi::new(db.clone(), policy.settlement_policy(), producers),
            url,
            db,
            gateway,
            policy,
        }
    }

    pub fn starts_at(&self, date: NaiveDate, start_minute: i64) -> DateTime<Utc> {
        local_to_utc(date, start_minute, &self.policy.utc_offset).expect("Invalid local time")
    }

    /// Opens a checkout for `leg` and has the customer approve it.
    pub async fn pay(&self, reservation_id: i64, leg: PaymentLeg) -> Result<PaymentConfirmation, ReservationError> {
        let initiation = self.payments.initiate_payment(reservation_id, leg).await?;
        let payment = initiation.payment;
        let request = ConfirmPaymentRequest {
            payment_key: payment.payment_key.clone().unwrap_or_default(),
            order_id: payment.order_id.clone(),
            amount: payment.amount,
        };
        self.payments.confirm_payment(request).await
    }

    pub async fn close(self) {
        self.db.pool().close().await;
        let path = self.url.trim_start_matches("sqlite://");
        let _ = std::fs::remove_file(path);
    }
}
