use std::{collections::HashMap, fmt::Debug};

use cucumber::World;
use salon_engine::{
    db_types::Reservation,
    test_utils::fixtures::TestSalon,
    traits::WebhookGateResult,
    ReservationError,
};

#[derive(Default, World)]
pub struct SalonWorld {
    pub system: Option<TestSalon>,
    /// The most recent reservation of each customer
    pub reservations: HashMap<String, Reservation>,
    pub last_error: Option<ReservationError>,
    pub last_webhook: Option<WebhookGateResult>,
}

impl Debug for SalonWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalonWorld")
            .field("db", &self.system.as_ref().map(|s| s.url.as_str()))
            .field("reservations", &self.reservations.keys().collect::<Vec<_>>())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl SalonWorld {
    pub fn salon(&self) -> &TestSalon {
        self.system.as_ref().expect("The salon has not been set up")
    }

    pub fn reservation(&self, customer: &str) -> &Reservation {
        self.reservations.get(customer).unwrap_or_else(|| panic!("{customer} has not booked anything"))
    }

    /// Re-reads a customer's reservation from the database.
    pub async fn refresh(&mut self, customer: &str) -> Reservation {
        let id = self.reservation(customer).id;
        let reservation = self.salon().reservations.fetch_reservation(id).await.expect("Error fetching reservation");
        self.reservations.insert(customer.to_string(), reservation.clone());
        reservation
    }

    pub fn record<T>(&mut self, result: Result<T, ReservationError>) -> Option<T> {
        match result {
            Ok(v) => {
                self.last_error = None;
                Some(v)
            },
            Err(e) => {
                self.last_error = Some(e);
                None
            },
        }
    }
}
