use std::fmt::Debug;

use chrono::{Datelike, NaiveDate};
use log::*;

use crate::{
    reservation_objects::AvailabilityReport,
    salon_api::errors::ReservationError,
    slots::{available_starts, TimeWindow, MINUTES_PER_DAY},
    traits::{ReservationDatabase, ServiceCatalog},
};

/// `AvailabilityApi` answers "when can I book?" for a shop on a given day.
///
/// The answer is advisory. Two customers can be shown the same free slot; the storage layer decides who gets it.
pub struct AvailabilityApi<B> {
    db: B,
    slot_minutes: i64,
}

impl<B> Debug for AvailabilityApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AvailabilityApi ({} minute slots)", self.slot_minutes)
    }
}

impl<B> AvailabilityApi<B> {
    pub fn new(db: B, slot_minutes: i64) -> Self {
        Self { db, slot_minutes: slot_minutes.max(1) }
    }
}

impl<B> AvailabilityApi<B>
where B: ReservationDatabase + ServiceCatalog
{
    /// Start times on `date` at which a booking of `duration_minutes` fits inside the shop's opening hours without
    /// overlapping an active reservation.
    pub async fn available_slots(
        &self,
        shop_id: &str,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<AvailabilityReport, ReservationError> {
        if duration_minutes <= 0 || duration_minutes > MINUTES_PER_DAY {
            return Err(ReservationError::Validation(format!("{duration_minutes} is not a valid duration in minutes")));
        }
        let hours = self.db.fetch_operating_hours(shop_id, date.weekday()).await?.map(TimeWindow::from);
        let busy = self.db.fetch_busy_windows(shop_id, date).await?;
        let start_minutes = match hours {
            Some(h) => available_starts(h, &busy, duration_minutes, self.slot_minutes),
            None => Vec::new(),
        };
        trace!(
            "📅️ {shop_id} on {date}: {} busy windows, {} possible starts for {duration_minutes} minutes",
            busy.len(),
            start_minutes.len()
        );
        Ok(AvailabilityReport {
            shop_id: shop_id.to_string(),
            date,
            duration_minutes,
            opening_hours: hours,
            busy,
            start_minutes,
        })
    }
}
