//! # Slot availability
//!
//! Time inside a business day is measured in whole minutes from local midnight. A booking occupies the half-open
//! window `[start, end)`, so back-to-back appointments (`10:00-11:00` followed by `11:00-12:00`) do not conflict.
//!
//! The functions here are pure. The storage layer enforces the same overlap rule atomically when a reservation is
//! inserted; these helpers only answer "what could I book?" questions for the availability index.
use std::fmt::Display;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::OperatingHours;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: i64, duration: i64) -> Self {
        Self { start, end: start + duration }
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 0 && self.start < self.end && self.end <= MINUTES_PER_DAY
    }

    /// `[s1, e1)` and `[s2, e2)` overlap iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_minute(self.start), format_minute(self.end))
    }
}

impl From<OperatingHours> for TimeWindow {
    fn from(hours: OperatingHours) -> Self {
        Self::new(hours.open_minute, hours.close_minute)
    }
}

/// Formats a minute-of-day as `HH:MM`.
pub fn format_minute(minute: i64) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parses `HH:MM` (or `HH:MM:SS`) into a minute-of-day.
pub fn parse_minute(s: &str) -> Option<i64> {
    let time = NaiveTime::parse_from_str(s, "%H:%M").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S")).ok()?;
    Some(i64::from(time.hour()) * 60 + i64::from(time.minute()))
}

/// Converts a local business date and minute-of-day to a UTC instant.
pub fn local_to_utc(date: NaiveDate, minute: i64, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let (h, m) = (u32::try_from(minute / 60).ok()?, u32::try_from(minute % 60).ok()?);
    let naive = date.and_hms_opt(h, m, 0)?;
    offset.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
}

/// The parts of `hours` not covered by any `busy` window, in chronological order.
pub fn free_windows(hours: TimeWindow, busy: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut busy = busy.iter().filter(|b| b.overlaps(&hours)).copied().collect::<Vec<_>>();
    busy.sort();
    let mut result = Vec::with_capacity(busy.len() + 1);
    let mut cursor = hours.start;
    for window in busy {
        if window.start > cursor {
            result.push(TimeWindow::new(cursor, window.start.min(hours.end)));
        }
        cursor = cursor.max(window.end);
        if cursor >= hours.end {
            break;
        }
    }
    if cursor < hours.end {
        result.push(TimeWindow::new(cursor, hours.end));
    }
    result
}

/// Every start time, aligned to `granularity` minutes from opening, at which a booking of `duration` minutes fits
/// within opening hours without overlapping a busy window.
pub fn available_starts(hours: TimeWindow, busy: &[TimeWindow], duration: i64, granularity: i64) -> Vec<i64> {
    if duration <= 0 || granularity <= 0 {
        return Vec::new();
    }
    let free = free_windows(hours, busy);
    let mut starts = Vec::new();
    let mut start = hours.start;
    while start + duration <= hours.end {
        let candidate = TimeWindow::starting_at(start, duration);
        if free.iter().any(|w| w.contains(&candidate)) {
            starts.push(start);
        }
        start += granularity;
    }
    starts
}

#[cfg(test)]
mod test {
    use super::*;

    fn w(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(start, end)
    }

    #[test]
    fn half_open_overlap() {
        assert!(w(600, 660).overlaps(&w(630, 690)));
        assert!(w(600, 720).overlaps(&w(630, 660)));
        assert!(!w(600, 660).overlaps(&w(660, 720)));
        assert!(!w(660, 720).overlaps(&w(600, 660)));
    }

    #[test]
    fn free_windows_around_bookings() {
        let hours = w(600, 1200);
        let busy = [w(660, 720), w(700, 780), w(1140, 1260)];
        assert_eq!(free_windows(hours, &busy), vec![w(600, 660), w(780, 1140)]);
        assert_eq!(free_windows(hours, &[]), vec![hours]);
        assert!(free_windows(hours, &[w(500, 1300)]).is_empty());
    }

    #[test]
    fn multi_service_duration_blocks_spanned_slots() {
        // 10:00-20:00, with a 90 minute booking at 11:00
        let hours = w(600, 1200);
        let busy = [TimeWindow::starting_at(660, 90)];
        let starts = available_starts(hours, &busy, 60, 30);
        assert!(starts.contains(&600));
        assert!(!starts.contains(&630));
        assert!(!starts.contains(&660));
        assert!(!starts.contains(&720));
        assert!(starts.contains(&750));
        assert_eq!(starts.last(), Some(&1140));
    }

    #[test]
    fn nothing_fits_when_duration_exceeds_hours() {
        assert!(available_starts(w(600, 660), &[], 90, 30).is_empty());
        assert!(available_starts(w(600, 660), &[], 0, 30).is_empty());
    }

    #[test]
    fn minute_parsing() {
        assert_eq!(parse_minute("09:30"), Some(570));
        assert_eq!(parse_minute("14:00:00"), Some(840));
        assert_eq!(parse_minute("25:00"), None);
        assert_eq!(format_minute(570), "09:30");
        assert_eq!(w(600, 690).to_string(), "10:00-11:30");
    }

    #[test]
    fn local_times_convert_to_utc() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let utc = local_to_utc(date, 600, &kst).unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-10-20T01:00:00+00:00");
    }
}
