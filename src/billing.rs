//! Billing-cycle calculator.
//!
//! A cycle is a one-month window anchored to the signup day-of-month. When the
//! anchor day does not exist in a month (signup on the 31st, month has 30 days),
//! that month's reset falls on its last day; the next month that has the anchor
//! day resets on it again. All boundaries are midnight UTC.
//!
//! Invariant: `start <= now < next_reset` and `end == next_reset - 1s`.
//!
//! ```rust
//! use altmeter::billing::BillingCycle;
//! use chrono::{TimeZone, Utc};
//!
//! let signup = Utc.with_ymd_and_hms(2023, 1, 31, 9, 30, 0).unwrap();
//! let now = Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap();
//! let cycle = BillingCycle::compute(signup, now);
//! assert_eq!(cycle.reset_day, 30);
//! assert_eq!(cycle.start, Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap());
//! assert_eq!(cycle.next_reset, Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap());
//! ```

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// The metering window containing a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub start: DateTime<Utc>,
    /// Last second of the cycle.
    pub end: DateTime<Utc>,
    /// Signup day clamped to the length of the month `now` falls in.
    pub reset_day: u32,
    pub signup_date: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
}

impl BillingCycle {
    /// Compute the cycle containing `now` for a site that signed up at `signup`.
    pub fn compute(signup: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let signup_day = signup.day();
        let (year, month) = (now.year(), now.month());
        let reset_day = signup_day.min(days_in_month(year, month));

        let (start, next_reset) = if now.day() >= reset_day {
            let (ny, nm) = next_month(year, month);
            (
                midnight(year, month, reset_day),
                midnight(ny, nm, signup_day.min(days_in_month(ny, nm))),
            )
        } else {
            let (py, pm) = prev_month(year, month);
            (
                midnight(py, pm, signup_day.min(days_in_month(py, pm))),
                midnight(year, month, reset_day),
            )
        };

        Self {
            start,
            end: next_reset - chrono::Duration::seconds(1),
            reset_day,
            signup_date: signup,
            next_reset,
        }
    }

    /// Whether `at` falls inside this cycle.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.next_reset
    }
}

/// Number of days in `month` (1-12) of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = next_month(year, month);
    match (NaiveDate::from_ymd_opt(year, month, 1), NaiveDate::from_ymd_opt(ny, nm, 1)) {
        (Some(first), Some(next_first)) => {
            u32::try_from(next_first.signed_duration_since(first).num_days()).unwrap_or(31)
        }
        _ => 31,
    }
}

/// Parse a signup timestamp as the account service reports it.
///
/// Accepts `YYYY-MM-DD HH:MM:SS` (UTC), RFC 3339, or a bare `YYYY-MM-DD`.
pub fn parse_signup(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    // day is always clamped to the month length by the callers
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
        .unwrap_or_default();
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}
