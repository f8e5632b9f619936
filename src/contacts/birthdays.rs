//! Upcoming-birthday matching.
//!
//! A birthday is projected onto `today`'s year; if that date has already
//! passed it is projected onto the following year, so a window crossing
//! New Year still matches early-January birthdays. Feb 29 is celebrated on
//! Feb 28 in non-leap years.

use time::{util::is_leap_year, Date, Duration, Month};

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const MAX_WINDOW_DAYS: i64 = 365;

/// The birthday's month/day in `year`, with the leap-day policy applied.
pub fn anniversary_in(birthday: Date, year: i32) -> Option<Date> {
    let day = match (birthday.month(), birthday.day()) {
        (Month::February, 29) if !is_leap_year(year) => 28,
        (_, d) => d,
    };
    Date::from_calendar_date(year, birthday.month(), day).ok()
}

/// First anniversary on or after `today`.
pub fn next_occurrence(birthday: Date, today: Date) -> Option<Date> {
    let this_year = anniversary_in(birthday, today.year())?;
    if this_year >= today {
        Some(this_year)
    } else {
        anniversary_in(birthday, today.year() + 1)
    }
}

/// True when the next anniversary lies in `[today, today + window_days]`.
pub fn is_upcoming(birthday: Date, today: Date, window_days: i64) -> bool {
    let Some(end) = today.checked_add(Duration::days(window_days)) else {
        return false;
    };
    next_occurrence(birthday, today).is_some_and(|d| d <= end)
}
