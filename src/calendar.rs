//! Gregorian calendar helpers shared by resampling and percentile code

use chrono::{Datelike, NaiveDate};

/// Number of slots in a leap-aligned day-of-year axis
pub const DAYS_IN_ALIGNED_YEAR: usize = 366;

/// Month abbreviations, index 0 is January
pub const MONTH_ABBREVIATIONS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

#[must_use]
pub const fn is_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[must_use]
pub const fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap(year) => 29,
        2 => 28,
        _ => 0,
    }
}

#[must_use]
pub const fn days_in_year(year: i32) -> u32 {
    if is_leap(year) {
        366
    } else {
        365
    }
}

/// Day of year on a 366-day axis where February 29 is always day 60.
///
/// March 1 is day 61 in every year, so a non-leap year skips slot 60.
#[must_use]
pub fn aligned_day_of_year(date: NaiveDate) -> u32 {
    let ordinal = date.ordinal();
    if !is_leap(date.year()) && ordinal >= 60 {
        ordinal + 1
    } else {
        ordinal
    }
}

/// Abbreviation for a month number in `1..=12`
#[must_use]
pub fn month_abbreviation(month: u32) -> Option<&'static str> {
    MONTH_ABBREVIATIONS.get((month as usize).checked_sub(1)?).copied()
}

/// Month number for a three letter abbreviation, case insensitive
#[must_use]
pub fn month_from_abbreviation(abbreviation: &str) -> Option<u32> {
    let upper = abbreviation.to_ascii_uppercase();
    MONTH_ABBREVIATIONS
        .iter()
        .position(|m| *m == upper)
        .map(|i| i as u32 + 1)
}

/// Last day of the given month
#[must_use]
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))
}

/// Shift a `(year, month)` pair by a signed number of months
#[must_use]
pub const fn add_months(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 + delta;
    (index.div_euclid(12), (index.rem_euclid(12) + 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn leap_years() {
        assert!(is_leap(2044));
        assert!(is_leap(2000));
        assert!(!is_leap(2100));
        assert_eq!(days_in_month(2043, 2), 28);
        assert_eq!(days_in_month(2044, 2), 29);
    }

    #[test]
    fn aligned_doy_skips_feb29_slot_in_common_years() {
        assert_eq!(aligned_day_of_year(ymd(2043, 2, 28)), 59);
        assert_eq!(aligned_day_of_year(ymd(2043, 3, 1)), 61);
        assert_eq!(aligned_day_of_year(ymd(2044, 2, 29)), 60);
        assert_eq!(aligned_day_of_year(ymd(2044, 3, 1)), 61);
        assert_eq!(aligned_day_of_year(ymd(2043, 12, 31)), 366);
    }

    #[test]
    fn month_arithmetic() {
        assert_eq!(add_months(2042, 1, -2), (2041, 11));
        assert_eq!(add_months(2042, 12, 1), (2043, 1));
        assert_eq!(month_from_abbreviation("oct"), Some(10));
        assert_eq!(month_abbreviation(12), Some("DEC"));
        assert_eq!(month_abbreviation(13), None);
    }
}
