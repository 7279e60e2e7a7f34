//! Common types used across the CCP sync workspace

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CcpError, Result};

/// Date format used by the remote API for session dates (`DD-MM-YYYY`)
pub const API_DATE_FORMAT: &str = "%d-%m-%Y";

/// Date format used on the command line and in the warehouse (`YYYY-MM-DD`)
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// An inclusive range of calendar dates to synchronize.
///
/// A range can only be constructed through [`DateRange::new`], which enforces
/// `start <= end <= today`. The remote system only holds complete data for
/// elapsed days, so a range reaching past today is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Validate and build a range relative to the run's local `today`
    pub fn new(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CcpError::InvalidDateRange(format!(
                "start date {} cannot be later than end date {}",
                start, end
            )));
        }

        if end > today {
            return Err(CcpError::InvalidDateRange(format!(
                "end date {} cannot be later than today ({})",
                end, today
            )));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, both ends included
    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Every date in the range, in ascending order
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::with_capacity(self.len_days());
        let mut day = self.start;
        while day <= self.end {
            days.push(day);
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), ISO_DATE_FORMAT)
        .map_err(|e| CcpError::Parse(format!("invalid date '{}': {}", s, e)))
}

/// Keep only the last four characters of an identifier for log output
pub fn mask_identifier(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    let visible = chars.len().min(4);
    let tail: String = chars[chars.len() - visible..].iter().collect();
    format!("***{}", tail)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_range_days_inclusive() {
        let range = DateRange::new(date(2024, 2, 28), date(2024, 3, 1), date(2024, 3, 2)).unwrap();
        assert_eq!(range.len_days(), 3);
        assert_eq!(range.days(), vec![date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]);
    }

    #[test]
    fn test_single_day_range() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 1), date(2024, 1, 1)).unwrap();
        assert_eq!(range.days(), vec![date(2024, 1, 1)]);
    }

    #[test]
    fn test_start_after_end_rejected() {
        let err = DateRange::new(date(2024, 1, 2), date(2024, 1, 1), date(2024, 2, 1)).unwrap_err();
        assert!(matches!(err, CcpError::InvalidDateRange(_)));
    }

    #[test]
    fn test_end_after_today_rejected() {
        let err = DateRange::new(date(2024, 1, 1), date(2024, 1, 3), date(2024, 1, 2)).unwrap_err();
        assert!(err.to_string().contains("later than today"));
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(parse_iso_date("2024-03-05").unwrap(), date(2024, 3, 5));
        assert!(parse_iso_date("05-03-2024").is_err());
    }

    #[test]
    fn test_mask_identifier() {
        assert_eq!(mask_identifier("9100001234"), "***1234");
        assert_eq!(mask_identifier("12"), "***12");
    }
}
