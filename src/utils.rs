use crate::error::{BridgeError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parses an invocation date in strict ISO `YYYY-MM-DD` form.
pub fn parse_iso_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| BridgeError::InvalidDate {
        field: field.to_string(),
        value: value.to_string(),
    })
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Analysis window. Both bounds are midnight instants and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(BridgeError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            start: start_of_day(start),
            end: start_of_day(end),
        })
    }

    pub fn from_iso(start: &str, end: &str) -> Result<Self> {
        let start = parse_iso_date("start date", start)?;
        let end = parse_iso_date("end date", end)?;
        Self::new(start, end)
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        instant >= self.start && instant <= self.end
    }

    pub fn is_after(&self, instant: NaiveDateTime) -> bool {
        instant > self.end
    }
}

pub fn round_to(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    let rounded = (value * factor).round() / factor;
    // Avoid emitting -0.0 for values that round to zero.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
