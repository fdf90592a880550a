//! Normalisation of extracted date and time values.
//!
//! A value only counts as present once it resolves to an absolute instant.
//! Bare times ("12:00") and bare dates for date-time fields stay absent so the
//! slot keeps being asked for.

use chrono::{
    DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc,
};

const NAIVE_DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const OFFSET_DATETIME_FORMATS: [&str; 3] =
    ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M%:z"];

/// Builds a fixed offset from minutes east of UTC. Out-of-range values fall back to UTC.
pub fn utc_offset(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Resolves a date-time string to an absolute instant.
///
/// Values with an explicit offset keep it; naive values are read in `local`.
pub fn normalize_datetime(raw: &str, local: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let value = raw.trim();
    if value.len() < "YYYY-MM-DDTHH:MM".len() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed);
    }

    let zulu_normalised = value
        .strip_suffix('Z')
        .or_else(|| value.strip_suffix('z'))
        .map(|prefix| format!("{prefix}+00:00"));
    let with_offset = zulu_normalised.as_deref().unwrap_or(value);
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(with_offset, format) {
            return Some(parsed);
        }
    }

    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| local.from_local_datetime(&naive).single())
}

/// Resolves a calendar date. Full date-times are truncated to their date.
pub fn normalize_date(raw: &str, local: FixedOffset) -> Option<NaiveDate> {
    let value = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    normalize_datetime(value, local).map(|instant| instant.date_naive())
}

/// Calendar span a summary request covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalendarPeriod {
    Day,
    Week,
    Month,
}

impl CalendarPeriod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "day" | "today" | "tomorrow" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Half-open window, midnight to midnight in `local`, of the period containing `date`.
    /// Weeks start on Monday.
    pub fn window(
        self,
        date: NaiveDate,
        local: FixedOffset,
    ) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
        let (first, next) = match self {
            Self::Day => (date, date.checked_add_days(Days::new(1))?),
            Self::Week => {
                let monday =
                    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))?;
                (monday, monday.checked_add_days(Days::new(7))?)
            }
            Self::Month => {
                let first = date.with_day(1)?;
                (first, first.checked_add_months(Months::new(1))?)
            }
        };
        Some((midnight(first, local)?, midnight(next, local)?))
    }
}

fn midnight(date: NaiveDate, local: FixedOffset) -> Option<DateTime<FixedOffset>> {
    local.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}
