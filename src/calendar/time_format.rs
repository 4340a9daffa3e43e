use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeFormatError {
    #[error("Invalid date '{0}', expected yyyy-MM-dd")]
    InvalidDate(String),
    #[error("Invalid time '{0}'")]
    InvalidTime(String),
}

const WIRE_DATE_FORMAT: &str = "%Y-%m-%d";

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("invalid date regex"))
}

fn time_12h_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2}):(\d{2})\s*([AaPp][Mm])$").expect("invalid 12h time regex")
    })
}

fn time_24h_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("invalid 24h time regex"))
}

/// Parses a `yyyy-MM-dd` wire date into a calendar day.
///
/// `NaiveDate` has no offset, so the value cannot drift across midnight the
/// way a zoned timestamp would.
pub fn parse_local_date(value: &str) -> Result<NaiveDate, TimeFormatError> {
    if !date_pattern().is_match(value) {
        return Err(TimeFormatError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(value, WIRE_DATE_FORMAT)
        .map_err(|_| TimeFormatError::InvalidDate(value.to_string()))
}

pub fn format_local_date(date: NaiveDate) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

fn parse_12h(value: &str) -> Option<(u32, u32)> {
    let caps = time_12h_pattern().captures(value.trim())?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }
    let pm = caps[3].eq_ignore_ascii_case("pm");
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    Some((hour24, minute))
}

fn parse_24h(value: &str) -> Option<(u32, u32)> {
    let caps = time_24h_pattern().captures(value.trim())?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    (hour <= 23 && minute <= 59).then_some((hour, minute))
}

/// `"4:30 PM"` -> `"16:30"`
pub fn format_12h_to_24h(value: &str) -> Result<String, TimeFormatError> {
    let (hour, minute) =
        parse_12h(value).ok_or_else(|| TimeFormatError::InvalidTime(value.to_string()))?;
    Ok(format!("{:02}:{:02}", hour, minute))
}

/// `"16:30"` -> `"4:30 PM"`
pub fn format_24h_to_12h(value: &str) -> Result<String, TimeFormatError> {
    let (hour, minute) =
        parse_24h(value).ok_or_else(|| TimeFormatError::InvalidTime(value.to_string()))?;
    let suffix = if hour < 12 { "AM" } else { "PM" };
    let display_hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    Ok(format!("{}:{:02} {}", display_hour, minute, suffix))
}

pub fn minute_of_day(value: &str) -> Result<u32, TimeFormatError> {
    parse_12h(value)
        .or_else(|| parse_24h(value))
        .map(|(h, m)| h * 60 + m)
        .ok_or_else(|| TimeFormatError::InvalidTime(value.to_string()))
}

pub fn is_valid_time_range(start: &str, end: &str) -> bool {
    match (minute_of_day(start), minute_of_day(end)) {
        (Ok(s), Ok(e)) => e > s,
        _ => false,
    }
}
