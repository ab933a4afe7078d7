//! Date parsing for tool arguments
//!
//! Day-first: `03/04/2025` is 3 April.

use chrono::{Duration, NaiveDate};

const FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
];

/// Resolve a model-supplied date relative to `today`.
///
/// Empty input means today. Returns the original text on failure so the
/// tool can echo it back.
pub fn parse_date(input: &str, today: NaiveDate) -> std::result::Result<NaiveDate, String> {
    let trimmed = input.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "today" | "current" | "now" => return Ok(today),
        "yesterday" => return Ok(today - Duration::days(1)),
        "tomorrow" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    // Accept full timestamps by keeping only the date part
    let date_part = trimmed
        .split_once('T')
        .map(|(date, _)| date)
        .unwrap_or(trimmed);

    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
        .ok_or_else(|| format!("Invalid date format: {}", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_relative_terms() {
        assert_eq!(parse_date("today", today()), Ok(today()));
        assert_eq!(parse_date(" NOW ", today()), Ok(today()));
        assert_eq!(parse_date("", today()), Ok(today()));
        assert_eq!(parse_date("yesterday", today()), Ok(ymd(2025, 3, 14)));
        assert_eq!(parse_date("Tomorrow", today()), Ok(ymd(2025, 3, 16)));
    }

    #[test]
    fn test_absolute_formats() {
        assert_eq!(parse_date("2024-12-31", today()), Ok(ymd(2024, 12, 31)));
        assert_eq!(parse_date("03/04/2025", today()), Ok(ymd(2025, 4, 3)));
        assert_eq!(parse_date("03-04-2025", today()), Ok(ymd(2025, 4, 3)));
        assert_eq!(parse_date("1 January 2025", today()), Ok(ymd(2025, 1, 1)));
        assert_eq!(parse_date("1 Jan 2025", today()), Ok(ymd(2025, 1, 1)));
        assert_eq!(parse_date("March 5, 2025", today()), Ok(ymd(2025, 3, 5)));
        assert_eq!(parse_date("2025-03-05T10:00:00Z", today()), Ok(ymd(2025, 3, 5)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(
            parse_date("last tuesday-ish", today()),
            Err("Invalid date format: last tuesday-ish".to_string())
        );
        assert!(parse_date("31/02/2025", today()).is_err());
    }
}
