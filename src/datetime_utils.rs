use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Common date/time formats used throughout the application
pub mod formats {
    /// Format of the `created_at` field in v1.1 API payloads: "Wed Oct 10 20:19:24 +0000 2018"
    pub const TWITTER_CREATED_AT: &str = "%a %b %d %H:%M:%S %z %Y";

    /// Format of timestamps stored in the CSV ledger: "2024-01-20 15:30:00"
    pub const DISPLAY_FULL: &str = "%Y-%m-%d %H:%M:%S";

    /// Date-only format accepted by the search `since:` operator: "2024-01-20"
    pub const DISPLAY_DATE: &str = "%Y-%m-%d";
}

/// Parse the `created_at` field of a v1.1 tweet into UTC
pub fn parse_twitter_created_at(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(date_str, formats::TWITTER_CREATED_AT)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse tweet creation date: {date_str}"))
}

/// Parse a ledger timestamp (e.g., "2024-01-20 15:30:00")
pub fn parse_display_datetime(date_str: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(date_str.trim(), formats::DISPLAY_FULL)
        .with_context(|| format!("Failed to parse datetime: {date_str}"))
}

/// Format a datetime the way it is stored in the ledger
pub fn format_for_display(datetime: &NaiveDateTime) -> String {
    datetime.format(formats::DISPLAY_FULL).to_string()
}

/// Format a date (without time) for the search lower bound
pub fn format_date_only(datetime: &NaiveDateTime) -> String {
    datetime.format(formats::DISPLAY_DATE).to_string()
}

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
