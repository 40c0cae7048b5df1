//! Utility functions for text clipping, time rendering and secret masking.
//!
//! This module provides helpers used throughout the application:
//! - Character-safe truncation for summaries and log previews
//! - Rendering of scraped publish times in local time
//! - Masking of credentials in configuration reports

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// Keep at most `max` characters of `s`.
///
/// Counts characters, not bytes, so multi-byte text is never split.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// a count of the dropped characters appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 chars)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        s.to_string()
    } else {
        format!("{}…(+{} chars)", truncate_chars(s, max), total - max)
    }
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a scraped publish time into local time.
///
/// Accepts RFC 3339 timestamps and the date formats commonly printed on
/// listing pages (`2024-10-01 08:30`, `2024-10-01`, `2024/10/01`).
pub fn parse_publish_time(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Local.from_local_datetime(&naive).single();
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Local.from_local_datetime(&naive).single();
        }
    }
    None
}

/// Render a publish time for humans, falling back to the raw text.
pub fn display_publish_time(raw: Option<&str>) -> String {
    match raw {
        None => "未知时间".to_string(),
        Some(text) if text.trim().is_empty() => "未知时间".to_string(),
        Some(text) => parse_publish_time(text)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| text.trim().to_string()),
    }
}

/// Replace a secret with asterisks, capped at ten.
pub fn mask_secret(secret: &str) -> String {
    "*".repeat(secret.chars().count().min(10))
}
