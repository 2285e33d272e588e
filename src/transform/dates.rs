//! Date parsing formats shared by date standardization, age and year-only scrub

use crate::error::{Result, TabcleanError};

/// Output format used when a step names none
pub const DEFAULT_OUTPUT_FORMAT: &str = "%Y-%m-%d";

/// Input formats tried in order; the first that parses wins.
///
/// US month-first comes before EU day-first, so `03/04/2024` reads as
/// March 4th.
pub const INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
];

/// SQL expression yielding a TIMESTAMP for the first matching format, or
/// NULL when nothing parses
pub fn parsed_timestamp_expr(text_expr: &str) -> String {
    let attempts = INPUT_FORMATS
        .iter()
        .map(|format| format!("try_strptime(trim({}), '{}')", text_expr, format))
        .collect::<Vec<_>>()
        .join(", ");
    format!("COALESCE({})", attempts)
}

/// Reject output formats that would render every date the same
pub fn validate_output_format(format: &str) -> Result<()> {
    if format.trim().is_empty() {
        return Err(TabcleanError::validation("Date format must not be empty"));
    }
    if !format.contains('%') {
        return Err(TabcleanError::validation(format!(
            "Date format '{}' contains no format specifiers",
            format
        )));
    }
    // Rendered with chrono first so a bad specifier fails before any SQL runs
    let probe = chrono::NaiveDate::from_ymd_opt(2024, 1, 31)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| TabcleanError::validation("Invalid probe date"))?;
    let mut rendered = String::new();
    use std::fmt::Write;
    write!(rendered, "{}", probe.format(format))
        .map_err(|_| TabcleanError::validation(format!("Invalid date format '{}'", format)))?;
    Ok(())
}
