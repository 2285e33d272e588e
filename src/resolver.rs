//! Position references for diffs against earlier table states
//!
//! Accepted forms: `original`, `current`, `@N` (the state after the first N
//! commands), `~N` (N steps before the current position) and a date or
//! timestamp (the latest state recorded at or before it).

use crate::error::{Result, TabcleanError};
use crate::timeline::Timeline;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum StateRef {
    Original,
    Current,
    After(usize),
    Back(usize),
    At(DateTime<Utc>),
}

impl StateRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        match trimmed.to_lowercase().as_str() {
            "original" | "base" => return Ok(Self::Original),
            "current" | "latest" => return Ok(Self::Current),
            _ => {}
        }
        if let Some(n) = trimmed.strip_prefix('@') {
            return parse_count(n, reference).map(Self::After);
        }
        if let Some(n) = trimmed.strip_prefix('~') {
            return parse_count(n, reference).map(Self::Back);
        }
        parse_date_string(trimmed).map(Self::At)
    }

    /// Timeline position the reference denotes; -1 is the original state
    pub fn resolve(&self, timeline: &Timeline) -> Result<i64> {
        let current = timeline.current_position();
        match self {
            Self::Original => Ok(-1),
            Self::Current => Ok(current),
            Self::After(n) => {
                if *n > timeline.len() {
                    return Err(TabcleanError::validation(format!(
                        "'@{}' is beyond the {} recorded command(s) of '{}'",
                        n,
                        timeline.len(),
                        timeline.table_name
                    )));
                }
                Ok(*n as i64 - 1)
            }
            Self::Back(n) => {
                let position = current - *n as i64;
                if position < -1 {
                    return Err(TabcleanError::validation(format!(
                        "'~{}' goes back past the original state of '{}'",
                        n, timeline.table_name
                    )));
                }
                Ok(position)
            }
            Self::At(when) => Ok(timeline
                .active()
                .iter()
                .rposition(|c| c.timestamp <= *when)
                .map_or(-1, |i| i as i64)),
        }
    }
}

impl std::fmt::Display for StateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Current => write!(f, "current"),
            Self::After(n) => write!(f, "@{}", n),
            Self::Back(n) => write!(f, "~{}", n),
            Self::At(when) => write!(f, "{}", when.format("%Y-%m-%d %H:%M:%S UTC")),
        }
    }
}

fn parse_count(digits: &str, reference: &str) -> Result<usize> {
    digits
        .parse::<usize>()
        .map_err(|_| TabcleanError::validation(format!("Invalid state reference '{}'", reference)))
}

/// Parse a date string in various formats
fn parse_date_string(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive_dt));
    }

    // Date only means the end of that day
    if let Some(naive_dt) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
    {
        return Ok(Utc.from_utc_datetime(&naive_dt));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(TabcleanError::validation(format!(
        "Invalid state reference '{}'. Use 'original', 'current', '@N', '~N', 'YYYY-MM-DD' or 'YYYY-MM-DD HH:MM:SS'",
        date_str
    )))
}
