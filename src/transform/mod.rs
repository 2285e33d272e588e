//! Transformation steps
//!
//! A step is parsed once into [`Transform`] and dispatched by `match` from
//! then on. The loose `{ type, column, params }` shape used by the CLI and by
//! callers that build steps dynamically goes through [`Transform::from_parts`].

pub mod dates;
pub mod sql;

use crate::error::{Result, TabcleanError};
use crate::substrate::Substrate;
use crate::table;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Every transformation type name, as accepted by [`Transform::from_parts`]
pub const TRANSFORM_TYPES: &[&str] = &[
    "trim",
    "lowercase",
    "uppercase",
    "title_case",
    "collapse_spaces",
    "remove_non_printable",
    "replace",
    "pad_zeros",
    "rename_column",
    "cast_type",
    "unformat_currency",
    "fix_negatives",
    "standardize_date",
    "calculate_age",
    "split_column",
    "combine_columns",
    "remove_duplicates",
    "fill_down",
    "scrub",
    "custom_sql",
];

/// Upper bound on columns produced by a delimiter split
pub const MAX_DELIMITER_PARTS: usize = 10;
/// Upper bound on columns produced by a fixed-length split
pub const MAX_LENGTH_PARTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastTarget {
    Integer,
    Decimal,
    Date,
    Boolean,
    Text,
}

impl CastTarget {
    pub fn sql_type(self) -> &'static str {
        match self {
            CastTarget::Integer => "BIGINT",
            CastTarget::Decimal => "DOUBLE",
            CastTarget::Date => "DATE",
            CastTarget::Boolean => "BOOLEAN",
            CastTarget::Text => "VARCHAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    Delimiter,
    Position,
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrubMethod {
    Hash,
    Mask,
    Redact,
    YearOnly,
}

fn default_true() -> bool {
    true
}

fn default_date_format() -> String {
    dates::DEFAULT_OUTPUT_FORMAT.to_string()
}

/// One transformation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Trim {
        column: String,
    },
    Lowercase {
        column: String,
    },
    Uppercase {
        column: String,
    },
    TitleCase {
        column: String,
    },
    CollapseSpaces {
        column: String,
    },
    RemoveNonPrintable {
        column: String,
    },
    Replace {
        column: String,
        find: String,
        #[serde(default)]
        replace: String,
        #[serde(default = "default_true")]
        case_sensitive: bool,
        #[serde(default)]
        match_type: MatchType,
    },
    PadZeros {
        column: String,
        length: usize,
    },
    RenameColumn {
        column: String,
        new_name: String,
    },
    CastType {
        column: String,
        target: CastTarget,
    },
    UnformatCurrency {
        column: String,
    },
    FixNegatives {
        column: String,
    },
    StandardizeDate {
        column: String,
        #[serde(default = "default_date_format")]
        format: String,
    },
    CalculateAge {
        column: String,
    },
    SplitColumn {
        column: String,
        mode: SplitMode,
        #[serde(default)]
        delimiter: Option<String>,
        #[serde(default)]
        position: Option<usize>,
        #[serde(default)]
        length: Option<usize>,
    },
    CombineColumns {
        columns: Vec<String>,
        #[serde(default)]
        separator: String,
        new_column: String,
        #[serde(default)]
        ignore_empty: bool,
    },
    RemoveDuplicates,
    FillDown {
        column: String,
    },
    Scrub {
        column: String,
        method: ScrubMethod,
    },
    CustomSql {
        sql: String,
    },
}

impl Transform {
    /// Build a step from its loose shape: a type name, an optional target
    /// column and an optional JSON object of parameters
    pub fn from_parts(kind: &str, column: Option<&str>, params: Option<&Value>) -> Result<Self> {
        if !TRANSFORM_TYPES.contains(&kind) {
            return Err(TabcleanError::validation(format!(
                "Unknown transformation type '{}'",
                kind
            )));
        }

        let mut object = match params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(TabcleanError::validation(format!(
                    "Parameters for '{}' must be a JSON object, got {}",
                    kind, other
                )))
            }
        };
        if let Some(column) = column {
            object.insert("column".to_string(), Value::String(column.to_string()));
        }
        object.insert("type".to_string(), Value::String(kind.to_string()));

        let step: Transform = serde_json::from_value(Value::Object(object))
            .map_err(|e| TabcleanError::validation(format!("Invalid '{}' step: {}", kind, e)))?;
        step.check_params()?;
        Ok(step)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Transform::Trim { .. } => "trim",
            Transform::Lowercase { .. } => "lowercase",
            Transform::Uppercase { .. } => "uppercase",
            Transform::TitleCase { .. } => "title_case",
            Transform::CollapseSpaces { .. } => "collapse_spaces",
            Transform::RemoveNonPrintable { .. } => "remove_non_printable",
            Transform::Replace { .. } => "replace",
            Transform::PadZeros { .. } => "pad_zeros",
            Transform::RenameColumn { .. } => "rename_column",
            Transform::CastType { .. } => "cast_type",
            Transform::UnformatCurrency { .. } => "unformat_currency",
            Transform::FixNegatives { .. } => "fix_negatives",
            Transform::StandardizeDate { .. } => "standardize_date",
            Transform::CalculateAge { .. } => "calculate_age",
            Transform::SplitColumn { .. } => "split_column",
            Transform::CombineColumns { .. } => "combine_columns",
            Transform::RemoveDuplicates => "remove_duplicates",
            Transform::FillDown { .. } => "fill_down",
            Transform::Scrub { .. } => "scrub",
            Transform::CustomSql { .. } => "custom_sql",
        }
    }

    /// The single column a step targets, if it has one
    pub fn column(&self) -> Option<&str> {
        match self {
            Transform::Trim { column }
            | Transform::Lowercase { column }
            | Transform::Uppercase { column }
            | Transform::TitleCase { column }
            | Transform::CollapseSpaces { column }
            | Transform::RemoveNonPrintable { column }
            | Transform::Replace { column, .. }
            | Transform::PadZeros { column, .. }
            | Transform::RenameColumn { column, .. }
            | Transform::CastType { column, .. }
            | Transform::UnformatCurrency { column }
            | Transform::FixNegatives { column }
            | Transform::StandardizeDate { column, .. }
            | Transform::CalculateAge { column }
            | Transform::SplitColumn { column, .. }
            | Transform::FillDown { column }
            | Transform::Scrub { column, .. } => Some(column),
            Transform::CombineColumns { .. }
            | Transform::RemoveDuplicates
            | Transform::CustomSql { .. } => None,
        }
    }

    /// Steps rewritten with `UPDATE` in place. Everything else rebuilds the
    /// table and gets a post-state snapshot.
    pub fn is_in_place(&self) -> bool {
        matches!(
            self,
            Transform::Trim { .. }
                | Transform::Lowercase { .. }
                | Transform::Uppercase { .. }
                | Transform::TitleCase { .. }
                | Transform::CollapseSpaces { .. }
                | Transform::RemoveNonPrintable { .. }
                | Transform::Replace { .. }
                | Transform::PadZeros { .. }
                | Transform::Scrub { .. }
                | Transform::RenameColumn { .. }
        )
    }

    pub fn needs_snapshot(&self) -> bool {
        !self.is_in_place()
    }

    pub fn is_scrub(&self) -> bool {
        matches!(self, Transform::Scrub { .. })
    }

    /// Human-readable label used in history and audit listings
    pub fn label(&self) -> String {
        match self {
            Transform::Replace { column, find, replace, .. } => {
                format!("Replace '{}' with '{}' in {}", find, replace, column)
            }
            Transform::PadZeros { column, length } => {
                format!("Pad {} with zeros to {}", column, length)
            }
            Transform::RenameColumn { column, new_name } => {
                format!("Rename {} to {}", column, new_name)
            }
            Transform::CastType { column, target } => {
                format!("Cast {} to {}", column, target.sql_type())
            }
            Transform::StandardizeDate { column, format } => {
                format!("Standardize dates in {} as {}", column, format)
            }
            Transform::SplitColumn { column, mode, .. } => {
                let by = match mode {
                    SplitMode::Delimiter => "delimiter",
                    SplitMode::Position => "position",
                    SplitMode::Length => "length",
                };
                format!("Split {} by {}", column, by)
            }
            Transform::CombineColumns { columns, new_column, .. } => {
                format!("Combine {} into {}", columns.join(", "), new_column)
            }
            Transform::RemoveDuplicates => "Remove duplicate rows".to_string(),
            Transform::Scrub { column, method } => {
                let how = match method {
                    ScrubMethod::Hash => "hash",
                    ScrubMethod::Mask => "mask",
                    ScrubMethod::Redact => "redact",
                    ScrubMethod::YearOnly => "year only",
                };
                format!("Scrub {} ({})", column, how)
            }
            Transform::CustomSql { .. } => "Custom SQL".to_string(),
            other => match other.column() {
                Some(column) => format!("{} {}", other.type_name().replace('_', " "), column),
                None => other.type_name().replace('_', " "),
            },
        }
    }

    /// Parameter checks that need no table
    fn check_params(&self) -> Result<()> {
        match self {
            Transform::Replace { find, match_type, .. } => {
                if find.is_empty() {
                    return Err(TabcleanError::validation("replace requires a non-empty 'find'"));
                }
                if *match_type == MatchType::Regex {
                    regex::Regex::new(find).map_err(|e| {
                        TabcleanError::validation(format!("Invalid pattern '{}': {}", find, e))
                    })?;
                }
            }
            Transform::PadZeros { length, .. } if *length == 0 => {
                return Err(TabcleanError::validation("pad_zeros requires a length above 0"));
            }
            Transform::RenameColumn { new_name, .. } => {
                table::validate_column_names(std::slice::from_ref(new_name))?;
            }
            Transform::StandardizeDate { format, .. } => dates::validate_output_format(format)?,
            Transform::SplitColumn { mode, delimiter, position, length, .. } => match mode {
                SplitMode::Delimiter if delimiter.as_deref().map_or(true, str::is_empty) => {
                    return Err(TabcleanError::validation(
                        "split_column in delimiter mode requires 'delimiter'",
                    ));
                }
                SplitMode::Position if position.map_or(true, |p| p == 0) => {
                    return Err(TabcleanError::validation(
                        "split_column in position mode requires 'position' above 0",
                    ));
                }
                SplitMode::Length if length.map_or(true, |l| l == 0) => {
                    return Err(TabcleanError::validation(
                        "split_column in length mode requires 'length' above 0",
                    ));
                }
                _ => {}
            },
            Transform::CombineColumns { columns, new_column, .. } => {
                if columns.len() < 2 {
                    return Err(TabcleanError::validation(
                        "combine_columns requires at least two columns",
                    ));
                }
                table::validate_column_names(std::slice::from_ref(new_column))?;
            }
            Transform::CustomSql { sql } if sql.trim().is_empty() => {
                return Err(TabcleanError::validation("custom_sql requires 'sql'"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Check the step against a live table. Runs before anything is mutated.
    pub fn validate(&self, db: &Substrate, table_name: &str) -> Result<()> {
        self.check_params()?;
        if let Some(column) = self.column() {
            table::require_column(db, table_name, column)?;
        }

        let existing = table::user_column_names(db, table_name)?;
        let ensure_free = |name: &str| -> Result<()> {
            if existing.iter().any(|c| c == name) {
                Err(TabcleanError::validation(format!(
                    "Column '{}' already exists in '{}'",
                    name, table_name
                )))
            } else {
                Ok(())
            }
        };

        match self {
            Transform::RenameColumn { new_name, .. } => ensure_free(new_name)?,
            Transform::CalculateAge { column } => ensure_free(&sql::age_column_name(column))?,
            Transform::CombineColumns { columns, new_column, .. } => {
                for column in columns {
                    table::require_column(db, table_name, column)?;
                }
                ensure_free(new_column)?;
            }
            Transform::SplitColumn { column, .. } => {
                // Final part count depends on the data; check the widest case
                for part in 1..=MAX_LENGTH_PARTS {
                    ensure_free(&sql::split_column_name(column, part))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
