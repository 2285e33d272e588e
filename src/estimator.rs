//! Affected-row estimation
//!
//! Read-only. Runs before a step mutates anything, so the executor can decide
//! whether per-cell audit capture fits under the cap.

use crate::error::Result;
use crate::substrate::{as_text, quote_ident, quote_literal, Substrate};
use crate::transform::sql::{age_expr, value_expr};
use crate::transform::{SplitMode, Transform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Estimate {
    Rows(u64),
    /// The step's effect cannot be predicted without running it
    Unknown,
}

impl Estimate {
    /// Row count, or -1 when unknown
    pub fn to_i64(self) -> i64 {
        match self {
            Estimate::Rows(n) => n as i64,
            Estimate::Unknown => -1,
        }
    }

    pub fn rows(self) -> Option<u64> {
        match self {
            Estimate::Rows(n) => Some(n),
            Estimate::Unknown => None,
        }
    }
}

/// Count of rows whose text rendering differs after applying `expr`
pub fn count_changed(db: &Substrate, table: &str, column: &str, expr: &str) -> Result<u64> {
    db.query_count(&format!(
        "SELECT COUNT(*) FROM (SELECT {} AS before_value, CAST({} AS VARCHAR) AS after_value FROM {}) \
         WHERE before_value IS DISTINCT FROM after_value",
        as_text(column),
        expr,
        quote_ident(table)
    ))
}

/// Estimate how many rows `step` will change in `table`
pub fn estimate(db: &Substrate, table: &str, step: &Transform) -> Result<Estimate> {
    let table_ref = quote_ident(table);

    let estimate = match step {
        Transform::RenameColumn { .. } => Estimate::Rows(0),
        Transform::RemoveDuplicates | Transform::CustomSql { .. } => Estimate::Unknown,
        Transform::TitleCase { column } => Estimate::Rows(db.query_count(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {} <> ''",
            table_ref,
            quote_ident(column),
            as_text(column)
        ))?),
        Transform::CombineColumns { .. } => Estimate::Rows(db.row_count(table)?),
        Transform::CalculateAge { column } => Estimate::Rows(db.query_count(&format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL",
            table_ref,
            age_expr(column)
        ))?),
        Transform::SplitColumn {
            column,
            mode,
            delimiter,
            ..
        } => {
            let mut predicate = format!("{} IS NOT NULL", quote_ident(column));
            if *mode == SplitMode::Delimiter {
                predicate.push_str(&format!(
                    " AND contains({}, {})",
                    as_text(column),
                    quote_literal(delimiter.as_deref().unwrap_or(","))
                ));
            }
            Estimate::Rows(db.query_count(&format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                table_ref, predicate
            ))?)
        }
        single => match (single.column(), value_expr(single)) {
            (Some(column), Some(expr)) => Estimate::Rows(count_changed(db, table, column, &expr)?),
            _ => Estimate::Unknown,
        },
    };

    log::debug!(
        "Estimated {} affected rows for {} on '{}'",
        estimate.to_i64(),
        step.type_name(),
        table
    );
    Ok(estimate)
}
