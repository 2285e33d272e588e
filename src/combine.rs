//! Table combiners: stack (union of rows) and join
//!
//! Both build a new table with fresh `_cs_id` and `_cs_origin_id` values;
//! rows of a combined table are new rows.

use crate::error::{Result, TabcleanError};
use crate::lock::WriteGuard;
use crate::substrate::{quote_ident, ColumnInfo, Substrate};
use crate::table::{self, ORIGIN_ID, ROW_ID};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
        }
    }
}

fn identity_select(order: &str) -> String {
    format!(
        "CAST(row_number() OVER (ORDER BY {}) AS BIGINT) AS {}, CAST(uuid() AS VARCHAR) AS {}",
        order,
        quote_ident(ROW_ID),
        quote_ident(ORIGIN_ID)
    )
}

/// Union of the inputs' columns in first-seen order, with one type per
/// column. Columns whose type differs between inputs become VARCHAR.
fn union_columns(db: &Substrate, sources: &[&str]) -> Result<Vec<ColumnInfo>> {
    let mut columns: Vec<ColumnInfo> = Vec::new();
    for source in sources {
        for column in table::user_columns(db, source)? {
            match columns.iter_mut().find(|c| c.name == column.name) {
                Some(existing) if existing.data_type != column.data_type => {
                    existing.data_type = "VARCHAR".to_string();
                }
                Some(_) => {}
                None => columns.push(column),
            }
        }
    }
    Ok(columns)
}

/// Stack `sources` into a new table `target`, rows in input order
pub fn stack(db: &Substrate, guard: &WriteGuard, sources: &[&str], target: &str) -> Result<u64> {
    if sources.len() < 2 {
        return Err(TabcleanError::validation("Stacking needs at least two tables"));
    }
    if db.table_exists(target)? {
        return Err(TabcleanError::validation(format!("Table '{}' already exists", target)));
    }
    let columns = union_columns(db, sources)?;

    let mut parts = Vec::with_capacity(sources.len());
    for (ordinal, source) in sources.iter().enumerate() {
        let present = table::user_column_names(db, source)?;
        let select = columns
            .iter()
            .map(|c| {
                if present.contains(&c.name) {
                    format!("CAST({} AS {}) AS {}", quote_ident(&c.name), c.data_type, quote_ident(&c.name))
                } else {
                    format!("CAST(NULL AS {}) AS {}", c.data_type, quote_ident(&c.name))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!(
            "SELECT {} AS _cs_src, {} AS _cs_ord, {} FROM {}",
            ordinal,
            quote_ident(ROW_ID),
            select,
            quote_ident(source)
        ));
    }

    let user = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    db.execute(&format!(
        "CREATE TABLE {} AS SELECT {}, {} FROM ({}) ORDER BY _cs_src, _cs_ord",
        quote_ident(target),
        identity_select("_cs_src, _cs_ord"),
        user,
        parts.join(" UNION ALL ")
    ))?;

    let rows = db.row_count(target)?;
    log::info!(
        "Stacked {} tables into '{}' ({} rows, {} columns)",
        sources.len(),
        target,
        rows,
        columns.len()
    );
    Ok(rows)
}

/// Name a right-side column gets when the left side already uses it
pub fn right_column_name(column: &str) -> String {
    format!("{}_right", column)
}

/// Join `left` and `right` on equal `on` columns into a new table `target`
pub fn join(
    db: &Substrate,
    _guard: &WriteGuard,
    left: &str,
    right: &str,
    on: &[String],
    kind: JoinKind,
    target: &str,
) -> Result<u64> {
    if on.is_empty() {
        return Err(TabcleanError::validation("Join needs at least one key column"));
    }
    if db.table_exists(target)? {
        return Err(TabcleanError::validation(format!("Table '{}' already exists", target)));
    }
    let left_columns = table::user_column_names(db, left)?;
    let right_columns = table::user_column_names(db, right)?;
    for key in on {
        for (name, columns) in [(left, &left_columns), (right, &right_columns)] {
            if !columns.contains(key) {
                return Err(TabcleanError::validation(format!(
                    "Join column '{}' not found in '{}'",
                    key, name
                )));
            }
        }
    }

    let mut select = Vec::new();
    for column in &left_columns {
        let expr = if on.contains(column) && matches!(kind, JoinKind::Right | JoinKind::Full) {
            format!("COALESCE(l.{c}, r.{c})", c = quote_ident(column))
        } else {
            format!("l.{}", quote_ident(column))
        };
        select.push(format!("{} AS {}", expr, quote_ident(column)));
    }
    for column in right_columns.iter().filter(|c| !on.contains(c)) {
        let name = if left_columns.contains(column) {
            right_column_name(column)
        } else {
            column.clone()
        };
        select.push(format!("r.{} AS {}", quote_ident(column), quote_ident(&name)));
    }

    let condition = on
        .iter()
        .map(|k| format!("l.{k} = r.{k}", k = quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let order = format!(
        "l.{id} NULLS LAST, r.{id} NULLS LAST",
        id = quote_ident(ROW_ID)
    );

    db.execute(&format!(
        "CREATE TABLE {} AS SELECT {}, {} FROM {} l {} {} r ON {} ORDER BY {}",
        quote_ident(target),
        identity_select(&order),
        select.join(", "),
        quote_ident(left),
        kind.sql(),
        quote_ident(right),
        condition,
        order
    ))?;

    let rows = db.row_count(target)?;
    log::info!(
        "Joined '{}' and '{}' into '{}' ({} rows)",
        left,
        right,
        target,
        rows
    );
    Ok(rows)
}
