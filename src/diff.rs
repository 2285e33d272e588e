//! Identity-stable diff between two table states
//!
//! Rows are matched either by origin id or by a set of key columns. Only
//! non-internal columns present in both tables are compared; differing
//! column sets are reported through a [`SchemaNotice`].

use crate::error::{Result, TabcleanError};
use crate::substrate::{Substrate, TextRow};
use crate::table::{self, ORIGIN_ID};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// How rows of the two sides are paired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKey {
    /// Origin id; for states of the same table
    RowIdentity,
    Columns(Vec<String>),
}

impl DiffKey {
    /// Parse a comma separated column list; empty means row identity
    pub fn parse(spec: Option<&str>) -> Self {
        let columns: Vec<String> = spec
            .unwrap_or("")
            .split(',')
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            DiffKey::RowIdentity
        } else {
            DiffKey::Columns(columns)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDiff {
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRow {
    pub status: DiffStatus,
    /// Key values of the row (origin id for identity diffs)
    pub key: Vec<Option<String>>,
    pub row_number_a: Option<u64>,
    pub row_number_b: Option<u64>,
    pub changes: IndexMap<String, CellDiff>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: u64,
    pub removed: u64,
    pub modified: u64,
    pub unchanged: u64,
}

impl DiffSummary {
    pub fn total_changes(&self) -> u64 {
        self.added + self.removed + self.modified
    }
}

/// Columns present on only one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaNotice {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub summary: DiffSummary,
    /// Compared columns
    pub columns: Vec<String>,
    /// Added, removed and modified rows. Unchanged rows only count.
    pub rows: Vec<DiffRow>,
    pub schema_notice: Option<SchemaNotice>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        self.summary.total_changes() > 0
    }
}

struct Side {
    keys: Vec<Vec<Option<String>>>,
    values: Vec<TextRow>,
}

fn read_side(db: &Substrate, table: &str, key_columns: &[String], compared: &[String]) -> Result<Side> {
    let mut select: Vec<String> = key_columns.to_vec();
    select.extend(compared.iter().cloned());
    let rows = table::read_rows(db, table, &select)?;

    let mut keys = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());
    for mut row in rows {
        let rest = row.split_off(key_columns.len());
        keys.push(row);
        values.push(rest);
    }
    Ok(Side { keys, values })
}

fn check_key_columns(
    key: &DiffKey,
    a: &str,
    b: &str,
    all_a: &[String],
    all_b: &[String],
    user_a: &[String],
    user_b: &[String],
) -> Result<Vec<String>> {
    match key {
        DiffKey::RowIdentity => {
            for (table, columns) in [(a, all_a), (b, all_b)] {
                if !columns.iter().any(|c| c == ORIGIN_ID) {
                    return Err(TabcleanError::validation(format!(
                        "Table '{}' has no row identity to diff by",
                        table
                    )));
                }
            }
            Ok(vec![ORIGIN_ID.to_string()])
        }
        DiffKey::Columns(columns) => {
            if columns.is_empty() {
                return Err(TabcleanError::validation("Diff key needs at least one column"));
            }
            for column in columns {
                for (table, names) in [(a, user_a), (b, user_b)] {
                    if !names.contains(column) {
                        return Err(TabcleanError::validation(format!(
                            "Key column '{}' not found in '{}'",
                            column, table
                        )));
                    }
                }
            }
            Ok(columns.clone())
        }
    }
}

/// Compare table `a` (before) with table `b` (after)
pub fn compare(db: &Substrate, a: &str, b: &str, key: &DiffKey) -> Result<DiffResult> {
    let all_a = db.column_names(a)?;
    let all_b = db.column_names(b)?;
    let user_a = table::user_column_names(db, a)?;
    let user_b = table::user_column_names(db, b)?;
    let key_columns = check_key_columns(key, a, b, &all_a, &all_b, &user_a, &user_b)?;

    let compared: Vec<String> = user_a
        .iter()
        .filter(|c| user_b.contains(c) && !key_columns.contains(c))
        .cloned()
        .collect();
    let only_in_a: Vec<String> = user_a.iter().filter(|c| !user_b.contains(c)).cloned().collect();
    let only_in_b: Vec<String> = user_b.iter().filter(|c| !user_a.contains(c)).cloned().collect();
    let schema_notice = if only_in_a.is_empty() && only_in_b.is_empty() {
        None
    } else {
        log::info!(
            "Schemas of '{}' and '{}' differ; comparing {} common column(s)",
            a,
            b,
            compared.len() + key_columns.len()
        );
        Some(SchemaNotice {
            only_in_a,
            only_in_b,
        })
    };

    let side_a = read_side(db, a, &key_columns, &compared)?;
    let side_b = read_side(db, b, &key_columns, &compared)?;

    // Duplicate keys pair up in order of occurrence
    let mut queues: HashMap<&[Option<String>], VecDeque<usize>> = HashMap::new();
    for (index, key) in side_b.keys.iter().enumerate() {
        queues.entry(key.as_slice()).or_default().push_back(index);
    }
    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::with_capacity(side_a.keys.len());
    for (index, key) in side_a.keys.iter().enumerate() {
        let matched = queues.get_mut(key.as_slice()).and_then(|q| q.pop_front());
        pairs.push((Some(index), matched));
    }
    let mut unmatched_b: Vec<usize> = queues.into_values().flatten().collect();
    unmatched_b.sort_unstable();
    pairs.extend(unmatched_b.into_iter().map(|index| (None, Some(index))));

    let classified: Vec<DiffRow> = pairs
        .par_iter()
        .map(|&(ia, ib)| classify(&side_a, &side_b, &compared, ia, ib))
        .collect();

    let mut summary = DiffSummary::default();
    let mut rows = Vec::new();
    for row in classified {
        match row.status {
            DiffStatus::Added => summary.added += 1,
            DiffStatus::Removed => summary.removed += 1,
            DiffStatus::Modified => summary.modified += 1,
            DiffStatus::Unchanged => {
                summary.unchanged += 1;
                continue;
            }
        }
        rows.push(row);
    }

    log::debug!(
        "Diff '{}' -> '{}': +{} -{} ~{} ={}",
        a,
        b,
        summary.added,
        summary.removed,
        summary.modified,
        summary.unchanged
    );

    let mut columns = key_columns
        .iter()
        .filter(|c| !table::is_internal_column(c))
        .cloned()
        .collect::<Vec<_>>();
    columns.extend(compared);

    Ok(DiffResult {
        summary,
        columns,
        rows,
        schema_notice,
    })
}

fn classify(
    a: &Side,
    b: &Side,
    compared: &[String],
    ia: Option<usize>,
    ib: Option<usize>,
) -> DiffRow {
    let row_number = |i: Option<usize>| i.map(|i| i as u64 + 1);
    let key = ia
        .map(|i| a.keys[i].clone())
        .or_else(|| ib.map(|i| b.keys[i].clone()))
        .unwrap_or_default();

    let (status, changes) = match (ia, ib) {
        (Some(i), Some(j)) => {
            let changes: IndexMap<String, CellDiff> = compared
                .iter()
                .enumerate()
                .filter(|(c, _)| a.values[i][*c] != b.values[j][*c])
                .map(|(c, name)| {
                    (
                        name.clone(),
                        CellDiff {
                            before: a.values[i][c].clone(),
                            after: b.values[j][c].clone(),
                        },
                    )
                })
                .collect();
            let status = if changes.is_empty() {
                DiffStatus::Unchanged
            } else {
                DiffStatus::Modified
            };
            (status, changes)
        }
        (Some(_), None) => (DiffStatus::Removed, IndexMap::new()),
        _ => (DiffStatus::Added, IndexMap::new()),
    };

    DiffRow {
        status,
        key,
        row_number_a: row_number(ia),
        row_number_b: row_number(ib),
        changes,
    }
}
