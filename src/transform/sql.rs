//! SQL generation for transformation steps
//!
//! Every single-column rewrite is expressed once, as a value expression over
//! the column rendered as text. The estimator, audit capture and the mutation
//! itself all use that same expression, so the count reported for a step is
//! the count of rows the mutation actually rewrites.

use super::{dates, CastTarget, MatchType, ScrubMethod, SplitMode, Transform};
use super::{MAX_DELIMITER_PARTS, MAX_LENGTH_PARTS};
use crate::error::Result;
use crate::substrate::{as_text, quote_ident, quote_literal, Substrate};
use crate::table::ROW_ID;

/// How a step changes the table
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `UPDATE` one column in place where the value changes
    Update { column: String, expr: String },
    /// Build a replacement table from `select`, then swap it in
    Rebuild { select: String },
    Rename { from: String, to: String },
    CustomSql { sql: String },
}

/// One audited cell: the column name recorded and the text rendering of
/// its value before and after the step
#[derive(Debug, Clone, PartialEq)]
pub struct CellExpr {
    pub column: String,
    pub before: String,
    pub after: String,
}

/// Everything the executor needs to run one step
#[derive(Debug, Clone)]
pub struct Plan {
    pub mutation: Mutation,
    /// Cells to capture for audit; empty when the step has no per-cell view
    pub cells: Vec<CellExpr>,
}

pub fn age_column_name(column: &str) -> String {
    format!("{}_age", column)
}

pub fn split_column_name(column: &str, part: usize) -> String {
    format!("{}_{}", column, part)
}

fn escape_replacement(value: &str) -> String {
    value.replace('\\', "\\\\")
}

/// The new value of the step's target column, for single-column rewrites
pub fn value_expr(step: &Transform) -> Option<String> {
    let expr = match step {
        Transform::Trim { column } => format!("trim({})", as_text(column)),
        Transform::Lowercase { column } => format!("lower({})", as_text(column)),
        Transform::Uppercase { column } => format!("upper({})", as_text(column)),
        Transform::TitleCase { column } => {
            let c = as_text(column);
            format!(
                "CASE WHEN {c} IS NULL THEN NULL ELSE array_to_string(list_transform(string_split(lower({c}), ' '), w -> upper(left(w, 1)) || substr(w, 2)), ' ') END",
                c = c
            )
        }
        Transform::CollapseSpaces { column } => {
            format!("regexp_replace({}, '\\s+', ' ', 'g')", as_text(column))
        }
        Transform::RemoveNonPrintable { column } => format!(
            "regexp_replace({}, '[\\x00-\\x08\\x0B\\x0C\\x0E-\\x1F\\x7F\\x{{200B}}-\\x{{200D}}\\x{{FEFF}}]', '', 'g')",
            as_text(column)
        ),
        Transform::Replace {
            column,
            find,
            replace,
            case_sensitive,
            match_type,
        } => replace_expr(&as_text(column), find, replace, *case_sensitive, *match_type),
        Transform::PadZeros { column, length } => {
            let c = as_text(column);
            format!(
                "CASE WHEN length({c}) < {n} THEN lpad({c}, {n}, '0') ELSE {c} END",
                c = c,
                n = length
            )
        }
        Transform::CastType { column, target } => cast_expr(column, *target),
        Transform::UnformatCurrency { column } => {
            let c = as_text(column);
            let cleaned = format!("regexp_replace({}, '[$€£¥,\\s]', '', 'g')", c);
            format!(
                "CASE WHEN TRY_CAST({cleaned} AS DOUBLE) IS NOT NULL THEN {cleaned} ELSE {c} END",
                cleaned = cleaned,
                c = c
            )
        }
        Transform::FixNegatives { column } => {
            let c = as_text(column);
            format!(
                "CASE WHEN regexp_matches(trim({c}), '^\\([$€£¥]?\\s*[0-9][0-9,]*(\\.[0-9]+)?\\s*\\)$') \
                 THEN '-' || regexp_replace(trim({c}), '[()\\s]', '', 'g') \
                 WHEN regexp_matches(trim({c}), '^[$€£¥]?[0-9][0-9,]*(\\.[0-9]+)?-$') \
                 THEN '-' || rtrim(trim({c}), '-') \
                 ELSE {c} END",
                c = c
            )
        }
        Transform::StandardizeDate { column, format } => {
            let c = as_text(column);
            format!(
                "COALESCE(strftime({}, {}), {})",
                dates::parsed_timestamp_expr(&c),
                quote_literal(format),
                c
            )
        }
        Transform::FillDown { column } => {
            let c = as_text(column);
            format!(
                "CASE WHEN {c} IS NULL OR trim({c}) = '' THEN \
                 last_value(CASE WHEN trim({c}) = '' THEN NULL ELSE {c} END IGNORE NULLS) \
                 OVER (ORDER BY {id} ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) \
                 ELSE {c} END",
                c = c,
                id = quote_ident(ROW_ID)
            )
        }
        Transform::Scrub { column, method } => scrub_expr(&as_text(column), *method),
        Transform::RenameColumn { .. }
        | Transform::CalculateAge { .. }
        | Transform::SplitColumn { .. }
        | Transform::CombineColumns { .. }
        | Transform::RemoveDuplicates
        | Transform::CustomSql { .. } => return None,
    };
    Some(expr)
}

fn replace_expr(
    c: &str,
    find: &str,
    replace: &str,
    case_sensitive: bool,
    match_type: MatchType,
) -> String {
    match (match_type, case_sensitive) {
        (MatchType::Contains, true) => format!(
            "replace({}, {}, {})",
            c,
            quote_literal(find),
            quote_literal(replace)
        ),
        (MatchType::Contains, false) => format!(
            "regexp_replace({}, {}, {}, 'gi')",
            c,
            quote_literal(&regex::escape(find)),
            quote_literal(&escape_replacement(replace))
        ),
        (MatchType::Exact, true) => format!(
            "CASE WHEN {c} = {f} THEN {r} ELSE {c} END",
            c = c,
            f = quote_literal(find),
            r = quote_literal(replace)
        ),
        (MatchType::Exact, false) => format!(
            "CASE WHEN lower({c}) = lower({f}) THEN {r} ELSE {c} END",
            c = c,
            f = quote_literal(find),
            r = quote_literal(replace)
        ),
        (MatchType::Regex, sensitive) => format!(
            "regexp_replace({}, {}, {}, '{}')",
            c,
            quote_literal(find),
            quote_literal(replace),
            if sensitive { "g" } else { "gi" }
        ),
    }
}

fn cast_expr(column: &str, target: CastTarget) -> String {
    match target {
        // Trim first so ' 42 ' still converts
        CastTarget::Integer | CastTarget::Decimal => format!(
            "TRY_CAST(trim({}) AS {})",
            as_text(column),
            target.sql_type()
        ),
        CastTarget::Date => format!(
            "CAST({} AS DATE)",
            dates::parsed_timestamp_expr(&as_text(column))
        ),
        _ => format!("TRY_CAST({} AS {})", as_text(column), target.sql_type()),
    }
}

fn scrub_expr(c: &str, method: ScrubMethod) -> String {
    match method {
        ScrubMethod::Hash => format!("md5({})", c),
        ScrubMethod::Mask => format!(
            "CASE WHEN {c} IS NULL THEN NULL \
             WHEN length({c}) <= 4 THEN repeat('*', length({c})) \
             ELSE repeat('*', length({c}) - 4) || right({c}, 4) END",
            c = c
        ),
        ScrubMethod::Redact => format!("CASE WHEN {} IS NULL THEN NULL ELSE '[REDACTED]' END", c),
        ScrubMethod::YearOnly => format!(
            "COALESCE(strftime({}, '%Y'), {})",
            dates::parsed_timestamp_expr(c),
            c
        ),
    }
}

/// Age in whole years of a parsed date, as text
pub fn age_expr(column: &str) -> String {
    format!(
        "CAST(date_sub('year', CAST({} AS DATE), current_date) AS VARCHAR)",
        dates::parsed_timestamp_expr(&as_text(column))
    )
}

/// Names and expressions of the columns a split produces
pub fn split_parts(db: &Substrate, table: &str, step: &Transform) -> Result<Vec<(String, String)>> {
    let (column, mode, delimiter, position, length) = match step {
        Transform::SplitColumn {
            column,
            mode,
            delimiter,
            position,
            length,
        } => (column, *mode, delimiter, *position, *length),
        _ => return Ok(Vec::new()),
    };
    let c = as_text(column);

    let parts = match mode {
        SplitMode::Delimiter => {
            let delim = quote_literal(delimiter.as_deref().unwrap_or(","));
            let widest = db.query_count(&format!(
                "SELECT COALESCE(max(len(string_split({}, {}))), 1) FROM {}",
                c,
                delim,
                quote_ident(table)
            ))? as usize;
            let count = widest.clamp(2, MAX_DELIMITER_PARTS);
            (1..=count)
                .map(|i| {
                    (
                        split_column_name(column, i),
                        format!("NULLIF(split_part({}, {}, {}), '')", c, delim, i),
                    )
                })
                .collect()
        }
        SplitMode::Position => {
            let at = position.unwrap_or(1);
            vec![
                (
                    split_column_name(column, 1),
                    format!("NULLIF(left({}, {}), '')", c, at),
                ),
                (
                    split_column_name(column, 2),
                    format!("NULLIF(substr({}, {}), '')", c, at + 1),
                ),
            ]
        }
        SplitMode::Length => {
            let size = length.unwrap_or(1).max(1);
            let longest = db.query_count(&format!(
                "SELECT COALESCE(max(length({})), 0) FROM {}",
                c,
                quote_ident(table)
            ))? as usize;
            let count = ((longest + size - 1) / size).clamp(1, MAX_LENGTH_PARTS);
            (1..=count)
                .map(|i| {
                    (
                        split_column_name(column, i),
                        format!("NULLIF(substr({}, {}, {}), '')", c, (i - 1) * size + 1, size),
                    )
                })
                .collect()
        }
    };
    Ok(parts)
}

/// SQL expression for a combined column
pub fn combine_expr(columns: &[String], separator: &str, ignore_empty: bool) -> String {
    let inputs = columns
        .iter()
        .map(|column| {
            if ignore_empty {
                format!("NULLIF(trim({}), '')", as_text(column))
            } else {
                as_text(column)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("concat_ws({}, {})", quote_literal(separator), inputs)
}

/// Shape of a rebuilt table relative to the live one
#[derive(Default)]
struct Rebuild<'a> {
    replace: Option<(&'a str, String)>,
    insert_after: Option<(&'a str, Vec<(String, String)>)>,
    append: Vec<(String, String)>,
}

fn rebuild_select(table: &str, columns: &[String], shape: Rebuild<'_>) -> String {
    let mut select = Vec::with_capacity(columns.len() + shape.append.len());
    for column in columns {
        match &shape.replace {
            Some((target, expr)) if *target == column.as_str() => {
                select.push(format!("{} AS {}", expr, quote_ident(column)))
            }
            _ => select.push(quote_ident(column)),
        }
        if let Some((anchor, added)) = &shape.insert_after {
            if *anchor == column.as_str() {
                for (name, expr) in added {
                    select.push(format!("{} AS {}", expr, quote_ident(name)));
                }
            }
        }
    }
    for (name, expr) in &shape.append {
        select.push(format!("{} AS {}", expr, quote_ident(name)));
    }
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        select.join(", "),
        quote_ident(table),
        quote_ident(ROW_ID)
    )
}

fn dedup_select(table: &str, columns: &[String]) -> String {
    let id = quote_ident(ROW_ID);
    let keys: Vec<String> = columns
        .iter()
        .filter(|c| !crate::table::is_internal_column(c))
        .map(|c| quote_ident(c))
        .collect();
    let select = columns
        .iter()
        .map(|c| {
            if c == ROW_ID {
                format!(
                    "CAST(row_number() OVER (ORDER BY min({id})) AS BIGINT) AS {id}",
                    id = id
                )
            } else if crate::table::is_internal_column(c) {
                format!("arg_min({}, {}) AS {}", quote_ident(c), id, quote_ident(c))
            } else {
                quote_ident(c)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM {} GROUP BY {} ORDER BY min({})",
        select,
        quote_ident(table),
        keys.join(", "),
        id
    )
}

fn single_cell(column: &str, after: &str) -> Vec<CellExpr> {
    vec![CellExpr {
        column: column.to_string(),
        before: as_text(column),
        after: format!("CAST({} AS VARCHAR)", after),
    }]
}

fn new_cells(columns: &[(String, String)]) -> Vec<CellExpr> {
    columns
        .iter()
        .map(|(name, expr)| CellExpr {
            column: name.clone(),
            before: "CAST(NULL AS VARCHAR)".to_string(),
            after: format!("CAST({} AS VARCHAR)", expr),
        })
        .collect()
}

/// Work out how `step` mutates `table`. Reads the table (column list, and
/// split widths) but never writes.
pub fn plan(db: &Substrate, table: &str, step: &Transform) -> Result<Plan> {
    let columns = db.column_names(table)?;

    let plan = match step {
        Transform::RenameColumn { column, new_name } => Plan {
            mutation: Mutation::Rename {
                from: column.clone(),
                to: new_name.clone(),
            },
            cells: Vec::new(),
        },
        Transform::CustomSql { sql } => Plan {
            mutation: Mutation::CustomSql { sql: sql.clone() },
            cells: Vec::new(),
        },
        Transform::RemoveDuplicates => Plan {
            mutation: Mutation::Rebuild {
                select: dedup_select(table, &columns),
            },
            cells: Vec::new(),
        },
        Transform::CalculateAge { column } => {
            let added = vec![(age_column_name(column), age_expr(column))];
            Plan {
                cells: new_cells(&added),
                mutation: Mutation::Rebuild {
                    select: rebuild_select(
                        table,
                        &columns,
                        Rebuild {
                            insert_after: Some((column.as_str(), added)),
                            ..Default::default()
                        },
                    ),
                },
            }
        }
        Transform::SplitColumn { column, .. } => {
            let added = split_parts(db, table, step)?;
            Plan {
                cells: new_cells(&added),
                mutation: Mutation::Rebuild {
                    select: rebuild_select(
                        table,
                        &columns,
                        Rebuild {
                            insert_after: Some((column.as_str(), added)),
                            ..Default::default()
                        },
                    ),
                },
            }
        }
        Transform::CombineColumns {
            columns: inputs,
            separator,
            new_column,
            ignore_empty,
        } => {
            let added = vec![(new_column.clone(), combine_expr(inputs, separator, *ignore_empty))];
            Plan {
                cells: new_cells(&added),
                mutation: Mutation::Rebuild {
                    select: rebuild_select(
                        table,
                        &columns,
                        Rebuild {
                            append: added,
                            ..Default::default()
                        },
                    ),
                },
            }
        }
        single => {
            // Every remaining variant is a single-column rewrite
            let column = single.column().unwrap_or_default();
            let expr = value_expr(single).unwrap_or_else(|| as_text(column));
            let cells = single_cell(column, &expr);
            let mutation = if single.is_in_place() {
                Mutation::Update {
                    column: column.to_string(),
                    expr,
                }
            } else {
                Mutation::Rebuild {
                    select: rebuild_select(
                        table,
                        &columns,
                        Rebuild {
                            replace: Some((column, expr)),
                            ..Default::default()
                        },
                    ),
                }
            };
            Plan { mutation, cells }
        }
    };
    Ok(plan)
}
