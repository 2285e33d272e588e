//! Output formatting utilities

use crate::audit::RowDetailsPage;
use crate::diff::{DiffResult, DiffStatus};
use crate::error::Result;
use crate::executor::TransformResult;
use crate::manifest::Manifest;
use crate::substrate::TextRow;
use crate::timeline::AuditEntry;
use crate::workspace::{TableEntry, WorkspaceStats};

/// Rows of a diff printed before the listing is cut short
const DIFF_ROW_LIMIT: usize = 20;

/// Pretty printer for tabclean output
pub struct PrettyPrinter;

impl PrettyPrinter {
    /// Print workspace statistics
    pub fn print_workspace_stats(stats: &WorkspaceStats) {
        println!("📊 Tabclean Workspace Statistics");
        println!("├─ Tables: {} ({} frozen)", stats.table_count, stats.frozen_count);
        println!("├─ Shards: {}", stats.shard_count);
        println!("├─ Shard size: {}", format_bytes(stats.total_shard_size));
        println!("├─ Snapshot size: {}", format_bytes(stats.total_snapshot_size));
        println!("└─ Change-log size: {}", format_bytes(stats.total_changelog_size));
    }

    /// Print the table list, marking the active table
    pub fn print_table_list(tables: &[TableEntry], active: Option<&str>) {
        if tables.is_empty() {
            println!("No tables found.");
            return;
        }

        println!("📋 Tables:");
        for (i, table) in tables.iter().enumerate() {
            let prefix = if i == tables.len() - 1 { "└─" } else { "├─" };
            let marker = if active == Some(table.id.as_str()) { " *" } else { "" };
            let state = if table.frozen { "frozen" } else { "live" };
            println!(
                "{} {}{} ({} rows, {} columns, {})",
                prefix, table.name, marker, table.row_count, table.column_count, state
            );
        }
    }

    /// Print a page of rows as aligned columns
    pub fn print_rows(columns: &[String], rows: &[TextRow], offset: usize) {
        if columns.is_empty() {
            println!("(no columns)");
            return;
        }

        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.iter().map(|v| display_value(v.as_deref())).collect())
            .collect();
        let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        let number_width = (offset + rows.len()).to_string().len().max(1);

        let header = columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("{:>nw$} │ {}", "#", header, nw = number_width);
        for (i, row) in cells.iter().enumerate() {
            let line = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<w$}", c, w = *w))
                .collect::<Vec<_>>()
                .join(" │ ");
            println!("{:>nw$} │ {}", offset + i + 1, line, nw = number_width);
        }
        if rows.is_empty() {
            println!("(no rows)");
        }
    }

    /// Print the outcome of an applied transformation
    pub fn print_transform_result(label: &str, result: &TransformResult) {
        println!("✅ {}", label);
        println!("├─ Rows affected: {}", result.affected);
        println!("├─ Rows in table: {}", result.row_count);
        if result.is_capped {
            println!("├─ Audit detail: not captured (over the row cap)");
        } else if result.has_row_details {
            println!("├─ Audit detail: captured");
        }
        println!("└─ Audit entry: {}", result.audit_entry_id);
    }

    /// Print a history listing, newest first
    pub fn print_history(entries: &[AuditEntry]) {
        if entries.is_empty() {
            println!("No history.");
            return;
        }

        println!("🕘 History:");
        for (i, entry) in entries.iter().enumerate() {
            let prefix = if i == entries.len() - 1 { "└─" } else { "├─" };
            let undone = if entry.undone { " [undone]" } else { "" };
            println!(
                "{} {} {} ({}, {} rows){}",
                prefix,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.label,
                entry.kind,
                entry.rows_affected,
                undone
            );
            let indent = if i == entries.len() - 1 { "   " } else { "│  " };
            println!("{}└─ audit entry: {}", indent, entry.audit_entry_id);
        }
    }

    /// Print one page of audit detail
    pub fn print_row_details(audit_entry_id: &str, page: &RowDetailsPage) {
        println!("🔎 Audit entry {} ({} changed cells)", audit_entry_id, page.total);
        if page.rows.is_empty() {
            println!("└─ No row detail captured");
            return;
        }
        for (i, detail) in page.rows.iter().enumerate() {
            let prefix = if i == page.rows.len() - 1 { "└─" } else { "├─" };
            println!(
                "{} row {} · {}: {} → {}",
                prefix,
                detail.row_index,
                detail.column_name,
                display_value(detail.previous_value.as_deref()),
                display_value(detail.new_value.as_deref())
            );
        }
    }

    /// Print diff results
    pub fn print_diff_results(title: &str, diff: &DiffResult) {
        println!("🔍 Diff Results: {}", title);

        if let Some(notice) = &diff.schema_notice {
            println!("├─ ⚠️  Schema differs, comparing common columns only");
            if !notice.only_in_a.is_empty() {
                println!("│  ├─ Only in first: {}", notice.only_in_a.join(", "));
            }
            if !notice.only_in_b.is_empty() {
                println!("│  └─ Only in second: {}", notice.only_in_b.join(", "));
            }
        }

        let summary = &diff.summary;
        println!("├─ Added: {}", summary.added);
        println!("├─ Removed: {}", summary.removed);
        println!("├─ Modified: {}", summary.modified);
        if !diff.has_changes() {
            println!("└─ ✅ Unchanged: {}", summary.unchanged);
            return;
        }
        println!("├─ Unchanged: {}", summary.unchanged);
        println!("└─ Changed rows:");

        for row in diff.rows.iter().take(DIFF_ROW_LIMIT) {
            let key = row
                .key
                .iter()
                .map(|v| display_value(v.as_deref()))
                .collect::<Vec<_>>()
                .join(", ");
            match row.status {
                DiffStatus::Added => println!("   ➕ [{}]", key),
                DiffStatus::Removed => println!("   ➖ [{}]", key),
                DiffStatus::Modified | DiffStatus::Unchanged => {
                    println!("   ✏️  [{}]", key);
                    for (column, cell) in &row.changes {
                        println!(
                            "      {}: {} → {}",
                            column,
                            display_value(cell.before.as_deref()),
                            display_value(cell.after.as_deref())
                        );
                    }
                }
            }
        }
        if diff.rows.len() > DIFF_ROW_LIMIT {
            println!("   … {} more (use --format json)", diff.rows.len() - DIFF_ROW_LIMIT);
        }
    }

    /// Print the manifest written by a freeze or compaction
    pub fn print_manifest(action: &str, table: &str, manifest: &Manifest) {
        println!("🧊 {} '{}'", action, table);
        println!("├─ Rows: {}", manifest.total_rows);
        println!("├─ Columns: {}", manifest.columns.len());
        println!("├─ Shards: {}", manifest.shards.len());
        println!("└─ Size: {}", format_bytes(manifest.total_bytes()));
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter;

impl JsonFormatter {
    /// Format any serializable data as JSON
    pub fn format<T: serde::Serialize + ?Sized>(data: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(data)?)
    }

    /// Rows as an array of objects keyed by column
    pub fn format_rows(columns: &[String], rows: &[TextRow]) -> Result<String> {
        let objects: Vec<serde_json::Map<String, serde_json::Value>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| {
                        let value = v
                            .as_ref()
                            .map_or(serde_json::Value::Null, |s| serde_json::Value::String(s.clone()));
                        (c.clone(), value)
                    })
                    .collect()
            })
            .collect();
        Ok(serde_json::to_string_pretty(&objects)?)
    }
}

fn display_value(value: Option<&str>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

/// Format bytes in human-readable format
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
