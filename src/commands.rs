//! Command implementations for tabclean CLI

use crate::cli::{Commands, OutputFormat};
use crate::config::EngineConfig;
use crate::diff::DiffKey;
use crate::engine::{Engine, TableContext};
use crate::error::{Result, TabcleanError};
use crate::output::{JsonFormatter, PrettyPrinter};
use crate::timeline::AuditView;
use crate::transform::Transform;
use crate::workspace::TabcleanWorkspace;
use indexmap::IndexMap;
use std::path::Path;

/// Execute a command
pub fn execute_command(command: Commands, workspace_path: Option<&Path>) -> Result<()> {
    if let Commands::Init { force } = command {
        return init_command(workspace_path, force);
    }

    let workspace = TabcleanWorkspace::find_or_create(workspace_path)?;
    let mut engine = Engine::open(workspace)?;
    engine.set_show_progress(true);

    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Import { input, name } => import_command(&mut engine, &input, &name),
        Commands::List { format } => list_command(&engine, &format),
        Commands::Show {
            table,
            limit,
            offset,
            format,
        } => show_command(&engine, table.as_deref(), limit, offset, &format),
        Commands::Apply {
            table,
            kind,
            column,
            params,
            format,
        } => apply_command(
            &mut engine,
            table.as_deref(),
            &kind,
            column.as_deref(),
            params.as_deref(),
            &format,
        ),
        Commands::Edit {
            table,
            row,
            column,
            value,
            null,
        } => {
            let value = if null { None } else { value };
            edit_command(&mut engine, table.as_deref(), row, &column, value.as_deref())
        }
        Commands::InsertRow { table, at, values } => {
            insert_row_command(&mut engine, table.as_deref(), at, values)
        }
        Commands::DeleteRow { table, row } => delete_row_command(&mut engine, table.as_deref(), row),
        Commands::Undo { table } => undo_command(&mut engine, table.as_deref()),
        Commands::Redo { table } => redo_command(&mut engine, table.as_deref()),
        Commands::History { table, all, format } => {
            history_command(&mut engine, table.as_deref(), all, &format)
        }
        Commands::Audit {
            entry_id,
            limit,
            offset,
            format,
        } => audit_command(&engine, &entry_id, limit, offset, &format),
        Commands::Diff {
            table,
            other,
            key,
            against,
            format,
        } => diff_command(
            &mut engine,
            &table,
            other.as_deref(),
            key.as_deref(),
            against.as_deref(),
            &format,
        ),
        Commands::Freeze { table } => freeze_command(&mut engine, table.as_deref()),
        Commands::Thaw { table } => thaw_command(&mut engine, &table),
        Commands::Switch { table } => switch_command(&mut engine, &table),
        Commands::Compact { table } => compact_command(&mut engine, table.as_deref()),
        Commands::Delete { table } => delete_command(&mut engine, &table),
        Commands::Stack { tables, name } => stack_command(&mut engine, &tables, &name),
        Commands::Join {
            left,
            right,
            on,
            kind,
            name,
        } => {
            let ctx = engine.join_tables(&left, &right, &on, kind, &name)?;
            print_created(&engine, &ctx, "Joined");
            Ok(())
        }
        Commands::Stats { format } => stats_command(&engine, &format),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::parse(format).map_err(TabcleanError::validation)
}

/// The named table, or the active one when no name is given
fn resolve_table(engine: &Engine, table: Option<&str>) -> Result<TableContext> {
    match table {
        Some(reference) => engine.context(reference),
        None => engine
            .active_context()
            .ok_or_else(|| TabcleanError::validation("No active table. Name a table or run 'tabclean switch'")),
    }
}

fn print_created(engine: &Engine, ctx: &TableContext, verb: &str) {
    let rows = engine
        .tables()
        .iter()
        .find(|t| t.id == ctx.table_id)
        .map_or(0, |t| t.row_count);
    println!("✅ {} into table '{}' ({} rows)", verb, ctx.name, rows);
}

/// Initialize tabclean workspace
fn init_command(workspace_path: Option<&Path>, force: bool) -> Result<()> {
    let current_dir = std::env::current_dir()?;
    let root = workspace_path.unwrap_or(&current_dir);

    // Always create in the given directory, never a parent workspace
    let workspace = TabcleanWorkspace::create_new(root.to_path_buf())?;
    if force {
        EngineConfig::default().save(&workspace.config_path())?;
    }

    println!("✅ Initialized tabclean workspace at: {}", workspace.root.display());
    println!("📁 Workspace directory: {}", workspace.state_dir.display());

    Ok(())
}

fn import_command(engine: &mut Engine, input: &Path, name: &str) -> Result<()> {
    let ctx = engine.import_csv(input, name)?;
    print_created(engine, &ctx, &format!("Imported {}", input.display()));
    Ok(())
}

fn list_command(engine: &Engine, format: &str) -> Result<()> {
    match parse_format(format)? {
        OutputFormat::Pretty => {
            let active = engine.active_context().map(|c| c.table_id);
            PrettyPrinter::print_table_list(engine.tables(), active.as_deref());
        }
        OutputFormat::Json => println!("{}", JsonFormatter::format(engine.tables())?),
    }
    Ok(())
}

fn show_command(engine: &Engine, table: Option<&str>, limit: usize, offset: usize, format: &str) -> Result<()> {
    let output_format = parse_format(format)?;
    let ctx = resolve_table(engine, table)?;
    let (columns, rows) = engine.table_rows(&ctx, limit, offset)?;

    match output_format {
        OutputFormat::Pretty => {
            println!("📋 {}", ctx.name);
            PrettyPrinter::print_rows(&columns, &rows, offset);
        }
        OutputFormat::Json => println!("{}", JsonFormatter::format_rows(&columns, &rows)?),
    }
    Ok(())
}

fn apply_command(
    engine: &mut Engine,
    table: Option<&str>,
    kind: &str,
    column: Option<&str>,
    params: Option<&str>,
    format: &str,
) -> Result<()> {
    let output_format = parse_format(format)?;
    let ctx = resolve_table(engine, table)?;
    let params = params
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| TabcleanError::validation(format!("Invalid --params JSON: {}", e)))?;
    let step = Transform::from_parts(kind, column, params.as_ref())?;

    let result = engine.apply_transformation(&ctx, &step)?;
    match output_format {
        OutputFormat::Pretty => PrettyPrinter::print_transform_result(&step.label(), &result),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&result)?),
    }
    Ok(())
}

fn edit_command(
    engine: &mut Engine,
    table: Option<&str>,
    row: u64,
    column: &str,
    value: Option<&str>,
) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    let result = engine.edit_cell(&ctx, row, column, value)?;
    if result.cells_changed == 0 {
        println!("ℹ️  Row {} column '{}' already has that value", row, column);
    } else {
        println!("✅ Edited row {} column '{}'", row, column);
    }
    Ok(())
}

fn insert_row_command(
    engine: &mut Engine,
    table: Option<&str>,
    at: Option<u64>,
    values: Vec<(String, String)>,
) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    let position = match at {
        Some(position) => position,
        None => engine.row_count(&ctx)? + 1,
    };
    let values: IndexMap<String, Option<String>> =
        values.into_iter().map(|(c, v)| (c, Some(v))).collect();
    let result = engine.insert_row(&ctx, position, values)?;
    println!(
        "✅ Inserted row at {} ({} rows now)",
        result.position, result.row_count
    );
    Ok(())
}

fn delete_row_command(engine: &mut Engine, table: Option<&str>, row: u64) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    let result = engine.delete_row(&ctx, row)?;
    println!("✅ Deleted row {} ({} rows now)", row, result.row_count);
    Ok(())
}

fn undo_command(engine: &mut Engine, table: Option<&str>) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    let command = engine.undo(&ctx)?;
    println!("↩️  Undid: {}", command.label);
    Ok(())
}

fn redo_command(engine: &mut Engine, table: Option<&str>) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    let command = engine.redo(&ctx)?;
    println!("↪️  Redid: {}", command.label);
    Ok(())
}

fn history_command(engine: &mut Engine, table: Option<&str>, all: bool, format: &str) -> Result<()> {
    let output_format = parse_format(format)?;
    let view = if all { AuditView::All } else { AuditView::ActiveOnly };
    let entries = match table {
        Some(reference) => {
            let ctx = engine.context(reference)?;
            engine.audit_entries_for_table(&ctx, view)?
        }
        None => match engine.active_context() {
            Some(ctx) => engine.audit_entries_for_table(&ctx, view)?,
            None => engine.all_audit_entries(view)?,
        },
    };

    match output_format {
        OutputFormat::Pretty => PrettyPrinter::print_history(&entries),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&entries)?),
    }
    Ok(())
}

fn audit_command(engine: &Engine, entry_id: &str, limit: usize, offset: usize, format: &str) -> Result<()> {
    let output_format = parse_format(format)?;
    let page = engine.audit_row_details(entry_id, limit, offset)?;
    match output_format {
        OutputFormat::Pretty => PrettyPrinter::print_row_details(entry_id, &page),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&page)?),
    }
    Ok(())
}

fn diff_command(
    engine: &mut Engine,
    table: &str,
    other: Option<&str>,
    key: Option<&str>,
    against: Option<&str>,
    format: &str,
) -> Result<()> {
    let output_format = parse_format(format)?;
    let (title, diff) = match (other, against) {
        (Some(other), _) => (
            format!("{} → {}", table, other),
            engine.run_diff(table, other, &DiffKey::parse(key))?,
        ),
        (None, Some(reference)) => {
            let ctx = engine.context(table)?;
            (
                format!("{} @ {} → current", table, reference),
                engine.diff_against(&ctx, reference)?,
            )
        }
        (None, None) => {
            return Err(TabcleanError::validation(
                "Give a second table or --against <state>",
            ))
        }
    };

    match output_format {
        OutputFormat::Pretty => PrettyPrinter::print_diff_results(&title, &diff),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&diff)?),
    }
    Ok(())
}

fn freeze_command(engine: &mut Engine, table: Option<&str>) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    match engine.freeze(&ctx)? {
        Some(manifest) => PrettyPrinter::print_manifest("Froze", &ctx.name, &manifest),
        None => println!("ℹ️  '{}' is already frozen", ctx.name),
    }
    Ok(())
}

fn thaw_command(engine: &mut Engine, table: &str) -> Result<()> {
    let ctx = engine.context(table)?;
    engine.thaw(&ctx)?;
    println!("✅ '{}' is live", ctx.name);
    Ok(())
}

fn switch_command(engine: &mut Engine, table: &str) -> Result<()> {
    let current = engine.active_context();
    let ctx = engine.switch_table(current.as_ref(), table)?;
    println!("✅ Active table: {}", ctx.name);
    Ok(())
}

fn compact_command(engine: &mut Engine, table: Option<&str>) -> Result<()> {
    let ctx = resolve_table(engine, table)?;
    let manifest = engine.compact(&ctx)?;
    PrettyPrinter::print_manifest("Compacted", &ctx.name, &manifest);
    Ok(())
}

fn delete_command(engine: &mut Engine, table: &str) -> Result<()> {
    let ctx = engine.context(table)?;
    engine.delete_table(&ctx)?;
    println!("🗑️  Deleted table '{}'", ctx.name);
    Ok(())
}

fn stack_command(engine: &mut Engine, tables: &[String], name: &str) -> Result<()> {
    let sources: Vec<&str> = tables.iter().map(String::as_str).collect();
    let ctx = engine.stack_tables(&sources, name)?;
    print_created(engine, &ctx, &format!("Stacked {} tables", sources.len()));
    Ok(())
}

fn stats_command(engine: &Engine, format: &str) -> Result<()> {
    let stats = engine.workspace().stats()?;
    match parse_format(format)? {
        OutputFormat::Pretty => PrettyPrinter::print_workspace_stats(&stats),
        OutputFormat::Json => println!("{}", JsonFormatter::format(&stats)?),
    }
    Ok(())
}
