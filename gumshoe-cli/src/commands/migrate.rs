//! Migrate command - bring a game database to the current schema

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color};

use gumshoe_core::services::{new_run_id, ActionStatus, MigrationReport};
use gumshoe_core::{GumshoeContext, LogEvent, LoggingService, MigrateOptions};

use super::{get_context, get_logger, log_event, Target};
use crate::output;

pub fn run(target: &Target, dry_run: bool, skip_backup: bool, json: bool) -> Result<()> {
    let ctx = get_context(target)?;
    let logger = get_logger(target);
    let options = MigrateOptions { dry_run, skip_backup };

    let report = migrate_logged(&ctx, &logger, &new_run_id(), options)?;
    if let Some(backup) = report.backup.as_deref().filter(|_| !json) {
        output::info(&format!("Backup created: {}", backup));
    }
    print_report(&report, json)
}

/// Run the migration, logging every event of a real run under `run_id`
fn migrate_logged(
    ctx: &GumshoeContext,
    logger: &Option<LoggingService>,
    run_id: &str,
    options: MigrateOptions,
) -> Result<MigrationReport> {
    if options.dry_run {
        return ctx.migrate_as(run_id, options);
    }

    let event = |name: &str| {
        LogEvent::new(name)
            .with_command("migrate")
            .with_database(&ctx.database.name)
            .with_run_id(run_id)
    };

    log_event(logger, event("migration_started"));

    match ctx.migrate_as(run_id, options) {
        Ok(report) => {
            if report.backup.is_some() {
                log_event(logger, event("backup_created"));
            }
            log_event(logger, event("migration_completed"));
            Ok(report)
        }
        Err(e) => {
            log_event(
                logger,
                event("migration_failed")
                    .with_error(e.to_string())
                    .with_error_details(format!("{:#}", e)),
            );
            Err(e)
        }
    }
}

fn print_report(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        output::json(report)?;
        return Ok(());
    }

    let title = if report.dry_run {
        "Migration plan (dry run)"
    } else {
        "Migration"
    };
    println!("{}", title.bold());
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Step", "Action", "Target", "Status", "Rows", "Detail"]);

    for action in &report.actions {
        let status = match action.status {
            ActionStatus::Pending => Cell::new("PENDING").fg(Color::Cyan),
            ActionStatus::Applied => Cell::new("APPLIED").fg(Color::Green),
            ActionStatus::Skipped => Cell::new("SKIPPED").fg(Color::DarkGrey),
        };
        let rows = action
            .rows_affected
            .map(|n| n.to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(action.step),
            Cell::new(format!("{:?}", action.kind)),
            Cell::new(&action.target),
            status,
            Cell::new(rows),
            Cell::new(&action.detail),
        ]);
    }
    println!("{}", table);
    println!();

    if report.dry_run {
        if report.is_noop() {
            output::success("Nothing to do: database already matches the target schema");
        } else {
            output::info(&format!("{} action(s) would be applied", report.change_count()));
            for action in report.actions.iter().filter(|a| a.is_change()) {
                println!("  {}", action.sql.dimmed());
            }
        }
        return Ok(());
    }

    if report.is_noop() {
        output::success("Database already up to date");
    } else {
        output::success(&format!(
            "Migrated: {} column(s) added, {} row(s) seeded, {} config(s) backfilled, {} timestamp(s) backfilled",
            report.columns_added.len(),
            report.rows_seeded,
            report.configs_backfilled,
            report.timestamps_backfilled,
        ));
    }
    if !report.version_recorded && !report.already_recorded {
        output::warning("Migration version was not recorded");
    }
    println!("  Run: {}", report.run_id.dimmed());
    println!("  Took: {} ms", report.duration_ms);

    Ok(())
}
