//! Verify command - post-migration acceptance checks

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color};
use serde_json::Value;

use gumshoe_core::services::CheckStatus;
use gumshoe_core::LogEvent;

use super::{get_context, get_logger, log_event, Target};
use crate::output;

/// Format a detail JSON value for display
fn format_detail(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let display_val = match v {
                        Value::String(s) => {
                            if s.chars().count() > 40 {
                                format!("{}...", s.chars().take(37).collect::<String>())
                            } else {
                                s.clone()
                            }
                        }
                        Value::Array(arr) => arr
                            .iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                            .collect::<Vec<_>>()
                            .join(", "),
                        _ => v.to_string(),
                    };
                    format!("{}: {}", k, display_val)
                })
                .collect();
            parts.join("; ")
        }
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

pub fn run(target: &Target, verbose: bool, json: bool) -> Result<()> {
    let ctx = get_context(target)?;
    let result = ctx.verify_service.run_checks()?;

    let logger = get_logger(target);
    let mut event = LogEvent::new("verify_completed")
        .with_command("verify")
        .with_database(&ctx.database.name);
    if result.has_errors() {
        event = event.with_error(format!("{} check(s) failed", result.summary.errors));
    }
    log_event(&logger, event);

    if json {
        output::json(&result)?;
    } else {
        println!("{}", format!("Verifying {}", ctx.database.name).bold());
        println!();

        let mut table = output::create_table();
        table.set_header(vec!["Check", "Status", "Message"]);

        for check in &result.checks {
            let status_cell = match check.status {
                CheckStatus::Pass => Cell::new("PASS").fg(Color::Green),
                CheckStatus::Warning => Cell::new("WARN").fg(Color::Yellow),
                CheckStatus::Error => Cell::new("ERROR").fg(Color::Red),
            };

            table.add_row(vec![Cell::new(check.name), status_cell, Cell::new(&check.message)]);

            if verbose {
                for detail in check.details.iter().flatten() {
                    table.add_row(vec![
                        Cell::new(""),
                        Cell::new(""),
                        Cell::new(format!("  - {}", format_detail(detail))),
                    ]);
                }
            }
        }

        println!("{}", table);
        println!();

        println!(
            "Summary: {} passed, {} warnings, {} errors",
            result.summary.passed.to_string().green(),
            result.summary.warnings.to_string().yellow(),
            result.summary.errors.to_string().red(),
        );
    }

    if result.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_detail() {
        let detail = json!({ "game_type": "noir", "missing_keys": ["items", "npcs"] });
        assert_eq!(format_detail(&detail), "game_type: noir; missing_keys: items, npcs");

        let long = json!({ "error": "x".repeat(50) });
        assert!(format_detail(&long).ends_with("..."));
    }
}
