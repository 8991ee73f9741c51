//! Status command - tables, config lengths per game type, schema versions

use anyhow::Result;
use colored::Colorize;

use super::{get_context, Target};
use crate::output;

pub fn run(target: &Target, json: bool) -> Result<()> {
    let ctx = get_context(target)?;
    let status = ctx.status_service.get_status()?;

    if json {
        output::json(&status)?;
        return Ok(());
    }

    println!(
        "{} {}",
        ctx.database.name.bold(),
        ctx.database.path.display().to_string().dimmed()
    );
    if let Some(size) = status.database_size {
        println!("Size: {}", output::format_size(size));
    }
    println!();

    println!("{}", "Tables".bold());
    if status.tables.is_empty() {
        println!("  (none)");
    }
    for table in &status.tables {
        println!("  • {}", table);
    }
    println!();

    println!("{}", "Game configs".bold());
    if status.games.is_empty() {
        output::warning("  No game_data rows");
    } else {
        let mut table = output::create_table();
        table.set_header(vec!["Game type", "Config length"]);
        for game in &status.games {
            let length = game
                .config_length
                .map(|n| n.to_string())
                .unwrap_or_else(|| "NULL".to_string());
            table.add_row(vec![game.game_type.clone(), length]);
        }
        println!("{}", table);
    }
    println!();

    println!("{}", "Schema versions".bold());
    if status.schema_versions.is_empty() {
        output::warning("  No migrations recorded");
    } else {
        let mut table = output::create_table();
        table.set_header(vec!["Version", "Name", "Applied", "Run"]);
        for version in &status.schema_versions {
            table.add_row(vec![
                version.version.to_string(),
                version.name.clone(),
                version.applied_at.clone().unwrap_or_default(),
                version.run_id.clone(),
            ]);
        }
        println!("{}", table);
    }

    Ok(())
}
