//! Execute command - run SQL against the selected database

use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};

use gumshoe_core::QueryResult;

use super::{get_or_create_context, Target};
use crate::output;

pub fn run(
    target: &Target,
    sql: Option<&str>,
    file: Option<&Path>,
    read_only: bool,
    format: &str,
) -> Result<()> {
    let ctx = get_or_create_context(target)?;

    // SQL comes from: argument, file, or stdin
    let result = if let Some(sql) = sql {
        run_sql(&ctx, sql, read_only)?
    } else if let Some(file_path) = file {
        if read_only {
            let sql = std::fs::read_to_string(file_path)
                .with_context(|| format!("Failed to read SQL file {}", file_path.display()))?;
            ctx.query_service.query(&sql)?
        } else {
            ctx.query_service.execute_file(file_path)?
        }
    } else if atty::isnt(atty::Stream::Stdin) {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read SQL from stdin")?;
        run_sql(&ctx, &buffer, read_only)?
    } else {
        anyhow::bail!("No SQL provided. Use a positional argument, --file, or pipe from stdin.");
    };

    print_result(&result, format)
}

fn run_sql(ctx: &gumshoe_core::GumshoeContext, sql: &str, read_only: bool) -> Result<QueryResult> {
    if read_only {
        ctx.query_service.query(sql)
    } else {
        ctx.query_service.execute(sql)
    }
}

fn print_result(result: &QueryResult, format: &str) -> Result<()> {
    match format {
        "json" => {
            output::json(result)?;
        }
        "csv" => {
            println!("{}", csv_header(&result.columns));
            for row in &result.rows {
                let values: Vec<String> = row.iter().map(value_to_csv).collect();
                println!("{}", values.join(","));
            }
        }
        _ => {
            let mut table = output::create_table();
            table.set_header(&result.columns);

            for row in &result.rows {
                let values: Vec<String> = row.iter().map(value_to_string).collect();
                table.add_row(values);
            }

            println!("{}", table);
            println!();
            println!("{} row(s) returned", result.row_count);
        }
    }

    Ok(())
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => v.to_string(),
    }
}

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_header(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<_>>()
        .join(",")
}

fn value_to_csv(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => csv_field(s),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => csv_field(&v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_csv_quoting() {
        assert_eq!(value_to_csv(&json!(null)), "");
        assert_eq!(value_to_csv(&json!("noir")), "noir");
        assert_eq!(
            value_to_csv(&json!(r#"{"worldMap": {}, "items": {}}"#)),
            r#""{""worldMap"": {}, ""items"": {}}""#
        );
    }

    #[test]
    fn test_csv_header_quotes_column_names() {
        let columns = vec![
            "game_type".to_string(),
            "length(game_config)".to_string(),
            "concat(a, b)".to_string(),
            "say \"hi\"".to_string(),
        ];
        assert_eq!(
            csv_header(&columns),
            r#"game_type,length(game_config),"concat(a, b)","say ""hi""""#
        );
    }

    #[test]
    fn test_csv_nested_values_are_quoted() {
        assert_eq!(value_to_csv(&json!({"x": 1, "y": 2})), r#""{""x"":1,""y"":2}""#);
    }

    #[test]
    fn test_table_values() {
        assert_eq!(value_to_string(&json!(null)), "NULL");
        assert_eq!(value_to_string(&json!(58)), "58");
        assert_eq!(value_to_string(&json!(true)), "true");
    }
}
