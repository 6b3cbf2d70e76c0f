//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Rows as a table, or `value` as JSON
pub fn print_rows<R: Tabled, T: Serialize + ?Sized>(
    rows: Vec<R>,
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "Nothing found".yellow());
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
            Ok(())
        }
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Binary units, e.g. `128.00Mi`
pub fn format_bytes(bytes: u64) -> String {
    const KI: u64 = 1024;
    const MI: u64 = KI * 1024;
    const GI: u64 = MI * 1024;

    if bytes >= GI {
        format!("{:.2}Gi", bytes as f64 / GI as f64)
    } else if bytes >= MI {
        format!("{:.2}Mi", bytes as f64 / MI as f64)
    } else if bytes >= KI {
        format!("{:.2}Ki", bytes as f64 / KI as f64)
    } else {
        format!("{}B", bytes)
    }
}

pub fn format_cpu(milli: u64) -> String {
    if milli >= 1000 {
        format!("{:.1}", milli as f64 / 1000.0)
    } else {
        format!("{}m", milli)
    }
}

/// Color a replica count by how far it is from the desired count
pub fn color_ready(ready: i32, desired: i32) -> String {
    let text = format!("{}/{}", ready, desired);
    if desired > 0 && ready >= desired {
        text.green().to_string()
    } else if ready > 0 {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}
