//! Output formatting for the CLI.

use clap::ValueEnum;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a serializable value; text mode uses its `Display`.
pub fn print<T: Serialize + std::fmt::Display>(value: &T, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", value),
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", value),
        },
    }
}

/// Print a raw response body unchanged.
pub fn print_body(body: &str) {
    println!("{}", body);
}

pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "status": "success", "message": message })
        ),
    }
}

/// Print an error with its machine-readable kind.
pub fn print_error(kind: &str, message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => eprintln!(
            "{}",
            serde_json::json!({ "status": "error", "kind": kind, "message": message })
        ),
    }
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<20} {}", format!("{}:", label), value);
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{}", text);
    println!("{}", "-".repeat(50));
}
