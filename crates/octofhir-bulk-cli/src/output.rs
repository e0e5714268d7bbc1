use colored::Colorize;
use octofhir_bulk_client::ExportManifest;
use octofhir_bulk_client::http::ResponseBody;
use octofhir_bulk_client::{ExportState, ResponseDescriptor};
use serde_json::{Value, json};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// `✓` line for table output. JSON output stays a single document.
pub fn success_line(format: OutputFormat, msg: &str) -> Option<String> {
    match format {
        OutputFormat::Table => Some(format!("{} {}", "✓".green(), msg)),
        OutputFormat::Json => None,
    }
}

pub fn print_outcome(format: OutputFormat, msg: &str) {
    if let Some(line) = success_line(format, msg) {
        println!("{line}");
    }
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn status_line(response: &ResponseDescriptor) -> String {
    match &response.status_text {
        Some(text) => format!("{} {text}", response.status),
        None => response.status.to_string(),
    }
}

pub fn response_json(response: &ResponseDescriptor) -> Value {
    let body = match &response.body {
        ResponseBody::Empty => Value::Null,
        ResponseBody::Json(value) => value.clone(),
        ResponseBody::Text(text) => Value::String(text.clone()),
    };
    json!({
        "status": response.status,
        "statusText": response.status_text,
        "headers": response.headers,
        "body": body,
    })
}

pub fn print_response(label: &str, response: &ResponseDescriptor, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_value(&response_json(response)),
        OutputFormat::Table => {
            let status = status_line(response);
            let status = if response.status >= 400 {
                status.red()
            } else {
                status.green()
            };
            println!("{}: {}", label.cyan(), status);
            if let Some(location) = response.content_location() {
                println!("{}: {}", "Content-Location".cyan(), location);
            }
            if let Some(progress) = response.header("x-progress") {
                println!("{}: {}", "X-Progress".cyan(), progress);
            }
        }
    }
}

pub fn print_state(state: ExportState) {
    println!("{}: {}", "State".cyan(), state);
}

pub fn print_manifest(manifest: &ExportManifest, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_value(manifest) {
            Ok(value) => print_value(&value),
            Err(e) => print_error(&format!("Cannot render manifest: {e}")),
        },
        OutputFormat::Table => {
            if let Some(time) = &manifest.transaction_time {
                println!("{}: {}", "Transaction time".cyan(), time);
            }
            println!(
                "{}: {}",
                "Requires access token".cyan(),
                manifest.requires_access_token
            );
            if manifest.output.is_empty() {
                println!("No output files.");
            } else {
                let mut builder = Builder::default();
                builder.push_record(["#", "Type", "Count", "URL"]);
                for (index, entry) in manifest.output.iter().enumerate() {
                    builder.push_record([
                        index.to_string(),
                        entry.resource_type.clone().unwrap_or_else(|| "-".into()),
                        entry
                            .count
                            .map_or_else(|| "-".to_string(), |count| count.to_string()),
                        entry.url.clone(),
                    ]);
                }
                let table = builder.build().with(Style::rounded()).to_string();
                println!("{table}");
                println!("Total resources: {}", manifest.total_count());
            }
            if !manifest.error.is_empty() {
                println!(
                    "{}: {} error file(s)",
                    "Errors".yellow(),
                    manifest.error.len()
                );
            }
        }
    }
}

/// Shortens a secret for display: first and last eight characters.
pub fn preview(secret: &str) -> String {
    if secret.len() > 20 && secret.is_ascii() {
        format!("{}...{}", &secret[..8], &secret[secret.len() - 8..])
    } else {
        secret.to_string()
    }
}
