use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    schema_id: &'a str,
    method: &'a str,
    request_id: u64,
    elapsed_ms: u128,
    result: &'a Value,
}

pub fn print_call_result(
    method: &str,
    request_id: u64,
    result: &Value,
    elapsed: Duration,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                schema_id: "https://schemas.genlink.dev/cli/v1/call-result.schema.json",
                method,
                request_id,
                elapsed_ms: elapsed.as_millis(),
                result,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "ID", "ELAPSED", "RESULT"])
                .add_row(vec![
                    method.to_string(),
                    request_id.to_string(),
                    format!("{}ms", elapsed.as_millis()),
                    result_preview(result),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "method={method} id={request_id} elapsed={}ms result={}",
                elapsed.as_millis(),
                result_preview(result)
            );
        }
        OutputFormat::Raw => print_raw(result),
    }
}

/// Raw mode prints string results as plain text, everything else as
/// compact JSON, so output pipes cleanly into other tools.
pub fn print_raw(result: &Value) {
    let mut out = std::io::stdout();
    let rendered = match result.as_str() {
        Some(text) => text.to_string(),
        None => result.to_string(),
    };
    let _ = writeln!(out, "{rendered}");
    let _ = out.flush();
}

pub fn result_preview(result: &Value) -> String {
    match result.as_str() {
        Some(text) => text.to_string(),
        None => result.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preview_unwraps_plain_strings() {
        assert_eq!(result_preview(&json!("pong")), "pong");
        assert_eq!(result_preview(&json!({"a": 1})), "{\"a\":1}");
    }
}
