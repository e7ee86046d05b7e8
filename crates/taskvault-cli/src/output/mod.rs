//! Output formatting for the taskvault CLI.
//!
//! Text output is one line per record: the id first, then `key:value` pairs,
//! skipping nulls and empty lists. JSON output is pretty-printed; lists are
//! wrapped in an envelope with a count and follow-up hints.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Machine-readable JSON
    Json,
    /// Concise one-line-per-record text
    #[default]
    Text,
    /// Multi-line text, one field per line
    Pretty,
}

/// Fields rendered first, in this order, without a label.
const LEAD_KEYS: [&str; 2] = ["id", "kind"];

#[derive(Debug, Clone, Default)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    #[must_use]
    pub const fn output_format(&self) -> OutputFormat {
        self.format
    }

    /// Render data according to the configured format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let value = serde_json::to_value(data)?;
        Ok(match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&value)?,
            OutputFormat::Text => render_text(&value),
            OutputFormat::Pretty => render_pretty(&value),
        })
    }

    /// Render and print to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn print<T: Serialize>(&self, data: &T) -> Result<()> {
        let output = self.format(data)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{output}")?;
        Ok(())
    }

    /// Print a list, or `empty_message` when there is nothing to show.
    ///
    /// JSON output is always an envelope `{<collection>: [...], count, advice}`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn print_list<T: Serialize>(
        &self,
        data: &[T],
        empty_message: &str,
        collection_name: &str,
        advice: &[&str],
    ) -> Result<()> {
        if self.format == OutputFormat::Json {
            return self.print(&list_envelope(data, collection_name, advice)?);
        }
        if data.is_empty() {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{empty_message}")?;
            return Ok(());
        }
        self.print(&data)
    }
}

fn list_envelope<T: Serialize>(data: &[T], collection_name: &str, advice: &[&str]) -> Result<Value> {
    let mut envelope = serde_json::Map::new();
    envelope.insert(collection_name.to_string(), serde_json::to_value(data)?);
    envelope.insert("count".to_string(), serde_json::json!(data.len()));
    envelope.insert("advice".to_string(), serde_json::json!(advice));
    Ok(Value::Object(envelope))
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut parts: Vec<String> = LEAD_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .map(render_field_value)
                .collect();
            for (key, val) in map {
                if LEAD_KEYS.contains(&key.as_str()) || is_blank(val) {
                    continue;
                }
                parts.push(format!("{key}:{}", render_field_value(val)));
            }
            parts.join("  ")
        }
        Value::Array(items) => items.iter().map(render_text).collect::<Vec<_>>().join("\n"),
        _ => render_field_value(value),
    }
}

fn render_pretty(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut lines: Vec<String> = LEAD_KEYS
                .iter()
                .filter_map(|key| map.get(*key))
                .map(render_field_value)
                .collect::<Vec<_>>()
                .join(" ")
                .lines()
                .map(String::from)
                .collect();
            for (key, val) in map {
                if LEAD_KEYS.contains(&key.as_str()) || is_blank(val) {
                    continue;
                }
                lines.push(format!("  {key}: {}", render_field_value(val)));
            }
            lines.join("\n")
        }
        Value::Array(items) => items
            .iter()
            .map(render_pretty)
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => render_field_value(value),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn render_field_value(value: &Value) -> String {
    match value {
        Value::String(s) => {
            if s.contains(' ') || s.contains('\n') {
                format!("\"{}\"", s.replace('\n', "\\n"))
            } else {
                s.clone()
            }
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_field_value).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{k}:{}", render_field_value(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}
