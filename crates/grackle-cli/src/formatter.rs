//! Output formatting for response data.

use clap::ValueEnum;
use serde_json::Value;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented JSON
    Pretty,
    /// One JSON document per line
    Compact,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Pretty => write!(f, "pretty"),
            OutputFormat::Compact => write!(f, "compact"),
        }
    }
}

/// Render response data.
pub fn format_data(data: &Value, format: OutputFormat) -> String {
    let rendered = match format {
        OutputFormat::Pretty => serde_json::to_string_pretty(data),
        OutputFormat::Compact => serde_json::to_string(data),
    };
    // Serializing a `Value` cannot fail.
    rendered.unwrap_or_default()
}
