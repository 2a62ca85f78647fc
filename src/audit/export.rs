//! Audit export formats

use anyhow::{Context, Result};

use super::AuditLogEntry;

/// Column order of CSV exports
pub const CSV_HEADER: &str = "timestamp,type,level,userId,sessionId,data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format: {} (expected json or csv)", other)),
        }
    }
}

/// Render entries in the given format
pub fn export_entries(entries: &[AuditLogEntry], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(entries).context("Failed to serialize audit entries")
        }
        ExportFormat::Csv => to_csv(entries),
    }
}

fn to_csv(entries: &[AuditLogEntry]) -> Result<String> {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for entry in entries {
        let data = serde_json::to_string(&entry.data).context("Failed to serialize audit data")?;
        let row = [
            entry.timestamp.to_rfc3339(),
            csv_escape(&entry.event_type),
            entry.level.to_string(),
            csv_escape(entry.user_id.as_deref().unwrap_or("")),
            csv_escape(entry.session_id.as_deref().unwrap_or("")),
            quote(&data),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    Ok(out)
}

/// Quote a CSV field when it contains a delimiter, quote or line break
fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        quote(s)
    } else {
        s.to_string()
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}
