//! Audit command - View audit log entries
//!
//! Provides the `syncdrive audit` CLI command which:
//! 1. Queries audit log entries with filters (time, action, item)
//! 2. Formats entries in a table with timestamp, action, result, and details
//! 3. Supports relative and absolute time parsing for the --since flag

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::Args;
use tracing::info;

use syncdrive_baseline::{DatabasePool, SqliteAuditStore};
use syncdrive_core::ports::AuditStore;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct AuditCommand {
    /// Show entries since this time (e.g., "1h", "2d", "2024-01-01")
    #[arg(long)]
    pub since: Option<String>,

    /// Filter by action type (substring match, e.g. "upload", "conflict")
    #[arg(long)]
    pub action: Option<String>,

    /// Maximum number of entries to show
    #[arg(long, default_value = "50")]
    pub limit: u32,
}

impl AuditCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let db_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syncdrive")
            .join("syncdrive.db");

        if !db_path.exists() {
            formatter
                .error("No database found. Run 'syncdrive auth login' and 'syncdrive sync' first.");
            return Ok(());
        }

        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let audit_store: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::new(&pool));

        let since = match &self.since {
            Some(since_str) => {
                let parsed = parse_since(since_str)
                    .context(format!("Invalid --since value: '{}'. Expected formats: '1h', '30m', '2d', '1w', '2024-01-01', '2024-01-01T12:00:00'", since_str))?;
                info!(since = %parsed, "Filtering audit entries since");
                parsed
            }
            None => Utc::now() - chrono::Duration::days(7),
        };

        // The store only exposes a flat "most recent N" query; over-fetch
        // and narrow down to `since`/`action`/`limit` here.
        let recent = audit_store
            .query_recent(self.limit.max(500))
            .await
            .context("Failed to query audit entries")?;

        info!(count = recent.len(), "Retrieved audit entries");

        let filtered: Vec<_> = recent
            .iter()
            .filter(|entry| entry.timestamp() >= since)
            .filter(|entry| {
                if let Some(ref action_filter) = self.action {
                    entry.action().to_string().contains(action_filter.as_str())
                } else {
                    true
                }
            })
            .take(self.limit as usize)
            .collect();
        let display_entries = &filtered[..];

        if matches!(format, OutputFormat::Json) {
            let entries_json: Vec<serde_json::Value> = display_entries
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "timestamp": entry.timestamp().to_rfc3339(),
                        "action": entry.action().to_string(),
                        "item_id": entry.item_id().map(|id| id.to_string()),
                        "result": format!("{:?}", entry.result()),
                        "details": entry.details(),
                        "duration_ms": entry.duration_ms(),
                    })
                })
                .collect();

            let json = serde_json::json!({
                "since": since.to_rfc3339(),
                "limit": self.limit,
                "count": display_entries.len(),
                "entries": entries_json,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        // Human-readable table output
        if display_entries.is_empty() {
            formatter.info("No audit entries found for the specified criteria.");
            return Ok(());
        }

        formatter.success(&format!("Audit Log ({} entries)", display_entries.len()));
        formatter.info("");
        formatter.info("  Timestamp                Action             Result   Details");
        formatter.info("  ----------------------- ------------------ -------- -------");

        for entry in display_entries {
            let timestamp = entry.timestamp().format("%Y-%m-%d %H:%M:%S");
            let action = entry.action().to_string();
            let result = if entry.result().is_success() {
                "OK     "
            } else {
                "FAILED "
            };

            // Format details - extract a short summary from the JSON details
            let details = format_details(entry.details());

            formatter.info(&format!(
                "  {} {:<18} {} {}",
                timestamp, action, result, details
            ));
        }

        if display_entries.len() as u32 >= self.limit {
            formatter.info("");
            formatter.info(&format!(
                "Showing {} entries (limit). Use --limit to show more.",
                self.limit
            ));
        }

        Ok(())
    }
}

/// T201: Parse the --since argument into a DateTime<Utc>
///
/// Supports:
/// - Relative: "1h" (1 hour ago), "30m" (30 minutes), "2d" (2 days), "1w" (1 week)
/// - Absolute date: "2024-01-01"
/// - Absolute datetime: "2024-01-01T12:00:00"
fn parse_since(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();

    // Try relative time first (e.g., "1h", "30m", "2d", "1w")
    if let Some(duration) = parse_relative_duration(input) {
        return Ok(Utc::now() - duration);
    }

    // Try ISO date format: "2024-01-01"
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let datetime = date
            .and_hms_opt(0, 0, 0)
            .context("Failed to create datetime from date")?;
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(datetime, Utc));
    }

    // Try ISO datetime format: "2024-01-01T12:00:00"
    if let Ok(datetime) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(datetime, Utc));
    }

    anyhow::bail!(
        "Could not parse '{}' as a time. Use relative (1h, 30m, 2d, 1w) or absolute (2024-01-01) format.",
        input
    )
}

/// Parse relative duration strings like "1h", "30m", "2d", "1w"
fn parse_relative_duration(input: &str) -> Option<chrono::Duration> {
    if input.len() < 2 {
        return None;
    }

    let (num_str, unit) = input.split_at(input.len() - 1);
    let num: i64 = num_str.parse().ok()?;

    match unit {
        "m" => Some(chrono::Duration::minutes(num)),
        "h" => Some(chrono::Duration::hours(num)),
        "d" => Some(chrono::Duration::days(num)),
        "w" => Some(chrono::Duration::weeks(num)),
        _ => None,
    }
}

/// Format audit entry details into a short summary string
fn format_details(details: &serde_json::Value) -> String {
    match details {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => truncate_string(s, 40),
        serde_json::Value::Object(map) => {
            // Try to extract common fields for a readable summary
            let mut parts = Vec::new();

            if let Some(path) = map.get("path").and_then(|v| v.as_str()) {
                parts.push(truncate_string(path, 30));
            }
            if let Some(file) = map.get("file").and_then(|v| v.as_str()) {
                parts.push(truncate_string(file, 30));
            }
            if let Some(message) = map.get("message").and_then(|v| v.as_str()) {
                parts.push(truncate_string(message, 30));
            }

            if parts.is_empty() {
                // Fallback: show the first key-value pair
                if let Some((key, value)) = map.iter().next() {
                    truncate_string(&format!("{}={}", key, value), 40)
                } else {
                    String::new()
                }
            } else {
                parts.join(", ")
            }
        }
        other => truncate_string(&other.to_string(), 40),
    }
}

/// Truncate a string to a maximum length
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relative_duration_minutes() {
        let d = parse_relative_duration("30m").unwrap();
        assert_eq!(d, chrono::Duration::minutes(30));
    }

    #[test]
    fn test_parse_relative_duration_hours() {
        let d = parse_relative_duration("1h").unwrap();
        assert_eq!(d, chrono::Duration::hours(1));
    }

    #[test]
    fn test_parse_relative_duration_days() {
        let d = parse_relative_duration("2d").unwrap();
        assert_eq!(d, chrono::Duration::days(2));
    }

    #[test]
    fn test_parse_relative_duration_weeks() {
        let d = parse_relative_duration("1w").unwrap();
        assert_eq!(d, chrono::Duration::weeks(1));
    }

    #[test]
    fn test_parse_relative_duration_invalid() {
        assert!(parse_relative_duration("abc").is_none());
        assert!(parse_relative_duration("1x").is_none());
        assert!(parse_relative_duration("h").is_none());
    }

    #[test]
    fn test_parse_since_relative() {
        let result = parse_since("1h");
        assert!(result.is_ok());
        let parsed = result.unwrap();
        let diff = Utc::now() - parsed;
        // Should be approximately 1 hour (allow 5 second tolerance)
        assert!(diff.num_seconds() >= 3595 && diff.num_seconds() <= 3605);
    }

    #[test]
    fn test_parse_since_date() {
        let result = parse_since("2024-01-15");
        assert!(result.is_ok());
        let parsed = result.unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2024-01-15");
    }

    #[test]
    fn test_parse_since_datetime() {
        let result = parse_since("2024-01-15T14:30:00");
        assert!(result.is_ok());
        let parsed = result.unwrap();
        assert_eq!(
            parsed.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "2024-01-15T14:30:00"
        );
    }

    #[test]
    fn test_parse_since_invalid() {
        assert!(parse_since("not-a-time").is_err());
        assert!(parse_since("").is_err());
    }

    #[test]
    fn test_truncate_string_short() {
        assert_eq!(truncate_string("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_string_long() {
        assert_eq!(
            truncate_string("this is a very long string", 15),
            "this is a ve..."
        );
    }

    #[test]
    fn test_format_details_null() {
        assert_eq!(format_details(&serde_json::Value::Null), "");
    }

    #[test]
    fn test_format_details_string() {
        let val = serde_json::Value::String("hello".to_string());
        assert_eq!(format_details(&val), "hello");
    }

    #[test]
    fn test_format_details_object_with_path() {
        let val = serde_json::json!({"path": "/home/user/file.txt"});
        let result = format_details(&val);
        assert!(result.contains("/home/user/file.txt"));
    }
}
