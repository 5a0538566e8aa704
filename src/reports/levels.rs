use crate::models::account::Account;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Identity and flag fields left out of the levels report.
pub const DROP_KEYS: [&str; 8] = [
    "account_number",
    "status",
    "trading_blocked",
    "transfers_blocked",
    "account_blocked",
    "id",
    "created_at",
    "trade_suspended_by_user",
];

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Separator line, timestamp, then one `key: value` line per account field.
pub fn render_levels(account: &Account, now: DateTime<Local>) -> String {
    let lines: Vec<String> = account
        .iter()
        .filter(|(key, _)| !DROP_KEYS.contains(&key.as_str()))
        .map(|(key, value)| format!("{key}: {}", cell(value)))
        .collect();

    format!(
        "\n{}\nDate: {}\n{}",
        "#".repeat(50),
        now.format("%Y-%m-%d %H:%M:%S%.6f"),
        lines.join("\n")
    )
}

pub fn append_report(path: &Path, report: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(report.as_bytes())
}
