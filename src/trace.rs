//! Append-only trace log: one line per run.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};

/// `{'A': 1, 'B': 2}` in key order; `{}` when empty.
pub fn format_counts<K: Display>(items: &BTreeMap<K, usize>) -> String {
    let body: Vec<String> = items.iter().map(|(k, v)| format!("'{k}': {v}")).collect();
    format!("{{{}}}", body.join(", "))
}

/// Build a trace line: `<UTC timestamp>,<kind>,k=v,...`.
pub fn trace_line(kind: &str, fields: &[(&str, String)]) -> String {
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut line = format!("{ts},{kind}");
    for (k, v) in fields {
        line.push_str(&format!(",{k}={v}"));
    }
    line
}

/// Append one line to the trace log, creating the file if needed.
pub fn append_trace(path: &Path, kind: &str, fields: &[(&str, String)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening trace log {}", path.display()))?;
    writeln!(file, "{}", trace_line(kind, fields)).context("appending trace line")?;
    Ok(())
}
