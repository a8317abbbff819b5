//! JSON-lines input: one record per non-blank line.

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

pub fn read_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records = read_records(BufReader::new(file))
        .with_context(|| format!("failed to read {}", path.display()))?;
    debug!(records = records.len(), path = %path.display(), "read input");
    Ok(records)
}

pub fn read_records<T: DeserializeOwned, R: BufRead>(reader: R) -> anyhow::Result<Vec<T>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("line {}", i + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).with_context(|| format!("line {}", i + 1))?;
        records.push(record);
    }
    Ok(records)
}
