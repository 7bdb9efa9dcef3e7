// ABOUTME: Append-only dead-letter file for rows the destination did not accept
// ABOUTME: Records each rejected or unconvertible row as one JSON line

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// One rejected row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterEntry {
    pub table: String,
    pub insert_id: Option<String>,
    pub batch: usize,
    pub error: String,
    pub row: serde_json::Value,
    pub recorded_at: u64,
}

impl DeadLetterEntry {
    pub fn new(
        table: &str,
        insert_id: Option<String>,
        batch: usize,
        error: impl Into<String>,
        row: serde_json::Value,
    ) -> Self {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            table: table.to_string(),
            insert_id,
            batch,
            error: error.into(),
            row,
            recorded_at,
        }
    }
}

/// JSON-lines file collecting [`DeadLetterEntry`] records across cycles
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    path: PathBuf,
}

impl DeadLetterQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append entries, creating the file and its directory on first use
    pub fn record(&self, entries: &[DeadLetterEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create dead-letter directory {}", parent.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open dead-letter file {}", self.path.display()))?;

        let mut buffer = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buffer, entry).context("Failed to serialize dead-letter entry")?;
            buffer.push(b'\n');
        }

        file.write_all(&buffer)
            .with_context(|| format!("Failed to write dead-letter file {}", self.path.display()))?;

        tracing::info!(
            "Recorded {} row(s) in dead-letter file {}",
            entries.len(),
            self.path.display()
        );

        Ok(())
    }

    /// Read every entry back, mainly for inspection and tests
    pub fn load(&self) -> Result<Vec<DeadLetterEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read dead-letter file {}", self.path.display()))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(idx, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!(
                        "Failed to parse line {} of dead-letter file {}",
                        idx + 1,
                        self.path.display()
                    )
                })
            })
            .collect()
    }
}
