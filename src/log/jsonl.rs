//! JSONL (JSON Lines) action history
//!
//! Provides append-only logging of every apply and recover record to
//! `<state_dir>/history.jsonl`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::experiment::record::ActionRecord;

/// One history line: an action record and the experiment it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Experiment name
    pub experiment: String,
    /// The record, flattened into the line
    #[serde(flatten)]
    pub record: ActionRecord,
}

/// JSONL history of action records
///
/// Each line is a JSON object representing one finished action.
pub struct HistoryLog {
    log_path: PathBuf,
}

impl HistoryLog {
    /// Create a history log in `log_dir`
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        Ok(Self {
            log_path: log_dir.join("history.jsonl"),
        })
    }

    /// Append one entry
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json = serde_json::to_string(entry).context("Failed to serialize history entry")?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all entries, oldest first
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is not valid JSON
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        let mut entries = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let entry: HistoryEntry = serde_json::from_str(line)
                .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))?;

            entries.push(entry);
        }

        Ok(entries)
    }

    /// Entries of one experiment, oldest first
    pub fn read_experiment(&self, experiment: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.experiment == experiment)
            .collect())
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
