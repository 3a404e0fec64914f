//! Status files for external observability
//!
//! Manages `<state_dir>/<experiment>.status.json`: one JSON snapshot per
//! experiment. External tools can poll these files, and `run` reads them
//! back to resume experiments after a restart.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::experiment::status::ExperimentStatus;

const STATUS_SUFFIX: &str = ".status.json";

/// Reads and writes experiment status files in one directory
pub struct StatusWriter {
    dir: PathBuf,
}

impl StatusWriter {
    /// Create a `StatusWriter` targeting `state_dir`.
    pub fn new(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;
        Ok(Self {
            dir: state_dir.to_path_buf(),
        })
    }

    /// Path of the status file for `experiment`
    #[must_use]
    pub fn path_for(&self, experiment: &str) -> PathBuf {
        self.dir.join(format!("{experiment}{STATUS_SUFFIX}"))
    }

    /// Atomically write a status (write to temp, then rename).
    pub fn write(&self, status: &ExperimentStatus) -> Result<()> {
        let path = self.path_for(&status.experiment);
        let json = serde_json::to_string_pretty(status).context("Failed to serialize status")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                path.display()
            )
        })?;
        Ok(())
    }

    /// Read the status of `experiment`, or `None` if there is none.
    pub fn read(&self, experiment: &str) -> Result<Option<ExperimentStatus>> {
        let path = self.path_for(experiment);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let status: ExperimentStatus = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(status))
    }

    /// Every status file in the directory, sorted by experiment name
    pub fn read_all(&self) -> Result<Vec<ExperimentStatus>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut statuses = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read directory entry")?;
            let file_name = entry.file_name();
            let Some(experiment) = file_name.to_str().and_then(|n| n.strip_suffix(STATUS_SUFFIX))
            else {
                continue;
            };
            if let Some(status) = self.read(experiment)? {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.experiment.cmp(&b.experiment));
        Ok(statuses)
    }

    /// Delete the status of `experiment`. No-op if it doesn't exist.
    pub fn delete(&self, experiment: &str) -> Result<()> {
        let path = self.path_for(experiment);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }
        Ok(())
    }
}
