//! Logging and observability
//!
//! Action history goes to an append-only JSONL file and each experiment's
//! latest status to its own JSON file. [`persist_updates`] connects both to
//! an experiment's status channel.

pub mod jsonl;
pub mod progress;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::experiment::status::ExperimentStatus;

pub use jsonl::{HistoryEntry, HistoryLog};
pub use progress::StatusWriter;

/// Persist every status update until the experiment's tracker exits.
///
/// Each snapshot overwrites the status file; records not seen before are
/// appended to the history. Records reset when a new run starts.
///
/// `already_logged` is `(run, records)` for a resumed status: the first
/// `records` records of that run are in the history already.
pub async fn persist_updates(
    mut status_rx: watch::Receiver<ExperimentStatus>,
    writer: Arc<StatusWriter>,
    history: Arc<HistoryLog>,
    already_logged: Option<(u32, usize)>,
) -> Result<()> {
    let (mut run, mut logged) = match already_logged {
        Some((run, records)) => (Some(run), records),
        None => (None, 0),
    };

    loop {
        let status = status_rx.borrow_and_update().clone();

        if run != Some(status.run) {
            run = Some(status.run);
            logged = 0;
        }
        for record in status.records.iter().skip(logged) {
            history.append(&HistoryEntry {
                experiment: status.experiment.clone(),
                record: record.clone(),
            })?;
        }
        logged = logged.max(status.records.len());
        writer.write(&status)?;

        if status_rx.changed().await.is_err() {
            return Ok(());
        }
    }
}
