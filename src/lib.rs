//! Custom chaos - command-driven fault injection for pods
//!
//! Selects running pods with a declarative selector and a selection mode,
//! runs an apply command against each chosen pod to induce a fault, holds
//! it for the experiment's duration, then runs a recover command to undo it.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod cli;
pub mod cluster;
pub mod doctor;
pub mod error;
pub mod exec;
pub mod experiment;
pub mod log;

#[cfg(test)]
pub mod testutil;

// Re-export commonly used types
pub use cluster::{ClusterObserver, KubectlObserver, Pod, StaticInventory, TargetId};
pub use error::{ExecutionError, LifecycleError, SelectionError};
pub use exec::{KubectlExec, LocalExec, RemoteExec};
pub use experiment::config::{ChaosConfig, EngineConfig, ExperimentSpec};
pub use experiment::engine::Engine;
pub use experiment::lifecycle::{Event, LifecycleTracker, Phase};
pub use experiment::mode::{Mode, ModeResolver};
pub use experiment::status::ExperimentStatus;
pub use log::{HistoryLog, StatusWriter};
