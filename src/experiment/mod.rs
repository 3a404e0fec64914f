//! Experiment selection and lifecycle
//!
//! Candidate pods flow through the selector and the mode resolver into a
//! target set. The lifecycle tracker applies the fault, holds it, and
//! recovers it. The engine runs one tracker task per experiment.

pub mod claims;
pub mod config;
pub mod duration;
pub mod engine;
pub mod executor;
pub mod lifecycle;
pub mod mode;
pub mod record;
pub mod recovery;
pub mod scheduler;
pub mod selector;
pub mod status;
pub mod target;
