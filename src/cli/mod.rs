//! CLI output formatting
//!
//! Provides human-readable terminal display for experiment progress,
//! persisted status and doctor reports.

pub mod display;

pub use display::render_diagnostic_report;
pub use display::render_status_table;
pub use display::ExperimentDisplay;
