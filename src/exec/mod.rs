//! Remote execution
//!
//! The engine never talks to nodes directly. Apply and recover commands go
//! through a [`RemoteExec`] implementation: `kubectl exec` for real clusters
//! or a local subprocess for dry runs and tests.

pub mod kubectl;
pub mod local;
pub mod process;

use async_trait::async_trait;

use crate::cluster::TargetId;
use crate::error::ExecutionError;

pub use kubectl::KubectlExec;
pub use local::LocalExec;

/// Captured result of one command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code (None if killed by signal)
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with code 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a command inside one container of one target.
///
/// `container` is `None` when the target has no explicit container scope,
/// in which case the implementation uses the workload's default container.
/// Implementations return `Ok` for any command that ran, whatever its exit
/// code; `Err(ExecutionError::TargetUnreachable)` is reserved for targets
/// that could not be reached at all.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Execute `command ++ args` against the target
    async fn exec(
        &self,
        target: &TargetId,
        container: Option<&str>,
        command: &[String],
        args: &[String],
    ) -> Result<ExecOutput, ExecutionError>;
}
