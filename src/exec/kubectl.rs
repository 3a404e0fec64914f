//! `kubectl exec` transport
//!
//! Builds `kubectl exec -n <ns> <pod> [-c <container>] -- <argv...>` and maps
//! kubectl's own failures (pod gone, connection refused) to
//! [`ExecutionError::TargetUnreachable`].

use std::process::Command;

use async_trait::async_trait;

use super::process::run_command;
use super::{ExecOutput, RemoteExec};
use crate::cluster::TargetId;
use crate::error::ExecutionError;

/// stderr fragments that mean kubectl never reached the container
const UNREACHABLE_MARKERS: &[&str] = &[
    "Error from server (NotFound)",
    "unable to upgrade connection",
    "container not found",
    "error dialing backend",
    "Unable to connect to the server",
];

/// Executes commands in pods through the `kubectl` binary
#[derive(Debug, Clone)]
pub struct KubectlExec {
    kubectl: String,
}

impl KubectlExec {
    /// Create a transport that invokes the given kubectl binary
    #[must_use]
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
        }
    }

    /// Build the `kubectl exec` invocation for one container of one target.
    #[must_use]
    pub fn build_command(
        &self,
        target: &TargetId,
        container: Option<&str>,
        command: &[String],
        args: &[String],
    ) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        cmd.arg("exec");
        cmd.arg("-n").arg(&target.namespace);
        cmd.arg(&target.name);
        if let Some(container) = container {
            cmd.arg("-c").arg(container);
        }
        cmd.arg("--");
        cmd.args(command);
        cmd.args(args);
        cmd
    }
}

impl Default for KubectlExec {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl RemoteExec for KubectlExec {
    async fn exec(
        &self,
        target: &TargetId,
        container: Option<&str>,
        command: &[String],
        args: &[String],
    ) -> Result<ExecOutput, ExecutionError> {
        let cmd = self.build_command(target, container, command, args);
        let output = run_command(cmd)
            .await
            .map_err(|e| ExecutionError::TargetUnreachable(format!("{e:#}")))?;

        if !output.success() && is_unreachable(&output.stderr) {
            return Err(ExecutionError::TargetUnreachable(output.stderr));
        }
        Ok(output)
    }
}

fn is_unreachable(stderr: &str) -> bool {
    UNREACHABLE_MARKERS.iter().any(|m| stderr.contains(m))
}
