//! Local subprocess transport
//!
//! Runs apply/recover commands on the local host with the target identity
//! exported as environment variables. Useful for dry runs against a static
//! inventory and for driving experiments from scripts.

use std::process::Command;

use async_trait::async_trait;

use super::process::run_command;
use super::{ExecOutput, RemoteExec};
use crate::cluster::TargetId;
use crate::error::ExecutionError;

/// Environment variable carrying the target namespace
pub const ENV_TARGET_NAMESPACE: &str = "CHAOS_TARGET_NAMESPACE";
/// Environment variable carrying the target name
pub const ENV_TARGET_NAME: &str = "CHAOS_TARGET_NAME";
/// Environment variable carrying the container, empty for the default
pub const ENV_TARGET_CONTAINER: &str = "CHAOS_TARGET_CONTAINER";

/// Executes commands as local processes
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExec;

impl LocalExec {
    /// Build the local invocation for one target.
    ///
    /// The first element of `command` (or of `args` when `command` is empty)
    /// is the program.
    #[must_use]
    pub fn build_command(
        target: &TargetId,
        container: Option<&str>,
        command: &[String],
        args: &[String],
    ) -> Option<Command> {
        let mut argv = command.iter().chain(args.iter());
        let program = argv.next()?;

        let mut cmd = Command::new(program);
        cmd.args(argv);
        cmd.env(ENV_TARGET_NAMESPACE, &target.namespace);
        cmd.env(ENV_TARGET_NAME, &target.name);
        cmd.env(ENV_TARGET_CONTAINER, container.unwrap_or_default());
        Some(cmd)
    }
}

#[async_trait]
impl RemoteExec for LocalExec {
    async fn exec(
        &self,
        target: &TargetId,
        container: Option<&str>,
        command: &[String],
        args: &[String],
    ) -> Result<ExecOutput, ExecutionError> {
        let cmd = Self::build_command(target, container, command, args).ok_or_else(|| {
            ExecutionError::CommandFailure {
                exit_code: None,
                stderr: "empty command".to_string(),
            }
        })?;

        // The host is always reachable; a spawn failure is a broken command.
        run_command(cmd)
            .await
            .map_err(|e| ExecutionError::CommandFailure {
                exit_code: None,
                stderr: format!("{e:#}"),
            })
    }
}
