//! Subprocess runner
//!
//! Spawns a command with piped stdout/stderr, drains both concurrently and
//! returns the captured output together with the exit code.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::debug;

use super::ExecOutput;

/// Run a command to completion and capture its output.
///
/// Each output line is also emitted at `debug` level so `RUST_LOG=debug`
/// shows what apply/recover commands print. The child is killed if the
/// returned future is dropped, which is how callers enforce timeouts.
pub async fn run_command(cmd: std::process::Command) -> Result<ExecOutput> {
    let mut tokio_cmd = TokioCommand::from(cmd);
    tokio_cmd.stdin(Stdio::null());
    tokio_cmd.stdout(Stdio::piped());
    tokio_cmd.stderr(Stdio::piped());
    tokio_cmd.kill_on_drop(true);

    let program = tokio_cmd.as_std().get_program().to_string_lossy().into_owned();

    let mut child = tokio_cmd
        .spawn()
        .with_context(|| format!("Failed to spawn '{program}'"))?;

    let child_stdout = child.stdout.take().context("Failed to capture stdout")?;
    let child_stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stdout_handle = tokio::spawn(capture_lines(child_stdout, "stdout"));
    let stderr_handle = tokio::spawn(capture_lines(child_stderr, "stderr"));

    let status = child.wait().await.context("Failed waiting for process")?;
    let stdout = stdout_handle.await.context("stdout reader panicked")?;
    let stderr = stderr_handle.await.context("stderr reader panicked")?;

    Ok(ExecOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

async fn capture_lines<R: AsyncRead + Unpin>(stream: R, name: &'static str) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut captured = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stream = name, "{line}");
        if !captured.is_empty() {
            captured.push('\n');
        }
        captured.push_str(&line);
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let mut cmd = std::process::Command::new("echo");
        cmd.arg("hello world");

        let output = run_command(cmd).await.unwrap();
        assert_eq!(output.stdout, "hello world");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_run_command_captures_stderr() {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg("echo error >&2");

        let output = run_command(cmd).await.unwrap();
        assert_eq!(output.stderr, "error");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_run_command_captures_exit_code() {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg("exit 42");

        let output = run_command(cmd).await.unwrap();
        assert_eq!(output.exit_code, Some(42));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_run_command_captures_multiline_stdout() {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg("echo line1; echo line2; echo line3");

        let output = run_command(cmd).await.unwrap();
        assert_eq!(output.stdout, "line1\nline2\nline3");
    }

    #[tokio::test]
    async fn test_run_command_missing_binary_is_error() {
        let cmd = std::process::Command::new("definitely-not-a-real-binary-xyz");

        let err = run_command(cmd).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
