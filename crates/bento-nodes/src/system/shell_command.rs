//! Shell Command Node
//!
//! Runs an external command with `tokio::process`, streaming stdout lines
//! as `NodeOutput` events while it runs.
//!
//! # Parameters
//! - `command` (required) - Program to run; with no `args` the whole string
//!   is handed to `sh -c`
//! - `args` (optional) - Argument list, disables the shell
//! - `workingDir` (optional) - Relative to the run's working directory
//! - `env` (optional) - Extra environment variables
//! - `timeoutMs` (optional) - Kill the process after this long
//!
//! # Outputs
//! - `stdout`, `stderr` - Captured streams, trailing newline trimmed
//! - `exitCode` - Process exit code
//!
//! A non-zero exit code fails the node.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use bento_engine::params::{ShellCommandParams, SHELL};
use bento_engine::{EngineError, NodeExecutor, NodeScope, Outputs, Parameters, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::vars::Resolver;

#[derive(Debug, Default)]
pub struct ShellCommandExecutor;

enum Finish {
    Exited(std::io::Result<(ExitStatus, String, String)>),
    Cancelled,
    TimedOut(Duration),
}

#[async_trait]
impl NodeExecutor for ShellCommandExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        params: Parameters,
        scope: &mut NodeScope<'_>,
    ) -> Result<Outputs> {
        let params = ShellCommandParams::parse(&params)?;
        let mut cmd = build_command(&params, scope);
        let node_id = scope.node.id.clone();

        log::debug!(
            "ShellCommand {}: executing '{}' with {} args",
            node_id,
            params.command,
            params.args.len()
        );

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::failed(format!("Failed to spawn '{}': {}", params.command, e))
        })?;

        let timeout = params.timeout_ms.map(Duration::from_millis);
        let finish = {
            let collect = collect_output(&mut child, scope);
            let deadline = async {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = collect => Finish::Exited(result),
                _ = cancel.cancelled() => Finish::Cancelled,
                _ = deadline => Finish::TimedOut(timeout.unwrap_or_default()),
            }
        };

        let (status, stdout, stderr) = match finish {
            Finish::Exited(result) => result?,
            Finish::Cancelled => {
                kill(&mut child, &node_id).await;
                return Err(EngineError::Cancelled);
            }
            Finish::TimedOut(limit) => {
                kill(&mut child, &node_id).await;
                return Err(EngineError::failed(format!(
                    "'{}' timed out after {:?}",
                    params.command, limit
                )));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        log::debug!(
            "ShellCommand {}: exit_code={}, stdout={} bytes, stderr={} bytes",
            node_id,
            exit_code,
            stdout.len(),
            stderr.len()
        );
        if !status.success() {
            return Err(EngineError::failed(format!(
                "'{}' exited with code {}: {}",
                params.command,
                exit_code,
                stderr.trim()
            )));
        }

        Ok(Outputs::from([
            ("stdout".to_string(), json!(stdout)),
            ("stderr".to_string(), json!(stderr)),
            ("exitCode".to_string(), json!(exit_code)),
        ]))
    }
}

fn build_command(params: &ShellCommandParams, scope: &NodeScope<'_>) -> Command {
    let resolver = Resolver::new(scope);
    let mut cmd = if params.args.is_empty() {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(resolver.render(&params.command));
        cmd
    } else {
        let mut cmd = Command::new(&params.command);
        cmd.args(params.args.iter().map(|arg| resolver.render(arg)));
        cmd
    };

    let config = scope.config();
    match &params.working_dir {
        Some(dir) => {
            cmd.current_dir(config.resolve_path(&resolver.render(dir)));
        }
        None => {
            if let Some(dir) = &config.working_dir {
                cmd.current_dir(dir);
            }
        }
    }
    for (key, value) in &params.env {
        cmd.env(key, resolver.render(value));
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Read both streams to the end, then wait for the exit status
async fn collect_output(
    child: &mut Child,
    scope: &NodeScope<'_>,
) -> std::io::Result<(ExitStatus, String, String)> {
    let missing = || std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stream not captured");
    let mut stdout_lines = BufReader::new(child.stdout.take().ok_or_else(missing)?).lines();
    let mut stderr_lines = BufReader::new(child.stderr.take().ok_or_else(missing)?).lines();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let (mut stdout_open, mut stderr_open) = (true, true);
    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout_lines.next_line(), if stdout_open => match line? {
                Some(line) => {
                    scope.emit_output(line.clone());
                    stdout.push(line);
                }
                None => stdout_open = false,
            },
            line = stderr_lines.next_line(), if stderr_open => match line? {
                Some(line) => stderr.push(line),
                None => stderr_open = false,
            },
        }
    }

    let status = child.wait().await?;
    Ok((status, stdout.join("\n"), stderr.join("\n")))
}

async fn kill(child: &mut Child, node_id: &str) {
    if let Err(e) = child.kill().await {
        log::warn!("ShellCommand {}: failed to kill process: {}", node_id, e);
    }
}
