// src/operation/shell.rs

//! Operation running a shell script as a child process.
//!
//! Config keys (task config falls back to the `[operation.shell]` section):
//! - `script`: script passed to `sh -c` (required)
//! - `directory`: working directory, default `"."`
//! - `timeout`: kill the process and fail after this long, default `"1h"`
//!
//! Stdout lines are streamed to the context output sink as they arrive.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    BoxFuture, FieldKind, Operation, OperationCommand, OperationContext, OperationError,
    OperationResult, OperationStatus, SchemaField, config_duration, config_str,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

const SCHEMA: &[SchemaField] = &[
    SchemaField {
        name: "script",
        kind: FieldKind::String,
        required: true,
        description: "script executed with `sh -c`",
    },
    SchemaField {
        name: "directory",
        kind: FieldKind::String,
        required: false,
        description: "working directory of the process",
    },
    SchemaField {
        name: "timeout",
        kind: FieldKind::Duration,
        required: false,
        description: "kill the process after this long",
    },
];

#[derive(Debug, Clone)]
pub struct ShellOperation {
    reference: toml::Table,
}

impl ShellOperation {
    pub fn new(reference: toml::Table) -> Self {
        Self { reference }
    }
}

impl Default for ShellOperation {
    fn default() -> Self {
        Self::new(toml::Table::new())
    }
}

impl Operation for ShellOperation {
    fn id(&self) -> &str {
        "shell"
    }

    fn reference(&self) -> &toml::Table {
        &self.reference
    }

    fn schema(&self) -> &[SchemaField] {
        SCHEMA
    }

    fn run<'a>(
        &'a self,
        command: &'a OperationCommand,
        context: OperationContext,
    ) -> BoxFuture<'a, Result<OperationResult, OperationError>> {
        Box::pin(async move {
            let config = command.config_with_fallback(&self.reference);
            let script = config_str(&config, "script")?
                .ok_or_else(|| OperationError::Config("`script` is required".to_string()))?;
            let directory = config_str(&config, "directory")?.unwrap_or(".");
            let timeout = config_duration(&config, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);

            info!(directory, ?timeout, "starting shell process");

            let mut cmd = if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(script);
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-c").arg(script);
                c
            };

            cmd.current_dir(directory)
                .envs(&command.environment)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd.spawn()?;

            let stdout = child
                .stdout
                .take()
                .map(|out| spawn_line_reader(out, Some(context.clone())));
            let stderr = child.stderr.take().map(|err| spawn_line_reader(err, None));

            // Either the process exits on its own, the timeout elapses, or
            // cancellation is requested.
            tokio::select! {
                status_res = child.wait() => {
                    let status = status_res?;
                    let code = status.code().unwrap_or(-1);

                    info!(exit_code = code, success = status.success(), "shell process exited");

                    Ok(OperationResult {
                        status: if status.success() {
                            OperationStatus::Success
                        } else {
                            OperationStatus::Failed
                        },
                        stdout: collect(stdout).await,
                        stderr: collect(stderr).await,
                    })
                }

                _ = tokio::time::sleep(timeout) => {
                    warn!(?timeout, "shell process did not exit in time; killing");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill timed out process");
                    }
                    let mut stderr = collect(stderr).await;
                    stderr.push_str(&format!("process killed after timeout of {timeout:?}\n"));

                    Ok(OperationResult {
                        status: OperationStatus::Failed,
                        stdout: collect(stdout).await,
                        stderr,
                    })
                }

                _ = context.cancelled() => {
                    info!("cancellation requested; killing shell process");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill process on cancellation");
                    }
                    Err(OperationError::Canceled)
                }
            }
        })
    }
}

/// Consume a child stream line by line, optionally forwarding each line to
/// the context output sink, and return everything read.
fn spawn_line_reader<R>(reader: R, sink: Option<OperationContext>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut output = String::new();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!("output: {}", line);
            if let Some(context) = &sink {
                context.emit_line(&line);
            }
            output.push_str(&line);
            output.push('\n');
        }

        output
    })
}

async fn collect(reader: Option<JoinHandle<String>>) -> String {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
