//! Terminal tool: run a shell command and capture its output

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{parse_args, schema_for, Tool};
use crate::config::TerminalSettings;
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;

const NAME: &str = "terminal";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TerminalParams {
    #[schemars(description = "The shell command to execute")]
    pub command: String,

    #[schemars(description = "Working directory (optional, defaults to the configured workspace)")]
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// Captured output of a finished command
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// Truncate output to max bytes on a UTF-8 boundary
pub(crate) fn truncate_output(output: &[u8], max_bytes: usize) -> (String, bool) {
    if output.len() <= max_bytes {
        (String::from_utf8_lossy(output).to_string(), false)
    } else {
        (String::from_utf8_lossy(&output[..max_bytes]).to_string(), true)
    }
}

/// Run `cmd` to completion under `timeout`; the child is killed on expiry
pub(crate) async fn run_with_timeout(
    tool: &str,
    mut cmd: Command,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<CommandOutput, ToolExecutionError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => {
            let (stdout, stdout_truncated) = truncate_output(&output.stdout, max_output_bytes);
            let (stderr, stderr_truncated) = truncate_output(&output.stderr, max_output_bytes);
            Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout,
                stderr,
                truncated: stdout_truncated || stderr_truncated,
            })
        }
        Ok(Err(io_err)) => Err(ToolExecutionError::failed(tool, format!("failed to spawn: {}", io_err))),
        // the output future owns the child, dropping it kills the process
        Err(_elapsed) => Err(ToolExecutionError::Timeout {
            tool: tool.to_string(),
            after: timeout,
        }),
    }
}

/// `STDOUT:` / `STDERR:` sections, or a placeholder when both are empty
pub(crate) fn format_sections(stdout: &str, stderr: &str) -> String {
    let mut output = String::new();
    if !stdout.is_empty() {
        output.push_str("STDOUT:\n");
        output.push_str(stdout);
    }
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push_str("\n\n");
        }
        output.push_str("STDERR:\n");
        output.push_str(stderr);
    }
    if output.is_empty() {
        output.push_str("Command executed successfully (no output)");
    }
    output
}

pub struct TerminalTool {
    settings: TerminalSettings,
}

impl TerminalTool {
    pub fn new(settings: TerminalSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Execute terminal/shell commands and return output"
    }

    fn schema(&self) -> Value {
        schema_for::<TerminalParams>()
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let params: TerminalParams = parse_args(NAME, args)?;
        let work_dir = params
            .working_directory
            .unwrap_or_else(|| self.settings.working_dir.clone());

        if !Path::new(&work_dir).exists() {
            tokio::fs::create_dir_all(&work_dir).await.map_err(|e| {
                ToolExecutionError::failed(NAME, format!("cannot create working directory {}: {}", work_dir, e))
            })?;
        }

        let mut cmd = Command::new(&self.settings.shell);
        cmd.arg("-c").arg(&params.command).current_dir(&work_dir);

        tracing::info!("Running command in {}: {}", work_dir, params.command);
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let output = run_with_timeout(NAME, cmd, timeout, self.settings.max_output_bytes).await?;

        let success = output.exit_code == Some(0);
        let mut result = ToolResult::text(format_sections(&output.stdout, &output.stderr));
        result.success = success;
        if !success {
            result.error = Some(if output.stderr.is_empty() {
                format!("command exited with status {:?}", output.exit_code)
            } else {
                output.stderr.clone()
            });
        }

        Ok(result.with_metadata(json!({
            "command": params.command,
            "return_code": output.exit_code,
            "working_directory": work_dir,
            "shell": self.settings.shell,
            "truncated": output.truncated,
        })))
    }
}
