//! Code execution tool: run a Python, Bash or R snippet from a temp file

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::terminal::run_with_timeout;
use super::{parse_args, schema_for, Tool};
use crate::config::CodeExecutionSettings;
use crate::conversation::{Arguments, ToolResult};
use crate::error::ToolExecutionError;

const NAME: &str = "code_execution";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CodeType {
    #[default]
    Python,
    Bash,
    R,
}

impl CodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Bash => "bash",
            Self::R => "r",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Python => ".py",
            Self::Bash => ".sh",
            Self::R => ".r",
        }
    }

    fn interpreter(&self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Bash => "bash",
            Self::R => "Rscript",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeExecutionParams {
    #[schemars(description = "The source code to execute")]
    pub code: String,

    #[schemars(description = "Language of the code: python (default), bash or r")]
    #[serde(default)]
    pub code_type: CodeType,
}

pub struct CodeExecutionTool {
    settings: CodeExecutionSettings,
    working_dir: String,
}

impl CodeExecutionTool {
    pub fn new(settings: CodeExecutionSettings, working_dir: String) -> Self {
        Self { settings, working_dir }
    }

    fn is_allowed(&self, code_type: CodeType) -> bool {
        self.settings
            .allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(code_type.as_str()))
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Execute Python, Bash, or R code and return the output"
    }

    fn schema(&self) -> Value {
        schema_for::<CodeExecutionParams>()
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult, ToolExecutionError> {
        let params: CodeExecutionParams = parse_args(NAME, args)?;

        if !self.settings.enabled {
            return Ok(ToolResult::failure("Code execution is disabled"));
        }
        if !self.is_allowed(params.code_type) {
            return Ok(ToolResult::failure(format!(
                "Code type '{}' not allowed. Allowed types: {}",
                params.code_type.as_str(),
                self.settings.allowed_types.join(", ")
            )));
        }

        // removed when dropped at the end of this call
        let script = tempfile::Builder::new()
            .prefix("open-agent-")
            .suffix(params.code_type.extension())
            .tempfile()
            .map_err(|e| ToolExecutionError::failed(NAME, format!("cannot create temp file: {}", e)))?;
        tokio::fs::write(script.path(), &params.code)
            .await
            .map_err(|e| ToolExecutionError::failed(NAME, format!("cannot write temp file: {}", e)))?;

        let mut cmd = Command::new(params.code_type.interpreter());
        cmd.arg(script.path());
        if Path::new(&self.working_dir).is_dir() {
            cmd.current_dir(&self.working_dir);
        }

        tracing::info!("Executing {} code ({} bytes)", params.code_type.as_str(), params.code.len());
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let output = run_with_timeout(NAME, cmd, timeout, self.settings.max_output_bytes).await?;

        let mut text = output.stdout.clone();
        if !output.stderr.is_empty() {
            text.push_str("\nSTDERR:\n");
            text.push_str(&output.stderr);
        }

        let success = output.exit_code == Some(0);
        let mut result = ToolResult::text(text);
        result.success = success;
        if !success {
            result.error = Some(if output.stderr.is_empty() {
                format!("process exited with status {:?}", output.exit_code)
            } else {
                output.stderr.clone()
            });
        }

        Ok(result.with_metadata(json!({
            "code_type": params.code_type.as_str(),
            "return_code": output.exit_code,
            "truncated": output.truncated,
        })))
    }
}
