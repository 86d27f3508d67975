//! Downstream transformation trigger
//!
//! Invoked once validation has finished. The trigger only starts the external
//! transformation job and reports its exit status; what the job does is not
//! this crate's concern.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors from running a transformation
#[derive(Error, Debug)]
pub enum TransformError {
    /// Process could not be started
    #[error("Failed to start transform '{program}': {message}")]
    Spawn { program: String, message: String },

    /// Process exited unsuccessfully
    #[error("Transform exited with {}: {stderr}", exit_description(.code))]
    Failed { code: Option<i32>, stderr: String },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Facts about the run handed to the transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformContext {
    pub run_id: String,
    pub table: String,
    /// `None` when validation did not run
    pub validation_passed: Option<bool>,
}

/// Result of a successful trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutcome {
    pub exit_code: i32,
}

/// Starts downstream transformations
#[async_trait]
pub trait TransformTrigger: Send + Sync {
    fn name(&self) -> &str;

    async fn trigger(&self, context: &TransformContext) -> Result<TransformOutcome, TransformError>;
}

/// External command settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl TransformCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Command line for display
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs an external command, e.g. a containerised dbt run
///
/// The run id, table and validation verdict are exported as
/// `RETAIL_INGEST_RUN_ID`, `RETAIL_INGEST_TABLE` and
/// `RETAIL_INGEST_VALIDATION_PASSED`.
pub struct CommandTrigger {
    command: TransformCommand,
}

impl CommandTrigger {
    pub fn new(command: TransformCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &TransformCommand {
        &self.command
    }
}

#[async_trait]
impl TransformTrigger for CommandTrigger {
    fn name(&self) -> &str {
        &self.command.program
    }

    async fn trigger(&self, context: &TransformContext) -> Result<TransformOutcome, TransformError> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env("RETAIL_INGEST_RUN_ID", &context.run_id)
            .env("RETAIL_INGEST_TABLE", &context.table)
            .env(
                "RETAIL_INGEST_VALIDATION_PASSED",
                match context.validation_passed {
                    Some(true) => "true",
                    Some(false) => "false",
                    None => "unknown",
                },
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        info!(command = %self.command.display(), "Starting transform");
        let output = cmd.output().await.map_err(|e| TransformError::Spawn {
            program: self.command.program.clone(),
            message: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(output = %stdout.trim(), "Transform stdout");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(code = ?output.status.code(), "Transform failed");
            return Err(TransformError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(TransformOutcome {
            exit_code: output.status.code().unwrap_or(0),
        })
    }
}

/// Trigger that does nothing, for runs without a downstream job
pub struct NoopTrigger;

#[async_trait]
impl TransformTrigger for NoopTrigger {
    fn name(&self) -> &str {
        "noop"
    }

    async fn trigger(&self, context: &TransformContext) -> Result<TransformOutcome, TransformError> {
        debug!(run_id = %context.run_id, "No transform configured");
        Ok(TransformOutcome { exit_code: 0 })
    }
}
