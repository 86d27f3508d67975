//! CLI error types

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineError;

/// Errors surfaced by CLI commands
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to read {}: {}", .0.display(), .1)]
    FileReadError(PathBuf, String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Validation ran and found mismatches
    #[error("Schema validation failed: {0} column(s) do not match the contract")]
    ValidationFailed(usize),

    #[error("Failed to serialize output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Message for the terminal, with a hint where one helps
    pub fn user_message(&self) -> String {
        match self {
            CliError::Pipeline(e) => e.user_message(),
            CliError::InvalidArgument(msg) => {
                format!("Invalid argument: {msg}\n\nHint: Run with --help to see accepted values.")
            }
            other => other.to_string(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument(_) => 2,
            CliError::ValidationFailed(_) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::InvalidArgument("x".to_string()).exit_code(), 2);
        assert_eq!(CliError::ValidationFailed(2).exit_code(), 3);
        let err: CliError = PipelineError::MissingInput("bucket".to_string()).into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.user_message().contains("Hint:"));
    }
}
