//! Error types for pipeline operations
//!
//! Component errors are wrapped transparently so a warehouse or storage
//! failure reaches the caller exactly as the client reported it. The stage
//! that failed is recorded in the run checkpoint, not in the error.

use std::path::PathBuf;

use thiserror::Error;

use crate::load::LedgerError;
use crate::provision::ProvisionError;
use crate::storage::StorageError;
use crate::transform::TransformError;
use crate::validation::ValidationError;
use crate::warehouse::WarehouseError;

/// Errors that can occur during pipeline execution
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// Resume error
    #[error("Cannot resume from checkpoint: {0}")]
    ResumeError(String),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Load ledger error
    #[error("Load ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Check if this error is recoverable (a rerun may succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            PipelineError::IoError(_) => true,
            PipelineError::Storage(StorageError::IoError(_)) => true,
            PipelineError::Warehouse(e) => e.is_transient(),
            PipelineError::Provision(ProvisionError::Warehouse(e)) => e.is_transient(),
            PipelineError::Validation(ValidationError::Warehouse(e)) => e.is_transient(),
            _ => false,
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::ConfigError(msg) => {
                format!(
                    "Configuration error: {msg}\n\nHint: Check your pipeline configuration file."
                )
            }
            PipelineError::MissingInput(input) => {
                format!(
                    "Missing required input: {input}\n\nHint: Ensure all required files exist and paths are correct."
                )
            }
            PipelineError::FileNotFound(path) => {
                format!(
                    "File not found: {}\n\nHint: Check that the file exists and the path is correct.",
                    path.display()
                )
            }
            PipelineError::CheckpointError(msg) => {
                format!(
                    "Checkpoint error: {msg}\n\nHint: Delete the checkpoint file or run without --resume."
                )
            }
            PipelineError::ResumeError(msg) => {
                format!("Cannot resume: {msg}\n\nHint: Run the pipeline from the beginning without --resume.")
            }
            PipelineError::Warehouse(e) => e.user_message(),
            PipelineError::Provision(ProvisionError::Warehouse(e)) => e.user_message(),
            PipelineError::Provision(e @ ProvisionError::SchemaDrift { .. }) => format!(
                "{e}\n\nHint: Migrate the table or disable verify_existing_schema."
            ),
            PipelineError::Validation(ValidationError::Warehouse(e)) => e.user_message(),
            PipelineError::Validation(e @ ValidationError::EmptyTable(_)) => format!(
                "{e}\n\nHint: Check that the load stage appended rows before validating."
            ),
            PipelineError::Validation(e @ ValidationError::Failed { .. }) => format!(
                "{e}\n\nHint: Inspect the source file, or use validation_policy = \"warn\" to report without stopping."
            ),
            _ => self.to_string(),
        }
    }
}
