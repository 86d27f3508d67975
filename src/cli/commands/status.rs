//! Status command implementation

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::cli::output::format_checkpoint;
use crate::pipeline::{Checkpoint, PipelineError};

/// Handle the `status` command
///
/// `path` is a checkpoint file, or a pipeline config whose default
/// checkpoint is read.
pub fn handle_status(path: &PathBuf, json: bool) -> Result<(), CliError> {
    let checkpoint_path = if path.extension().is_some_and(|ext| ext == "toml") {
        Checkpoint::default_path(path)
    } else {
        path.clone()
    };

    let checkpoint = match Checkpoint::load(&checkpoint_path) {
        Ok(checkpoint) => checkpoint,
        Err(PipelineError::FileNotFound(_)) => {
            eprintln!("No pipeline checkpoint found at {}", checkpoint_path.display());
            eprintln!("Run 'retail-ingest run' to start a new pipeline.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    } else {
        print!("{}", format_checkpoint(&checkpoint));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_status_reads_checkpoint_next_to_config() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("retail.toml");
        Checkpoint::new("run-1", "hash")
            .save(&Checkpoint::default_path(&config))
            .unwrap();

        assert!(handle_status(&config, false).is_ok());
        assert!(handle_status(&temp.path().join("absent.json"), true).is_ok());
    }

    #[test]
    fn test_status_rejects_corrupt_checkpoint() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.checkpoint.json");
        std::fs::write(&path, "{").unwrap();

        assert!(matches!(
            handle_status(&path, false),
            Err(CliError::Pipeline(PipelineError::CheckpointError(_)))
        ));
    }
}
