//! Validate command implementation

use std::path::PathBuf;

use super::{duckdb_warehouse, load_config, parse_table};
use crate::cli::error::CliError;
use crate::cli::output::format_validation_report;
use crate::pipeline::{PipelineConfig, PipelineExecutor, PipelineStage};
use crate::validation::ValidationPolicy;

/// Arguments for the `validate` command
#[derive(Debug, Default)]
pub struct ValidateArgs {
    pub config_file: Option<PathBuf>,
    /// Table to check; defaults to the configured destination
    pub table: Option<String>,
    pub warehouse_db: Option<PathBuf>,
    pub json: bool,
}

impl ValidateArgs {
    /// Configuration running only the validate stage
    pub fn into_config(self) -> Result<PipelineConfig, CliError> {
        let mut config = load_config(self.config_file.as_deref())?;
        if let Some(table) = self.table.as_deref() {
            config.destination = Some(parse_table(table)?);
        }
        if let Some(warehouse) = duckdb_warehouse(self.warehouse_db.as_ref()) {
            config.warehouse = warehouse;
        }

        config.stages = vec![PipelineStage::Validate];
        // The verdict decides the exit code here, so never abort mid-run
        config.validation_policy = ValidationPolicy::WarnOnly;
        config.checkpoint_path = None;
        config.resume = false;
        config.dry_run = false;
        Ok(config)
    }
}

/// Handle the `validate` command
///
/// Exits unsuccessfully when any column mismatches the contract.
pub async fn handle_validate(args: ValidateArgs) -> Result<(), CliError> {
    let json = args.json;
    let config = args.into_config()?;

    let mut executor = PipelineExecutor::from_config(config).await?;
    let report = executor.run().await?;
    let Some(validation) = report.validation else {
        return Err(CliError::InvalidArgument(
            "validate stage produced no report".to_string(),
        ));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&validation)?);
    } else {
        print!("{}", format_validation_report(&validation));
    }

    if validation.passed {
        Ok(())
    } else {
        Err(CliError::ValidationFailed(validation.mismatch_count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config_runs_only_validation() {
        let args = ValidateArgs {
            table: Some("proj.retail.invoice_data".to_string()),
            ..ValidateArgs::default()
        };
        let config = args.into_config().unwrap();

        assert_eq!(config.effective_stages(), vec![PipelineStage::Validate]);
        assert_eq!(config.validation_policy, ValidationPolicy::WarnOnly);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_validate_missing_table() {
        let args = ValidateArgs {
            table: Some("proj.retail.invoice_data".to_string()),
            ..ValidateArgs::default()
        };
        let err = handle_validate(args).await.unwrap_err();
        assert!(matches!(err, CliError::Pipeline(_)));
    }
}
