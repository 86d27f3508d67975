//! Run command implementation

use std::path::PathBuf;

use super::{duckdb_warehouse, load_config, parse_policy, parse_table};
use crate::cli::error::CliError;
use crate::cli::output::format_pipeline_report;
use crate::load::DedupStrategy;
use crate::pipeline::{Checkpoint, PipelineConfig, PipelineExecutor, PipelineStage, StorageConfig};
use crate::progress::Spinner;

/// Arguments for the `run` command
///
/// Flags override the matching config file entries.
#[derive(Debug, Default)]
pub struct RunArgs {
    pub config_file: Option<PathBuf>,
    pub source_file: Option<PathBuf>,
    pub bucket: Option<String>,
    pub remote_path: Option<String>,
    pub destination: Option<String>,
    /// Local object store root
    pub storage_root: Option<PathBuf>,
    /// DuckDB warehouse file
    pub warehouse_db: Option<PathBuf>,
    pub stages: Vec<String>,
    pub max_bad_records: Option<usize>,
    pub dedup: Option<String>,
    pub ledger: Option<PathBuf>,
    pub validation_policy: Option<String>,
    pub verify_schema: bool,
    pub checkpoint: Option<PathBuf>,
    pub dry_run: bool,
    pub resume: bool,
    pub verbose: bool,
    pub json: bool,
    pub quiet: bool,
}

impl RunArgs {
    /// Merge the flags into a pipeline configuration
    pub fn into_config(self) -> Result<PipelineConfig, CliError> {
        let mut config = load_config(self.config_file.as_deref())?;

        if let Some(source) = self.source_file {
            config.source_file = Some(source);
        }
        if let Some(bucket) = self.bucket {
            config.bucket = Some(bucket);
        }
        if let Some(remote_path) = self.remote_path {
            config.remote_path = Some(remote_path);
        }
        if let Some(destination) = self.destination.as_deref() {
            config.destination = Some(parse_table(destination)?);
        }
        if let Some(root) = self.storage_root {
            config.storage = StorageConfig::Local { root };
        }
        if let Some(warehouse) = duckdb_warehouse(self.warehouse_db.as_ref()) {
            config.warehouse = warehouse;
        }
        if !self.stages.is_empty() {
            config.stages = self
                .stages
                .iter()
                .map(|s| s.parse::<PipelineStage>().map_err(CliError::InvalidArgument))
                .collect::<Result<Vec<_>, _>>()?;
        }
        if let Some(max) = self.max_bad_records {
            config.max_bad_records = max;
        }
        if let Some(dedup) = self.dedup.as_deref() {
            config.dedup = dedup
                .parse::<DedupStrategy>()
                .map_err(CliError::InvalidArgument)?;
        }
        if let Some(ledger) = self.ledger {
            config.ledger_path = Some(ledger);
        }
        if let Some(policy) = self.validation_policy.as_deref() {
            config.validation_policy = parse_policy(policy)?;
        }
        if self.verify_schema {
            config.verify_existing_schema = true;
        }

        if let Some(checkpoint) = self.checkpoint {
            config.checkpoint_path = Some(checkpoint);
        } else if config.checkpoint_path.is_none() {
            if let Some(file) = &self.config_file {
                config.checkpoint_path = Some(Checkpoint::default_path(file));
            }
        }

        config.dry_run |= self.dry_run;
        config.resume |= self.resume;
        config.verbose |= self.verbose;
        Ok(config)
    }
}

/// Handle the `run` command
pub async fn handle_run(args: RunArgs) -> Result<(), CliError> {
    let json = args.json;
    let quiet = args.quiet;
    let config = args.into_config()?;

    let mut executor = PipelineExecutor::from_config(config).await?;
    if !quiet && !json {
        eprintln!("Starting pipeline run: {}", executor.checkpoint().run_id);
    }

    let spinner = Spinner::new("Running pipeline", !quiet && !json);

    let report = match executor.run().await {
        Ok(report) => report,
        Err(e) => {
            spinner.finish_error("Pipeline failed");
            return Err(e.into());
        }
    };
    spinner.finish_success(&format!("Pipeline finished in {}", report.duration_formatted()));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print!("{}", format_pipeline_report(&report));
    }
    Ok(())
}
