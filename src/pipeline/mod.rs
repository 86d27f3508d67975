//! Retail ingestion pipeline
//!
//! Orchestrates the stages of one ingestion run:
//! - Staging the local CSV file in object storage
//! - Provisioning the destination table from the schema contract
//! - Appending the staged file to the table
//! - Validating loaded column types against the contract
//! - Triggering the downstream transformation (optional)
//!
//! # Example
//!
//! ```rust,ignore
//! use retail_ingest::pipeline::{PipelineConfig, PipelineExecutor, StorageConfig};
//! use retail_ingest::warehouse::TableId;
//!
//! let config = PipelineConfig::new()
//!     .with_source_file("/usr/local/airflow/data/dataset/Online_Retail.csv")
//!     .with_bucket("online_retail_data_storage")
//!     .with_destination(TableId::parse("airflow-retail-data-pipeline.retail.invoice_data")?)
//!     .with_storage(StorageConfig::Local { root: "object-store".into() });
//!
//! let mut executor = PipelineExecutor::from_config(config).await?;
//! let report = executor.run().await?;
//!
//! println!("Pipeline completed in {}", report.duration_formatted());
//! ```
//!
//! # Pipeline Stages
//!
//! 1. **Upload**: Stage the source file under `raw/<file name>`
//! 2. **Provision**: Create the destination table when absent
//! 3. **Load**: Append every data row of the staged file
//! 4. **Validate**: Compare runtime column types with the contract
//! 5. **Transform** (optional): Run the configured downstream command
//!
//! A failed validation is reported and the run carries on, unless the
//! validation policy is `abort`, in which case the run stops before the
//! transformation.
//!
//! # Checkpointing
//!
//! With a checkpoint file configured, a failed run can be resumed. Completed
//! stages are skipped; a changed configuration refuses to resume.
//!
//! ```rust,ignore
//! let config = config
//!     .with_checkpoint_path("retail.checkpoint.json")
//!     .with_resume(true);
//!
//! let mut executor = PipelineExecutor::from_config(config).await?;
//! let report = executor.run().await?; // Continues from last checkpoint
//! ```

mod checkpoint;
mod config;
mod error;
mod executor;

pub use checkpoint::{Checkpoint, PipelineStatus, StageRecord, StageResult, StageState};
pub use config::{PipelineConfig, PipelineStage, StorageConfig, WarehouseConfig};
pub use error::{PipelineError, PipelineResult};
pub use executor::{PipelineExecutor, PipelineReport};

/// Run a pipeline with the backends named in its configuration
///
/// This is a convenience function for simple pipeline execution.
pub async fn run_pipeline(config: PipelineConfig) -> PipelineResult<PipelineReport> {
    let mut executor = PipelineExecutor::from_config(config).await?;
    executor.run().await
}
