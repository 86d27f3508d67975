//! Retail Ingest - schema-validated ingestion of retail invoice data
//!
//! Provides the building blocks of one ingestion run:
//! - Schema contract for the retail invoice table
//! - Object storage staging (local, in-memory, S3)
//! - Warehouse access with append-mode load jobs (in-memory, DuckDB)
//! - Idempotent table provisioning
//! - Post-load schema validation with a configurable policy
//! - Downstream transformation trigger
//! - Pipeline orchestration with checkpoint and resume

pub mod contract;
pub mod load;
pub mod pipeline;
pub mod provision;
pub mod storage;
pub mod transform;
pub mod validation;
pub mod warehouse;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod progress;

// Re-export commonly used types
pub use contract::{ColumnSpec, ContractError, SchemaContract, SemanticType, ValueType};
pub use load::{BulkLoader, DedupStrategy, LoadLedger};
pub use pipeline::{
    PipelineConfig, PipelineError, PipelineExecutor, PipelineReport, PipelineStage, run_pipeline,
};
pub use provision::{ProvisionError, ProvisionOutcome, TableProvisioner};
pub use storage::{InMemoryObjectStore, LocalObjectStore, ObjectStore, StagedFile, StorageError};
#[cfg(feature = "s3")]
pub use storage::S3ObjectStore;
pub use transform::{CommandTrigger, TransformCommand, TransformTrigger};
pub use validation::{SchemaValidator, ValidationError, ValidationPolicy, ValidationReport};
#[cfg(feature = "duckdb-backend")]
pub use warehouse::DuckDbWarehouse;
pub use warehouse::{InMemoryWarehouse, TableId, Warehouse, WarehouseError};
