//! Pipeline configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{PipelineError, PipelineResult};
use crate::load::DedupStrategy;
#[cfg(feature = "s3")]
use crate::storage::S3Settings;
use crate::storage::StagedFile;
use crate::transform::TransformCommand;
use crate::validation::ValidationPolicy;
use crate::warehouse::TableId;

/// Object storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Buckets as directories under `root`
    Local { root: PathBuf },
    /// Process-local objects, gone when the run ends
    Memory,
    /// Amazon S3 or a compatible endpoint
    #[cfg(feature = "s3")]
    S3(S3Settings),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: PathBuf::from("object-store"),
        }
    }
}

/// Warehouse backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum WarehouseConfig {
    /// Process-local tables
    #[default]
    Memory,
    /// Embedded DuckDB database file
    #[cfg(feature = "duckdb-backend")]
    #[serde(rename = "duckdb")]
    DuckDb { path: PathBuf },
}

/// Main pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name of the pipeline run
    pub name: Option<String>,
    /// Local CSV file to stage
    pub source_file: Option<PathBuf>,
    /// Bucket receiving the staged file
    pub bucket: Option<String>,
    /// Object key; defaults to `raw/<file name>`
    pub remote_path: Option<String>,
    /// Destination table, `<project>.<dataset>.<table>`
    pub destination: Option<TableId>,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    /// Bad rows tolerated per load job
    pub max_bad_records: usize,
    /// Skip sources already loaded into the destination
    pub dedup: DedupStrategy,
    /// Load ledger file, required when dedup is enabled
    pub ledger_path: Option<PathBuf>,
    /// Diff an existing destination table against the contract
    pub verify_existing_schema: bool,
    pub validation_policy: ValidationPolicy,
    /// Downstream transformation command
    pub transform: Option<TransformCommand>,
    /// Stages to run (empty = all)
    pub stages: Vec<PipelineStage>,
    /// Enable dry-run mode
    pub dry_run: bool,
    /// Resume from checkpoint
    pub resume: bool,
    /// Checkpoint file; no checkpoint is written when unset
    pub checkpoint_path: Option<PathBuf>,
    /// Verbose output
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: None,
            source_file: None,
            bucket: None,
            remote_path: None,
            destination: None,
            storage: StorageConfig::default(),
            warehouse: WarehouseConfig::default(),
            max_bad_records: 0,
            dedup: DedupStrategy::None,
            ledger_path: None,
            verify_existing_schema: false,
            validation_policy: ValidationPolicy::WarnOnly,
            transform: None,
            stages: Vec::new(),
            dry_run: false,
            resume: false,
            checkpoint_path: None,
            verbose: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new pipeline config
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML configuration file
    pub fn from_toml_file(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML configuration text
    pub fn from_toml_str(content: &str) -> PipelineResult<Self> {
        toml::from_str(content).map_err(|e| PipelineError::ConfigError(e.to_string()))
    }

    /// Set the pipeline name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the local source file
    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    /// Set the staging bucket
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the staged object key
    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = Some(path.into());
        self
    }

    /// Set the destination table
    pub fn with_destination(mut self, id: TableId) -> Self {
        self.destination = Some(id);
        self
    }

    /// Set the object storage backend
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set the warehouse backend
    pub fn with_warehouse(mut self, warehouse: WarehouseConfig) -> Self {
        self.warehouse = warehouse;
        self
    }

    /// Set the bad record tolerance
    pub fn with_max_bad_records(mut self, max: usize) -> Self {
        self.max_bad_records = max;
        self
    }

    /// Enable source deduplication backed by a ledger file
    pub fn with_dedup(mut self, dedup: DedupStrategy, ledger: impl Into<PathBuf>) -> Self {
        self.dedup = dedup;
        self.ledger_path = Some(ledger.into());
        self
    }

    /// Verify an existing destination table against the contract
    pub fn with_verify_existing_schema(mut self, verify: bool) -> Self {
        self.verify_existing_schema = verify;
        self
    }

    /// Set the validation policy
    pub fn with_validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = policy;
        self
    }

    /// Set the downstream transformation command
    pub fn with_transform(mut self, command: TransformCommand) -> Self {
        self.transform = Some(command);
        self
    }

    /// Set specific stages to run
    pub fn with_stages(mut self, stages: Vec<PipelineStage>) -> Self {
        self.stages = stages;
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable resume from checkpoint
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Set the checkpoint file
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Enable verbose output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Object key the source is staged under
    pub fn effective_remote_path(&self) -> Option<String> {
        self.remote_path
            .clone()
            .or_else(|| self.source_file.as_deref().and_then(StagedFile::raw_path))
    }

    /// Get stages to run (all if empty), in execution order
    pub fn effective_stages(&self) -> Vec<PipelineStage> {
        if self.stages.is_empty() {
            PipelineStage::all()
        } else {
            let mut stages = self.stages.clone();
            stages.sort_by_key(|s| s.index());
            stages.dedup();
            stages
        }
    }

    /// Check if a specific stage should run
    pub fn should_run_stage(&self, stage: PipelineStage) -> bool {
        if self.stages.is_empty() {
            true
        } else {
            self.stages.contains(&stage)
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();

        if self.should_run_stage(PipelineStage::Upload) {
            if self.source_file.is_none() {
                problems.push("source_file is required for the upload stage");
            }
            if self.bucket.is_none() {
                problems.push("bucket is required for the upload stage");
            }
        }

        if self.should_run_stage(PipelineStage::Load) {
            if self.bucket.is_none() && !self.should_run_stage(PipelineStage::Upload) {
                problems.push("bucket is required for the load stage");
            }
            if self.effective_remote_path().is_none() {
                problems.push("remote_path or source_file is required for the load stage");
            }
        }

        let needs_table = [
            PipelineStage::Provision,
            PipelineStage::Load,
            PipelineStage::Validate,
        ]
        .into_iter()
        .any(|stage| self.should_run_stage(stage));
        if needs_table && self.destination.is_none() {
            problems.push("destination table is required");
        }

        if self.dedup != DedupStrategy::None && self.ledger_path.is_none() {
            problems.push("ledger_path is required when dedup is enabled");
        }

        if self.resume && self.checkpoint_path.is_none() {
            problems.push("checkpoint_path is required to resume");
        }

        if let Some(command) = &self.transform {
            if command.program.trim().is_empty() {
                problems.push("transform program must not be empty");
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Stage 1: Stage the source file in object storage
    Upload,
    /// Stage 2: Ensure the destination table exists
    Provision,
    /// Stage 3: Append the staged file to the table
    Load,
    /// Stage 4: Check loaded column types against the contract
    Validate,
    /// Stage 5: Trigger the downstream transformation (optional)
    Transform,
}

impl PipelineStage {
    /// Get all stages in execution order
    pub fn all() -> Vec<Self> {
        vec![
            Self::Upload,
            Self::Provision,
            Self::Load,
            Self::Validate,
            Self::Transform,
        ]
    }

    /// Get stage name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Provision => "provision",
            Self::Load => "load",
            Self::Validate => "validate",
            Self::Transform => "transform",
        }
    }

    /// Get stage description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Upload => "Stage source file in object storage",
            Self::Provision => "Ensure destination table exists",
            Self::Load => "Append staged file to destination table",
            Self::Validate => "Validate column types against the contract",
            Self::Transform => "Trigger downstream transformation",
        }
    }

    /// Get stage index (1-based)
    pub fn index(&self) -> usize {
        match self {
            Self::Upload => 1,
            Self::Provision => 2,
            Self::Load => 3,
            Self::Validate => 4,
            Self::Transform => 5,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upload" | "1" => Ok(Self::Upload),
            "provision" | "2" => Ok(Self::Provision),
            "load" | "3" => Ok(Self::Load),
            "validate" | "4" => Ok(Self::Validate),
            "transform" | "5" => Ok(Self::Transform),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}
