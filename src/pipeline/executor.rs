//! Pipeline executor for running the full ingestion pipeline

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::checkpoint::{
    self, Checkpoint, PipelineStatus, StageRecord, StageResult, StageState,
};
use super::config::{PipelineConfig, PipelineStage, StorageConfig, WarehouseConfig};
use super::error::{PipelineError, PipelineResult};
use crate::contract::SchemaContract;
use crate::load::{BulkLoader, DedupStrategy, LoadLedger, content_hash};
use crate::provision::TableProvisioner;
#[cfg(feature = "s3")]
use crate::storage::S3ObjectStore;
use crate::storage::{InMemoryObjectStore, LocalObjectStore, ObjectStore, StagedFile};
use crate::transform::{CommandTrigger, TransformContext, TransformTrigger};
use crate::validation::{SchemaValidator, ValidationReport};
#[cfg(feature = "duckdb-backend")]
use crate::warehouse::DuckDbWarehouse;
use crate::warehouse::{InMemoryWarehouse, TableId, Warehouse};

/// Pipeline executor that runs all stages
pub struct PipelineExecutor {
    config: PipelineConfig,
    contract: SchemaContract,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    transform: Option<Box<dyn TransformTrigger>>,
    checkpoint: Checkpoint,
    staged: Option<StagedFile>,
    validation: Option<ValidationReport>,
}

impl PipelineExecutor {
    /// Create an executor over explicit storage and warehouse clients
    ///
    /// Loads against the retail contract unless [`with_contract`](Self::with_contract)
    /// replaces it. A configured transform command becomes the trigger.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::ConfigError)?;

        let config_hash = Self::hash_config(&config)?;
        let run_id = Uuid::new_v4().to_string();

        let checkpoint = if config.resume {
            Self::load_or_create_checkpoint(&config, &run_id, &config_hash)?
        } else {
            Checkpoint::new(&run_id, &config_hash)
        };
        let checkpoint = match &config.name {
            Some(name) => checkpoint.with_name(name),
            None => checkpoint,
        };

        let transform = config
            .transform
            .clone()
            .map(|command| Box::new(CommandTrigger::new(command)) as Box<dyn TransformTrigger>);

        Ok(Self {
            config,
            contract: SchemaContract::retail().clone(),
            store,
            warehouse,
            transform,
            checkpoint,
            staged: None,
            validation: None,
        })
    }

    /// Create an executor with the backends named in the configuration
    pub async fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        let store: Arc<dyn ObjectStore> = match &config.storage {
            StorageConfig::Local { root } => Arc::new(LocalObjectStore::new(root)),
            StorageConfig::Memory => Arc::new(InMemoryObjectStore::new()),
            #[cfg(feature = "s3")]
            StorageConfig::S3(settings) => Arc::new(S3ObjectStore::new(settings).await),
        };

        let warehouse: Arc<dyn Warehouse> = match &config.warehouse {
            WarehouseConfig::Memory => Arc::new(InMemoryWarehouse::new(store.clone())),
            #[cfg(feature = "duckdb-backend")]
            WarehouseConfig::DuckDb { path } => {
                Arc::new(DuckDbWarehouse::open(path, store.clone())?)
            }
        };

        Self::new(config, store, warehouse)
    }

    /// Replace the downstream trigger
    pub fn with_transform(mut self, trigger: Box<dyn TransformTrigger>) -> Self {
        self.transform = Some(trigger);
        self
    }

    /// Load and validate against a different contract
    pub fn with_contract(mut self, contract: SchemaContract) -> Self {
        self.contract = contract;
        self
    }

    /// Get the current checkpoint
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Validation report of this run, once the validate stage has produced one
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    pub fn warehouse(&self) -> Arc<dyn Warehouse> {
        self.warehouse.clone()
    }

    /// Run the pipeline
    ///
    /// Stages run strictly in order. The first failing stage stops the run and
    /// its error is returned as the component reported it.
    pub async fn run(&mut self) -> PipelineResult<PipelineReport> {
        let span = info_span!(
            "pipeline_run",
            run_id = %self.checkpoint.run_id,
            dry_run = self.config.dry_run
        );
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&mut self) -> PipelineResult<PipelineReport> {
        let start = Instant::now();
        let stages = self.config.effective_stages();

        info!(
            run_id = %self.checkpoint.run_id,
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            dry_run = self.config.dry_run,
            "Starting pipeline"
        );

        if self.config.verbose {
            eprintln!("Pipeline run: {}", self.checkpoint.run_id);
            eprintln!(
                "Stages to run: {:?}",
                stages.iter().map(|s| s.name()).collect::<Vec<_>>()
            );
            if self.config.dry_run {
                eprintln!("DRY RUN MODE - no changes will be made");
            }
        }

        if self.config.dry_run {
            return self.dry_run(&stages, start).await;
        }

        for stage in &stages {
            // Resume mode
            if self.checkpoint.is_stage_completed(*stage) {
                debug!(stage = stage.name(), "Stage already completed, skipping");
                if self.config.verbose {
                    eprintln!("Stage {} already completed, skipping", stage.name());
                }
                continue;
            }

            if let Some(reason) = self.should_skip_stage(*stage) {
                debug!(stage = stage.name(), reason = %reason, "Skipping stage");
                if self.config.verbose {
                    eprintln!("Skipping stage {}: {}", stage.name(), reason);
                }
                self.checkpoint.record(StageRecord::skipped(*stage, reason));
                self.save_checkpoint()?;
                continue;
            }

            info!(stage = stage.name(), "Starting stage");
            if self.config.verbose {
                eprintln!("Running stage {}...", stage.name());
            }

            self.checkpoint.start_stage(*stage);
            self.save_checkpoint()?;

            let stage_span = info_span!("pipeline_stage", stage = stage.name());
            match self.run_stage(*stage).instrument(stage_span).await {
                Ok(record) => {
                    info!(
                        stage = stage.name(),
                        state = %record.state,
                        duration_ms = record.duration_ms,
                        "Stage finished"
                    );
                    if self.config.verbose {
                        eprintln!(
                            "Stage {} {} in {}ms",
                            stage.name(),
                            record.state,
                            record.duration_ms
                        );
                    }
                    self.checkpoint.record(record);
                    self.save_checkpoint()?;
                }
                Err(e) => {
                    let error_msg = e.to_string();
                    error!(stage = stage.name(), error = %error_msg, "Stage failed");
                    self.checkpoint
                        .record(StageRecord::failed(*stage, error_msg));
                    self.save_checkpoint()?;
                    return Err(e);
                }
            }
        }

        self.checkpoint.complete();
        self.save_checkpoint()?;

        let duration = start.elapsed();
        info!(
            run_id = %self.checkpoint.run_id,
            duration_ms = duration.as_millis() as u64,
            stages_completed = self.checkpoint.completed_stages().len(),
            rows_loaded = ?self.checkpoint.rows_loaded(),
            "Pipeline completed"
        );

        Ok(self.report(duration.as_millis() as u64))
    }

    fn report(&self, duration_ms: u64) -> PipelineReport {
        PipelineReport {
            run_id: self.checkpoint.run_id.clone(),
            status: self.checkpoint.status,
            stages: self.checkpoint.stages.clone(),
            duration_ms,
            validation: self.validation.clone(),
        }
    }

    /// Run a single stage
    async fn run_stage(&mut self, stage: PipelineStage) -> PipelineResult<StageRecord> {
        let start = Instant::now();

        let record = match stage {
            PipelineStage::Upload => self.run_upload().await?,
            PipelineStage::Provision => self.run_provision().await?,
            PipelineStage::Load => self.run_load().await?,
            PipelineStage::Validate => self.run_validate().await?,
            PipelineStage::Transform => self.run_transform().await?,
        };

        Ok(record.with_duration(start.elapsed().as_millis() as u64))
    }

    /// Stage the local source file in object storage
    async fn run_upload(&mut self) -> PipelineResult<StageRecord> {
        let source = self
            .config
            .source_file
            .as_ref()
            .ok_or_else(|| PipelineError::MissingInput("source file".to_string()))?;
        let bucket = self
            .config
            .bucket
            .as_deref()
            .ok_or_else(|| PipelineError::MissingInput("bucket".to_string()))?;
        let remote_path = self
            .config
            .effective_remote_path()
            .ok_or_else(|| PipelineError::MissingInput("remote path".to_string()))?;

        if !source.exists() {
            warn!(source = %source.display(), "Source file not found");
            return Err(PipelineError::FileNotFound(source.clone()));
        }
        let bytes = tokio::fs::metadata(source).await?.len();

        let staged = self.store.upload(source, bucket, &remote_path).await?;
        info!(source = %source.display(), uri = %staged, bytes, "Staged source file");

        let record = StageRecord::completed(
            PipelineStage::Upload,
            StageResult::Staged {
                uri: staged.uri(),
                bytes,
            },
        );
        self.staged = Some(staged);
        Ok(record)
    }

    /// Create the destination table when absent
    async fn run_provision(&self) -> PipelineResult<StageRecord> {
        let table = self.destination()?;
        let outcome = TableProvisioner::new(self.warehouse.as_ref())
            .with_schema_verification(self.config.verify_existing_schema)
            .ensure_table(table, &self.contract)
            .await?;

        Ok(StageRecord::completed(
            PipelineStage::Provision,
            StageResult::Provisioned {
                table: table.to_string(),
                outcome,
            },
        ))
    }

    /// Append the staged file to the destination table
    async fn run_load(&self) -> PipelineResult<StageRecord> {
        let table = self.destination()?;
        let source = self.staged_source()?;
        let uri = source.uri();

        let mut ledger = None;
        if self.config.dedup != DedupStrategy::None {
            let path = self
                .config
                .ledger_path
                .as_deref()
                .ok_or_else(|| PipelineError::MissingInput("ledger path".to_string()))?;
            let bytes = self.store.download(&source.bucket, &source.path).await?;
            let hash = content_hash(&bytes);
            let loaded = LoadLedger::load(path)?;

            if loaded.should_skip(self.config.dedup, table, &uri, &hash) {
                info!(uri = %uri, table = %table, dedup = ?self.config.dedup, "Source already loaded");
                let reason = format!("{uri} already loaded into {table}");
                return Ok(StageRecord::skipped(PipelineStage::Load, reason).with_result(
                    StageResult::Loaded {
                        uri,
                        rows_loaded: 0,
                        bad_records: 0,
                        bytes_read: 0,
                    },
                ));
            }
            ledger = Some((loaded, hash, path));
        }

        let stats = BulkLoader::new(self.warehouse.as_ref())
            .with_max_bad_records(self.config.max_bad_records)
            .load(&source, table, &self.contract)
            .await?;

        if let Some((mut loaded, hash, path)) = ledger {
            loaded.record(table, &uri, hash, stats.rows_loaded);
            loaded.save(path)?;
        }

        Ok(StageRecord::completed(
            PipelineStage::Load,
            StageResult::Loaded {
                uri,
                rows_loaded: stats.rows_loaded,
                bad_records: stats.bad_records,
                bytes_read: stats.bytes_read,
            },
        ))
    }

    /// Check the loaded column types against the contract
    async fn run_validate(&mut self) -> PipelineResult<StageRecord> {
        let table = self.destination()?;
        let report = SchemaValidator::new(self.warehouse.as_ref())
            .validate(table, &self.contract)
            .await?;

        let record = StageRecord::completed(
            PipelineStage::Validate,
            StageResult::Validated {
                passed: report.passed,
                rows_inspected: report.rows_inspected,
                mismatches: report.mismatch_count(),
            },
        );

        let verdict = report.enforce(self.config.validation_policy);
        self.validation = Some(report);
        verdict?;
        Ok(record)
    }

    /// Start the downstream transformation
    async fn run_transform(&self) -> PipelineResult<StageRecord> {
        let Some(trigger) = &self.transform else {
            return Ok(StageRecord::skipped(
                PipelineStage::Transform,
                "No transform configured",
            ));
        };

        let validation_passed = self
            .validation
            .as_ref()
            .map(|r| r.passed)
            .or_else(|| self.checkpoint.validation_passed());
        let context = TransformContext {
            run_id: self.checkpoint.run_id.clone(),
            table: self
                .config
                .destination
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_default(),
            validation_passed,
        };

        let outcome = trigger.trigger(&context).await?;
        info!(trigger = trigger.name(), exit_code = outcome.exit_code, "Transform finished");

        Ok(StageRecord::completed(
            PipelineStage::Transform,
            StageResult::Transformed {
                trigger: trigger.name().to_string(),
                exit_code: outcome.exit_code,
            },
        ))
    }

    fn destination(&self) -> PipelineResult<&TableId> {
        self.config
            .destination
            .as_ref()
            .ok_or_else(|| PipelineError::MissingInput("destination table".to_string()))
    }

    /// Staged file for the load stage
    ///
    /// Prefers the file uploaded by this run, then the one recorded in a
    /// resumed checkpoint, then the configured bucket and object key.
    fn staged_source(&self) -> PipelineResult<StagedFile> {
        if let Some(staged) = &self.staged {
            return Ok(staged.clone());
        }

        if let Some(uri) = self.checkpoint.staged_uri() {
            return Ok(StagedFile::parse(uri)?);
        }

        let bucket = self
            .config
            .bucket
            .as_deref()
            .ok_or_else(|| PipelineError::MissingInput("bucket".to_string()))?;
        let path = self
            .config
            .effective_remote_path()
            .ok_or_else(|| PipelineError::MissingInput("remote path".to_string()))?;
        Ok(StagedFile::csv(self.store.scheme(), bucket, path))
    }

    /// Check if a stage should be skipped
    fn should_skip_stage(&self, stage: PipelineStage) -> Option<String> {
        match stage {
            PipelineStage::Transform if self.transform.is_none() => {
                Some("No transform configured".to_string())
            }
            _ => None,
        }
    }

    /// Dry run - validate inputs without executing
    async fn dry_run(
        &self,
        stages: &[PipelineStage],
        start: Instant,
    ) -> PipelineResult<PipelineReport> {
        info!("Dry run - validating inputs only");

        let mut records = Vec::new();
        for stage in stages {
            self.validate_stage_inputs(*stage).await?;
            if self.config.verbose {
                eprintln!("  [OK] {} - {}", stage.name(), stage.description());
            }
            records.push(StageRecord::skipped(*stage, "Dry run"));
        }

        Ok(PipelineReport {
            run_id: self.checkpoint.run_id.clone(),
            status: PipelineStatus::Completed,
            stages: records,
            duration_ms: start.elapsed().as_millis() as u64,
            validation: None,
        })
    }

    /// Validate inputs for a stage
    async fn validate_stage_inputs(&self, stage: PipelineStage) -> PipelineResult<()> {
        match stage {
            PipelineStage::Upload => {
                if let Some(source) = &self.config.source_file {
                    if !source.exists() {
                        return Err(PipelineError::FileNotFound(source.clone()));
                    }
                }
            }
            PipelineStage::Load if !self.config.should_run_stage(PipelineStage::Upload) => {
                let source = self.staged_source()?;
                if !self.store.exists(&source.bucket, &source.path).await? {
                    return Err(PipelineError::MissingInput(format!(
                        "staged file {}",
                        source.uri()
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Save checkpoint to disk when a checkpoint file is configured
    fn save_checkpoint(&self) -> PipelineResult<()> {
        match &self.config.checkpoint_path {
            Some(path) => self.checkpoint.save(path),
            None => Ok(()),
        }
    }

    /// Load existing checkpoint or create new one
    fn load_or_create_checkpoint(
        config: &PipelineConfig,
        run_id: &str,
        config_hash: &str,
    ) -> PipelineResult<Checkpoint> {
        let Some(path) = config.checkpoint_path.as_deref() else {
            return Ok(Checkpoint::new(run_id, config_hash));
        };

        if path.exists() {
            let checkpoint = Checkpoint::load(path)?;

            if checkpoint.config_hash != config_hash {
                return Err(PipelineError::ResumeError(
                    "Configuration has changed since last run. Run without --resume to start fresh."
                        .to_string(),
                ));
            }

            if checkpoint.status == PipelineStatus::Completed {
                return Err(PipelineError::ResumeError(
                    "Previous run already completed. Run without --resume to start fresh."
                        .to_string(),
                ));
            }

            info!(run_id = %checkpoint.run_id, "Resuming pipeline run");
            Ok(checkpoint)
        } else {
            Ok(Checkpoint::new(run_id, config_hash))
        }
    }

    /// Hash every setting that shapes what a run does
    ///
    /// Flags that only steer this invocation (verbosity, dry run, resume and
    /// the checkpoint location) are left out so a resume can flip them.
    fn hash_config(config: &PipelineConfig) -> PipelineResult<String> {
        let mut settings = config.clone();
        settings.verbose = false;
        settings.dry_run = false;
        settings.resume = false;
        settings.checkpoint_path = None;

        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&settings)?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Report from a pipeline run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub run_id: String,
    pub status: PipelineStatus,
    /// Stage records in the order the stages finished
    pub stages: Vec<StageRecord>,
    pub duration_ms: u64,
    /// Schema validation result, when the validate stage ran
    pub validation: Option<ValidationReport>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    pub fn stage(&self, stage: PipelineStage) -> Option<&StageRecord> {
        checkpoint::find_record(&self.stages, stage)
    }

    pub fn stages_completed(&self) -> Vec<PipelineStage> {
        checkpoint::completed(&self.stages)
    }

    /// Whether `stage` ran but was skipped
    pub fn was_skipped(&self, stage: PipelineStage) -> bool {
        self.stage(stage)
            .is_some_and(|r| r.state == StageState::Skipped)
    }

    /// Rows appended by the load stage
    pub fn rows_loaded(&self) -> Option<u64> {
        checkpoint::rows_loaded(&self.stages)
    }

    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        if mins > 0 {
            format!("{}m {}s", mins, secs % 60)
        } else {
            format!("{}s", secs)
        }
    }
}
