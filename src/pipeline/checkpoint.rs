//! Run checkpoints
//!
//! A checkpoint keeps one record per stage with what that stage produced: the
//! staged URI, the rows appended, the validation verdict. A resumed run reads
//! these back instead of staging or loading the same file again.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::PipelineStage;
use super::error::{PipelineError, PipelineResult};
use crate::provision::ProvisionOutcome;

/// Persistent state of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Hash of the settings that shape the run, checked on resume
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: PipelineStatus,
    /// Stage in flight when the checkpoint was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<PipelineStage>,
    /// Stages that finished, in the order they finished
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            name: None,
            config_hash: config_hash.into(),
            started_at: now,
            updated_at: now,
            status: PipelineStatus::Running,
            current_stage: None,
            stages: Vec::new(),
            error: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn start_stage(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.status = PipelineStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Store the outcome of a stage, replacing an earlier record for it
    ///
    /// A failed record marks the whole run failed.
    pub fn record(&mut self, record: StageRecord) {
        if record.state == StageState::Failed {
            self.status = PipelineStatus::Failed;
            self.error = record.note.clone();
        }
        self.stages.retain(|r| r.stage != record.stage);
        self.stages.push(record);
        self.current_stage = None;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = PipelineStatus::Completed;
        self.current_stage = None;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn stage(&self, stage: PipelineStage) -> Option<&StageRecord> {
        find_record(&self.stages, stage)
    }

    /// Completed stages are not run again on resume; skipped ones are
    pub fn is_stage_completed(&self, stage: PipelineStage) -> bool {
        self.stage(stage)
            .is_some_and(|r| r.state == StageState::Completed)
    }

    pub fn completed_stages(&self) -> Vec<PipelineStage> {
        completed(&self.stages)
    }

    pub fn failed_stage(&self) -> Option<PipelineStage> {
        self.stages
            .iter()
            .find(|r| r.state == StageState::Failed)
            .map(|r| r.stage)
    }

    /// Object written by the upload stage
    pub fn staged_uri(&self) -> Option<&str> {
        match self.stage(PipelineStage::Upload).map(|r| &r.result) {
            Some(StageResult::Staged { uri, .. }) => Some(uri),
            _ => None,
        }
    }

    pub fn rows_loaded(&self) -> Option<u64> {
        rows_loaded(&self.stages)
    }

    /// Verdict of the validate stage
    pub fn validation_passed(&self) -> Option<bool> {
        match self.stage(PipelineStage::Validate).map(|r| &r.result) {
            Some(StageResult::Validated { passed, .. }) => Some(*passed),
            _ => None,
        }
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Err(PipelineError::FileNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| {
            PipelineError::CheckpointError(format!("{} is not a checkpoint: {}", path.display(), e))
        })
    }

    /// `retail.toml` keeps its checkpoint in `retail.checkpoint.json`
    pub fn default_path(config_file: &Path) -> PathBuf {
        config_file.with_extension("checkpoint.json")
    }
}

pub(crate) fn find_record(records: &[StageRecord], stage: PipelineStage) -> Option<&StageRecord> {
    records.iter().find(|r| r.stage == stage)
}

pub(crate) fn completed(records: &[StageRecord]) -> Vec<PipelineStage> {
    records
        .iter()
        .filter(|r| r.state == StageState::Completed)
        .map(|r| r.stage)
        .collect()
}

pub(crate) fn rows_loaded(records: &[StageRecord]) -> Option<u64> {
    match find_record(records, PipelineStage::Load).map(|r| &r.result) {
        Some(StageResult::Loaded { rows_loaded, .. }) => Some(*rows_loaded),
        _ => None,
    }
}

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Running => write!(f, "running"),
            PipelineStatus::Completed => write!(f, "completed"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Completed,
    Skipped,
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::Completed => write!(f, "completed"),
            StageState::Skipped => write!(f, "skipped"),
            StageState::Failed => write!(f, "failed"),
        }
    }
}

/// What a stage produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    #[default]
    None,
    Staged {
        uri: String,
        bytes: u64,
    },
    Provisioned {
        table: String,
        outcome: ProvisionOutcome,
    },
    Loaded {
        uri: String,
        rows_loaded: u64,
        bad_records: u64,
        bytes_read: u64,
    },
    Validated {
        passed: bool,
        rows_inspected: u64,
        mismatches: usize,
    },
    Transformed {
        trigger: String,
        exit_code: i32,
    },
}

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub state: StageState,
    /// Skip reason or error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub result: StageResult,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl StageRecord {
    fn new(stage: PipelineStage, state: StageState, note: Option<String>) -> Self {
        Self {
            stage,
            state,
            note,
            result: StageResult::None,
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn completed(stage: PipelineStage, result: StageResult) -> Self {
        Self::new(stage, StageState::Completed, None).with_result(result)
    }

    pub fn skipped(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self::new(stage, StageState::Skipped, Some(reason.into()))
    }

    pub fn failed(stage: PipelineStage, error: impl Into<String>) -> Self {
        Self::new(stage, StageState::Failed, Some(error.into()))
    }

    pub fn with_result(mut self, result: StageResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
