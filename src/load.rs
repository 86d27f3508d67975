//! Bulk loading
//!
//! Submits append-mode load jobs for staged files and waits for them to
//! finish. Also holds the load ledger used when a run opts into skipping
//! sources it has already loaded.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};

use crate::contract::SchemaContract;
use crate::storage::StagedFile;
use crate::warehouse::{LoadJobConfig, LoadStats, TableId, Warehouse, WarehouseError};

/// Submits load jobs and blocks on their completion
pub struct BulkLoader<'a> {
    warehouse: &'a dyn Warehouse,
    max_bad_records: usize,
}

impl<'a> BulkLoader<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self {
            warehouse,
            max_bad_records: 0,
        }
    }

    /// Tolerate up to `max` bad rows per job; tolerated rows are dropped
    pub fn with_max_bad_records(mut self, max: usize) -> Self {
        self.max_bad_records = max;
        self
    }

    /// Append every record of `source` to `id` under `contract`
    ///
    /// Header rows declared by the staged file are skipped. Warehouse errors
    /// are returned unmodified.
    pub async fn load(
        &self,
        source: &StagedFile,
        id: &TableId,
        contract: &SchemaContract,
    ) -> Result<LoadStats, WarehouseError> {
        let mut config =
            LoadJobConfig::csv_append(contract.clone()).with_max_bad_records(self.max_bad_records);
        config.skip_leading_rows = source.header_rows;
        self.load_with_config(source, id, &config).await
    }

    /// Run a load job with an explicit configuration
    pub async fn load_with_config(
        &self,
        source: &StagedFile,
        id: &TableId,
        config: &LoadJobConfig,
    ) -> Result<LoadStats, WarehouseError> {
        let job = self.warehouse.load_from_uri(source, id, config).await?;
        let job_id = job.job_id().to_string();
        info!(
            job_id = %job_id,
            source = %source,
            table = %id,
            format = %config.source_format,
            "Submitted load job"
        );

        match job.wait_until_done().await {
            Ok(stats) => {
                info!(
                    job_id = %job_id,
                    rows_loaded = stats.rows_loaded,
                    bad_records = stats.bad_records,
                    bytes_read = stats.bytes_read,
                    "Load job completed"
                );
                Ok(stats)
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Load job failed");
                Err(e)
            }
        }
    }
}

/// How already-loaded sources are recognised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// Load every time; reruns append duplicate rows
    #[default]
    None,
    /// Skip a source URI already loaded into the table
    #[serde(alias = "path")]
    ByPath,
    /// Skip content already loaded into the table, whatever its URI
    #[serde(alias = "content")]
    ByContent,
    /// Skip when either the URI or the content was loaded before
    Both,
}

impl std::str::FromStr for DedupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(DedupStrategy::None),
            "path" | "bypath" => Ok(DedupStrategy::ByPath),
            "content" | "bycontent" => Ok(DedupStrategy::ByContent),
            "both" => Ok(DedupStrategy::Both),
            _ => Err(format!(
                "Invalid dedup strategy: {}. Expected: none, path, content, both",
                s
            )),
        }
    }
}

/// Errors reading or writing the load ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One completed load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub table: String,
    pub source_uri: String,
    pub content_hash: String,
    pub rows_loaded: u64,
    pub loaded_at: DateTime<Utc>,
}

/// Record of sources loaded into each table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadLedger {
    entries: Vec<LedgerEntry>,
}

impl LoadLedger {
    /// Read a ledger file; a missing file is an empty ledger
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn record(
        &mut self,
        table: &TableId,
        source_uri: impl Into<String>,
        content_hash: impl Into<String>,
        rows_loaded: u64,
    ) {
        self.entries.push(LedgerEntry {
            table: table.to_string(),
            source_uri: source_uri.into(),
            content_hash: content_hash.into(),
            rows_loaded,
            loaded_at: Utc::now(),
        });
    }

    /// Whether a source should be skipped under `dedup`
    pub fn should_skip(
        &self,
        dedup: DedupStrategy,
        table: &TableId,
        source_uri: &str,
        content_hash: &str,
    ) -> bool {
        let table = table.to_string();
        let loaded: Vec<&LedgerEntry> = self.entries.iter().filter(|e| e.table == table).collect();
        let uris: HashSet<&str> = loaded.iter().map(|e| e.source_uri.as_str()).collect();
        let hashes: HashSet<&str> = loaded.iter().map(|e| e.content_hash.as_str()).collect();

        match dedup {
            DedupStrategy::None => false,
            DedupStrategy::ByPath => uris.contains(source_uri),
            DedupStrategy::ByContent => hashes.contains(content_hash),
            DedupStrategy::Both => uris.contains(source_uri) || hashes.contains(content_hash),
        }
    }
}

/// SHA-256 of file content, hex encoded
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
