//! Warehouse abstraction
//!
//! Defines the Warehouse trait the provisioner, loader and validator talk to,
//! plus the value types that cross it:
//! - `TableId`: `<project>.<dataset>.<table>` identifiers
//! - `LoadJobConfig` / `LoadJob`: asynchronous bulk loads from staged files
//! - `ResultSet`: tabular query results
//!
//! Backends:
//! - InMemoryWarehouse: process-local tables (tests, dry runs)
//! - DuckDbWarehouse: embedded DuckDB database (feature `duckdb-backend`)

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::contract::{SchemaContract, TableColumn, ValueType};
use crate::storage::{SourceFormat, StagedFile};

pub mod decode;
#[cfg(feature = "duckdb-backend")]
pub mod duckdb;
mod error;
pub mod memory;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbWarehouse;
pub use error::{RowError, WarehouseError};
pub use memory::InMemoryWarehouse;

static PROJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").expect("valid project regex"));
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"));

/// Fully qualified table identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    /// Build an identifier, validating each part
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, WarehouseError> {
        let id = Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        };

        if !PROJECT_RE.is_match(&id.project)
            || !NAME_RE.is_match(&id.dataset)
            || !NAME_RE.is_match(&id.table)
        {
            return Err(WarehouseError::InvalidIdentifier(id.to_string()));
        }
        Ok(id)
    }

    /// Parse `<project>.<dataset>.<table>`
    pub fn parse(s: &str) -> Result<Self, WarehouseError> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table] => Self::new(*project, *dataset, *table),
            _ => Err(WarehouseError::InvalidIdentifier(s.to_string())),
        }
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl std::str::FromStr for TableId {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TableId {
    type Error = WarehouseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TableId> for String {
    fn from(id: TableId) -> Self {
        id.to_string()
    }
}

/// Table metadata returned by `get_table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub id: TableId,
    pub columns: Vec<TableColumn>,
    pub num_rows: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// How a load writes into its destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDisposition {
    /// Add rows, leaving existing rows untouched
    #[default]
    Append,
}

/// Configuration for a bulk load job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadJobConfig {
    pub source_format: SourceFormat,
    /// Leading rows to skip (header rows)
    pub skip_leading_rows: usize,
    pub write_disposition: WriteDisposition,
    /// Bad rows tolerated before the job fails; tolerated rows are dropped
    pub max_bad_records: usize,
    /// Schema the source rows are decoded under
    pub schema: SchemaContract,
}

impl LoadJobConfig {
    /// CSV, one header row, append, no bad rows tolerated
    pub fn csv_append(schema: SchemaContract) -> Self {
        Self {
            source_format: SourceFormat::Csv,
            skip_leading_rows: 1,
            write_disposition: WriteDisposition::Append,
            max_bad_records: 0,
            schema,
        }
    }

    /// Set the bad record tolerance
    pub fn with_max_bad_records(mut self, max_bad_records: usize) -> Self {
        self.max_bad_records = max_bad_records;
        self
    }
}

/// Statistics reported by a finished load job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub rows_loaded: u64,
    /// Rows dropped under the bad record tolerance
    pub bad_records: u64,
    pub bytes_read: u64,
}

/// Handle to a submitted load job
pub struct LoadJob {
    job_id: String,
    destination: TableId,
    source_uri: String,
    handle: JoinHandle<Result<LoadStats, WarehouseError>>,
}

impl LoadJob {
    /// Start a job running `work` on the current tokio runtime
    pub fn spawn<F>(destination: TableId, source_uri: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<LoadStats, WarehouseError>> + Send + 'static,
    {
        Self {
            job_id: format!("load_{}", uuid::Uuid::new_v4().simple()),
            destination,
            source_uri: source_uri.into(),
            handle: tokio::spawn(work),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn destination(&self) -> &TableId {
        &self.destination
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    /// Whether the job has reached a terminal state
    pub fn is_done(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the job finishes, returning its outcome
    pub async fn wait_until_done(self) -> Result<LoadStats, WarehouseError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(WarehouseError::Backend(format!(
                "load job {} did not complete: {}",
                self.job_id, e
            ))),
        }
    }
}

/// A single value read back from a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Runtime type tag, `None` for null
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            CellValue::Null => None,
            CellValue::Boolean(_) => Some(ValueType::Boolean),
            CellValue::Integer(_) => Some(ValueType::Integer),
            CellValue::Float(_) => Some(ValueType::Float),
            CellValue::Text(_) => Some(ValueType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Float(x) => write!(f, "{:?}", x),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Tabular query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, in row order
    pub fn column_values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a CellValue>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().filter_map(move |row| row.get(index)))
    }

    /// First cell of the first row, for scalar queries
    pub fn scalar(&self) -> Option<&CellValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Trait for warehouse clients
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Fetch table metadata; `WarehouseError::NotFound` when absent
    async fn get_table(&self, id: &TableId) -> Result<TableMetadata, WarehouseError>;

    /// Create a table with the contract's columns
    ///
    /// Fails with `WarehouseError::AlreadyExists` if the table exists.
    async fn create_table(
        &self,
        id: &TableId,
        schema: &SchemaContract,
    ) -> Result<TableMetadata, WarehouseError>;

    /// Submit an asynchronous load of a staged file into a table
    async fn load_from_uri(
        &self,
        source: &StagedFile,
        id: &TableId,
        config: &LoadJobConfig,
    ) -> Result<LoadJob, WarehouseError>;

    /// Run a query and collect its rows
    async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError>;

    /// Table reference usable in this backend's SQL
    fn qualified_name(&self, id: &TableId) -> String {
        format!("`{}`", id)
    }
}
