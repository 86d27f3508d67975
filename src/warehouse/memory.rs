//! In-memory warehouse
//!
//! Holds tables in a process-local map. Load jobs read staged objects from
//! the configured object store. Queries support `SELECT * FROM <table>
//! [LIMIT n]` and `SELECT COUNT(*) FROM <table>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::decode::decode_csv;
use super::{
    CellValue, LoadJob, LoadJobConfig, LoadStats, ResultSet, TableId, TableMetadata, Warehouse,
    WarehouseError,
};
use crate::contract::{SchemaContract, TableColumn};
use crate::storage::{ObjectStore, StagedFile};

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*SELECT\s+(\*|COUNT\s*\(\s*\*\s*\))\s+FROM\s+`?([A-Za-z0-9_.\-]+)`?\s*(?:LIMIT\s+(\d+))?\s*;?\s*$",
    )
    .expect("valid select regex")
});

struct MemTable {
    columns: Vec<TableColumn>,
    rows: Vec<Vec<CellValue>>,
    created_at: DateTime<Utc>,
}

type Tables = Arc<Mutex<HashMap<TableId, MemTable>>>;

/// Warehouse keeping tables in memory
pub struct InMemoryWarehouse {
    tables: Tables,
    store: Arc<dyn ObjectStore>,
    create_calls: AtomicUsize,
}

impl InMemoryWarehouse {
    /// Create an empty warehouse reading staged files from `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            store,
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `create_table` calls received, successful or not
    pub fn create_table_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Create a table with arbitrary physical columns, bypassing the contract
    pub fn create_raw_table(
        &self,
        id: &TableId,
        columns: Vec<TableColumn>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<(), WarehouseError> {
        let mut tables = lock(&self.tables)?;
        tables.insert(
            id.clone(),
            MemTable {
                columns,
                rows,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }
}

fn lock(tables: &Tables) -> Result<MutexGuard<'_, HashMap<TableId, MemTable>>, WarehouseError> {
    tables
        .lock()
        .map_err(|_| WarehouseError::Backend("table map lock poisoned".to_string()))
}

fn metadata(id: &TableId, table: &MemTable) -> TableMetadata {
    TableMetadata {
        id: id.clone(),
        columns: table.columns.clone(),
        num_rows: table.rows.len() as u64,
        created_at: Some(table.created_at),
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn get_table(&self, id: &TableId) -> Result<TableMetadata, WarehouseError> {
        let tables = lock(&self.tables)?;
        tables
            .get(id)
            .map(|table| metadata(id, table))
            .ok_or_else(|| WarehouseError::NotFound(id.to_string()))
    }

    async fn create_table(
        &self,
        id: &TableId,
        schema: &SchemaContract,
    ) -> Result<TableMetadata, WarehouseError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut tables = lock(&self.tables)?;
        if tables.contains_key(id) {
            return Err(WarehouseError::AlreadyExists(id.to_string()));
        }

        let table = MemTable {
            columns: schema.table_columns(),
            rows: Vec::new(),
            created_at: Utc::now(),
        };
        let meta = metadata(id, &table);
        tables.insert(id.clone(), table);
        debug!(table = %id, columns = schema.len(), "Created in-memory table");
        Ok(meta)
    }

    async fn load_from_uri(
        &self,
        source: &StagedFile,
        id: &TableId,
        config: &LoadJobConfig,
    ) -> Result<LoadJob, WarehouseError> {
        if source.scheme != self.store.scheme() {
            return Err(WarehouseError::SourceNotAccessible {
                uri: source.uri(),
                reason: format!("store serves {}:// objects", self.store.scheme()),
            });
        }
        if !lock(&self.tables)?.contains_key(id) {
            return Err(WarehouseError::NotFound(id.to_string()));
        }

        let tables = Arc::clone(&self.tables);
        let store = Arc::clone(&self.store);
        let source = source.clone();
        let destination = id.clone();
        let config = config.clone();
        let uri = source.uri();

        Ok(LoadJob::spawn(id.clone(), uri.clone(), async move {
            let bytes = store
                .download(&source.bucket, &source.path)
                .await
                .map_err(|e| WarehouseError::from_storage(&uri, e))?;
            let decoded = decode_csv(&bytes, &uri, &config)?;

            let mut tables = lock(&tables)?;
            let table = tables
                .get_mut(&destination)
                .ok_or_else(|| WarehouseError::NotFound(destination.to_string()))?;

            let rows_loaded = decoded.rows.len() as u64;
            table.rows.extend(decoded.rows);
            info!(table = %destination, rows_loaded, "Appended rows");

            Ok(LoadStats {
                rows_loaded,
                bad_records: decoded.bad_records,
                bytes_read: decoded.bytes_read,
            })
        }))
    }

    async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        let captures = SELECT_RE.captures(sql).ok_or_else(|| {
            WarehouseError::Query(format!("unsupported statement for in-memory warehouse: {sql}"))
        })?;

        let id = TableId::parse(&captures[2])?;
        let limit = match captures.get(3) {
            Some(m) => Some(
                m.as_str()
                    .parse::<usize>()
                    .map_err(|e| WarehouseError::Query(format!("invalid LIMIT: {e}")))?,
            ),
            None => None,
        };

        let tables = lock(&self.tables)?;
        let table = tables
            .get(&id)
            .ok_or_else(|| WarehouseError::NotFound(id.to_string()))?;

        if captures[1].starts_with('*') {
            let columns = table.columns.iter().map(|c| c.name.clone()).collect();
            let take = limit.unwrap_or(table.rows.len());
            let rows = table.rows.iter().take(take).cloned().collect();
            Ok(ResultSet::new(columns, rows))
        } else {
            Ok(ResultSet::new(
                vec!["count".to_string()],
                vec![vec![CellValue::Integer(table.rows.len() as i64)]],
            ))
        }
    }
}
