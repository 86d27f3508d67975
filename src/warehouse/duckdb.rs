//! DuckDB warehouse
//!
//! Embedded analytical database backend. A `TableId` maps to schema
//! `<dataset>` and table `<table>`; the project part only namespaces the
//! database file and is not stored.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::types::{ToSqlOutput, Value};
use ::duckdb::{Connection, ToSql, params_from_iter};
use async_trait::async_trait;
use tracing::{debug, info};

use super::decode::decode_csv;
use super::{
    CellValue, LoadJob, LoadJobConfig, LoadStats, ResultSet, TableId, TableMetadata, Warehouse,
    WarehouseError,
};
use crate::contract::{SchemaContract, SemanticType, TableColumn};
use crate::storage::{ObjectStore, StagedFile};

type SharedConnection = Arc<Mutex<Connection>>;

/// Warehouse backed by an embedded DuckDB database
pub struct DuckDbWarehouse {
    conn: SharedConnection,
    store: Arc<dyn ObjectStore>,
    path: Option<PathBuf>,
}

impl DuckDbWarehouse {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>, store: Arc<dyn ObjectStore>) -> Result<Self, WarehouseError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            store,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database
    pub fn memory(store: Arc<dyn ObjectStore>) -> Result<Self, WarehouseError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            store,
            path: None,
        })
    }

    /// Database file, `None` when in-memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run blocking database work off the async runtime
    async fn with_conn<T, F>(&self, work: F) -> Result<T, WarehouseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, WarehouseError> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), work).await
    }
}

async fn run_blocking<T, F>(conn: SharedConnection, work: F) -> Result<T, WarehouseError>
where
    F: FnOnce(&mut Connection) -> Result<T, WarehouseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = lock(&conn)?;
        work(&mut guard)
    })
    .await
    .map_err(|e| WarehouseError::Backend(format!("database task failed: {e}")))?
}

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, WarehouseError> {
    conn.lock()
        .map_err(|_| WarehouseError::Backend("connection lock poisoned".to_string()))
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn table_ref(id: &TableId) -> String {
    format!("{}.{}", quote(&id.dataset), quote(&id.table))
}

fn column_ddl(name: &str, semantic_type: SemanticType) -> String {
    let sql_type = match semantic_type {
        SemanticType::String => "VARCHAR",
        SemanticType::Integer => "BIGINT NOT NULL",
        SemanticType::Float => "DOUBLE NOT NULL",
        SemanticType::NullableFloat => "DOUBLE",
    };
    format!("{} {}", quote(name), sql_type)
}

/// Map a DuckDB type name back to the warehouse type tag
fn warehouse_type(duckdb_type: &str) -> String {
    match duckdb_type.to_ascii_uppercase().as_str() {
        "VARCHAR" => "STRING".to_string(),
        "BIGINT" => "INTEGER".to_string(),
        "DOUBLE" => "FLOAT".to_string(),
        other => other.to_string(),
    }
}

fn fetch_columns(conn: &Connection, id: &TableId) -> Result<Vec<TableColumn>, WarehouseError> {
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_schema = ?1 AND table_name = ?2 ORDER BY ordinal_position",
    )?;
    let rows = stmt.query_map([id.dataset.as_str(), id.table.as_str()], |row| {
        Ok(TableColumn {
            name: row.get::<_, String>(0)?,
            data_type: warehouse_type(&row.get::<_, String>(1)?),
            nullable: row.get::<_, String>(2)?.eq_ignore_ascii_case("YES"),
        })
    })?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

fn fetch_metadata(conn: &Connection, id: &TableId) -> Result<TableMetadata, WarehouseError> {
    let columns = fetch_columns(conn, id)?;
    if columns.is_empty() {
        return Err(WarehouseError::NotFound(id.to_string()));
    }

    let sql = format!("SELECT COUNT(*) FROM {}", table_ref(id));
    let num_rows: i64 = conn.query_row(&sql, [], |row| row.get(0))?;

    Ok(TableMetadata {
        id: id.clone(),
        columns,
        num_rows: num_rows.max(0) as u64,
        created_at: None,
    })
}

impl ToSql for CellValue {
    fn to_sql(&self) -> ::duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            CellValue::Null => Value::Null,
            CellValue::Boolean(b) => Value::Boolean(*b),
            CellValue::Integer(n) => Value::BigInt(*n),
            CellValue::Float(x) => Value::Double(*x),
            CellValue::Text(s) => Value::Text(s.clone()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn cell_from_value(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Boolean(b) => CellValue::Boolean(b),
        Value::TinyInt(n) => CellValue::Integer(n.into()),
        Value::SmallInt(n) => CellValue::Integer(n.into()),
        Value::Int(n) => CellValue::Integer(n.into()),
        Value::BigInt(n) => CellValue::Integer(n),
        Value::UTinyInt(n) => CellValue::Integer(n.into()),
        Value::USmallInt(n) => CellValue::Integer(n.into()),
        Value::UInt(n) => CellValue::Integer(n.into()),
        Value::Float(f) => CellValue::Float(f.into()),
        Value::Double(f) => CellValue::Float(f),
        Value::Text(s) => CellValue::Text(s),
        other => CellValue::Text(format!("{:?}", other)),
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    async fn get_table(&self, id: &TableId) -> Result<TableMetadata, WarehouseError> {
        let id = id.clone();
        self.with_conn(move |conn| fetch_metadata(conn, &id)).await
    }

    async fn create_table(
        &self,
        id: &TableId,
        schema: &SchemaContract,
    ) -> Result<TableMetadata, WarehouseError> {
        let id = id.clone();
        let columns: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| column_ddl(&c.name, c.semantic_type))
            .collect();

        self.with_conn(move |conn| {
            if !fetch_columns(conn, &id)?.is_empty() {
                return Err(WarehouseError::AlreadyExists(id.to_string()));
            }

            let ddl = format!(
                "CREATE SCHEMA IF NOT EXISTS {};\nCREATE TABLE {} ({});",
                quote(&id.dataset),
                table_ref(&id),
                columns.join(", ")
            );
            conn.execute_batch(&ddl)?;
            debug!(table = %id, "Created DuckDB table");
            fetch_metadata(conn, &id)
        })
        .await
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

        let check = id.clone();
        self.with_conn(move |conn| {
            if fetch_columns(conn, &check)?.is_empty() {
                Err(WarehouseError::NotFound(check.to_string()))
            } else {
                Ok(())
            }
        })
        .await?;

        let conn = Arc::clone(&self.conn);
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

            run_blocking(conn, move |conn| {
                let decoded = decode_csv(&bytes, &uri, &config)?;
                let placeholders = vec!["?"; config.schema.len()].join(", ");
                let insert = format!(
                    "INSERT INTO {} VALUES ({})",
                    table_ref(&destination),
                    placeholders
                );

                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(&insert)?;
                    for row in &decoded.rows {
                        stmt.execute(params_from_iter(row.iter()))?;
                    }
                }
                tx.commit()?;

                let rows_loaded = decoded.rows.len() as u64;
                info!(table = %destination, rows_loaded, "Appended rows");
                Ok(LoadStats {
                    rows_loaded,
                    bad_records: decoded.bad_records,
                    bytes_read: decoded.bytes_read,
                })
            })
            .await
        }))
    }

    async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| WarehouseError::Query(e.to_string()))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| WarehouseError::Query(e.to_string()))?;

            let column_count = rows.as_ref().map(|s| s.column_count()).unwrap_or(0);
            let columns: Vec<String> = (0..column_count)
                .map(|i| {
                    rows.as_ref()
                        .and_then(|s| s.column_name(i).ok())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("col{}", i))
                })
                .collect();

            let mut result = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value: Value = row.get(i)?;
                    cells.push(cell_from_value(value));
                }
                result.push(cells);
            }

            Ok(ResultSet::new(columns, result))
        })
        .await
    }

    fn qualified_name(&self, id: &TableId) -> String {
        table_ref(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;

    const CSV: &str = "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country\n\
        536365,71053,WHITE METAL LANTERN,6,2010-12-01 08:26,3.39,17850.0,United Kingdom\n\
        536365,22752,SET 7 BABUSHKA NESTING BOXES,2,2010-12-01 08:26,7.65,,United Kingdom\n";

    fn setup() -> (Arc<InMemoryObjectStore>, DuckDbWarehouse, TableId) {
        let store = Arc::new(InMemoryObjectStore::new());
        let warehouse = DuckDbWarehouse::memory(store.clone()).unwrap();
        let id = TableId::parse("proj.retail.invoice_data").unwrap();
        (store, warehouse, id)
    }

    #[test]
    fn test_quote_identifiers() {
        assert_eq!(quote("Quantity"), "\"Quantity\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
        let id = TableId::parse("p.retail.invoice_data").unwrap();
        assert_eq!(table_ref(&id), "\"retail\".\"invoice_data\"");
    }

    #[tokio::test]
    async fn test_create_matches_contract() {
        let (_, warehouse, id) = setup();
        let contract = SchemaContract::retail();

        assert!(warehouse.get_table(&id).await.unwrap_err().is_not_found());
        let meta = warehouse.create_table(&id, contract).await.unwrap();
        assert!(contract.diff(&meta.columns).is_empty());

        let err = warehouse.create_table(&id, contract).await.unwrap_err();
        assert!(matches!(err, WarehouseError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_load_and_query() {
        let (store, warehouse, id) = setup();
        let contract = SchemaContract::retail();
        warehouse.create_table(&id, contract).await.unwrap();

        let staged = store.put("bucket", "raw/Online_Retail.csv", CSV).unwrap();
        let config = LoadJobConfig::csv_append(contract.clone());
        let job = warehouse.load_from_uri(&staged, &id, &config).await.unwrap();
        assert_eq!(job.wait_until_done().await.unwrap().rows_loaded, 2);

        let sql = format!("SELECT * FROM {}", warehouse.qualified_name(&id));
        let rs = warehouse.query(&sql).await.unwrap();
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.rows[0][3], CellValue::Integer(6));
        assert_eq!(rs.rows[0][6], CellValue::Float(17850.0));
        assert_eq!(rs.rows[1][6], CellValue::Null);

        assert_eq!(warehouse.get_table(&id).await.unwrap().num_rows, 2);
    }

    #[tokio::test]
    async fn test_malformed_load_is_atomic() {
        let (store, warehouse, id) = setup();
        let contract = SchemaContract::retail();
        warehouse.create_table(&id, contract).await.unwrap();

        let bad = format!("{CSV}536366,22633,HAND WARMER,1.5,2010-12-01 08:28,1.85,,UK\n");
        let staged = store.put("bucket", "raw/bad.csv", bad).unwrap();
        let config = LoadJobConfig::csv_append(contract.clone());
        let job = warehouse.load_from_uri(&staged, &id, &config).await.unwrap();
        assert!(job.wait_until_done().await.is_err());
        assert_eq!(warehouse.get_table(&id).await.unwrap().num_rows, 0);
    }

    #[tokio::test]
    async fn test_bad_sql_is_query_error() {
        let (_, warehouse, _) = setup();
        let err = warehouse.query("SELEC nonsense").await.unwrap_err();
        assert!(matches!(err, WarehouseError::Query(_)));
    }
}
