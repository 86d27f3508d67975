//! Table provisioning
//!
//! Ensures the destination table exists before any load runs. A present table
//! is left alone; an absent one is created from the schema contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::contract::{ColumnDrift, SchemaContract, TableColumn};
use crate::warehouse::{TableId, Warehouse, WarehouseError};

/// Errors raised while provisioning a table
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Warehouse failure other than table-absent, passed through unmodified
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// Existing table differs from the contract
    #[error("Table {table} does not match contract '{contract}': {}", describe_drift(.drift))]
    SchemaDrift {
        table: String,
        contract: String,
        drift: Vec<ColumnDrift>,
    },
}

fn describe_drift(drift: &[ColumnDrift]) -> String {
    drift
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// What provisioning did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Table was already present, nothing created
    AlreadyExists,
    /// Table was created by this call
    Created,
}

impl ProvisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionOutcome::AlreadyExists => "already_exists",
            ProvisionOutcome::Created => "created",
        }
    }
}

impl std::fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Idempotent create-if-absent for destination tables
pub struct TableProvisioner<'a> {
    warehouse: &'a dyn Warehouse,
    verify_existing_schema: bool,
}

impl<'a> TableProvisioner<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self {
            warehouse,
            verify_existing_schema: false,
        }
    }

    /// Diff an existing table against the contract instead of trusting it
    pub fn with_schema_verification(mut self, verify: bool) -> Self {
        self.verify_existing_schema = verify;
        self
    }

    /// Make sure `id` exists with the contract's columns
    ///
    /// Issues at most one `create_table` call. Only the table-absent error
    /// class triggers creation; every other warehouse error is returned as is.
    pub async fn ensure_table(
        &self,
        id: &TableId,
        contract: &SchemaContract,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        match self.warehouse.get_table(id).await {
            Ok(metadata) => {
                info!(table = %id, rows = metadata.num_rows, "Table already exists");
                if self.verify_existing_schema {
                    self.check_drift(id, contract, &metadata.columns)?;
                }
                Ok(ProvisionOutcome::AlreadyExists)
            }
            Err(e) if e.is_not_found() => self.create(id, contract).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn create(
        &self,
        id: &TableId,
        contract: &SchemaContract,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        match self.warehouse.create_table(id, contract).await {
            Ok(metadata) => {
                info!(
                    table = %id,
                    contract = contract.name(),
                    columns = metadata.columns.len(),
                    "Created table"
                );
                Ok(ProvisionOutcome::Created)
            }
            // Lost the check-then-create race to a concurrent run
            Err(WarehouseError::AlreadyExists(_)) => {
                warn!(table = %id, "Table appeared between lookup and create");
                Ok(ProvisionOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_drift(
        &self,
        id: &TableId,
        contract: &SchemaContract,
        columns: &[TableColumn],
    ) -> Result<(), ProvisionError> {
        let drift = contract.diff(columns);
        if drift.is_empty() {
            return Ok(());
        }
        for d in &drift {
            warn!(table = %id, drift = %d, "Schema drift");
        }
        Err(ProvisionError::SchemaDrift {
            table: id.to_string(),
            contract: contract.name().to_string(),
            drift,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::contract::SemanticType;
    use crate::storage::{InMemoryObjectStore, StagedFile};
    use crate::warehouse::{
        CellValue, InMemoryWarehouse, LoadJob, LoadJobConfig, ResultSet, TableMetadata,
    };

    fn warehouse() -> InMemoryWarehouse {
        InMemoryWarehouse::new(Arc::new(InMemoryObjectStore::new()))
    }

    fn table() -> TableId {
        TableId::parse("proj.retail.invoice_data").unwrap()
    }

    #[tokio::test]
    async fn test_creates_missing_table_once() {
        let warehouse = warehouse();
        let provisioner = TableProvisioner::new(&warehouse);
        let contract = SchemaContract::retail();

        let first = provisioner.ensure_table(&table(), contract).await.unwrap();
        let second = provisioner.ensure_table(&table(), contract).await.unwrap();

        assert_eq!(first, ProvisionOutcome::Created);
        assert_eq!(second, ProvisionOutcome::AlreadyExists);
        assert_eq!(warehouse.create_table_calls(), 1);
    }

    #[tokio::test]
    async fn test_existing_table_not_verified_by_default() {
        let warehouse = warehouse();
        warehouse
            .create_raw_table(
                &table(),
                vec![TableColumn {
                    name: "whatever".to_string(),
                    data_type: "STRING".to_string(),
                    nullable: true,
                }],
                Vec::new(),
            )
            .unwrap();

        let outcome = TableProvisioner::new(&warehouse)
            .ensure_table(&table(), SchemaContract::retail())
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert_eq!(warehouse.create_table_calls(), 0);
    }

    #[tokio::test]
    async fn test_schema_drift_detected_when_enabled() {
        let warehouse = warehouse();
        let mut columns = SchemaContract::retail().table_columns();
        columns[3] = TableColumn {
            name: "Quantity".to_string(),
            data_type: SemanticType::String.warehouse_type().to_string(),
            nullable: true,
        };
        warehouse
            .create_raw_table(&table(), columns, Vec::new())
            .unwrap();

        let err = TableProvisioner::new(&warehouse)
            .with_schema_verification(true)
            .ensure_table(&table(), SchemaContract::retail())
            .await
            .unwrap_err();

        match err {
            ProvisionError::SchemaDrift { drift, .. } => {
                assert_eq!(drift.len(), 1);
                assert!(drift[0].to_string().contains("Quantity"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Warehouse whose lookups fail in a fixed way
    struct Failing {
        lookup: fn(&TableId) -> WarehouseError,
        create: Option<fn(&TableId) -> WarehouseError>,
    }

    #[async_trait]
    impl Warehouse for Failing {
        async fn get_table(&self, id: &TableId) -> Result<TableMetadata, WarehouseError> {
            Err((self.lookup)(id))
        }

        async fn create_table(
            &self,
            id: &TableId,
            schema: &SchemaContract,
        ) -> Result<TableMetadata, WarehouseError> {
            match self.create {
                Some(make) => Err(make(id)),
                None => Ok(TableMetadata {
                    id: id.clone(),
                    columns: schema.table_columns(),
                    num_rows: 0,
                    created_at: None,
                }),
            }
        }

        async fn load_from_uri(
            &self,
            _source: &StagedFile,
            _id: &TableId,
            _config: &LoadJobConfig,
        ) -> Result<LoadJob, WarehouseError> {
            Err(WarehouseError::Backend("unused".to_string()))
        }

        async fn query(&self, _sql: &str) -> Result<ResultSet, WarehouseError> {
            Ok(ResultSet::new(vec![], vec![vec![CellValue::Null]]))
        }
    }

    #[tokio::test]
    async fn test_other_errors_propagate_unmodified() {
        let warehouse = Failing {
            lookup: |_| WarehouseError::PermissionDenied("bigquery.tables.get".to_string()),
            create: None,
        };
        let err = TableProvisioner::new(&warehouse)
            .ensure_table(&table(), SchemaContract::retail())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Warehouse(WarehouseError::PermissionDenied(ref m)) if m == "bigquery.tables.get"
        ));
    }

    #[tokio::test]
    async fn test_create_race_is_success() {
        let warehouse = Failing {
            lookup: |id| WarehouseError::NotFound(id.to_string()),
            create: Some(|id| WarehouseError::AlreadyExists(id.to_string())),
        };
        let outcome = TableProvisioner::new(&warehouse)
            .ensure_table(&table(), SchemaContract::retail())
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let warehouse = Failing {
            lookup: |id| WarehouseError::NotFound(id.to_string()),
            create: Some(|_| WarehouseError::Transient("backend unavailable".to_string())),
        };
        let err = TableProvisioner::new(&warehouse)
            .ensure_table(&table(), SchemaContract::retail())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Warehouse(ref e) if e.is_transient()));
    }
}
