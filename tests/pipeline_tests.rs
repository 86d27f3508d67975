//! End-to-end pipeline tests against the in-memory backends

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use retail_ingest::contract::TableColumn;
use retail_ingest::load::DedupStrategy;
use retail_ingest::pipeline::{
    Checkpoint, PipelineConfig, PipelineError, PipelineExecutor, PipelineStage, PipelineStatus,
    StageResult,
};
use retail_ingest::storage::{InMemoryObjectStore, ObjectStore};
use retail_ingest::transform::{TransformContext, TransformError, TransformOutcome, TransformTrigger};
use retail_ingest::validation::{ValidationError, ValidationPolicy};
use retail_ingest::warehouse::{CellValue, InMemoryWarehouse, TableId, Warehouse, WarehouseError};
use tempfile::TempDir;

const HEADER: &str =
    "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country\n";

const ROWS: &str = "\
536365,71053,WHITE METAL LANTERN,6,2010-12-01 08:26,3.39,17850.0,United Kingdom
536365,84406B,CREAM CUPID HEARTS COAT HANGER,8,2010-12-01 08:26,2.75,17850.0,United Kingdom
536366,22633,HAND WARMER UNION JACK,6,2010-12-01 08:28,1.85,,United Kingdom
";

fn table() -> TableId {
    TableId::parse("airflow-retail-data-pipeline.retail.invoice_data").unwrap()
}

fn write_source(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("Online_Retail.csv");
    std::fs::write(&path, format!("{HEADER}{content}")).unwrap();
    path
}

fn backends() -> (Arc<dyn ObjectStore>, Arc<InMemoryWarehouse>) {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let warehouse = Arc::new(InMemoryWarehouse::new(store.clone()));
    (store, warehouse)
}

fn config(source: PathBuf) -> PipelineConfig {
    PipelineConfig::new()
        .with_name("retail")
        .with_source_file(source)
        .with_bucket("online_retail_data_storage")
        .with_destination(table())
}

async fn row_count(warehouse: &InMemoryWarehouse) -> i64 {
    let rs = warehouse
        .query("SELECT COUNT(*) FROM `airflow-retail-data-pipeline.retail.invoice_data`")
        .await
        .unwrap();
    match rs.scalar() {
        Some(CellValue::Integer(n)) => *n,
        other => panic!("unexpected count: {other:?}"),
    }
}

/// Trigger recording every context it receives
#[derive(Clone, Default)]
struct RecordingTrigger {
    calls: Arc<Mutex<Vec<TransformContext>>>,
}

impl RecordingTrigger {
    fn calls(&self) -> Vec<TransformContext> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransformTrigger for RecordingTrigger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn trigger(&self, context: &TransformContext) -> Result<TransformOutcome, TransformError> {
        self.calls.lock().unwrap().push(context.clone());
        Ok(TransformOutcome { exit_code: 0 })
    }
}

mod end_to_end_tests {
    use super::*;

    #[tokio::test]
    async fn test_single_run_loads_every_data_row() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let trigger = RecordingTrigger::default();

        let mut executor =
            PipelineExecutor::new(config(write_source(temp.path(), ROWS)), store, warehouse.clone())
                .unwrap()
                .with_transform(Box::new(trigger.clone()));
        let report = executor.run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.rows_loaded(), Some(3));
        assert_eq!(row_count(&warehouse).await, 3);
        assert_eq!(warehouse.create_table_calls(), 1);

        let calls = trigger.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].validation_passed, Some(true));
        assert_eq!(calls[0].table, table().to_string());
    }

    #[tokio::test]
    async fn test_lantern_row_keeps_declared_types() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let source = write_source(
            temp.path(),
            "536365,71053,WHITE METAL LANTERN,6,2010-12-01 08:26,3.39,17850.0,United Kingdom\n",
        );

        let mut executor = PipelineExecutor::new(config(source), store, warehouse.clone()).unwrap();
        let report = executor.run().await.unwrap();

        let rs = warehouse
            .query("SELECT * FROM `airflow-retail-data-pipeline.retail.invoice_data`")
            .await
            .unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(
            rs.rows[0],
            vec![
                CellValue::Text("536365".to_string()),
                CellValue::Text("71053".to_string()),
                CellValue::Text("WHITE METAL LANTERN".to_string()),
                CellValue::Integer(6),
                CellValue::Text("2010-12-01 08:26".to_string()),
                CellValue::Float(3.39),
                CellValue::Float(17850.0),
                CellValue::Text("United Kingdom".to_string()),
            ]
        );

        let validation = report.validation.unwrap();
        assert!(validation.passed);
        assert_eq!(validation.columns.len(), 8);
        assert!(validation.columns.iter().all(|c| c.matches));
    }

    #[tokio::test]
    async fn test_empty_customer_id_loads_as_null() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let source = write_source(
            temp.path(),
            "536366,22633,HAND WARMER UNION JACK,6,2010-12-01 08:28,1.85,,United Kingdom\n",
        );

        let mut executor = PipelineExecutor::new(config(source), store, warehouse.clone()).unwrap();
        executor.run().await.unwrap();

        let rs = warehouse
            .query("SELECT * FROM `airflow-retail-data-pipeline.retail.invoice_data`")
            .await
            .unwrap();
        let customer_ids: Vec<&CellValue> = rs.column_values("CustomerID").unwrap().collect();
        assert_eq!(customer_ids, vec![&CellValue::Null]);
    }

    #[tokio::test]
    async fn test_rerun_doubles_row_count() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let source = write_source(temp.path(), ROWS);

        for _ in 0..2 {
            let mut executor =
                PipelineExecutor::new(config(source.clone()), store.clone(), warehouse.clone())
                    .unwrap();
            executor.run().await.unwrap();
        }

        assert_eq!(row_count(&warehouse).await, 6);
        assert_eq!(warehouse.create_table_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_row_fails_load_and_appends_nothing() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let source = write_source(
            temp.path(),
            &format!("{ROWS}536367,22745,POPPY'S PLAYHOUSE,six,2010-12-01 08:34,2.10,13047.0,United Kingdom\n"),
        );
        let trigger = RecordingTrigger::default();

        let mut executor = PipelineExecutor::new(config(source), store, warehouse.clone())
            .unwrap()
            .with_transform(Box::new(trigger.clone()));
        let err = executor.run().await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Warehouse(WarehouseError::MalformedInput { .. })
        ));
        assert_eq!(row_count(&warehouse).await, 0);
        assert!(trigger.calls().is_empty());
        assert_eq!(executor.checkpoint().status, PipelineStatus::Failed);
        assert_eq!(executor.checkpoint().failed_stage(), Some(PipelineStage::Load));
        assert!(!executor.checkpoint().is_stage_completed(PipelineStage::Validate));
    }

    #[tokio::test]
    async fn test_bad_records_within_tolerance_are_dropped() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let source = write_source(
            temp.path(),
            &format!("{ROWS}536367,22745,POPPY'S PLAYHOUSE,six,2010-12-01 08:34,2.10,13047.0,United Kingdom\n"),
        );

        let mut executor = PipelineExecutor::new(
            config(source).with_max_bad_records(1),
            store,
            warehouse.clone(),
        )
        .unwrap();
        let report = executor.run().await.unwrap();

        assert_eq!(report.rows_loaded(), Some(3));
        assert!(matches!(
            report.stage(PipelineStage::Load).unwrap().result,
            StageResult::Loaded { bad_records: 1, .. }
        ));
    }
}

mod validation_policy_tests {
    use super::*;

    /// Destination whose Quantity column holds text
    fn drifted_warehouse() -> (Arc<dyn ObjectStore>, Arc<InMemoryWarehouse>) {
        let (store, warehouse) = backends();
        let mut columns: Vec<TableColumn> =
            retail_ingest::SchemaContract::retail().table_columns();
        columns[3].data_type = "STRING".to_string();
        let row = vec![
            CellValue::Text("536365".to_string()),
            CellValue::Text("71053".to_string()),
            CellValue::Text("WHITE METAL LANTERN".to_string()),
            CellValue::Text("6".to_string()),
            CellValue::Text("2010-12-01 08:26".to_string()),
            CellValue::Float(3.39),
            CellValue::Float(17850.0),
            CellValue::Text("United Kingdom".to_string()),
        ];
        warehouse
            .create_raw_table(&table(), columns, vec![row])
            .unwrap();
        (store, warehouse)
    }

    fn validate_only() -> PipelineConfig {
        PipelineConfig::new()
            .with_destination(table())
            .with_stages(vec![PipelineStage::Validate, PipelineStage::Transform])
    }

    #[tokio::test]
    async fn test_warn_policy_reports_and_still_triggers() {
        let (store, warehouse) = drifted_warehouse();
        let trigger = RecordingTrigger::default();

        let mut executor = PipelineExecutor::new(validate_only(), store, warehouse)
            .unwrap()
            .with_transform(Box::new(trigger.clone()));
        let report = executor.run().await.unwrap();

        let validation = report.validation.unwrap();
        assert!(!validation.passed);
        let quantity = validation
            .columns
            .iter()
            .find(|c| c.column == "Quantity")
            .unwrap();
        assert!(!quantity.matches);
        assert_eq!(quantity.actual_name(), "string");
        assert_eq!(validation.mismatch_count(), 1);

        let calls = trigger.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].validation_passed, Some(false));
    }

    #[tokio::test]
    async fn test_abort_policy_stops_before_transform() {
        let (store, warehouse) = drifted_warehouse();
        let trigger = RecordingTrigger::default();

        let mut executor = PipelineExecutor::new(
            validate_only().with_validation_policy(ValidationPolicy::Abort),
            store,
            warehouse,
        )
        .unwrap()
        .with_transform(Box::new(trigger.clone()));
        let err = executor.run().await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::Failed { .. })
        ));
        assert!(trigger.calls().is_empty());
        assert!(!executor.validation_report().unwrap().passed);
    }

    #[tokio::test]
    async fn test_empty_table_fails_validation() {
        let (store, warehouse) = backends();
        warehouse
            .create_table(&table(), retail_ingest::SchemaContract::retail())
            .await
            .unwrap();

        let mut executor = PipelineExecutor::new(validate_only(), store, warehouse).unwrap();
        let err = executor.run().await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::EmptyTable(_))
        ));
    }
}

mod dedup_tests {
    use super::*;

    #[tokio::test]
    async fn test_content_dedup_skips_second_load() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let source = write_source(temp.path(), ROWS);
        let ledger = temp.path().join("state").join("ledger.json");

        let mut reports = Vec::new();
        for _ in 0..2 {
            let config =
                config(source.clone()).with_dedup(DedupStrategy::ByContent, ledger.clone());
            let mut executor =
                PipelineExecutor::new(config, store.clone(), warehouse.clone()).unwrap();
            reports.push(executor.run().await.unwrap());
        }

        assert_eq!(row_count(&warehouse).await, 3);
        assert!(!reports[0].was_skipped(PipelineStage::Load));
        assert!(reports[1].was_skipped(PipelineStage::Load));
        assert_eq!(reports[1].rows_loaded(), Some(0));
        assert!(ledger.exists());
    }

    #[tokio::test]
    async fn test_changed_content_is_loaded_again() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let ledger = temp.path().join("ledger.json");

        let first = write_source(temp.path(), ROWS);
        let mut executor = PipelineExecutor::new(
            config(first).with_dedup(DedupStrategy::ByContent, &ledger),
            store.clone(),
            warehouse.clone(),
        )
        .unwrap();
        executor.run().await.unwrap();

        let second = write_source(
            temp.path(),
            "536370,22728,ALARM CLOCK BAKELIKE PINK,24,2010-12-01 08:45,3.75,12583.0,France\n",
        );
        let mut executor = PipelineExecutor::new(
            config(second).with_dedup(DedupStrategy::ByContent, &ledger),
            store,
            warehouse.clone(),
        )
        .unwrap();
        executor.run().await.unwrap();

        assert_eq!(row_count(&warehouse).await, 4);
    }
}

mod resume_tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_skips_completed_stages() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let checkpoint = temp.path().join("retail.checkpoint.json");

        // First attempt loads and validates, then the transform fails
        let source = write_source(temp.path(), ROWS);
        let base = config(source).with_checkpoint_path(&checkpoint);

        let mut failing = PipelineExecutor::new(base.clone(), store.clone(), warehouse.clone())
            .unwrap()
            .with_transform(Box::new(FailingTrigger));
        assert!(failing.run().await.is_err());
        let saved = Checkpoint::load(&checkpoint).unwrap();
        assert_eq!(saved.status, PipelineStatus::Failed);
        assert!(saved.is_stage_completed(PipelineStage::Load));

        let mut resumed =
            PipelineExecutor::new(base.with_resume(true), store, warehouse.clone())
                .unwrap()
                .with_transform(Box::new(RecordingTrigger::default()));
        assert_eq!(resumed.checkpoint().run_id, saved.run_id);
        let report = resumed.run().await.unwrap();

        assert!(report.is_success());
        // Rows from the failed attempt only, no second load on resume
        assert_eq!(row_count(&warehouse).await, 3);
        assert_eq!(warehouse.create_table_calls(), 1);
    }

    #[tokio::test]
    async fn test_resume_refuses_changed_config() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let checkpoint = temp.path().join("retail.checkpoint.json");
        Checkpoint::new("run-1", "stale-hash").save(&checkpoint).unwrap();

        let config = config(write_source(temp.path(), ROWS))
            .with_checkpoint_path(&checkpoint)
            .with_resume(true);
        let result = PipelineExecutor::new(config, store, warehouse);

        assert!(matches!(result, Err(PipelineError::ResumeError(_))));
    }

    #[tokio::test]
    async fn test_resume_refuses_changed_load_and_validation_settings() {
        let temp = TempDir::new().unwrap();
        let (store, warehouse) = backends();
        let checkpoint = temp.path().join("retail.checkpoint.json");
        let base = config(write_source(temp.path(), ROWS)).with_checkpoint_path(&checkpoint);

        let mut failing = PipelineExecutor::new(base.clone(), store.clone(), warehouse.clone())
            .unwrap()
            .with_transform(Box::new(FailingTrigger));
        assert!(failing.run().await.is_err());

        let changed = [
            base.clone()
                .with_validation_policy(ValidationPolicy::Abort)
                .with_resume(true),
            base.clone().with_max_bad_records(50).with_resume(true),
        ];
        for config in changed {
            let result = PipelineExecutor::new(config, store.clone(), warehouse.clone());
            assert!(matches!(result, Err(PipelineError::ResumeError(_))));
        }

        // Invocation flags alone still resume
        let resumed = PipelineExecutor::new(
            base.with_verbose(true).with_resume(true),
            store,
            warehouse,
        )
        .unwrap();
        assert_eq!(
            resumed.checkpoint().run_id,
            Checkpoint::load(&checkpoint).unwrap().run_id
        );
    }

    struct FailingTrigger;

    #[async_trait]
    impl TransformTrigger for FailingTrigger {
        fn name(&self) -> &str {
            "failing"
        }

        async fn trigger(
            &self,
            _context: &TransformContext,
        ) -> Result<TransformOutcome, TransformError> {
            Err(TransformError::Failed {
                code: Some(1),
                stderr: "dbt run failed".to_string(),
            })
        }
    }
}
