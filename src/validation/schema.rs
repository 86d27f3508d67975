//! Schema validator
//!
//! Types are inferred from the values actually stored, the way a dataframe
//! library would when reading the table back. Comparison is exact tag
//! equality: a column of numeric-looking strings is still a string column.

use tracing::{Instrument, info, info_span, warn};

use super::{ColumnCheck, ValidationError, ValidationReport};
use crate::contract::{ColumnSpec, SchemaContract, ValueType};
use crate::warehouse::{CellValue, ResultSet, TableId, Warehouse};

/// Compares a loaded table with its schema contract
pub struct SchemaValidator<'a> {
    warehouse: &'a dyn Warehouse,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self { warehouse }
    }

    /// Read the full table and check every contract column
    ///
    /// Mismatches are reported, not raised. Fails when the table cannot be
    /// read or holds no rows.
    pub async fn validate(
        &self,
        id: &TableId,
        contract: &SchemaContract,
    ) -> Result<ValidationReport, ValidationError> {
        let span = info_span!("schema_validation", table = %id, contract = contract.name());
        self.read_and_check(id, contract).instrument(span).await
    }

    async fn read_and_check(
        &self,
        id: &TableId,
        contract: &SchemaContract,
    ) -> Result<ValidationReport, ValidationError> {
        let sql = format!("SELECT * FROM {}", self.warehouse.qualified_name(id));
        let result = self.warehouse.query(&sql).await?;
        if result.is_empty() {
            warn!(table = %id, "Cannot validate an empty table");
            return Err(ValidationError::EmptyTable(id.to_string()));
        }

        let report = check_result_set(&id.to_string(), contract, &result);
        log_report(&report);
        Ok(report)
    }
}

fn log_report(report: &ValidationReport) {
    for check in &report.columns {
        if check.matches {
            info!(
                column = %check.column,
                expected = %check.expected,
                actual = %check.actual_name(),
                "Column type matches"
            );
        } else {
            warn!(
                column = %check.column,
                expected = %check.expected,
                actual = %check.actual_name(),
                "Column type mismatch"
            );
        }
    }

    if report.passed {
        info!(
            table = %report.table,
            rows = report.rows_inspected,
            columns = report.columns.len(),
            "Schema validation passed"
        );
    } else {
        warn!(
            table = %report.table,
            rows = report.rows_inspected,
            mismatches = report.mismatch_count(),
            "Schema validation failed"
        );
    }
}

/// Build a report from rows already read back
pub fn check_result_set(
    table: &str,
    contract: &SchemaContract,
    result: &ResultSet,
) -> ValidationReport {
    let columns = contract
        .columns()
        .iter()
        .map(|spec| check_column(spec, result))
        .collect();

    ValidationReport::new(table, contract.name(), result.len() as u64, columns)
}

fn check_column(spec: &ColumnSpec, result: &ResultSet) -> ColumnCheck {
    let expected = spec.semantic_type.value_type();
    let actual = result.column_values(&spec.name).map(infer_column_type);

    let matches = match actual {
        Some(actual) if actual == expected => true,
        // A nullable column holding only nulls carries no contrary evidence
        Some(ValueType::Null) => spec.semantic_type.is_nullable(),
        _ => false,
    };

    ColumnCheck {
        column: spec.name.clone(),
        expected,
        actual,
        matches,
    }
}

/// Infer a single type tag for a column's values
///
/// Nulls are ignored. Any two differing non-null tags make the column
/// `Mixed`, integers next to floats included. A column with no non-null
/// values is `Null`.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a CellValue>) -> ValueType {
    let mut inferred: Option<ValueType> = None;

    for value in values {
        let Some(current) = value.value_type() else {
            continue;
        };
        inferred = Some(match (inferred, current) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            _ => return ValueType::Mixed,
        });
    }

    inferred.unwrap_or(ValueType::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SemanticType;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(
            infer_column_type(&[CellValue::Integer(1), CellValue::Integer(2)]),
            ValueType::Integer
        );
        assert_eq!(
            infer_column_type(&[CellValue::Integer(1), CellValue::Float(2.5)]),
            ValueType::Mixed
        );
        assert_eq!(
            infer_column_type(&[CellValue::Float(1.0), CellValue::Null]),
            ValueType::Float
        );
        assert_eq!(
            infer_column_type(&[CellValue::Null, CellValue::Null]),
            ValueType::Null
        );
        assert_eq!(
            infer_column_type(&[text("6"), CellValue::Integer(6)]),
            ValueType::Mixed
        );
        assert_eq!(infer_column_type(std::iter::empty()), ValueType::Null);
    }

    #[test]
    fn test_numeric_strings_do_not_match_integer() {
        let contract = SchemaContract::new(
            "t",
            vec![ColumnSpec::new("Quantity", SemanticType::Integer)],
        )
        .unwrap();
        let rs = ResultSet::new(vec!["Quantity".to_string()], vec![vec![text("6")]]);

        let report = check_result_set("p.d.t", &contract, &rs);
        assert!(!report.passed);
        assert_eq!(report.columns[0].actual, Some(ValueType::String));
    }

    #[test]
    fn test_integer_cells_in_float_column_do_not_match() {
        let contract = SchemaContract::new(
            "t",
            vec![ColumnSpec::new("UnitPrice", SemanticType::Float)],
        )
        .unwrap();
        let rs = ResultSet::new(
            vec!["UnitPrice".to_string()],
            vec![vec![CellValue::Integer(3)], vec![CellValue::Float(1.5)]],
        );

        let report = check_result_set("p.d.t", &contract, &rs);
        assert_eq!(report.columns[0].actual, Some(ValueType::Mixed));
        assert!(!report.columns[0].matches);
        assert!(!report.passed);
    }

    #[test]
    fn test_all_null_nullable_float_matches() {
        let contract = SchemaContract::new(
            "t",
            vec![
                ColumnSpec::new("CustomerID", SemanticType::NullableFloat),
                ColumnSpec::new("UnitPrice", SemanticType::Float),
            ],
        )
        .unwrap();
        let rs = ResultSet::new(
            vec!["CustomerID".to_string(), "UnitPrice".to_string()],
            vec![vec![CellValue::Null, CellValue::Null]],
        );

        let report = check_result_set("p.d.t", &contract, &rs);
        assert!(report.columns[0].matches);
        assert!(!report.columns[1].matches);
    }

    #[test]
    fn test_missing_column_is_mismatch() {
        let contract = SchemaContract::new(
            "t",
            vec![ColumnSpec::new("Country", SemanticType::String)],
        )
        .unwrap();
        let rs = ResultSet::new(vec!["country".to_string()], vec![vec![text("UK")]]);

        let report = check_result_set("p.d.t", &contract, &rs);
        assert_eq!(report.columns[0].actual, None);
        assert!(!report.passed);
    }
}
