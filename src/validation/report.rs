//! Validation report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ValidationError, ValidationPolicy};
use crate::contract::ValueType;

/// Outcome for one contract column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnCheck {
    pub column: String,
    pub expected: ValueType,
    /// Inferred runtime type; `None` when the column is absent from the table
    pub actual: Option<ValueType>,
    pub matches: bool,
}

impl ColumnCheck {
    /// Actual type for display, `missing` when absent
    pub fn actual_name(&self) -> String {
        self.actual
            .map(|t| t.to_string())
            .unwrap_or_else(|| "missing".to_string())
    }
}

impl std::fmt::Display for ColumnCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.matches { "ok" } else { "MISMATCH" };
        write!(
            f,
            "{}: expected {}, actual {} [{}]",
            self.column,
            self.expected,
            self.actual_name(),
            mark
        )
    }
}

/// Per-run validation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub table: String,
    pub contract: String,
    pub rows_inspected: u64,
    /// One entry per contract column, in contract order
    pub columns: Vec<ColumnCheck>,
    /// Logical AND of every column's match flag
    pub passed: bool,
    pub checked_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn new(
        table: impl Into<String>,
        contract: impl Into<String>,
        rows_inspected: u64,
        columns: Vec<ColumnCheck>,
    ) -> Self {
        let passed = columns.iter().all(|c| c.matches);
        Self {
            table: table.into(),
            contract: contract.into(),
            rows_inspected,
            columns,
            passed,
            checked_at: Utc::now(),
        }
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &ColumnCheck> {
        self.columns.iter().filter(|c| !c.matches)
    }

    pub fn mismatch_count(&self) -> usize {
        self.mismatches().count()
    }

    /// Apply a policy: `Abort` turns a failed report into an error
    pub fn enforce(&self, policy: ValidationPolicy) -> Result<(), ValidationError> {
        if self.passed || policy == ValidationPolicy::WarnOnly {
            return Ok(());
        }
        Err(ValidationError::Failed {
            table: self.table.clone(),
            mismatches: self.mismatches().map(|c| c.to_string()).collect(),
        })
    }
}
