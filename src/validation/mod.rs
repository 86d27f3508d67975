//! Post-load schema validation
//!
//! Reads a loaded table back and compares each column's runtime type with the
//! schema contract:
//! - `report`: per-column checks and the aggregate verdict
//! - `schema`: the validator and the type inference it relies on

pub mod report;
pub mod schema;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::warehouse::WarehouseError;

pub use report::{ColumnCheck, ValidationReport};
pub use schema::{SchemaValidator, check_result_set, infer_column_type};

/// What a failed validation does to the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Report mismatches and carry on
    #[default]
    #[serde(rename = "warn")]
    WarnOnly,
    /// Stop the run before any downstream step
    Abort,
}

impl std::str::FromStr for ValidationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warn" | "warn-only" | "warn_only" => Ok(ValidationPolicy::WarnOnly),
            "abort" => Ok(ValidationPolicy::Abort),
            _ => Err(format!(
                "Invalid validation policy: {}. Expected: warn, abort",
                s
            )),
        }
    }
}

impl std::fmt::Display for ValidationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationPolicy::WarnOnly => write!(f, "warn"),
            ValidationPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Errors from schema validation
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Table unreadable
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// No rows to infer types from
    #[error("Table {0} is empty; column types cannot be inferred")]
    EmptyTable(String),

    /// Mismatches found under the abort policy
    #[error("Schema validation failed for {table}: {}", .mismatches.join(", "))]
    Failed {
        table: String,
        mismatches: Vec<String>,
    },
}
