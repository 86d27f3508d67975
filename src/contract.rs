//! Schema contract for ingested retail records
//!
//! A contract is an ordered list of column names and semantic types. Column
//! order defines the positional mapping to source CSV fields, so the same
//! contract drives table creation, load decoding and post-load validation.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when building a contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// Two columns share a name
    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    /// A column has an empty or whitespace-only name
    #[error("Column at position {0} has an empty name")]
    EmptyColumnName(usize),

    /// The contract has no columns
    #[error("Contract '{0}' declares no columns")]
    NoColumns(String),
}

/// Semantic type of a contract column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Free text, kept verbatim (empty cells stay empty strings)
    String,
    /// Whole number; fractional or empty cells are malformed
    Integer,
    /// Floating point; empty cells are malformed
    Float,
    /// Floating point where empty cells load as null
    NullableFloat,
}

impl SemanticType {
    /// Contract name of the type
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::NullableFloat => "nullable_float",
        }
    }

    /// Warehouse column type tag used when creating tables
    pub fn warehouse_type(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float | Self::NullableFloat => "FLOAT",
        }
    }

    /// Whether the physical column accepts nulls
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::String | Self::NullableFloat)
    }

    /// Runtime value type the loaded data must carry
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String => ValueType::String,
            Self::Integer => ValueType::Integer,
            Self::Float | Self::NullableFloat => ValueType::Float,
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SemanticType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "nullable_float" => Ok(Self::NullableFloat),
            _ => Err(format!(
                "Invalid semantic type: {}. Expected: string, integer, float, nullable_float",
                s
            )),
        }
    }
}

/// Type tag of a value as read back from the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    /// Every value in the column is null
    Null,
    /// Values of more than one incompatible type
    Mixed,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Mixed => "mixed",
        };
        write!(f, "{}", name)
    }
}

/// A single column in a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }

    /// Physical column this spec creates in the warehouse
    pub fn table_column(&self) -> TableColumn {
        TableColumn {
            name: self.name.clone(),
            data_type: self.semantic_type.warehouse_type().to_string(),
            nullable: self.semantic_type.is_nullable(),
        }
    }
}

/// Column as described by warehouse table metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    /// Warehouse type tag (STRING, INTEGER, FLOAT, or a backend-specific name)
    pub data_type: String,
    pub nullable: bool,
}

/// Difference between a contract and an existing table's columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnDrift {
    /// Contract column absent from the table
    Missing { name: String },
    /// Table column not declared by the contract
    Unexpected { name: String },
    /// Column present with another type or nullability
    TypeChanged {
        name: String,
        expected: String,
        actual: String,
    },
    /// Column present at another position
    Moved {
        name: String,
        expected: usize,
        actual: usize,
    },
}

impl std::fmt::Display for ColumnDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { name } => write!(f, "column '{}' is missing", name),
            Self::Unexpected { name } => write!(f, "column '{}' is not in the contract", name),
            Self::TypeChanged {
                name,
                expected,
                actual,
            } => write!(f, "column '{}' has type {}, expected {}", name, actual, expected),
            Self::Moved {
                name,
                expected,
                actual,
            } => write!(
                f,
                "column '{}' is at position {}, expected {}",
                name, actual, expected
            ),
        }
    }
}

/// Ordered, immutable column contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContractDef")]
pub struct SchemaContract {
    name: String,
    columns: Vec<ColumnSpec>,
}

/// Serialized form of a contract, checked on the way in
#[derive(Deserialize)]
struct ContractDef {
    name: String,
    columns: Vec<ColumnSpec>,
}

impl TryFrom<ContractDef> for SchemaContract {
    type Error = ContractError;

    fn try_from(def: ContractDef) -> Result<Self, Self::Error> {
        SchemaContract::new(def.name, def.columns)
    }
}

static RETAIL: Lazy<SchemaContract> = Lazy::new(|| SchemaContract {
    name: "retail_invoice".to_string(),
    columns: vec![
        ColumnSpec::new("InvoiceNo", SemanticType::String),
        ColumnSpec::new("StockCode", SemanticType::String),
        ColumnSpec::new("Description", SemanticType::String),
        ColumnSpec::new("Quantity", SemanticType::Integer),
        ColumnSpec::new("InvoiceDate", SemanticType::String),
        ColumnSpec::new("UnitPrice", SemanticType::Float),
        ColumnSpec::new("CustomerID", SemanticType::NullableFloat),
        ColumnSpec::new("Country", SemanticType::String),
    ],
});

impl SchemaContract {
    /// Build a contract, rejecting empty or duplicate column names
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, ContractError> {
        let name = name.into();
        if columns.is_empty() {
            return Err(ContractError::NoColumns(name));
        }

        let mut seen = HashSet::new();
        for (position, column) in columns.iter().enumerate() {
            if column.name.trim().is_empty() {
                return Err(ContractError::EmptyColumnName(position));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(ContractError::DuplicateColumn(column.name.clone()));
            }
        }

        Ok(Self { name, columns })
    }

    /// The online retail invoice contract
    pub fn retail() -> &'static SchemaContract {
        &RETAIL
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in positional order
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Physical columns for table creation
    pub fn table_columns(&self) -> Vec<TableColumn> {
        self.columns.iter().map(ColumnSpec::table_column).collect()
    }

    /// Compare existing table columns against this contract
    ///
    /// Returns an empty vector when the table matches exactly.
    pub fn diff(&self, actual: &[TableColumn]) -> Vec<ColumnDrift> {
        let mut drift = Vec::new();

        for (expected_pos, spec) in self.columns.iter().enumerate() {
            let Some(actual_pos) = actual.iter().position(|c| c.name == spec.name) else {
                drift.push(ColumnDrift::Missing {
                    name: spec.name.clone(),
                });
                continue;
            };

            let expected = spec.table_column();
            let found = &actual[actual_pos];
            if !found.data_type.eq_ignore_ascii_case(&expected.data_type)
                || found.nullable != expected.nullable
            {
                drift.push(ColumnDrift::TypeChanged {
                    name: spec.name.clone(),
                    expected: describe(&expected),
                    actual: describe(found),
                });
            }
            if actual_pos != expected_pos {
                drift.push(ColumnDrift::Moved {
                    name: spec.name.clone(),
                    expected: expected_pos,
                    actual: actual_pos,
                });
            }
        }

        for column in actual {
            if self.column(&column.name).is_none() {
                drift.push(ColumnDrift::Unexpected {
                    name: column.name.clone(),
                });
            }
        }

        drift
    }
}

fn describe(column: &TableColumn) -> String {
    if column.nullable {
        column.data_type.clone()
    } else {
        format!("{} NOT NULL", column.data_type)
    }
}
