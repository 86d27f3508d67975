//! Error types for warehouse operations

use thiserror::Error;

use crate::storage::StorageError;

/// A single rejected source row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based line number in the source file
    pub line: u64,
    /// Offending column, when the row parsed far enough to know it
    pub column: Option<String>,
    pub reason: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.column {
            Some(column) => write!(f, "line {}, column '{}': {}", self.line, column, self.reason),
            None => write!(f, "line {}: {}", self.line, self.reason),
        }
    }
}

/// Errors reported by a warehouse client
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Table does not exist
    #[error("Not found: table {0}")]
    NotFound(String),

    /// Table already exists (create raced with another creator)
    #[error("Already exists: table {0}")]
    AlreadyExists(String),

    /// Caller lacks access
    #[error("Access denied: {0}")]
    PermissionDenied(String),

    /// Temporary service failure; the caller's orchestrator may retry
    #[error("Transient service error: {0}")]
    Transient(String),

    /// Table identifier is malformed
    #[error("Invalid table identifier: {0}")]
    InvalidIdentifier(String),

    /// Source rows failed to decode under the load schema
    #[error("Malformed input in {uri}: {} bad record(s), first at {}", .errors.len(), first_error(.errors))]
    MalformedInput { uri: String, errors: Vec<RowError> },

    /// Staged source could not be read
    #[error("Source not accessible: {uri} - {reason}")]
    SourceNotAccessible { uri: String, reason: String },

    /// Query rejected or failed
    #[error("Query error: {0}")]
    Query(String),

    /// Any other backend failure
    #[error("Warehouse backend error: {0}")]
    Backend(String),
}

fn first_error(errors: &[RowError]) -> String {
    errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown position".to_string())
}

impl WarehouseError {
    /// Whether this is the table-absent error class
    pub fn is_not_found(&self) -> bool {
        matches!(self, WarehouseError::NotFound(_))
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, WarehouseError::Transient(_))
    }

    /// Map a failed read of the staged object at `uri`
    pub fn from_storage(uri: &str, err: StorageError) -> Self {
        match err {
            StorageError::PermissionDenied(msg) => WarehouseError::PermissionDenied(msg),
            StorageError::ObjectNotFound(_) => WarehouseError::SourceNotAccessible {
                uri: uri.to_string(),
                reason: "object not found".to_string(),
            },
            other => WarehouseError::SourceNotAccessible {
                uri: uri.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Get a user-friendly error message for CLI output
    pub fn user_message(&self) -> String {
        match self {
            WarehouseError::PermissionDenied(msg) => format!(
                "Access denied: {msg}\n\nHint: Check the credentials used for the warehouse connection."
            ),
            WarehouseError::InvalidIdentifier(id) => format!(
                "Invalid table identifier: {id}\n\nHint: Use the form <project>.<dataset>.<table>."
            ),
            WarehouseError::MalformedInput { uri, errors } => {
                let mut msg = format!("{} malformed record(s) in {}:\n", errors.len(), uri);
                for error in errors.iter().take(10) {
                    msg.push_str(&format!("  - {}\n", error));
                }
                if errors.len() > 10 {
                    msg.push_str(&format!("  ... and {} more\n", errors.len() - 10));
                }
                msg.push_str("\nHint: Fix the rows or raise max_bad_records.");
                msg
            }
            WarehouseError::SourceNotAccessible { uri, reason } => format!(
                "Cannot access source: {uri}\nReason: {reason}\n\n\
                Hint: Check that the upload stage completed and the bucket is readable."
            ),
            _ => self.to_string(),
        }
    }
}

#[cfg(feature = "duckdb-backend")]
impl From<duckdb::Error> for WarehouseError {
    fn from(err: duckdb::Error) -> Self {
        WarehouseError::Backend(err.to_string())
    }
}
