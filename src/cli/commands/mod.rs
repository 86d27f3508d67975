//! CLI command implementations

pub mod contract;
pub mod run;
pub mod status;
pub mod validate;

use std::path::{Path, PathBuf};

use super::error::CliError;
use crate::pipeline::{PipelineConfig, WarehouseConfig};
use crate::validation::ValidationPolicy;
use crate::warehouse::TableId;

/// Start from the config file when one is given, defaults otherwise
fn load_config(path: Option<&Path>) -> Result<PipelineConfig, CliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_toml_file(path)?),
        None => Ok(PipelineConfig::new()),
    }
}

fn parse_table(value: &str) -> Result<TableId, CliError> {
    TableId::parse(value).map_err(|e| CliError::InvalidArgument(e.to_string()))
}

fn parse_policy(value: &str) -> Result<ValidationPolicy, CliError> {
    value.parse().map_err(CliError::InvalidArgument)
}

/// Point the warehouse at a DuckDB file
fn duckdb_warehouse(path: Option<&PathBuf>) -> Option<WarehouseConfig> {
    path.map(|path| WarehouseConfig::DuckDb { path: path.clone() })
}
