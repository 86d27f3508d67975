//! CLI module for the retail-ingest binary

pub mod commands;
pub mod error;
pub mod output;

pub use error::CliError;
