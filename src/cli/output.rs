//! Output formatting for CLI

use crate::contract::SchemaContract;
use crate::pipeline::{Checkpoint, PipelineReport, StageRecord, StageResult};
use crate::progress::{format_bytes, format_count};
use crate::validation::ValidationReport;

/// Per-column validation table with the aggregate verdict
pub fn format_validation_report(report: &ValidationReport) -> String {
    let width = report
        .columns
        .iter()
        .map(|c| c.column.len())
        .max()
        .unwrap_or(0)
        .max("Column".len());

    let mut output = String::new();
    output.push_str(&format!(
        "Schema check for {} (contract '{}', {} rows)\n\n",
        report.table,
        report.contract,
        format_count(report.rows_inspected)
    ));
    output.push_str(&format!(
        "  {:<width$}  {:<10}  {:<10}  Result\n",
        "Column", "Expected", "Actual"
    ));
    for check in &report.columns {
        let result = if check.matches { "✓ match" } else { "✗ mismatch" };
        output.push_str(&format!(
            "  {:<width$}  {:<10}  {:<10}  {}\n",
            check.column,
            check.expected.to_string(),
            check.actual_name(),
            result
        ));
    }

    if report.passed {
        output.push_str("\n✅ Schema check passed\n");
    } else {
        output.push_str(&format!(
            "\n⚠️  Schema check failed: {} of {} columns mismatched\n",
            report.mismatch_count(),
            report.columns.len()
        ));
    }
    output
}

/// Human-readable run summary
pub fn format_pipeline_report(report: &PipelineReport) -> String {
    let mut output = String::new();
    output.push_str(&format!("Run {} - {}\n", report.run_id, report.status));
    output.push_str(&format!("Duration: {}\n", report.duration_formatted()));

    for record in &report.stages {
        output.push_str(&format_stage_line(record));
        output.push('\n');
    }

    if let Some(rows) = report.rows_loaded() {
        output.push_str(&format!("Rows loaded: {}\n", format_count(rows)));
    }
    if let Some(validation) = &report.validation {
        output.push('\n');
        output.push_str(&format_validation_report(validation));
    }
    output
}

/// One `  - stage: detail` line
fn format_stage_line(record: &StageRecord) -> String {
    let mut line = format!("  - {}: {}", record.stage.name(), record.state);
    if let Some(note) = &record.note {
        line.push_str(&format!(" ({note})"));
        return line;
    }

    match &record.result {
        StageResult::None => {}
        StageResult::Staged { uri, bytes } => {
            line.push_str(&format!(", {uri} ({})", format_bytes(*bytes)));
        }
        StageResult::Provisioned { table, outcome } => {
            line.push_str(&format!(", {table} {outcome}"));
        }
        StageResult::Loaded {
            rows_loaded,
            bad_records,
            ..
        } => {
            line.push_str(&format!(", {} rows", format_count(*rows_loaded)));
            if *bad_records > 0 {
                line.push_str(&format!(", {} bad records dropped", format_count(*bad_records)));
            }
        }
        StageResult::Validated {
            passed, mismatches, ..
        } => {
            if *passed {
                line.push_str(", schema matches");
            } else {
                line.push_str(&format!(", {mismatches} column(s) mismatched"));
            }
        }
        StageResult::Transformed { trigger, exit_code } => {
            line.push_str(&format!(", {trigger} exited {exit_code}"));
        }
    }
    line.push_str(&format!(" [{}ms]", record.duration_ms));
    line
}

/// Checkpoint status block
pub fn format_checkpoint(checkpoint: &Checkpoint) -> String {
    let mut output = String::new();
    output.push_str("Pipeline Status\n");
    output.push_str("===============\n\n");
    if let Some(name) = &checkpoint.name {
        output.push_str(&format!("Name:     {}\n", name));
    }
    output.push_str(&format!("Run ID:   {}\n", checkpoint.run_id));
    output.push_str(&format!("Status:   {}\n", checkpoint.status));
    output.push_str(&format!(
        "Started:  {}\n",
        checkpoint.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!(
        "Updated:  {}\n",
        checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    output.push_str("\nStages:\n");
    for record in &checkpoint.stages {
        output.push_str(&format_stage_line(record));
        output.push('\n');
    }

    if let Some(stage) = &checkpoint.current_stage {
        output.push_str(&format!("\nCurrent Stage: {}\n", stage.name()));
    }
    if let Some(error) = &checkpoint.error {
        match checkpoint.failed_stage() {
            Some(stage) => output.push_str(&format!("\nError in {stage}: {error}\n")),
            None => output.push_str(&format!("\nError: {error}\n")),
        }
    }
    output
}

/// Contract columns with their warehouse types
pub fn format_contract(contract: &SchemaContract) -> String {
    let mut output = format!("Contract '{}' ({} columns)\n", contract.name(), contract.len());
    for (position, column) in contract.columns().iter().enumerate() {
        output.push_str(&format!(
            "  {}. {} {} ({}{})\n",
            position + 1,
            column.name,
            column.semantic_type.name(),
            column.semantic_type.warehouse_type(),
            if column.semantic_type.is_nullable() {
                ", nullable"
            } else {
                ""
            }
        ));
    }
    output
}
