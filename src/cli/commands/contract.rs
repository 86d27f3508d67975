//! Contract command implementation

use crate::cli::error::CliError;
use crate::cli::output::format_contract;
use crate::contract::SchemaContract;

/// Handle the `contract` command
pub fn handle_contract(json: bool) -> Result<(), CliError> {
    let contract = SchemaContract::retail();
    if json {
        println!("{}", serde_json::to_string_pretty(contract)?);
    } else {
        print!("{}", format_contract(contract));
    }
    Ok(())
}
