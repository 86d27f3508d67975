//! retail-ingest command line

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use retail_ingest::cli::CliError;
use retail_ingest::cli::commands::contract::handle_contract;
use retail_ingest::cli::commands::run::{RunArgs, handle_run};
use retail_ingest::cli::commands::status::handle_status;
use retail_ingest::cli::commands::validate::{ValidateArgs, handle_validate};

#[derive(Parser, Debug)]
#[command(name = "retail-ingest", version, about = "Stage, load and validate retail invoice data")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion pipeline
    Run {
        /// Pipeline configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Local CSV file to stage
        #[arg(long)]
        source: Option<PathBuf>,
        /// Staging bucket
        #[arg(long)]
        bucket: Option<String>,
        /// Object key for the staged file (default: raw/<file name>)
        #[arg(long)]
        remote_path: Option<String>,
        /// Destination table as <project>.<dataset>.<table>
        #[arg(short, long)]
        table: Option<String>,
        /// Root directory of the local object store
        #[arg(long)]
        storage_root: Option<PathBuf>,
        /// DuckDB database file used as the warehouse
        #[arg(long)]
        warehouse_db: Option<PathBuf>,
        /// Stages to run (upload, provision, load, validate, transform)
        #[arg(long, value_delimiter = ',')]
        stages: Vec<String>,
        /// Bad rows tolerated per load job
        #[arg(long)]
        max_bad_records: Option<usize>,
        /// Skip already-loaded sources: none, path, content, both
        #[arg(long)]
        dedup: Option<String>,
        /// Load ledger file used by --dedup
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// What a failed schema check does: warn, abort
        #[arg(long)]
        validation_policy: Option<String>,
        /// Fail when an existing table differs from the contract
        #[arg(long)]
        verify_schema: bool,
        /// Checkpoint file (default: next to the config file)
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Validate inputs without making changes
        #[arg(long)]
        dry_run: bool,
        /// Resume from the last checkpoint
        #[arg(long)]
        resume: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check an existing table against the retail contract
    Validate {
        /// Pipeline configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Table as <project>.<dataset>.<table>
        #[arg(short, long)]
        table: Option<String>,
        /// DuckDB database file used as the warehouse
        #[arg(long)]
        warehouse_db: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a pipeline checkpoint
    Status {
        /// Checkpoint file or pipeline configuration file
        path: PathBuf,
        /// Print the checkpoint as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the retail schema contract
    Contract {
        /// Print the contract as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(cli: &Cli) {
    let level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let verbose = cli.verbose > 0;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Run {
            config,
            source,
            bucket,
            remote_path,
            table,
            storage_root,
            warehouse_db,
            stages,
            max_bad_records,
            dedup,
            ledger,
            validation_policy,
            verify_schema,
            checkpoint,
            dry_run,
            resume,
            json,
        } => {
            handle_run(RunArgs {
                config_file: config,
                source_file: source,
                bucket,
                remote_path,
                destination: table,
                storage_root,
                warehouse_db,
                stages,
                max_bad_records,
                dedup,
                ledger,
                validation_policy,
                verify_schema,
                checkpoint,
                dry_run,
                resume,
                verbose,
                json,
                quiet,
            })
            .await
        }
        Commands::Validate {
            config,
            table,
            warehouse_db,
            json,
        } => {
            handle_validate(ValidateArgs {
                config_file: config,
                table,
                warehouse_db,
                json,
            })
            .await
        }
        Commands::Status { path, json } => handle_status(&path, json),
        Commands::Contract { json } => handle_contract(json),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = dispatch(cli).await {
        eprintln!("{}", e.user_message());
        std::process::exit(e.exit_code());
    }
    Ok(())
}
