use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

mod commands;

use commands::{run_command, verify_command};

#[derive(Parser)]
#[command(name = "ruleflow")]
#[command(about = "Ruleflow - rule catalogue verification and execution", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `ruleflow_engine=debug`
    #[arg(long, global = true, env = "RULEFLOW_LOG")]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify, repair and enrich the expressions of a rule catalogue
    Verify(VerifyArgs),
    /// Execute a verified catalogue against data rows and emit a report
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Path to the rule catalogue (JSON or YAML)
    pub rules: PathBuf,
    /// Output path for the enriched catalogue (default: <stem>_verified.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Concurrent rule verifications
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to the enriched rule catalogue
    pub rules: PathBuf,
    /// Path to the data rows keyed by rule id
    pub data: PathBuf,
    /// Starting-order JSON (a list of rule ids); root rules are
    /// auto-detected when omitted
    #[arg(long)]
    pub starting_order: Option<PathBuf>,
    /// Data rows to execute per starting rule
    #[arg(short = 'n', long, default_value_t = 1)]
    pub num_rows: usize,
    /// Worker tasks for the batch runtime
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
    /// Output path for the execution report (default: <stem>_execution_<timestamp>.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Suppress the per-run summary table
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = ruleflow_core::logging::init_tracing(cli.log.as_deref()) {
        eprintln!("failed to initialise logging: {err}");
    }

    let outcome = match cli.command {
        Commands::Verify(args) => verify_command(args).await,
        Commands::Run(args) => run_command(args).await,
        Commands::Version => {
            println!("Ruleflow v{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
