pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crmchat_agent::evaluation::{DEFAULT_PAUSE_SECS, RESULTS_DIR};

#[derive(Debug, Parser)]
#[command(
    name = "crmchat",
    about = "CRM chat operator CLI",
    long_about = "Inspect configuration, check readiness, and replay evaluation questions against the CRM chat agent.",
    after_help = "Examples:\n  crmchat doctor --json\n  crmchat config\n  crmchat eval --queries test_queries.jsonl"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, agent endpoint, and Salesforce credential readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run every question in a query file and save the results as JSON lines")]
    Eval {
        #[arg(long, default_value = "test_queries.jsonl", help = "Newline-delimited query file")]
        queries: PathBuf,
        #[arg(long, default_value = RESULTS_DIR, help = "Directory for the results file")]
        output_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_PAUSE_SECS, help = "Seconds to wait between queries")]
        pause_secs: u64,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Eval { queries, output_dir, pause_secs } => {
            commands::eval::run(commands::eval::EvalOptions { queries, output_dir, pause_secs })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
