pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ventix",
    about = "Ventix operator CLI",
    long_about = "Operate the Ventix wholesale assistant: migrations, demo catalog, config inspection, readiness checks and offline intent classification.",
    after_help = "Examples:\n  ventix doctor --json\n  ventix config\n  ventix classify \"quiero 80 pantalones azules talla L\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo catalog and verify every garment is present")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider pool readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Classify a message with the keyword fallback and print the intent as JSON")]
    Classify {
        #[arg(help = "Customer message to classify")]
        message: String,
        #[arg(
            long,
            default_value_t = 0,
            help = "Number of recent orders to assume for the customer"
        )]
        recent_orders: usize,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Classify { message, recent_orders } => {
            commands::classify::run(&message, recent_orders)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
