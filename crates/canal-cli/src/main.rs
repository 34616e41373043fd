//! Canal CLI - host-side testbench for the canal pipeline engine.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "canal")]
#[command(author, version, about = "Canal pipeline engine testbench", long_about = None)]
struct Cli {
    /// Log engine lifecycle events (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a topology for a number of periods on simulated DMA
    Run(commands::run::RunArgs),

    /// List the built-in component drivers
    Drivers(commands::drivers::DriversArgs),

    /// Check a topology file and print its structure
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Drivers(args) => commands::drivers::run(args),
        Commands::Validate(args) => commands::validate::run(args),
    }
}
