//! examguard - exam integrity monitor
//!
//! Command-line harness for the monitoring core: replays scripted browser
//! signals against a session and inspects configuration files.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// examguard - exam integrity monitor
#[derive(Parser, Debug)]
#[command(name = "examguard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a JSON-lines signal script against a monitored session
    Replay(commands::replay::ReplayArgs),

    /// Configuration helpers
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match &cli.command {
        Commands::Replay(args) => {
            let config = commands::config::load(cli.config.as_deref())?;
            commands::replay::run(&config, args)
        },
        Commands::Config(command) => commands::config::run(command, cli.config.as_deref()),
    }
}
