mod config;
mod logging;
mod poller;
mod run;
mod signals;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use crate::config::{AgentConfig, CliOverrides};
use crate::run::RunOptions;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// `PipeWatch` agent - keeps an authenticated session and polls telemetry
#[derive(Parser)]
#[command(name = "pipewatch-agent")]
#[command(about = "PipeWatch agent - keeps an authenticated session and polls telemetry")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API origin override (overrides config and environment)
    #[arg(long)]
    base_url: Option<String>,

    /// Print effective configuration (YAML, secrets redacted) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and poll telemetry until stopped
    Run {
        /// Poll every endpoint once and exit
        #[arg(long)]
        once: bool,

        /// Do not log out on exit
        #[arg(long)]
        keep_session: bool,
    },
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) defaults -> 2) YAML (if provided) -> 3) env (PIPEWATCH__*) -> 4) CLI overrides
    let mut config = AgentConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliOverrides {
        verbose: cli.verbose,
        base_url: cli.base_url.clone(),
    });
    config.validate()?;

    logging::init_logging(&config.logging);

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run {
        once: false,
        keep_session: false,
    }) {
        Commands::Run { once, keep_session } => {
            tracing::info!(base_url = %config.session.base_url, "PipeWatch agent starting");
            run::run(config, RunOptions { once, keep_session }).await
        }
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AgentConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
