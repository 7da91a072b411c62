use anyhow::Result;
use clap::{Parser, Subcommand};
use refinery::config::Config;
use refinery::telemetry::{self, LogFormat, TelemetryOptions};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "refinery")]
#[command(version, about = "Iterative trading-strategy refinement: generate, validate, backtest, evaluate")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to refinery.toml (defaults to ./refinery.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// Also write JSON logs to this file, rotated daily
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one refinement cycle in-process and print the result as JSON
    Run(cmd::run::RunArgs),
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to serve on (overrides [server].port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides [server].host)
        #[arg(long)]
        host: Option<String>,

        /// Allow cross-origin requests from any origin
        #[arg(long)]
        cors_permissive: bool,
    },
    /// Show a stored session (requires [loop].state_dir)
    Status {
        session_id: String,
    },
    /// List the factor catalogue
    Factors {
        /// Only factors of this category (trend, mean_reversion, volatility, risk_off, carry)
        #[arg(short, long)]
        category: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default refinery.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = telemetry::init(&TelemetryOptions {
        format: cli.log_format,
        verbose: cli.verbose,
        log_file: cli.log_file.clone(),
    })?;

    let config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => cmd::cmd_run(&config, args, cli.verbose).await?,
        Commands::Serve {
            port,
            host,
            cors_permissive,
        } => cmd::cmd_serve(config, port, host, cors_permissive).await?,
        Commands::Status { session_id } => cmd::cmd_status(&config, &session_id).await?,
        Commands::Factors { category } => cmd::cmd_factors(&config, category.as_deref())?,
        Commands::Config { command } => cmd::cmd_config(&config, cli.config.as_deref(), command)?,
    }

    Ok(())
}
