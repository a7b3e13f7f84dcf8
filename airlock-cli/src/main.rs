//! # airlock CLI Entry Point
//!
//! Replays scripted call sequences against an in-memory escrow instance.

mod scenario;

use airlock_engine::AirlockConfig;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Time-locked escrow toolchain.
#[derive(Parser, Debug)]
#[command(name = "airlock", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a scenario file and print one JSON line per step.
    Replay {
        /// Scenario JSON file
        scenario: PathBuf,
        /// Config file overriding the default fee and delay
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Defaults {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { scenario, config } => {
            let config = AirlockConfig::load(config.as_deref())?;
            let scenario = scenario::Scenario::from_path(&scenario)?;
            for line in scenario::replay(&config, &scenario).await? {
                println!("{}", serde_json::to_string(&line)?);
            }
        }
        Commands::Defaults { config } => {
            let config = AirlockConfig::load(config.as_deref())?;
            tracing::info!("Effective fee {} and delay {}s", config.fee, config.delay);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
