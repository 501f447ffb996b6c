use clap::{Parser, Subcommand};
use liteline_core::config::AppConfig;

mod commands;
mod logging;

use commands::{check_config, probe, remote_time, ProbeOptions};

#[derive(Parser)]
#[command(name = "liteline-cli")]
#[command(about = "Liteline CLI - probe TON lite server groups through the failover engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, env = "LITELINE_CONFIG", default_value = "config/config.toml", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Repeatedly query masterchain info through the full engine hierarchy
    Probe {
        /// Number of queries to issue (0 = run until interrupted)
        #[arg(short, long, default_value = "0")]
        queries: u64,

        /// Pause between queries in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Per-query timeout in milliseconds
        #[arg(long, default_value = "500")]
        timeout_ms: u64,
    },

    /// Print the remote unix time reported by the first healthy group
    Time {
        /// Query timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Load and validate the configuration, then print the parsed groups
    CheckConfig {
        /// Print the resolved configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let config = AppConfig::from_file(path)?;
    config.validate().map_err(anyhow::Error::msg)?;
    logging::init_logging(&config.logging);
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe { queries, interval_ms, timeout_ms } => {
            let config = load_config(&cli.config)?;
            probe(&config, ProbeOptions { queries, interval_ms, timeout_ms }).await?;
        }
        Commands::Time { timeout_ms } => {
            let config = load_config(&cli.config)?;
            remote_time(&config, timeout_ms).await?;
        }
        Commands::CheckConfig { json } => {
            check_config(&cli.config, json)?;
        }
    }

    Ok(())
}
