//! Command-line interface for ItemLink relays.

mod simulate;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use itemlink_core::config::env_vars;
use itemlink_core::RelayConfig;

use crate::simulate::SimulationOptions;

/// ItemLink - reliable per-item relays between device and internal buses.
#[derive(Parser, Debug)]
#[command(name = "itemlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective relay configuration as JSON.
    Config,
    /// Drive relays against a simulated lossy device.
    Simulate {
        /// Number of items (one relay each).
        #[arg(long, default_value_t = 3)]
        items: usize,
        /// Commands sent to each item.
        #[arg(long, default_value_t = 5)]
        commands: usize,
        /// Probability that a message on the device side is lost.
        #[arg(long, default_value_t = 0.3)]
        loss: f64,
        /// Probability that a device report is sent twice.
        #[arg(long, default_value_t = 0.3)]
        duplicates: f64,
        /// Random seed for the device.
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 60)]
        max_secs: u64,
        /// Override the resend interval (ms).
        #[arg(long)]
        resend_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Config => {
            let config = RelayConfig::from_env();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Simulate {
            items,
            commands,
            loss,
            duplicates,
            seed,
            max_secs,
            resend_ms,
        } => {
            let mut config = RelayConfig::from_env();
            if let Some(ms) = resend_ms {
                config = config.with_resend_interval(Duration::from_millis(ms));
            }
            config.validate()?;

            let options = SimulationOptions {
                items,
                commands,
                loss,
                duplicates,
                seed,
                max_duration: Duration::from_secs(max_secs),
            };
            tracing::info!("Simulating {} items x {} commands", items, commands);

            let report = simulate::run(config, options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.completed {
                anyhow::bail!("simulation did not complete");
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    // JSON output for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}
