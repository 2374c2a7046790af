//! Fusion decision core CLI
//!
//! Thin command-line front end over the library: each subcommand reads one
//! JSON snapshot, runs the corresponding core component and prints the
//! result as pretty JSON.

use clap::{Parser, Subcommand};
use fusion_core::{
    config::Config,
    fusion::{FusionEngine, ThreadRandom},
    risk::{CandleWindow, ProfitLockGate, TrailingStopManager},
    types::{AdvisorySignal, PositionSnapshot, TechnicalContext},
};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fusion-core")]
#[command(about = "Advisory signal fusion and position risk decision core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse a batch of advisory signals into one decision
    Fuse {
        /// JSON file with the signal batch and optional technical context
        #[arg(short, long)]
        input: String,

        /// Total number of configured providers this cycle
        #[arg(long)]
        providers_total: Option<usize>,
    },
    /// Evaluate the staged trailing stop for one position tick
    Stops {
        /// JSON file with the position snapshot and current price
        #[arg(short, long)]
        input: String,
    },
    /// Evaluate the consolidation profit lock for one position tick
    Lock {
        /// JSON file with the position, current price and candle window
        #[arg(short, long)]
        input: String,
    },
}

#[derive(Debug, Deserialize)]
struct FuseInput {
    signals: Vec<AdvisorySignal>,
    #[serde(default)]
    context: Option<TechnicalContext>,
    /// Providers that actually answered; defaults to the batch size.
    #[serde(default)]
    successful_providers: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PositionTick {
    position: PositionSnapshot,
    current_price: f64,
}

#[derive(Debug, Deserialize)]
struct LockTick {
    position: PositionSnapshot,
    current_price: f64,
    window: CandleWindow,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    match cli.command {
        Commands::Fuse {
            input,
            providers_total,
        } => run_fuse(config, &input, providers_total),
        Commands::Stops { input } => run_stops(config, &input),
        Commands::Lock { input } => run_lock(config, &input),
    }
}

fn read_input<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let raw = fs::read_to_string(Path::new(path))?;
    Ok(serde_json::from_str(&raw)?)
}

fn run_fuse(config: Config, input: &str, providers_total: Option<usize>) -> anyhow::Result<()> {
    let input: FuseInput = read_input(input)?;

    let total = providers_total.unwrap_or(config.fusion.total_providers);
    let successful = input.successful_providers.unwrap_or(input.signals.len());

    let engine = FusionEngine::new(config.fusion);
    let mut rng = ThreadRandom;
    let result = engine.fuse(
        input.signals,
        input.context.as_ref(),
        successful,
        total,
        &mut rng,
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_stops(config: Config, input: &str) -> anyhow::Result<()> {
    let tick: PositionTick = read_input(input)?;

    let mut manager = TrailingStopManager::new(config.trailing_stop);
    let adjustment = manager.evaluate(&tick.position, tick.current_price);

    println!("{}", serde_json::to_string_pretty(&adjustment)?);
    Ok(())
}

fn run_lock(config: Config, input: &str) -> anyhow::Result<()> {
    let tick: LockTick = read_input(input)?;

    let gate = ProfitLockGate::new(config.profit_lock);
    let decision = gate.should_lock(&tick.position, tick.current_price, &tick.window);

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
