use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use swing_breakout::config::TraderConfig;
use swing_breakout::execution::ExecutionMode;
use swing_breakout::options::{RiskModel, StrikeSelector};
use swing_breakout::streams::{load_history, run_replay};
use swing_breakout::trading_core::{resample, SwingStructureEngine};

#[derive(Parser, Debug)]
#[command(name = "swing-breakout")]
#[command(about = "Six-point bullish swing breakouts traded through index options")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// JSON config overriding the built-in defaults
    #[arg(short, long, global = true, env = "SWING_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay recorded ticks through the full loop against the paper broker
    Replay {
        /// OHLCV history CSV used for the warm start
        #[arg(long, default_value = "data/history.csv")]
        history: PathBuf,

        /// Recorded feed quotes CSV
        #[arg(long, default_value = "data/ticks.csv")]
        ticks: PathBuf,

        /// Option chain JSON served by the paper broker
        #[arg(long, default_value = "data/option_chain.json")]
        chain: PathBuf,

        /// Keep orders in-process instead of routing them to the paper broker
        #[arg(long)]
        simulate: bool,
    },

    /// Scan a history file and print the swing structure it leaves behind
    Structure {
        /// OHLCV history CSV
        #[arg(long, default_value = "data/history.csv")]
        history: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("swing_breakout=info".parse()?))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TraderConfig::load(path)?,
        None => TraderConfig::default(),
    };

    match args.command {
        Commands::Replay { history, ticks, chain, simulate } => {
            config.execution.mode = if simulate { ExecutionMode::Simulation } else { ExecutionMode::Paper };
            info!("Replaying {} with {} execution", ticks.display(), config.execution.mode);
            let summary = run_replay(config, &history, &ticks, &chain).await?;
            println!(
                "ticks: {}  signals: {}  completed structures: {}  late ticks: {}",
                summary.ticks, summary.signals, summary.completed_structures, summary.late_ticks
            );
        }
        Commands::Structure { history } => {
            let candles = resample(&load_history(&history)?, config.strategy_timeframe);
            let window = &candles[candles.len().saturating_sub(config.window_limit)..];

            let selector = StrikeSelector::new(config.selector.clone(), RiskModel::new(config.risk.clone()));
            let mut engine = SwingStructureEngine::new(config.swing.clone(), selector);
            let table = engine.generate_signals(window);

            for (_, row) in table.fired() {
                println!(
                    "breakout {} | entry {:.2} stop {:.2} target {:.2}",
                    row.open_time, row.entry_price, row.stop_loss, row.target
                );
            }
            print!("{}", engine.structure_summary());
        }
    }

    Ok(())
}
