use anyhow::Result;
use backtest_engine::{
    commands::{
        backtest, export_market_data, market_data_snapshot::MarketSelection, optimize,
    },
    config::RuntimeSettings,
};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Candle-by-candle strategy backtester with walk-forward optimization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MarketArgs {
    /// Market symbol, e.g. BTC/USDT
    #[arg(long, default_value = "BTC/USDT")]
    symbol: String,
    /// Candle timeframe (1m, 5m, 1h, 1d, ...)
    #[arg(long, default_value = "1h")]
    timeframe: String,
    /// Number of candles to download
    #[arg(long, default_value_t = 1000)]
    limit: usize,
    /// Read candles from a market data snapshot instead of downloading
    #[arg(long = "data-file", value_name = "PATH")]
    data_file: Option<PathBuf>,
}

impl MarketArgs {
    fn selection(&self) -> MarketSelection {
        MarketSelection {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            limit: self.limit,
            data_file: self.data_file.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy template over historical candles
    Backtest {
        /// Strategy template (mean_reversion, fixed_fraction)
        template_id: String,
        #[command(flatten)]
        market: MarketArgs,
        /// Strategy parameters as JSON, e.g. '{"rsiPeriod": 14}'
        #[arg(long)]
        params: Option<String>,
        /// Starting balance (overrides BACKTEST_INITIAL_BALANCE)
        #[arg(long)]
        initial_balance: Option<f64>,
    },
    /// Walk-forward optimization of a strategy template
    Optimize {
        /// Strategy template (mean_reversion, fixed_fraction)
        template_id: String,
        #[command(flatten)]
        market: MarketArgs,
        /// Base parameters as JSON; searched parameters override them
        #[arg(long)]
        params: Option<String>,
        /// Number of walk-forward segments
        #[arg(long)]
        splits: Option<usize>,
        /// Share of each segment used for training
        #[arg(long)]
        train_ratio: Option<f64>,
        /// Trials per segment
        #[arg(long)]
        trials: Option<usize>,
        /// Starting balance (overrides BACKTEST_INITIAL_BALANCE)
        #[arg(long)]
        initial_balance: Option<f64>,
    },
    /// Download candles and store them as a market data snapshot
    ExportMarketData {
        /// Market symbol, e.g. BTC/USDT
        #[arg(long, default_value = "BTC/USDT")]
        symbol: String,
        /// Candle timeframe
        #[arg(long, default_value = "1h")]
        timeframe: String,
        /// Number of candles to download
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut settings = RuntimeSettings::from_env()?;
    info!("Starting backtest engine. Not financial advice. Use at your own risk.");

    match cli.command {
        Commands::Backtest {
            template_id,
            market,
            params,
            initial_balance,
        } => {
            if let Some(balance) = initial_balance {
                settings.initial_balance = balance;
            }
            backtest::run(&settings, &template_id, params.as_deref(), &market.selection())
                .await?;
        }
        Commands::Optimize {
            template_id,
            market,
            params,
            splits,
            train_ratio,
            trials,
            initial_balance,
        } => {
            if let Some(splits) = splits {
                settings.walk_forward_splits = splits;
            }
            if let Some(ratio) = train_ratio {
                settings.walk_forward_train_ratio = ratio;
            }
            if let Some(trials) = trials {
                settings.optimization_trials = trials;
            }
            if let Some(balance) = initial_balance {
                settings.initial_balance = balance;
            }
            optimize::run(&settings, &template_id, params.as_deref(), &market.selection())
                .await?;
        }
        Commands::ExportMarketData {
            symbol,
            timeframe,
            limit,
            output,
        } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE));
            export_market_data::run(&settings, &symbol, &timeframe, limit, &output_path).await?;
        }
    }

    Ok(())
}
