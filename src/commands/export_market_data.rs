use crate::commands::market_data_snapshot::{load_candles, MarketSelection};
use crate::config::RuntimeSettings;
use crate::market_data::MarketDataSnapshot;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(
    settings: &RuntimeSettings,
    symbol: &str,
    timeframe: &str,
    limit: usize,
    output_path: &Path,
) -> Result<()> {
    info!(
        "Generating market data snapshot at {}",
        output_path.display()
    );

    let selection = MarketSelection {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        limit,
        data_file: None,
    };
    let market = load_candles(settings, &selection).await?;
    let snapshot = MarketDataSnapshot::new(&market.symbol, &market.timeframe, market.candles);

    snapshot.save_to_file(output_path)?;
    info!(
        "Market data snapshot with {} candles successfully written to {}",
        snapshot.candles.len(),
        output_path.display()
    );

    Ok(())
}
