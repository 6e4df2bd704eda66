use crate::config::RuntimeSettings;
use crate::market_data::{BinanceClient, MarketDataSnapshot};
use crate::models::Candle;
use anyhow::{anyhow, Result};
use log::{info, warn};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Where a command gets its candles from.
#[derive(Debug, Clone)]
pub struct MarketSelection {
    pub symbol: String,
    pub timeframe: String,
    pub limit: usize,
    pub data_file: Option<PathBuf>,
}

/// Candles plus the symbol and timeframe they actually belong to.
pub struct LoadedMarketData {
    pub symbol: String,
    pub timeframe: String,
    pub candles: Vec<Candle>,
}

pub async fn ensure_market_data_file(path: &Path) -> Result<()> {
    if fs::metadata(path).await.is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Generate it with `export-market-data` before running this command.",
        path.display()
    ))
}

/// Reads the snapshot when one is given, otherwise downloads from Binance.
pub async fn load_candles(
    settings: &RuntimeSettings,
    selection: &MarketSelection,
) -> Result<LoadedMarketData> {
    if let Some(path) = selection.data_file.as_deref() {
        ensure_market_data_file(path).await?;
        let snapshot = MarketDataSnapshot::load_from_file(path)?;
        if snapshot.symbol != selection.symbol || snapshot.timeframe != selection.timeframe {
            warn!(
                "Snapshot holds {} {} candles; ignoring requested {} {}",
                snapshot.symbol, snapshot.timeframe, selection.symbol, selection.timeframe
            );
        }
        return Ok(LoadedMarketData {
            symbol: snapshot.symbol,
            timeframe: snapshot.timeframe,
            candles: snapshot.candles,
        });
    }

    info!(
        "Downloading {} {} candles for {} from {}",
        selection.limit, selection.timeframe, selection.symbol, settings.binance_api_url
    );
    let http = Client::new();
    let client = BinanceClient::new(&http, &settings.binance_api_url);
    let candles = client
        .fetch_candles(&selection.symbol, &selection.timeframe, selection.limit)
        .await?;
    if candles.is_empty() {
        return Err(anyhow!(
            "Binance returned no candles for {} {}",
            selection.symbol,
            selection.timeframe
        ));
    }

    Ok(LoadedMarketData {
        symbol: selection.symbol.clone(),
        timeframe: selection.timeframe.clone(),
        candles,
    })
}
