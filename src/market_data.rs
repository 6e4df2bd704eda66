use crate::config::Timeframe;
use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

const KLINES_PATH: &str = "/api/v3/klines";
const KLINES_PAGE_LIMIT: usize = 1000;
const REQUEST_DELAY: Duration = Duration::from_millis(500);
const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

/// Public kline downloads, no credentials needed.
pub struct BinanceClient<'a> {
    http: &'a Client,
    base_url: String,
}

impl<'a> BinanceClient<'a> {
    pub fn new(http: &'a Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// The most recent `limit` candles, oldest first.
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let interval: Timeframe = timeframe
            .parse()
            .with_context(|| format!("Cannot download candles for timeframe '{}'", timeframe))?;
        let market = normalize_symbol(symbol);
        if market.is_empty() {
            return Err(anyhow!("Symbol must not be empty"));
        }

        let interval_ms = interval.minutes() as i64 * 60_000;
        let mut start_time = Utc::now().timestamp_millis() - interval_ms * limit as i64;
        let mut remaining = limit;
        let mut candles: Vec<Candle> = Vec::with_capacity(limit);

        while remaining > 0 {
            let page_limit = remaining.min(KLINES_PAGE_LIMIT);
            let page = self
                .fetch_page(&market, interval.as_str(), start_time, page_limit)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            start_time = last.timestamp.timestamp_millis() + 1;
            remaining = remaining.saturating_sub(page_limit);
            candles.extend(page);

            info!(
                "Downloaded {}/{} {} {} candles",
                candles.len(),
                limit,
                market,
                interval
            );
            sleep(REQUEST_DELAY).await;
        }

        Ok(candles)
    }

    async fn fetch_page(
        &self,
        market: &str,
        interval: &str,
        start_time: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}{}", self.base_url, KLINES_PATH);
        let start = start_time.to_string();
        let limit = limit.to_string();
        let query = [
            ("symbol", market),
            ("interval", interval),
            ("startTime", start.as_str()),
            ("limit", limit.as_str()),
        ];
        debug!("GET {} {:?}", url, query);

        let rows: Vec<Vec<Value>> = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error", url))?
            .json()
            .await
            .context("failed to parse Binance kline response")?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// `BTC/USDT` -> `BTCUSDT`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| *c != '/')
        .collect::<String>()
        .to_uppercase()
}

fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(anyhow!("Kline row has {} fields, expected at least 6", row.len()));
    }
    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| anyhow!("Kline open time is not an integer: {}", row[0]))?;
    let timestamp = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| anyhow!("Kline open time {} is out of range", open_time))?;

    Ok(Candle {
        timestamp,
        open: kline_number(&row[1], "open")?,
        high: kline_number(&row[2], "high")?,
        low: kline_number(&row[3], "low")?,
        close: kline_number(&row[4], "close")?,
        volume: kline_number(&row[5], "volume")?,
    })
}

fn kline_number(value: &Value, field: &str) -> Result<f64> {
    match value {
        Value::String(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("Invalid kline {} value '{}'", field, raw)),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| anyhow!("Invalid kline {} value {}", field, number)),
        other => Err(anyhow!("Invalid kline {} value {}", field, other)),
    }
}

/// Candles for one market written to disk so runs can be repeated offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: String,
    pub candles: Vec<Candle>,
}

impl MarketDataSnapshot {
    pub fn new(symbol: &str, timeframe: &str, candles: Vec<Candle>) -> Self {
        Self {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            candles,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded {} {} {} candles from {}",
            snapshot.candles.len(),
            snapshot.symbol,
            snapshot.timeframe,
            path.display()
        );
        Ok(snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symbols_lose_their_separator() {
        assert_eq!(normalize_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol(" eth/btc "), "ETHBTC");
        assert_eq!(normalize_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn parses_binance_kline_rows() {
        let row = json!([
            1_704_067_200_000_i64,
            "42283.58",
            "42554.57",
            "42261.02",
            "42475.23",
            "1271.68108",
            1_704_070_799_999_i64,
            "53957283.79",
            47134,
            "682.57581",
            "28957416.82",
            "0"
        ]);
        let candle = parse_kline(row.as_array().unwrap()).unwrap();
        assert_eq!(candle.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!((candle.open - 42283.58).abs() < 1e-9);
        assert!((candle.close - 42475.23).abs() < 1e-9);
        assert!((candle.volume - 1271.68108).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_kline_rows() {
        assert!(parse_kline(json!([1, "2"]).as_array().unwrap()).is_err());
        assert!(parse_kline(json!(["x", "1", "1", "1", "1", "1"]).as_array().unwrap()).is_err());
        assert!(parse_kline(json!([1, "abc", "1", "1", "1", "1"]).as_array().unwrap()).is_err());
    }

    #[tokio::test]
    async fn unsupported_timeframe_fails_before_any_request() {
        let http = Client::new();
        let client = BinanceClient::new(&http, "http://127.0.0.1:9");
        let error = client.fetch_candles("BTC/USDT", "2d", 10).await.unwrap_err();
        assert!(error.to_string().contains("2d"));
    }

    #[test]
    fn snapshot_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.bin");
        let mut snapshot = MarketDataSnapshot::new("BTC/USDT", "1h", Vec::new());
        snapshot.save_to_file(&path).unwrap();
        assert_eq!(MarketDataSnapshot::load_from_file(&path).unwrap().symbol, "BTC/USDT");

        snapshot.version = MARKET_DATA_SNAPSHOT_VERSION + 1;
        snapshot.save_to_file(&path).unwrap();
        let error = MarketDataSnapshot::load_from_file(&path).unwrap_err();
        assert!(error.to_string().contains("version mismatch"));
    }
}
