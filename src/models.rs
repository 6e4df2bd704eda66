use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Price levels and size a signal provider computed for one side of a row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SideLevels {
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub trailing_stop_price: f64,
    pub position_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedCandle {
    pub candle: Candle,
    pub long_signal: bool,
    pub short_signal: bool,
    pub close_long_signal: bool,
    pub close_short_signal: bool,
    pub long: SideLevels,
    pub short: SideLevels,
}

impl AnnotatedCandle {
    /// Row with every flag cleared and zeroed levels.
    pub fn flat(candle: Candle) -> Self {
        Self {
            candle,
            long_signal: false,
            short_signal: false,
            close_long_signal: false,
            close_short_signal: false,
            long: SideLevels::default(),
            short: SideLevels::default(),
        }
    }

    pub fn levels(&self, side: Side) -> &SideLevels {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    pub fn close_signal(&self, side: Side) -> bool {
        match side {
            Side::Long => self.close_long_signal,
            Side::Short => self.close_short_signal,
        }
    }
}

/// Account state handed to signal providers for risk-adjusted sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub max_balance: f64,
}

impl AccountSnapshot {
    pub fn fresh(balance: f64) -> Self {
        Self {
            balance,
            max_balance: balance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_index: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_stop: f64,
    pub size: f64,
}

impl Position {
    pub fn profit_at(&self, exit_price: f64) -> f64 {
        match self.side {
            Side::Long => (exit_price - self.entry_price) * self.size,
            Side::Short => (self.entry_price - exit_price) * self.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Signal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Signal => "signal",
        }
    }
}

/// One realized trade. `profit` is the only field post-run statistics read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: Side,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub profit: f64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub symbol: String,
    pub timeframe: String,
    pub num_candles: usize,
    pub test_period: String,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub risk_reward_ratio: f64,
    pub annual_return: Option<f64>,
    pub sharpe_ratio: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    pub win_count: usize,
    pub loss_count: usize,
    pub avg_profit_per_trade: f64,
    pub avg_loss_per_trade: f64,
    pub chart_path: Option<String>,
    pub capital_history: Vec<f64>,
    pub drawdown_history: Vec<f64>,
    pub trades: Vec<TradeRecord>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn midpoint(&self) -> f64 {
        self.snap((self.min + self.max) / 2.0)
    }

    /// Snap a value onto the step grid anchored at `min`, then clamp.
    pub fn snap(&self, value: f64) -> f64 {
        if self.step > 0.0 && self.step.is_finite() {
            let steps = ((value - self.min) / self.step).round();
            (self.min + steps * self.step).clamp(self.min, self.max)
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

/// Half-open train/test index ranges into the full candle sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
}

impl Segment {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.len()
    }

    pub fn train_slice<'a, T>(&self, data: &'a [T]) -> &'a [T] {
        &data[self.train.clone()]
    }

    pub fn test_slice<'a, T>(&self, data: &'a [T]) -> &'a [T] {
        &data[self.test.clone()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentOutcome {
    pub segment: Segment,
    pub parameters: HashMap<String, f64>,
    pub train_score: f64,
    pub test_score: f64,
    pub trials_evaluated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub template_id: String,
    pub best_parameters: HashMap<String, f64>,
    pub segments: Vec<SegmentOutcome>,
    pub aggregate_score: f64,
    pub trial_budget: usize,
    pub failed_segments: Vec<usize>,
    pub cancelled: bool,
}

impl OptimizationResult {
    pub fn test_scores(&self) -> Vec<f64> {
        self.segments.iter().map(|outcome| outcome.test_score).collect()
    }
}

fn normalize_parameter_map(raw: HashMap<String, Value>) -> HashMap<String, f64> {
    let mut cleaned = HashMap::with_capacity(raw.len());

    for (key, value) in raw.into_iter() {
        if let Some(num) = value.as_f64() {
            if num.is_finite() {
                cleaned.insert(key, num);
            } else {
                warn!(
                    "Skipping parameter `{}` due to non-finite numeric value {}",
                    key, value
                );
            }
            continue;
        }

        if let Some(text) = value.as_str() {
            match text.trim().parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => {
                    cleaned.insert(key, parsed);
                }
                _ => warn!("Skipping parameter `{}` with non-numeric value {}", key, value),
            }
            continue;
        }

        if let Some(boolean) = value.as_bool() {
            cleaned.insert(key, if boolean { 1.0 } else { 0.0 });
            continue;
        }

        warn!(
            "Skipping parameter `{}` due to unsupported value {}",
            key, value
        );
    }

    cleaned
}

pub fn parse_parameter_map_from_json(json: &str) -> AnyResult<HashMap<String, f64>> {
    let raw: HashMap<String, Value> =
        serde_json::from_str(json).map_err(|error| anyhow!("Invalid parameter JSON: {}", error))?;
    Ok(normalize_parameter_map(raw))
}
