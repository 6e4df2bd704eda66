use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const MINUTES_PER_HOUR: u64 = 60;
pub const MINUTES_PER_DAY: u64 = 60 * 24;
pub const MINUTES_PER_YEAR: u64 = MINUTES_PER_DAY * 365;

/// Candle timeframes the engine knows how to convert into minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 13] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::Mo1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::Mo1 => "1M",
        }
    }

    pub fn minutes(self) -> u64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => MINUTES_PER_HOUR,
            Timeframe::H2 => 2 * MINUTES_PER_HOUR,
            Timeframe::H4 => 4 * MINUTES_PER_HOUR,
            Timeframe::H6 => 6 * MINUTES_PER_HOUR,
            Timeframe::H12 => 12 * MINUTES_PER_HOUR,
            Timeframe::D1 => MINUTES_PER_DAY,
            Timeframe::W1 => 7 * MINUTES_PER_DAY,
            Timeframe::Mo1 => 30 * MINUTES_PER_DAY,
        }
    }

    /// Lookup that treats unknown labels as "no duration" instead of an error.
    pub fn lookup(raw: &str) -> Option<Timeframe> {
        raw.parse().ok()
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    // Case matters: "1m" is a minute, "1M" is a month.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Timeframe::ALL
            .iter()
            .copied()
            .find(|timeframe| timeframe.as_str() == trimmed)
            .ok_or_else(|| anyhow!("Unsupported timeframe '{}'", trimmed))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Random,
    Local,
}

impl SearchKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "local" | "local_search" => Ok(Self::Local),
            other => Err(anyhow!(
                "OPTIMIZATION_SEARCH must be RANDOM or LOCAL (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Random => "random search",
            Self::Local => "local search",
        }
    }
}

/// What the walk-forward loop does when the search fails on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentFailurePolicy {
    #[default]
    Abort,
    Skip,
}

impl SegmentFailurePolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(anyhow!(
                "SEGMENT_FAILURE_POLICY must be ABORT or SKIP (value: {})",
                other
            )),
        }
    }
}

/// Per-run engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_balance: f64,
    pub trailing_stop_fraction: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            trailing_stop_fraction: 0.02,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return Err(anyhow!(
                "Initial balance must be a positive number (value: {})",
                self.initial_balance
            ));
        }
        if !self.trailing_stop_fraction.is_finite()
            || !(0.0..1.0).contains(&self.trailing_stop_fraction)
        {
            return Err(anyhow!(
                "Trailing stop fraction must be within [0, 1) (value: {})",
                self.trailing_stop_fraction
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WalkForwardConfig {
    pub n_splits: usize,
    pub train_ratio: f64,
    pub trial_budget: usize,
    pub initial_balance: f64,
    pub failure_policy: SegmentFailurePolicy,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            n_splits: 5,
            train_ratio: 0.7,
            trial_budget: 50,
            initial_balance: 10_000.0,
            failure_policy: SegmentFailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub initial_balance: f64,
    pub walk_forward_splits: usize,
    pub walk_forward_train_ratio: f64,
    pub optimization_trials: usize,
    pub optimization_search: SearchKind,
    pub optimization_seed: u64,
    pub optimization_workers: usize,
    pub local_search_step_multipliers: Vec<f64>,
    pub segment_failure_policy: SegmentFailurePolicy,
    pub log_dir: String,
    pub binance_api_url: String,
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let initial_balance =
            setting_f64(settings, "BACKTEST_INITIAL_BALANCE", 10_000.0, Some(0.0), None)?;
        if initial_balance <= 0.0 {
            return Err(anyhow!(
                "Setting BACKTEST_INITIAL_BALANCE must be > 0 (value: {})",
                initial_balance
            ));
        }
        let walk_forward_splits = setting_usize(settings, "WALK_FORWARD_SPLITS", 5, 1)?;
        let walk_forward_train_ratio =
            setting_f64(settings, "WALK_FORWARD_TRAIN_RATIO", 0.7, Some(0.0), Some(1.0))?;
        let optimization_trials = setting_usize(settings, "OPTIMIZATION_TRIALS", 50, 1)?;
        let optimization_search = match setting_str(settings, "OPTIMIZATION_SEARCH") {
            Some(raw) => SearchKind::parse(raw)?,
            None => SearchKind::Random,
        };
        let optimization_seed = setting_usize(settings, "OPTIMIZATION_SEED", 42, 0)? as u64;
        let optimization_workers = setting_usize(
            settings,
            "OPTIMIZATION_WORKERS",
            std::cmp::max(1, num_cpus::get()),
            1,
        )?;
        let local_search_step_multipliers = match setting_str(settings, "LOCAL_SEARCH_STEP_MULTIPLIERS")
        {
            Some(raw) => parse_f64_list("LOCAL_SEARCH_STEP_MULTIPLIERS", raw)?,
            None => vec![-2.0, -1.0, 1.0, 2.0],
        };
        let segment_failure_policy = match setting_str(settings, "SEGMENT_FAILURE_POLICY") {
            Some(raw) => SegmentFailurePolicy::parse(raw)?,
            None => SegmentFailurePolicy::Abort,
        };
        let log_dir = setting_str(settings, "LOG_DIR").unwrap_or("logs").to_string();
        let binance_api_url = setting_str(settings, "BINANCE_API_URL")
            .unwrap_or("https://api.binance.com")
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            initial_balance,
            walk_forward_splits,
            walk_forward_train_ratio,
            optimization_trials,
            optimization_search,
            optimization_seed,
            optimization_workers,
            local_search_step_multipliers,
            segment_failure_policy,
            log_dir,
            binance_api_url,
        })
    }

    pub fn walk_forward_config(&self) -> WalkForwardConfig {
        WalkForwardConfig {
            n_splits: self.walk_forward_splits,
            train_ratio: self.walk_forward_train_ratio,
            trial_budget: self.optimization_trials,
            initial_balance: self.initial_balance,
            failure_policy: self.segment_failure_policy,
        }
    }
}

fn setting_str<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = setting_str(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = setting_str(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn parse_f64_list(key: &str, raw: &str) -> Result<Vec<f64>> {
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry
            .parse::<f64>()
            .map_err(|_| anyhow!("Setting {} must be a list of numbers (value: {})", key, raw))?;
        if !value.is_finite() {
            return Err(anyhow!(
                "Setting {} must contain only finite numbers (value: {})",
                key,
                raw
            ));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one number (value: {})",
            key,
            raw
        ));
    }

    Ok(values)
}
