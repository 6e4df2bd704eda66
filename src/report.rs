use crate::models::{Position, ResultRecord, SegmentOutcome, TradeRecord};
use crate::param_utils::format_parameters;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const BACKTEST_LOG_FILE: &str = "backtest_debug.log";
pub const OPTIMIZATION_LOG_FILE: &str = "optimization_debug.log";
pub const CAPITAL_CURVE_FILE: &str = "capital_curve.csv";

/// Result sink the engine calls at run boundaries and on position events.
pub trait RunReporter: Send + Sync {
    fn run_started(&self, _symbol: &str, _timeframe: &str, _num_candles: usize) {}

    fn position_opened(&self, _index: usize, _position: &Position) {}

    fn position_closed(&self, _trade: &TradeRecord, _balance: f64) {}

    fn run_completed(&self, _result: &ResultRecord) {}
}

/// Discards every event. Used for optimisation trials.
pub struct SilentReporter;

impl RunReporter for SilentReporter {}

pub struct LogReporter;

impl RunReporter for LogReporter {
    fn run_started(&self, symbol: &str, timeframe: &str, num_candles: usize) {
        debug!(
            "Starting backtest for {} ({}) on {} candles",
            symbol, timeframe, num_candles
        );
    }

    fn position_opened(&self, index: usize, position: &Position) {
        debug!(
            "Candle {}: opened {} at {:.4} (SL {:.4}, TP {:.4}, TS {:.4}, size {:.6})",
            index,
            position.side,
            position.entry_price,
            position.stop_loss,
            position.take_profit,
            position.trailing_stop,
            position.size
        );
    }

    fn position_closed(&self, trade: &TradeRecord, balance: f64) {
        debug!(
            "Candle {}: {} closed by {} at {:.4}, profit {:.4}, balance {:.2}",
            trade.exit_index,
            trade.side,
            trade.exit_reason.as_str(),
            trade.exit_price,
            trade.profit,
            balance
        );
    }

    fn run_completed(&self, result: &ResultRecord) {
        info!(
            "Backtest {} {} finished: final balance {:.2}, {} trades, max drawdown {:.2}%, win rate {:.2}%",
            result.symbol,
            result.timeframe,
            result.final_balance,
            result.trade_count,
            result.max_drawdown,
            result.win_rate * 100.0
        );
    }
}

/// Buffers run events and writes them to `backtest_debug.log` when the run completes.
pub struct FileReporter {
    path: PathBuf,
    lines: Mutex<Vec<String>>,
}

impl FileReporter {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join(BACKTEST_LOG_FILE),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn push(&self, line: String) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }

    fn flush_to_disk(&self, lines: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "=== BACKTEST DEBUG LOG ===")?;
        for line in lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl RunReporter for FileReporter {
    fn run_started(&self, symbol: &str, timeframe: &str, num_candles: usize) {
        self.push(format!(
            "Starting backtest for {} ({}) on {} candles",
            symbol, timeframe, num_candles
        ));
    }

    fn position_opened(&self, index: usize, position: &Position) {
        self.push(format!(
            "Candle {}: opened {} at {}",
            index, position.side, position.entry_price
        ));
    }

    fn position_closed(&self, trade: &TradeRecord, balance: f64) {
        self.push(format!(
            "Candle {}: {} closed by {} at {}, profit {}, balance {}",
            trade.exit_index,
            trade.side,
            trade.exit_reason.as_str(),
            trade.exit_price,
            trade.profit,
            balance
        ));
    }

    fn run_completed(&self, result: &ResultRecord) {
        self.push(format!("Final balance: {}", result.final_balance));
        self.push(format!("Max drawdown: {}%", result.max_drawdown));
        self.push(format!("Win rate: {:.2}%", result.win_rate * 100.0));

        let lines = match self.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if let Err(error) = self.flush_to_disk(&lines) {
            warn!("Failed to write backtest log: {:#}", error);
        }
    }
}

/// Everything the walk-forward summary log records.
pub struct OptimizationSummary<'a> {
    pub strategy: &'a str,
    pub symbol: &'a str,
    pub timeframe: &'a str,
    pub num_candles: usize,
    pub initial_balance: f64,
    pub trials_per_segment: usize,
    pub requested_segments: usize,
    pub segments: &'a [SegmentOutcome],
    pub failed_segments: &'a [usize],
    pub best_parameters: &'a HashMap<String, f64>,
    pub average_test_capital: f64,
}

pub fn write_optimization_summary(path: &Path, summary: &OptimizationSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "=== WALK-FORWARD OPTIMIZATION ===")?;
    writeln!(writer, "Strategy: {}", summary.strategy)?;
    writeln!(
        writer,
        "Symbol: {}, Timeframe: {}, Candles: {}",
        summary.symbol, summary.timeframe, summary.num_candles
    )?;
    writeln!(writer, "Initial balance: ${}", summary.initial_balance)?;
    writeln!(
        writer,
        "Trials per segment: {}, Segments: {}",
        summary.trials_per_segment, summary.requested_segments
    )?;
    writeln!(writer)?;

    for outcome in summary.segments {
        writeln!(
            writer,
            "Segment {}: train {}..{}, test {}..{}, train capital ${:.2}, test capital ${:.2}",
            outcome.segment.index + 1,
            outcome.segment.train.start,
            outcome.segment.train.end,
            outcome.segment.test.start,
            outcome.segment.test.end,
            outcome.train_score,
            outcome.test_score
        )?;
    }
    for index in summary.failed_segments {
        writeln!(writer, "Segment {}: search failed, skipped", index + 1)?;
    }
    writeln!(writer)?;

    writeln!(writer, "Best parameters found:")?;
    let mut sorted: Vec<_> = summary.best_parameters.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in sorted {
        writeln!(writer, "  {}: {}", name, value)?;
    }
    writeln!(
        writer,
        "\nAverage test capital: ${:.2}",
        summary.average_test_capital
    )?;
    writer.flush()?;
    Ok(())
}

/// Capital curve as CSV (`index,balance,drawdown`). Row 0 is the starting balance.
pub fn write_capital_curve(path: &Path, result: &ResultRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "index,balance,drawdown")?;
    for (index, balance) in result.capital_history.iter().enumerate() {
        let drawdown = index
            .checked_sub(1)
            .and_then(|step| result.drawdown_history.get(step))
            .copied()
            .unwrap_or(0.0);
        writeln!(writer, "{},{},{}", index, balance, drawdown)?;
    }
    writer.flush()?;
    Ok(())
}

fn format_ratio(value: f64) -> String {
    if value.is_infinite() {
        "inf".to_string()
    } else {
        format!("{:.2}", value)
    }
}

pub fn format_result_table(result: &ResultRecord) -> String {
    let rows: Vec<(&str, String)> = vec![
        ("Symbol", result.symbol.clone()),
        ("Timeframe", result.timeframe.clone()),
        ("Candles", result.num_candles.to_string()),
        ("Test period", result.test_period.clone()),
        ("Initial balance", format!("${:.2}", result.initial_balance)),
        ("Final balance", format!("${:.2}", result.final_balance)),
        ("Trades", result.trade_count.to_string()),
        ("Wins / losses", format!("{} / {}", result.win_count, result.loss_count)),
        ("Win rate", format!("{:.2}%", result.win_rate * 100.0)),
        ("Max drawdown", format!("{:.2}%", result.max_drawdown)),
        ("Profit factor", format_ratio(result.profit_factor)),
        ("Risk/reward", format_ratio(result.risk_reward_ratio)),
        (
            "Annual return",
            result
                .annual_return
                .map(|value| format!("{:.2}%", value))
                .unwrap_or_else(|| "n/a".to_string()),
        ),
        ("Sharpe ratio", format!("{:.2}", result.sharpe_ratio)),
        ("Total profit", format!("${:.2}", result.total_profit)),
        ("Total loss", format!("${:.2}", result.total_loss)),
        ("Avg profit/trade", format!("${:.2}", result.avg_profit_per_trade)),
        ("Avg loss/trade", format!("${:.2}", result.avg_loss_per_trade)),
        (
            "Capital curve",
            result.chart_path.clone().unwrap_or_else(|| "-".to_string()),
        ),
    ];

    let label_width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    rows.iter()
        .map(|(label, value)| format!("{:<width$}  {}", label, value, width = label_width))
        .collect::<Vec<String>>()
        .join("\n")
}

pub fn format_segment_line(outcome: &SegmentOutcome) -> String {
    format!(
        "Segment {}: test capital ${:.2} ({})",
        outcome.segment.index + 1,
        outcome.test_score,
        format_parameters(&outcome.parameters)
    )
}
