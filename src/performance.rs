use crate::config::{Timeframe, MINUTES_PER_DAY, MINUTES_PER_HOUR, MINUTES_PER_YEAR};
use crate::models::TradeRecord;
use statrs::statistics::Statistics;

pub const UNKNOWN_TEST_PERIOD: &str = "unknown";

/// Statistics derived from one run's trade records and account history.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub test_period: String,
    pub trade_count: usize,
    pub win_count: usize,
    pub loss_count: usize,
    pub total_profit: f64,
    pub total_loss: f64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub avg_profit_per_trade: f64,
    pub avg_loss_per_trade: f64,
    pub risk_reward_ratio: f64,
    pub sharpe_ratio: f64,
    pub annual_return: Option<f64>,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_performance(
        trades: &[TradeRecord],
        capital_history: &[f64],
        drawdown_history: &[f64],
        num_candles: usize,
        timeframe: &str,
    ) -> PerformanceSummary {
        let total_minutes =
            Timeframe::lookup(timeframe).map(|tf| num_candles as u64 * tf.minutes());

        let profits: Vec<f64> = trades.iter().map(|trade| trade.profit).collect();
        let total_profit: f64 = profits.iter().filter(|p| **p > 0.0).sum();
        let total_loss: f64 = profits.iter().filter(|p| **p < 0.0).sum();
        let win_count = profits.iter().filter(|p| **p > 0.0).count();
        let loss_count = profits.iter().filter(|p| **p < 0.0).count();
        let win_rate = win_count as f64 / profits.len().max(1) as f64;

        let max_drawdown = drawdown_history
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(0.0, f64::max);

        let avg_profit_per_trade = total_profit / win_count.max(1) as f64;
        let avg_loss_per_trade = total_loss / loss_count.max(1) as f64;

        PerformanceSummary {
            test_period: total_minutes
                .map(Self::format_test_period)
                .unwrap_or_else(|| UNKNOWN_TEST_PERIOD.to_string()),
            trade_count: profits.len(),
            win_count,
            loss_count,
            total_profit,
            total_loss,
            win_rate,
            max_drawdown,
            profit_factor: Self::profit_factor(total_profit, total_loss),
            avg_profit_per_trade,
            avg_loss_per_trade,
            risk_reward_ratio: Self::risk_reward_ratio(
                avg_profit_per_trade,
                avg_loss_per_trade,
                loss_count,
            ),
            sharpe_ratio: Self::calculate_sharpe_ratio(&profits),
            annual_return: total_minutes.and_then(|minutes| {
                Self::calculate_annual_return(capital_history, num_candles, minutes)
            }),
        }
    }

    pub fn format_test_period(total_minutes: u64) -> String {
        let years = total_minutes / MINUTES_PER_YEAR;
        let days = (total_minutes % MINUTES_PER_YEAR) / MINUTES_PER_DAY;
        let hours = (total_minutes % MINUTES_PER_DAY) / MINUTES_PER_HOUR;
        let minutes = total_minutes % MINUTES_PER_HOUR;
        format!(
            "{} years, {} days, {} hours, {} minutes",
            years, days, hours, minutes
        )
    }

    /// Gross profit over absolute gross loss; infinite without losses.
    /// A run with neither wins nor losses reports 0.
    fn profit_factor(total_profit: f64, total_loss: f64) -> f64 {
        if total_loss != 0.0 {
            total_profit / total_loss.abs()
        } else if total_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    fn risk_reward_ratio(avg_profit: f64, avg_loss: f64, loss_count: usize) -> f64 {
        if loss_count > 0 {
            avg_profit / avg_loss.abs()
        } else if avg_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// Per-trade Sharpe proxy: mean over population standard deviation.
    pub fn calculate_sharpe_ratio(profits: &[f64]) -> f64 {
        if profits.len() < 2 {
            return 0.0;
        }

        let mean = profits.iter().mean();
        let std_dev = profits.iter().population_std_dev();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        mean / std_dev
    }

    /// Arithmetic mean of the simple returns between balances sampled at each
    /// whole-year boundary, in percent. `None` with fewer than two samples.
    pub fn calculate_annual_return(
        capital_history: &[f64],
        num_candles: usize,
        total_minutes: u64,
    ) -> Option<f64> {
        let test_years = total_minutes as f64 / MINUTES_PER_YEAR as f64;
        if test_years < 1.0 {
            return None;
        }

        let candles_per_year = num_candles as f64 / test_years;
        let whole_years = test_years.floor() as usize;
        let yearly_balances: Vec<f64> = (1..=whole_years)
            .map(|year| (year as f64 * candles_per_year) as usize)
            .filter_map(|index| capital_history.get(index).copied())
            .collect();

        if yearly_balances.len() < 2 {
            return None;
        }

        let annual_returns: Vec<f64> = yearly_balances
            .windows(2)
            .map(|pair| {
                if pair[0] != 0.0 {
                    pair[1] / pair[0] - 1.0
                } else {
                    0.0
                }
            })
            .collect();

        Some(annual_returns.iter().sum::<f64>() / annual_returns.len() as f64 * 100.0)
    }
}
