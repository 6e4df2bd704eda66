use crate::config::EngineConfig;
use crate::models::*;
use crate::performance::PerformanceCalculator;
use crate::position_book::PositionBook;
use crate::report::{LogReporter, RunReporter};
use crate::strategy::SignalProvider;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Realized capital and its per-candle history for one run.
#[derive(Debug, Clone)]
struct AccountState {
    balance: f64,
    max_balance: f64,
    capital_history: Vec<f64>,
    drawdown_history: Vec<f64>,
}

impl AccountState {
    fn new(initial_balance: f64, num_candles: usize) -> Self {
        let mut capital_history = Vec::with_capacity(num_candles + 1);
        capital_history.push(initial_balance);
        Self {
            balance: initial_balance,
            max_balance: initial_balance,
            capital_history,
            drawdown_history: Vec::with_capacity(num_candles),
        }
    }

    fn record_step(&mut self) {
        self.max_balance = self.max_balance.max(self.balance);
        let drawdown = if self.max_balance > 0.0 {
            ((self.max_balance - self.balance) / self.max_balance * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.drawdown_history.push(drawdown);
        self.capital_history.push(self.balance);
    }
}

pub struct BacktestEngine {
    config: EngineConfig,
    reporter: Arc<dyn RunReporter>,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reporter: Arc::new(LogReporter),
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate signals with a fresh account snapshot and replay them, ratcheting
    /// trailing stops by the provider's own trailing fraction.
    pub fn run_strategy(
        &self,
        provider: &dyn SignalProvider,
        candles: &[Candle],
        symbol: &str,
        timeframe: &str,
    ) -> ResultRecord {
        let snapshot = AccountSnapshot::fresh(self.config.initial_balance);
        let annotated = provider.generate_signals(candles, &snapshot);
        self.replay(
            &annotated,
            symbol,
            timeframe,
            provider.trailing_stop_fraction(),
        )
    }

    pub fn run(&self, annotated: &[AnnotatedCandle], symbol: &str, timeframe: &str) -> ResultRecord {
        self.replay(
            annotated,
            symbol,
            timeframe,
            self.config.trailing_stop_fraction,
        )
    }

    fn replay(
        &self,
        annotated: &[AnnotatedCandle],
        symbol: &str,
        timeframe: &str,
        trailing_stop_fraction: f64,
    ) -> ResultRecord {
        let num_candles = annotated.len();
        self.reporter.run_started(symbol, timeframe, num_candles);

        let mut account = AccountState::new(self.config.initial_balance, num_candles);
        let mut book = PositionBook::new();
        let mut trades: Vec<TradeRecord> = Vec::new();

        for (index, row) in annotated.iter().enumerate() {
            if book.is_flat() {
                let side = if row.long_signal {
                    Some(Side::Long)
                } else if row.short_signal {
                    Some(Side::Short)
                } else {
                    None
                };
                if let Some(side) = side {
                    if let Some(position) = book.open(side, index, row) {
                        self.reporter.position_opened(index, position);
                    }
                }
            }

            if let Some(trade) = book.apply_exit_rules(index, row) {
                account.balance += trade.profit;
                self.reporter.position_closed(&trade, account.balance);
                trades.push(trade);
            }

            book.ratchet_trailing_stop(row.candle.close, trailing_stop_fraction);
            account.record_step();
        }

        let summary = PerformanceCalculator::calculate_performance(
            &trades,
            &account.capital_history,
            &account.drawdown_history,
            num_candles,
            timeframe,
        );

        let result = ResultRecord {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            num_candles,
            test_period: summary.test_period,
            initial_balance: self.config.initial_balance,
            final_balance: account.balance,
            trade_count: summary.trade_count,
            win_rate: summary.win_rate,
            max_drawdown: summary.max_drawdown,
            profit_factor: summary.profit_factor,
            risk_reward_ratio: summary.risk_reward_ratio,
            annual_return: summary.annual_return,
            sharpe_ratio: summary.sharpe_ratio,
            total_profit: summary.total_profit,
            total_loss: summary.total_loss,
            win_count: summary.win_count,
            loss_count: summary.loss_count,
            avg_profit_per_trade: summary.avg_profit_per_trade,
            avg_loss_per_trade: summary.avg_loss_per_trade,
            chart_path: None,
            capital_history: account.capital_history,
            drawdown_history: account.drawdown_history,
            trades,
            created_at: Utc::now(),
        };

        self.reporter.run_completed(&result);
        result
    }
}
