use crate::indicators::{calculate_atr, calculate_rsi};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_percent_param, get_usize_param_min};
use crate::trading_rules::{position_size, PositionSizingParams};
use std::collections::HashMap;

const MINIMUM_POSITION_SIZE: f64 = 0.001;

/// RSI mean reversion, long and short, sized on account risk and drawdown.
pub struct MeanReversionProvider {
    pub template_id: String,
    rsi_period: usize,
    rsi_overbought: f64,
    rsi_oversold: f64,
    rsi_exit: f64,
    stop_loss: f64,
    take_profit: f64,
    trailing_stop: f64,
    risk_per_trade: f64,
    atr_period: usize,
    atr_multiplier: f64,
    max_drawdown_threshold: f64,
    drawdown_risk_factor: f64,
    max_risk_per_trade: f64,
}

impl MeanReversionProvider {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        Self {
            template_id: "mean_reversion".to_string(),
            rsi_period: get_usize_param_min(parameters, "rsiPeriod", 14, 2),
            rsi_overbought: get_param_f64(parameters, "rsiOverbought", 70.0),
            rsi_oversold: get_param_f64(parameters, "rsiOversold", 30.0),
            rsi_exit: get_param_f64(parameters, "rsiExit", 50.0),
            stop_loss: get_percent_param(parameters, "stopLoss", 1.0),
            take_profit: get_percent_param(parameters, "takeProfit", 3.0),
            trailing_stop: get_percent_param(parameters, "trailingStop", 2.0),
            risk_per_trade: get_param_f64(parameters, "riskPerTrade", 0.02),
            atr_period: get_usize_param_min(parameters, "atrPeriod", 14, 1),
            atr_multiplier: get_param_f64(parameters, "atrMultiplier", 1.5),
            max_drawdown_threshold: get_param_f64(parameters, "maxDrawdownThreshold", 0.1),
            drawdown_risk_factor: get_param_f64(parameters, "drawdownRiskFactor", 0.5),
            max_risk_per_trade: get_param_f64(parameters, "maxRiskPerTrade", 0.02),
        }
    }

    fn size_for(&self, account: &AccountSnapshot, entry_price: f64, stop_price: f64) -> f64 {
        position_size(PositionSizingParams {
            capital: account.balance,
            entry_price,
            stop_price,
            max_balance: account.max_balance,
            base_risk: self.risk_per_trade,
            drawdown_threshold: self.max_drawdown_threshold,
            drawdown_factor: self.drawdown_risk_factor,
            max_risk: self.max_risk_per_trade,
            minimum_size: MINIMUM_POSITION_SIZE,
        })
    }
}

impl super::SignalProvider for MeanReversionProvider {
    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn trailing_stop_fraction(&self) -> f64 {
        self.trailing_stop
    }

    fn min_data_points(&self) -> usize {
        self.rsi_period.max(self.atr_period) + 1
    }

    fn generate_signals(
        &self,
        candles: &[Candle],
        account: &AccountSnapshot,
    ) -> Vec<AnnotatedCandle> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi = calculate_rsi(&closes, self.rsi_period);
        let atr = calculate_atr(candles, self.atr_period);
        let atr_multiplier = self.atr_multiplier.max(1.0);

        candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let close = candle.close;
                let (long_stop, short_stop) = match atr[i] {
                    Some(value) => (
                        close - value * atr_multiplier,
                        close + value * atr_multiplier,
                    ),
                    None => (
                        close * (1.0 - self.stop_loss),
                        close * (1.0 + self.stop_loss),
                    ),
                };

                let mut row = AnnotatedCandle::flat(candle.clone());
                row.long_signal = rsi[i] < self.rsi_oversold;
                row.short_signal = rsi[i] > self.rsi_overbought;
                row.close_long_signal = rsi[i] > self.rsi_exit;
                row.close_short_signal = rsi[i] < self.rsi_exit;
                row.long = SideLevels {
                    stop_loss_price: long_stop,
                    take_profit_price: close * (1.0 + self.take_profit),
                    trailing_stop_price: close * (1.0 - self.trailing_stop),
                    position_size: self.size_for(account, close, long_stop),
                };
                row.short = SideLevels {
                    stop_loss_price: short_stop,
                    take_profit_price: close * (1.0 - self.take_profit),
                    trailing_stop_price: close * (1.0 + self.trailing_stop),
                    position_size: self.size_for(account, close, short_stop),
                };
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::SignalProvider;
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + Duration::hours(i as i64),
                open: *close,
                high: close + 1.0,
                low: close - 1.0,
                close: *close,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn warmup_rows_carry_no_signals_and_percent_stops() {
        let provider = MeanReversionProvider::new(&HashMap::new());
        let input = candles(&[100.0; 5]);
        let rows = provider.generate_signals(&input, &AccountSnapshot::fresh(10_000.0));
        assert_eq!(rows.len(), 5);
        for row in &rows {
            assert!(!row.long_signal && !row.short_signal);
            assert!(!row.close_long_signal && !row.close_short_signal);
            assert!((row.long.stop_loss_price - 99.0).abs() < 1e-9);
            assert!((row.short.take_profit_price - 97.0).abs() < 1e-9);
            assert!((row.long.trailing_stop_price - 98.0).abs() < 1e-9);
        }
        assert_eq!(input[0].close, 100.0);
    }

    #[test]
    fn falling_prices_trigger_long_entries_with_atr_stops() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 2.0).collect();
        let provider = MeanReversionProvider::new(&HashMap::new());
        let rows = provider.generate_signals(&candles(&closes), &AccountSnapshot::fresh(10_000.0));

        let last = rows.last().unwrap();
        assert!(last.long_signal);
        assert!(!last.short_signal);
        assert!(last.close_short_signal);
        // True range is 3.0 on every step, so the stop sits 1.5 ATR below the close.
        assert!((last.long.stop_loss_price - (last.candle.close - 4.5)).abs() < 1e-9);
        // 200 at risk over 4.5 per unit.
        assert!((last.long.position_size - 200.0 / 4.5).abs() < 1e-9);
    }

    #[test]
    fn drawdown_halves_position_size() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 2.0).collect();
        let provider = MeanReversionProvider::new(&HashMap::new());
        let input = candles(&closes);
        let healthy = provider.generate_signals(&input, &AccountSnapshot::fresh(10_000.0));
        let stressed = provider.generate_signals(
            &input,
            &AccountSnapshot {
                balance: 10_000.0,
                max_balance: 20_000.0,
            },
        );
        let full = healthy.last().unwrap().long.position_size;
        let reduced = stressed.last().unwrap().long.position_size;
        assert!((reduced - full / 2.0).abs() < 1e-9);
    }
}
