use crate::indicators::calculate_sma;
use crate::models::*;
use crate::param_utils::{get_param_f64_clamped, get_percent_param, get_usize_param_min};
use crate::trading_rules::fixed_fraction_size;
use std::collections::HashMap;

const MINIMUM_POSITION_SIZE: f64 = 0.001;

/// Long-only moving-average crossover that commits a fixed fraction of the balance.
pub struct FixedFractionProvider {
    pub template_id: String,
    fast_period: usize,
    slow_period: usize,
    stop_loss: f64,
    take_profit: f64,
    trailing_stop: f64,
    position_fraction: f64,
}

impl FixedFractionProvider {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let fast_period = get_usize_param_min(parameters, "fastPeriod", 10, 1);
        let slow_period = get_usize_param_min(parameters, "slowPeriod", 50, 2).max(fast_period + 1);
        Self {
            template_id: "fixed_fraction".to_string(),
            fast_period,
            slow_period,
            stop_loss: get_percent_param(parameters, "stopLoss", 2.0),
            take_profit: get_percent_param(parameters, "takeProfit", 4.0),
            trailing_stop: get_percent_param(parameters, "trailingStop", 3.0),
            position_fraction: get_param_f64_clamped(parameters, "positionFraction", 0.1, 0.0, 1.0),
        }
    }
}

impl super::SignalProvider for FixedFractionProvider {
    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn trailing_stop_fraction(&self) -> f64 {
        self.trailing_stop
    }

    fn min_data_points(&self) -> usize {
        self.slow_period + 1
    }

    fn generate_signals(
        &self,
        candles: &[Candle],
        account: &AccountSnapshot,
    ) -> Vec<AnnotatedCandle> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let fast = calculate_sma(&closes, self.fast_period);
        let slow = calculate_sma(&closes, self.slow_period);

        candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let close = candle.close;
                let mut row = AnnotatedCandle::flat(candle.clone());

                // Both averages need a full window on this row and the previous one.
                if i >= self.slow_period {
                    let above_now = fast[i] > slow[i];
                    let above_before = fast[i - 1] > slow[i - 1];
                    row.long_signal = above_now && !above_before;
                    row.close_long_signal = !above_now && above_before;
                }

                row.long = SideLevels {
                    stop_loss_price: close * (1.0 - self.stop_loss),
                    take_profit_price: close * (1.0 + self.take_profit),
                    trailing_stop_price: close * (1.0 - self.trailing_stop),
                    position_size: fixed_fraction_size(
                        account.balance,
                        close,
                        self.position_fraction,
                        MINIMUM_POSITION_SIZE,
                    ),
                };
                row
            })
            .collect()
    }
}
