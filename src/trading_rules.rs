use crate::models::{AnnotatedCandle, ExitReason, Position, Side};

pub const PRICE_EPSILON: f64 = 1e-6;

/// Smallest distance between entry and stop used when sizing on risk.
pub const MIN_RISK_PER_UNIT: f64 = 1e-8;

pub struct RiskAdjustmentParams {
    pub balance: f64,
    pub max_balance: f64,
    pub base_risk: f64,
    pub drawdown_threshold: f64,
    pub drawdown_factor: f64,
    pub max_risk: f64,
}

/// Scale the per-trade risk fraction down once the account is in drawdown.
pub fn adjust_risk(params: &RiskAdjustmentParams) -> f64 {
    let drawdown = if params.max_balance > 0.0 {
        (params.max_balance - params.balance) / params.max_balance
    } else {
        0.0
    };

    let risk = if drawdown > params.drawdown_threshold {
        params.base_risk * params.drawdown_factor
    } else {
        params.base_risk
    };

    risk.min(params.max_risk)
}

pub struct PositionSizingParams {
    pub capital: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub max_balance: f64,
    pub base_risk: f64,
    pub drawdown_threshold: f64,
    pub drawdown_factor: f64,
    pub max_risk: f64,
    pub minimum_size: f64,
}

/// Risk-based size raised to `minimum_size`, then capped at `capital / entry_price`.
/// The cap applies last, so a position never costs more than the capital.
pub fn position_size(params: PositionSizingParams) -> f64 {
    let PositionSizingParams {
        capital,
        entry_price,
        stop_price,
        max_balance,
        base_risk,
        drawdown_threshold,
        drawdown_factor,
        max_risk,
        minimum_size,
    } = params;

    if !entry_price.is_finite() || entry_price <= 0.0 || !capital.is_finite() || capital <= 0.0 {
        return 0.0;
    }

    let risk_fraction = adjust_risk(&RiskAdjustmentParams {
        balance: capital,
        max_balance,
        base_risk,
        drawdown_threshold,
        drawdown_factor,
        max_risk,
    });
    let risk_amount = capital * risk_fraction;
    let risk_per_unit = (entry_price - stop_price).abs().max(MIN_RISK_PER_UNIT);
    let size = risk_amount / risk_per_unit;

    size.max(minimum_size).min(capital / entry_price)
}

/// Fraction-of-capital size used by the fixed-fraction provider.
pub fn fixed_fraction_size(capital: f64, price: f64, fraction: f64, minimum_size: f64) -> f64 {
    if !price.is_finite() || price <= 0.0 || !capital.is_finite() || capital <= 0.0 {
        return 0.0;
    }
    let size = capital * fraction.max(0.0) / price;
    size.max(minimum_size).min(capital / price)
}

/// First exit condition met on `row` for the open position, in priority order
/// stop-loss, take-profit, trailing-stop, signal. Conditions compare the close.
pub fn evaluate_exit(position: &Position, row: &AnnotatedCandle) -> Option<(ExitReason, f64)> {
    let close = row.candle.close;
    match position.side {
        Side::Long => {
            if close <= position.stop_loss {
                Some((ExitReason::StopLoss, position.stop_loss))
            } else if close >= position.take_profit {
                Some((ExitReason::TakeProfit, position.take_profit))
            } else if close < position.trailing_stop {
                Some((ExitReason::TrailingStop, position.trailing_stop))
            } else if row.close_signal(Side::Long) {
                Some((ExitReason::Signal, close))
            } else {
                None
            }
        }
        Side::Short => {
            if close >= position.stop_loss {
                Some((ExitReason::StopLoss, position.stop_loss))
            } else if close <= position.take_profit {
                Some((ExitReason::TakeProfit, position.take_profit))
            } else if close > position.trailing_stop {
                Some((ExitReason::TrailingStop, position.trailing_stop))
            } else if row.close_signal(Side::Short) {
                Some((ExitReason::Signal, close))
            } else {
                None
            }
        }
    }
}

/// Tightened trailing stop for `side`; never loosens the current level.
pub fn ratchet_trailing_stop(side: Side, current_stop: f64, close: f64, fraction: f64) -> f64 {
    match side {
        Side::Long => current_stop.max(close * (1.0 - fraction)),
        Side::Short => current_stop.min(close * (1.0 + fraction)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;
    use chrono::Utc;

    fn row(close: f64) -> AnnotatedCandle {
        AnnotatedCandle::flat(Candle {
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        })
    }

    fn long_position() -> Position {
        Position {
            side: Side::Long,
            entry_index: 0,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            trailing_stop: 97.0,
            size: 1.0,
        }
    }

    #[test]
    fn test_adjust_risk_halves_in_drawdown() {
        let mut params = RiskAdjustmentParams {
            balance: 8_000.0,
            max_balance: 10_000.0,
            base_risk: 0.02,
            drawdown_threshold: 0.1,
            drawdown_factor: 0.5,
            max_risk: 0.02,
        };
        assert!((adjust_risk(&params) - 0.01).abs() < 1e-12);

        params.balance = 9_500.0;
        assert!((adjust_risk(&params) - 0.02).abs() < 1e-12);

        params.base_risk = 0.05;
        assert!((adjust_risk(&params) - 0.02).abs() < 1e-12);

        params.max_balance = 0.0;
        assert!((adjust_risk(&params) - 0.02).abs() < 1e-12);
    }

    fn sizing(capital: f64, entry: f64, stop: f64) -> PositionSizingParams {
        PositionSizingParams {
            capital,
            entry_price: entry,
            stop_price: stop,
            max_balance: capital,
            base_risk: 0.02,
            drawdown_threshold: 0.1,
            drawdown_factor: 0.5,
            max_risk: 0.02,
            minimum_size: 0.001,
        }
    }

    #[test]
    fn test_position_size_risk_based_and_clamped() {
        // 200 at risk over a 5.0 stop distance.
        assert!((position_size(sizing(10_000.0, 100.0, 95.0)) - 40.0).abs() < 1e-9);

        // Zero-width stop is capped at what the capital can buy.
        assert!((position_size(sizing(10_000.0, 100.0, 100.0)) - 100.0).abs() < 1e-9);

        // Tiny risk rounds up to the minimum instead of zero.
        let tiny = position_size(PositionSizingParams {
            base_risk: 1e-9,
            ..sizing(10_000.0, 100.0, 50.0)
        });
        assert!((tiny - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_fraction_size() {
        assert!((fixed_fraction_size(10_000.0, 100.0, 0.1, 0.001) - 10.0).abs() < 1e-9);
        assert!((fixed_fraction_size(10_000.0, 100.0, 5.0, 0.001) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_capital_cap_beats_minimum_size() {
        let capital = 50.0;
        let price = 60_000.0;

        let risk_sized = position_size(sizing(capital, price, 59_000.0));
        assert!((risk_sized - capital / price).abs() < 1e-15);
        assert!(risk_sized * price <= capital + 1e-9);

        let fraction_sized = fixed_fraction_size(capital, price, 0.1, 0.001);
        assert!((fraction_sized - capital / price).abs() < 1e-15);
        assert!(fraction_sized * price <= capital + 1e-9);

        assert_eq!(position_size(sizing(0.0, price, 59_000.0)), 0.0);
        assert_eq!(fixed_fraction_size(-10.0, price, 0.1, 0.001), 0.0);
    }

    #[test]
    fn test_stop_loss_wins_over_other_exits() {
        let mut position = long_position();
        position.take_profit = 90.0;
        let outcome = evaluate_exit(&position, &row(94.0)).unwrap();
        assert_eq!(outcome, (ExitReason::StopLoss, 95.0));
    }

    #[test]
    fn test_exit_priority_for_long() {
        let position = long_position();
        assert_eq!(
            evaluate_exit(&position, &row(111.0)),
            Some((ExitReason::TakeProfit, 110.0))
        );
        assert_eq!(
            evaluate_exit(&position, &row(96.0)),
            Some((ExitReason::TrailingStop, 97.0))
        );
        assert_eq!(evaluate_exit(&position, &row(100.0)), None);

        let mut signalled = row(100.0);
        signalled.close_long_signal = true;
        assert_eq!(
            evaluate_exit(&position, &signalled),
            Some((ExitReason::Signal, 100.0))
        );
    }

    #[test]
    fn test_exit_priority_for_short() {
        let position = Position {
            side: Side::Short,
            entry_index: 0,
            entry_price: 100.0,
            stop_loss: 105.0,
            take_profit: 90.0,
            trailing_stop: 103.0,
            size: 1.0,
        };
        assert_eq!(
            evaluate_exit(&position, &row(106.0)),
            Some((ExitReason::StopLoss, 105.0))
        );
        assert_eq!(
            evaluate_exit(&position, &row(89.0)),
            Some((ExitReason::TakeProfit, 90.0))
        );
        assert_eq!(
            evaluate_exit(&position, &row(104.0)),
            Some((ExitReason::TrailingStop, 103.0))
        );
        let mut signalled = row(99.0);
        signalled.close_short_signal = true;
        assert_eq!(
            evaluate_exit(&position, &signalled),
            Some((ExitReason::Signal, 99.0))
        );
    }

    #[test]
    fn test_trailing_stop_only_tightens() {
        // 97.96 * 0.98 = 96.0
        let stop = ratchet_trailing_stop(Side::Long, 97.0, 97.959_183_673_469_4, 0.02);
        assert_eq!(stop, 97.0);
        let raised = ratchet_trailing_stop(Side::Long, 97.0, 105.0, 0.02);
        assert!((raised - 102.9).abs() < 1e-9);

        let short_stop = ratchet_trailing_stop(Side::Short, 103.0, 95.0, 0.02);
        assert!((short_stop - 96.9).abs() < 1e-9);
        assert_eq!(ratchet_trailing_stop(Side::Short, 103.0, 110.0, 0.02), 103.0);
    }
}
