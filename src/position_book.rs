use crate::models::{AnnotatedCandle, Position, Side, TradeRecord};
use crate::trading_rules::{evaluate_exit, ratchet_trailing_stop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    Flat,
    Open(Side),
}

/// Holds at most one open position.
#[derive(Debug, Default)]
pub struct PositionBook {
    slot: Option<Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { slot: None }
    }

    pub fn state(&self) -> BookState {
        match &self.slot {
            Some(position) => BookState::Open(position.side),
            None => BookState::Flat,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.slot.is_none()
    }

    pub fn position(&self) -> Option<&Position> {
        self.slot.as_ref()
    }

    /// Open `side` at the row's close using the levels the provider computed.
    /// Returns `None` without touching the book when a position is already open.
    pub fn open(&mut self, side: Side, index: usize, row: &AnnotatedCandle) -> Option<&Position> {
        if self.slot.is_some() {
            return None;
        }
        let levels = row.levels(side);
        self.slot = Some(Position {
            side,
            entry_index: index,
            entry_price: row.candle.close,
            stop_loss: levels.stop_loss_price,
            take_profit: levels.take_profit_price,
            trailing_stop: levels.trailing_stop_price,
            size: levels.position_size,
        });
        self.slot.as_ref()
    }

    /// Apply exit rules to the open position; a triggered exit empties the slot.
    pub fn apply_exit_rules(&mut self, index: usize, row: &AnnotatedCandle) -> Option<TradeRecord> {
        let (exit_reason, exit_price) = evaluate_exit(self.slot.as_ref()?, row)?;
        let position = self.slot.take()?;
        Some(TradeRecord {
            side: position.side,
            entry_index: position.entry_index,
            exit_index: index,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            profit: position.profit_at(exit_price),
            exit_reason,
        })
    }

    pub fn ratchet_trailing_stop(&mut self, close: f64, fraction: f64) {
        if let Some(position) = self.slot.as_mut() {
            position.trailing_stop =
                ratchet_trailing_stop(position.side, position.trailing_stop, close, fraction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, ExitReason, SideLevels};
    use chrono::Utc;

    fn row(close: f64) -> AnnotatedCandle {
        let mut row = AnnotatedCandle::flat(Candle {
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        });
        row.long = SideLevels {
            stop_loss_price: 95.0,
            take_profit_price: 110.0,
            trailing_stop_price: 97.0,
            position_size: 2.0,
        };
        row
    }

    #[test]
    fn refuses_second_open_position() {
        let mut book = PositionBook::new();
        assert_eq!(book.state(), BookState::Flat);
        assert!(book.open(Side::Long, 0, &row(100.0)).is_some());
        assert_eq!(book.state(), BookState::Open(Side::Long));
        assert!(book.open(Side::Short, 1, &row(100.0)).is_none());
        assert_eq!(book.state(), BookState::Open(Side::Long));
    }

    #[test]
    fn stop_loss_exit_realizes_loss_at_stop_price() {
        let mut book = PositionBook::new();
        book.open(Side::Long, 0, &row(100.0));
        let trade = book.apply_exit_rules(1, &row(94.0)).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert!((trade.profit - (95.0 - 100.0) * 2.0).abs() < 1e-9);
        assert!(book.is_flat());
        assert!(book.apply_exit_rules(2, &row(94.0)).is_none());
    }

    #[test]
    fn ratchet_keeps_tighter_stop() {
        let mut book = PositionBook::new();
        book.open(Side::Long, 0, &row(100.0));
        book.ratchet_trailing_stop(98.0, 0.02);
        assert_eq!(book.position().unwrap().trailing_stop, 97.0);
        book.ratchet_trailing_stop(105.0, 0.02);
        assert!((book.position().unwrap().trailing_stop - 102.9).abs() < 1e-9);
    }
}
