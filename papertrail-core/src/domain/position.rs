//! Position: a simulated long holding with a percent trailing stop.
//!
//! For a long: `trailing_stop_price = peak_price * (1 - trail_pct)`.
//! The peak only rises, so the stop only tightens (ratchet invariant).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PositionId;
use super::trade::TradeRecord;

/// Lifecycle status. `Closed` is terminal; closed positions leave the live set
/// in the same step and live on only as a [`TradeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Stop level for a long trailing `trail_pct` below `peak`.
pub fn trailing_stop_for(peak: f64, trail_pct: f64) -> f64 {
    peak * (1.0 - trail_pct)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    pub peak_price: f64,
    pub trailing_stop_price: f64,
    pub trail_pct: f64,
    pub status: PositionStatus,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    /// Open a long at `entry_price`. Peak and stop start from the entry price.
    pub fn open(
        id: PositionId,
        symbol: impl Into<String>,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        quantity: f64,
        trail_pct: f64,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            entry_price,
            entry_time,
            quantity,
            peak_price: entry_price,
            trailing_stop_price: trailing_stop_for(entry_price, trail_pct),
            trail_pct,
            status: PositionStatus::Open,
            exit_price: None,
            exit_time: None,
            realized_pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Raise the peak if `price` is a new high. Returns whether the stop moved.
    ///
    /// The stop is ratcheted with `max` so it can never loosen, even if the
    /// position was restored with a stop above what the current peak implies.
    pub fn raise_peak(&mut self, price: f64) -> bool {
        if !self.is_open() || price <= self.peak_price {
            return false;
        }
        self.peak_price = price;
        let proposed = trailing_stop_for(price, self.trail_pct);
        let previous = self.trailing_stop_price;
        self.trailing_stop_price = previous.max(proposed);
        self.trailing_stop_price > previous
    }

    /// Whether `price` touches or crosses below the stop.
    pub fn stop_hit(&self, price: f64) -> bool {
        self.is_open() && price <= self.trailing_stop_price
    }

    pub fn unrealized_pnl(&self, last_price: f64) -> f64 {
        (last_price - self.entry_price) * self.quantity
    }

    /// Transition OPEN → CLOSED, consuming the live position.
    pub fn close(self, exit_price: f64, exit_time: DateTime<Utc>) -> TradeRecord {
        let pnl = (exit_price - self.entry_price) * self.quantity;
        TradeRecord {
            position_id: self.id,
            symbol: self.symbol,
            entry_price: self.entry_price,
            exit_price,
            quantity: self.quantity,
            peak_price: self.peak_price,
            trailing_stop_price: self.trailing_stop_price,
            realized_pnl: pnl,
            opened_at: self.entry_time,
            closed_at: exit_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_at(price: f64) -> Position {
        Position::open(PositionId(1), "X", price, Utc::now(), 1.0, 0.01)
    }

    #[test]
    fn stop_starts_below_entry() {
        let pos = open_at(100.0);
        assert!((pos.trailing_stop_price - 99.0).abs() < 1e-9);
        assert_eq!(pos.peak_price, 100.0);
    }

    #[test]
    fn stop_follows_new_highs_only() {
        let mut pos = open_at(100.0);
        assert!(pos.raise_peak(110.0));
        assert!((pos.trailing_stop_price - 108.9).abs() < 1e-9);

        assert!(!pos.raise_peak(105.0));
        assert_eq!(pos.peak_price, 110.0);
        assert!((pos.trailing_stop_price - 108.9).abs() < 1e-9);
    }

    #[test]
    fn stop_hit_is_inclusive() {
        let pos = open_at(100.0);
        assert!(pos.stop_hit(99.0));
        assert!(pos.stop_hit(98.0));
        assert!(!pos.stop_hit(99.01));
    }

    #[test]
    fn close_realizes_pnl() {
        let mut pos = open_at(100.0);
        pos.quantity = 2.0;
        let trade = pos.close(103.0, Utc::now());
        assert!((trade.realized_pnl - 6.0).abs() < 1e-9);
        assert_eq!(trade.exit_price, 103.0);
    }

    #[test]
    fn close_record_carries_peak_stop_and_times() {
        let opened = Utc::now();
        let mut pos = Position::open(PositionId(7), "Y", 50.0, opened, 1.0, 0.1);
        pos.raise_peak(60.0);
        let closed = opened + chrono::Duration::seconds(30);
        let trade = pos.close(54.0, closed);
        assert_eq!(trade.position_id, PositionId(7));
        assert_eq!(trade.symbol, "Y");
        assert_eq!(trade.peak_price, 60.0);
        assert!((trade.trailing_stop_price - 54.0).abs() < 1e-9);
        assert!((trade.realized_pnl - 4.0).abs() < 1e-9);
        assert_eq!(trade.opened_at, opened);
        assert_eq!(trade.closed_at, closed);
    }
}
