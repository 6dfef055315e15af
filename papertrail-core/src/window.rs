//! Rolling lookback window: trailing time window of prices per symbol.
//!
//! Ticks arrive in non-decreasing time order, so expiry only ever removes from
//! the front. Alongside the raw entries a monotonic deque of increasing prices
//! is kept, which makes `minimum()` O(1) and `push()` amortized O(1).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub price: f64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("tick at {time} is older than the newest window entry at {newest}")]
pub struct OutOfOrderTick {
    pub time: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RollingWindow {
    lookback: Duration,
    entries: VecDeque<WindowEntry>,
    /// Candidates for the minimum: prices strictly increasing front to back.
    minima: VecDeque<WindowEntry>,
}

impl RollingWindow {
    pub fn new(lookback: Duration) -> Self {
        assert!(lookback > Duration::zero(), "lookback must be positive");
        Self {
            lookback,
            entries: VecDeque::new(),
            minima: VecDeque::new(),
        }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Append a price and drop everything older than `time - lookback`.
    pub fn push(&mut self, price: f64, time: DateTime<Utc>) -> Result<(), OutOfOrderTick> {
        if let Some(newest) = self.entries.back() {
            if time < newest.time {
                return Err(OutOfOrderTick {
                    time,
                    newest: newest.time,
                });
            }
        }

        let entry = WindowEntry { price, time };
        self.entries.push_back(entry);
        while self.minima.back().is_some_and(|last| last.price >= price) {
            self.minima.pop_back();
        }
        self.minima.push_back(entry);

        self.expire(time);
        Ok(())
    }

    /// Drop entries with `entry.time < now - lookback`. A cutoff before the
    /// earliest representable time expires nothing.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.lookback) else {
            return;
        };
        while self.entries.front().is_some_and(|e| e.time < cutoff) {
            self.entries.pop_front();
        }
        while self.minima.front().is_some_and(|e| e.time < cutoff) {
            self.minima.pop_front();
        }
    }

    /// Lowest price currently in the window; `None` means no signal.
    pub fn minimum(&self) -> Option<f64> {
        self.minima.front().map(|e| e.price)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn empty_window_has_no_minimum() {
        let window = RollingWindow::new(Duration::seconds(60));
        assert_eq!(window.minimum(), None);
        assert!(window.is_empty());
    }

    #[test]
    fn minimum_tracks_lowest_price() {
        let mut window = RollingWindow::new(Duration::seconds(60));
        window.push(101.0, at(0)).unwrap();
        window.push(99.0, at(1)).unwrap();
        window.push(100.0, at(2)).unwrap();
        assert_eq!(window.minimum(), Some(99.0));
    }

    #[test]
    fn old_entries_are_purged_on_push() {
        let mut window = RollingWindow::new(Duration::seconds(10));
        window.push(90.0, at(0)).unwrap();
        window.push(100.0, at(5)).unwrap();
        window.push(105.0, at(11)).unwrap();
        // the 90.0 tick is 11s old, past the 10s lookback
        assert_eq!(window.minimum(), Some(100.0));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn entry_exactly_at_cutoff_is_kept() {
        let mut window = RollingWindow::new(Duration::seconds(10));
        window.push(90.0, at(0)).unwrap();
        window.push(100.0, at(10)).unwrap();
        assert_eq!(window.minimum(), Some(90.0));
    }

    #[test]
    fn expire_can_empty_the_window() {
        let mut window = RollingWindow::new(Duration::seconds(10));
        window.push(90.0, at(0)).unwrap();
        window.expire(at(30));
        assert_eq!(window.minimum(), None);
        assert!(window.is_empty());
    }

    #[test]
    fn out_of_order_tick_is_rejected() {
        let mut window = RollingWindow::new(Duration::seconds(10));
        window.push(90.0, at(5)).unwrap();
        assert!(window.push(80.0, at(4)).is_err());
        assert_eq!(window.minimum(), Some(90.0));
    }

    #[test]
    fn huge_lookback_never_expires() {
        let mut window = RollingWindow::new(Duration::MAX);
        window.push(90.0, at(0)).unwrap();
        window.push(100.0, at(1_000_000)).unwrap();
        window.expire(at(2_000_000));
        assert_eq!(window.minimum(), Some(90.0));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn equal_prices_survive_expiry_of_older_duplicate() {
        let mut window = RollingWindow::new(Duration::seconds(10));
        window.push(95.0, at(0)).unwrap();
        window.push(95.0, at(5)).unwrap();
        window.push(97.0, at(12)).unwrap();
        assert_eq!(window.minimum(), Some(95.0));
    }
}
