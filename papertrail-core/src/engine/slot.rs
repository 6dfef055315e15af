//! Per-symbol live state. Each slot is the single owner of its symbol's
//! window, last price, and open position.

use chrono::{DateTime, Utc};

use crate::domain::{Position, Tick, TradeRecord};
use crate::entry::EntryRule;
use crate::position_management::{ExitCheck, PositionManager};
use crate::window::{OutOfOrderTick, RollingWindow, WindowEntry};

#[derive(Debug, Clone)]
pub struct SymbolSlot {
    pub(crate) symbol: String,
    pub(crate) window: RollingWindow,
    pub(crate) position: Option<Position>,
    pub(crate) last_tick: Option<WindowEntry>,
    pub(crate) halted: Option<String>,
}

/// Result of evaluating one slot during a clock sweep.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SweepOutcome {
    Idle,
    Holding { stop_raised: bool },
    Closed(TradeRecord),
    WantsEntry { price: f64, quantity: f64 },
    EntrySkipped { price: f64 },
}

impl SymbolSlot {
    pub fn new(symbol: String, window: RollingWindow) -> Self {
        Self {
            symbol,
            window,
            position: None,
            last_tick: None,
            halted: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_tick.map(|t| t.price)
    }

    pub fn halted_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Window update plus trailing-peak update for a fresh tick.
    /// Returns whether the open position's stop tightened.
    pub(crate) fn on_tick(
        &mut self,
        tick: &Tick,
        pm: &PositionManager,
    ) -> Result<bool, OutOfOrderTick> {
        self.window.push(tick.price, tick.event_time)?;
        self.last_tick = Some(WindowEntry {
            price: tick.price,
            time: tick.event_time,
        });
        Ok(pm.on_price(&mut self.position, tick.price))
    }

    /// Periodic evaluation against the latest known price.
    pub(crate) fn sweep(
        &mut self,
        now: DateTime<Utc>,
        rule: &EntryRule,
        pm: &PositionManager,
        balance: f64,
    ) -> SweepOutcome {
        if self.halted.is_some() {
            return SweepOutcome::Idle;
        }
        self.window.expire(now);
        let Some(last) = self.last_tick else {
            return SweepOutcome::Idle;
        };

        if self.position.is_some() {
            return match pm.check_exit(&mut self.position, last.price, now) {
                Some(ExitCheck::Closed(trade)) => SweepOutcome::Closed(trade),
                Some(ExitCheck::Holding { stop_raised }) => SweepOutcome::Holding { stop_raised },
                None => SweepOutcome::Idle,
            };
        }

        if !rule.should_enter(&self.symbol, last.price, self.window.minimum()) {
            return SweepOutcome::Idle;
        }
        match pm.plan_entry(balance, last.price) {
            Some(quantity) => SweepOutcome::WantsEntry {
                price: last.price,
                quantity,
            },
            None => SweepOutcome::EntrySkipped { price: last.price },
        }
    }
}
