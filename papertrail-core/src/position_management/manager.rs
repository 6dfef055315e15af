//! Position manager: per-symbol NONE/OPEN state machine.
//!
//! The live state for one symbol is an `Option<Position>`: `None` is NONE,
//! `Some` is OPEN. CLOSED never lives in the slot; closing takes the position
//! out and returns its [`TradeRecord`] in the same call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sizing::size_quantity;
use crate::domain::{Position, PositionId, TradeRecord};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionManager {
    /// Trail distance below the peak as a fraction (0.01 = 1%).
    pub trail_pct: f64,
    /// Share of current balance committed to a new position.
    pub allocation_fraction: f64,
    /// Decimal places quantities are floored to.
    pub quantity_precision: u32,
}

/// What happened to a live position during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitCheck {
    /// Still open; `stop_raised` reports whether the stop tightened.
    Holding { stop_raised: bool },
    Closed(TradeRecord),
}

impl PositionManager {
    pub fn new(trail_pct: f64, allocation_fraction: f64, quantity_precision: u32) -> Self {
        assert!(trail_pct > 0.0 && trail_pct < 1.0, "trail_pct must be in (0, 1)");
        assert!(
            allocation_fraction > 0.0 && allocation_fraction <= 1.0,
            "allocation_fraction must be in (0, 1]"
        );
        Self {
            trail_pct,
            allocation_fraction,
            quantity_precision,
        }
    }

    /// Size a prospective entry. `None` is the policy no-op.
    pub fn plan_entry(&self, balance: f64, price: f64) -> Option<f64> {
        size_quantity(balance, self.allocation_fraction, price, self.quantity_precision)
    }

    /// NONE → OPEN. Refuses to overwrite a live position or open a
    /// non-positive quantity.
    pub fn open(
        &self,
        slot: &mut Option<Position>,
        id: PositionId,
        symbol: &str,
        price: f64,
        time: DateTime<Utc>,
        quantity: f64,
    ) -> Result<Position, EngineError> {
        if let Some(existing) = slot.as_ref() {
            return Err(EngineError::invariant(
                symbol,
                format!("open requested while {} is still open", existing.id),
            ));
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(EngineError::invariant(
                symbol,
                format!("refusing to open with quantity {quantity}"),
            ));
        }
        let position = Position::open(id, symbol, price, time, quantity, self.trail_pct);
        *slot = Some(position.clone());
        Ok(position)
    }

    /// OPEN → OPEN on a fresh price: raise the peak if it is a new high.
    pub fn on_price(&self, slot: &mut Option<Position>, price: f64) -> bool {
        slot.as_mut().is_some_and(|pos| pos.raise_peak(price))
    }

    /// Raise the peak with `price`, then close if `price <= stop`.
    pub fn check_exit(
        &self,
        slot: &mut Option<Position>,
        price: f64,
        time: DateTime<Utc>,
    ) -> Option<ExitCheck> {
        let position = slot.as_mut()?;
        let stop_raised = position.raise_peak(price);
        if !position.stop_hit(price) {
            return Some(ExitCheck::Holding { stop_raised });
        }
        let position = slot.take()?;
        Some(ExitCheck::Closed(position.close(price, time)))
    }
}
