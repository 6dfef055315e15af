//! Persisted engine state: what a store keeps for restart continuity.

use serde::{Deserialize, Serialize};

use crate::domain::{Position, TradeRecord};
use crate::engine::EngineEvent;
use crate::history::OutcomeCounts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub balance: f64,
    pub open_positions: Vec<Position>,
    /// Closed trades, oldest first.
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    pub next_position_id: u64,
    #[serde(default)]
    pub closes_applied: u64,
    #[serde(default)]
    pub config_fingerprint: Option<String>,
    /// Lifetime wins and losses, including trades no longer in `trades`.
    #[serde(default)]
    pub outcome_totals: OutcomeCounts,
}

impl PersistedState {
    pub fn fresh(balance: f64) -> Self {
        Self {
            balance,
            open_positions: Vec::new(),
            trades: Vec::new(),
            next_position_id: 1,
            closes_applied: 0,
            config_fingerprint: None,
            outcome_totals: OutcomeCounts::default(),
        }
    }

    /// Fold one engine event into this state, mirroring the engine's own
    /// transition.
    pub fn apply(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::PositionOpened(position) => {
                self.open_positions.retain(|p| p.id != position.id);
                self.open_positions.push(position.clone());
                self.next_position_id = self.next_position_id.max(position.id.0 + 1);
            }
            EngineEvent::StopRaised {
                position_id,
                peak_price,
                trailing_stop_price,
                ..
            } => {
                if let Some(p) = self.open_positions.iter_mut().find(|p| p.id == *position_id) {
                    p.peak_price = *peak_price;
                    p.trailing_stop_price = *trailing_stop_price;
                }
            }
            EngineEvent::PositionClosed { trade, balance } => {
                self.open_positions.retain(|p| p.id != trade.position_id);
                self.trades.push(trade.clone());
                self.balance = *balance;
                self.closes_applied += 1;
                self.outcome_totals.record(trade);
            }
            EngineEvent::SymbolHalted { .. } => {}
        }
    }
}
