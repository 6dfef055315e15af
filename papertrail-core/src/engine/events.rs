use serde::{Deserialize, Serialize};

use crate::domain::{Position, PositionId, TradeRecord};

/// State changes emitted by the engine, consumed by persistence and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PositionOpened(Position),
    StopRaised {
        symbol: String,
        position_id: PositionId,
        peak_price: f64,
        trailing_stop_price: f64,
    },
    /// A position closed; `balance` is the ledger balance after applying it.
    PositionClosed { trade: TradeRecord, balance: f64 },
    SymbolHalted { symbol: String, reason: String },
}

impl EngineEvent {
    pub fn symbol(&self) -> &str {
        match self {
            EngineEvent::PositionOpened(p) => &p.symbol,
            EngineEvent::StopRaised { symbol, .. } => symbol,
            EngineEvent::PositionClosed { trade, .. } => &trade.symbol,
            EngineEvent::SymbolHalted { symbol, .. } => symbol,
        }
    }
}
