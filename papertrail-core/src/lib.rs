//! papertrail core: the paper-trading decision engine.
//!
//! This crate is synchronous and I/O free:
//! - Domain types (ticks, positions, trade records, ids)
//! - Rolling lookback window with O(1) minimum
//! - Entry rule: rise above the window minimum
//! - Position management with a ratcheting percent trailing stop
//! - Balance ledger and append-only trade history
//! - The `Engine`, which owns one slot per symbol and is driven by ticks and
//!   periodic clock sweeps

pub mod config;
pub mod domain;
pub mod engine;
pub mod entry;
pub mod error;
pub mod history;
pub mod ledger;
pub mod position_management;
pub mod window;

pub use config::{ConfigError, EngineConfig};
pub use domain::{Position, PositionId, PositionStatus, Tick, TickError, TradeRecord};
pub use engine::{Engine, EngineEvent, EngineStats, OpenPositionView, PersistedState, Restored};
pub use entry::EntryRule;
pub use error::EngineError;
pub use history::{OutcomeCounts, SymbolPerformance, TimeRange, TradeHistory};
pub use ledger::BalanceLedger;
pub use position_management::{ExitCheck, PositionManager};
pub use window::{RollingWindow, WindowEntry};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner moves across tasks is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Engine>();
        require_sync::<Engine>();
        require_send::<EngineEvent>();
        require_sync::<EngineEvent>();
        require_send::<PersistedState>();
        require_sync::<PersistedState>();
        require_send::<Tick>();
        require_sync::<Tick>();
        require_send::<BalanceLedger>();
        require_sync::<BalanceLedger>();
    }
}
