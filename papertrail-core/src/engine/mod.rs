//! Decision engine: tick handling and periodic sweeps over per-symbol slots.
//!
//! The engine is a single-writer state machine: every mutation goes through
//! `&mut self`, so tick handling and clock sweeps are discrete steps and two
//! transitions of the same position can never interleave. Within a sweep the
//! slots are evaluated in parallel (they are disjoint), then opens and closes
//! are applied to the id generator, ledger and history in symbol order.

pub mod events;
pub mod slot;
pub mod state;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, EngineConfig};
use crate::domain::{IdGen, Position, Tick, TradeRecord};
use crate::entry::EntryRule;
use crate::error::EngineError;
use crate::history::{OutcomeCounts, SymbolPerformance, TimeRange, TradeHistory};
use crate::ledger::BalanceLedger;
use crate::position_management::PositionManager;
use crate::window::RollingWindow;

pub use events::EngineEvent;
pub use slot::SymbolSlot;
pub use state::PersistedState;

use slot::SweepOutcome;

/// Counters for diagnostics and the shutdown report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub ticks_applied: u64,
    pub ticks_out_of_order: u64,
    pub ticks_unknown_symbol: u64,
    pub sweeps: u64,
    pub positions_opened: u64,
    pub positions_closed: u64,
    pub entries_skipped: u64,
    pub symbols_halted: u64,
}

/// Open position with its mark-to-market against the last seen price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPositionView {
    pub position: Position,
    pub last_price: f64,
    pub unrealized_pnl: f64,
}

/// Outcome of seeding an engine from persisted state.
#[derive(Debug)]
pub struct Restored {
    pub engine: Engine,
    /// Persisted positions that were refused; their symbols are halted.
    pub violations: Vec<EngineError>,
    /// The persisted state was produced under different decision parameters.
    pub fingerprint_changed: bool,
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    rule: EntryRule,
    pm: PositionManager,
    slots: BTreeMap<String, SymbolSlot>,
    ledger: Arc<BalanceLedger>,
    history: TradeHistory,
    ids: IdGen,
    /// Persisted positions that could not be placed in a slot. Kept so a
    /// snapshot never silently drops them.
    orphaned: Vec<Position>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let mut config = config;
        config.normalize();
        config.validate()?;

        let rule = EntryRule::new(config.entry_rise_pct);
        let pm = PositionManager::new(
            config.trail_pct,
            config.allocation_fraction,
            config.quantity_precision,
        );
        let slots = config
            .symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    SymbolSlot::new(s.clone(), RollingWindow::new(config.lookback())),
                )
            })
            .collect();

        Ok(Self {
            rule,
            pm,
            slots,
            ledger: Arc::new(BalanceLedger::new(config.starting_balance)),
            history: TradeHistory::new(config.history_capacity),
            ids: IdGen::new(),
            orphaned: Vec::new(),
            stats: EngineStats::default(),
            config,
        })
    }

    /// Seed an engine from persisted state.
    ///
    /// Positions that break an invariant (unknown symbol, non-positive
    /// quantity, not open, a second open position for a symbol) are refused
    /// and their symbol is halted; the rest of the engine runs normally.
    pub fn restore(config: EngineConfig, state: PersistedState) -> Result<Restored, ConfigError> {
        let mut engine = Self::new(config)?;
        let fingerprint_changed = state
            .config_fingerprint
            .as_deref()
            .is_some_and(|fp| fp != engine.config.fingerprint());

        engine.ledger = Arc::new(BalanceLedger::restored(
            engine.config.starting_balance,
            state.balance,
            state.closes_applied,
        ));
        engine.ids = IdGen::starting_at(state.next_position_id);
        for trade in state.trades {
            engine.ids.observe(trade.position_id);
            engine.history.append(trade);
        }
        engine.history.restore_totals(state.outcome_totals);

        let mut violations = Vec::new();
        let mut seen_ids = HashSet::new();
        for position in state.open_positions {
            engine.ids.observe(position.id);
            let duplicate = !seen_ids.insert(position.id);
            if let Err(err) = engine.seed_position(position, duplicate) {
                violations.push(err);
            }
        }

        for err in &violations {
            tracing::error!(%err, "refused persisted position");
        }

        Ok(Restored {
            engine,
            violations,
            fingerprint_changed,
        })
    }

    fn seed_position(&mut self, position: Position, duplicate: bool) -> Result<(), EngineError> {
        let Some(slot) = self.slots.get_mut(&position.symbol) else {
            let err = EngineError::invariant(
                &position.symbol,
                format!("persisted position {} for symbol outside the universe", position.id),
            );
            self.orphaned.push(position);
            return Err(err);
        };

        let reason = if duplicate {
            Some(format!("duplicate persisted position {}", position.id))
        } else if !position.is_open() {
            Some(format!("persisted position {} is not open", position.id))
        } else if !(position.quantity.is_finite() && position.quantity > 0.0) {
            Some(format!(
                "persisted position {} has quantity {}",
                position.id, position.quantity
            ))
        } else if let Some(existing) = &slot.position {
            Some(format!(
                "second open position {} alongside {}",
                position.id, existing.id
            ))
        } else {
            None
        };

        match reason {
            None => {
                slot.position = Some(position);
                Ok(())
            }
            Some(reason) => {
                slot.halted = Some(reason.clone());
                self.stats.symbols_halted += 1;
                self.orphaned.push(position);
                Err(EngineError::invariant(&slot.symbol, reason))
            }
        }
    }

    /// Apply a tick: update the symbol's window and raise the trailing peak of
    /// its open position.
    ///
    /// Out-of-order ticks are dropped (counted, logged at debug). Entry and
    /// exit decisions are left to [`Engine::on_clock`].
    pub fn on_tick(&mut self, tick: &Tick) -> Result<Vec<EngineEvent>, EngineError> {
        let Some(slot) = self.slots.get_mut(&tick.symbol) else {
            self.stats.ticks_unknown_symbol += 1;
            return Err(EngineError::UnknownSymbol(tick.symbol.clone()));
        };
        if slot.halted.is_some() {
            return Err(EngineError::SymbolHalted(tick.symbol.clone()));
        }

        let stop_raised = match slot.on_tick(tick, &self.pm) {
            Ok(raised) => raised,
            Err(err) => {
                self.stats.ticks_out_of_order += 1;
                tracing::debug!(symbol = %tick.symbol, %err, "dropped out-of-order tick");
                return Ok(Vec::new());
            }
        };
        self.stats.ticks_applied += 1;

        Ok(match (stop_raised, slot.position.as_ref()) {
            (true, Some(p)) => vec![stop_raised_event(p)],
            _ => Vec::new(),
        })
    }

    /// Periodic sweep over all symbols at time `now`.
    ///
    /// Entries are sized from the balance at the start of the sweep.
    pub fn on_clock(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        self.stats.sweeps += 1;
        let balance = self.ledger.current_balance();
        let rule = self.rule;
        let pm = self.pm;

        let outcomes: Vec<(String, SweepOutcome)> = self
            .slots
            .par_iter_mut()
            .map(|(symbol, slot)| (symbol.clone(), slot.sweep(now, &rule, &pm, balance)))
            .collect();

        let mut events = Vec::new();
        for (symbol, outcome) in outcomes {
            match outcome {
                SweepOutcome::Idle | SweepOutcome::Holding { stop_raised: false } => {}
                SweepOutcome::Holding { stop_raised: true } => {
                    if let Some(p) = self.slots.get(&symbol).and_then(|s| s.position.as_ref()) {
                        events.push(stop_raised_event(p));
                    }
                }
                SweepOutcome::Closed(trade) => events.push(self.record_close(trade)),
                SweepOutcome::WantsEntry { price, quantity } => {
                    events.push(self.open_position(&symbol, price, quantity, now));
                }
                SweepOutcome::EntrySkipped { price } => {
                    self.stats.entries_skipped += 1;
                    tracing::debug!(%symbol, price, balance, "entry skipped: quantity rounds to zero");
                }
            }
        }
        events
    }

    fn record_close(&mut self, trade: TradeRecord) -> EngineEvent {
        let balance = self.ledger.apply_realized_pnl(trade.realized_pnl);
        self.stats.positions_closed += 1;
        tracing::info!(
            symbol = %trade.symbol,
            id = %trade.position_id,
            entry = trade.entry_price,
            exit = trade.exit_price,
            pnl = trade.realized_pnl,
            balance,
            "position closed"
        );
        self.history.append(trade.clone());
        EngineEvent::PositionClosed { trade, balance }
    }

    fn open_position(
        &mut self,
        symbol: &str,
        price: f64,
        quantity: f64,
        now: DateTime<Utc>,
    ) -> EngineEvent {
        let id = self.ids.next_position_id();
        let Some(slot) = self.slots.get_mut(symbol) else {
            return self.halt(symbol, format!("sweep produced entry for unknown slot {symbol}"));
        };
        match self.pm.open(&mut slot.position, id, symbol, price, now, quantity) {
            Ok(position) => {
                self.stats.positions_opened += 1;
                tracing::info!(
                    %symbol,
                    %id,
                    price,
                    quantity,
                    stop = position.trailing_stop_price,
                    "position opened"
                );
                EngineEvent::PositionOpened(position)
            }
            Err(err) => self.halt(symbol, err.to_string()),
        }
    }

    fn halt(&mut self, symbol: &str, reason: String) -> EngineEvent {
        tracing::error!(%symbol, %reason, "invariant violation; symbol halted");
        if let Some(slot) = self.slots.get_mut(symbol) {
            slot.halted = Some(reason.clone());
        }
        self.stats.symbols_halted += 1;
        EngineEvent::SymbolHalted {
            symbol: symbol.to_string(),
            reason,
        }
    }

    // ── Queries ──

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle to the ledger, readable without going through the engine.
    pub fn ledger(&self) -> Arc<BalanceLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn current_balance(&self) -> f64 {
        self.ledger.current_balance()
    }

    pub fn slot(&self, symbol: &str) -> Option<&SymbolSlot> {
        self.slots.get(symbol)
    }

    pub fn slots(&self) -> impl Iterator<Item = &SymbolSlot> {
        self.slots.values()
    }

    pub fn window_minimum(&self, symbol: &str) -> Option<f64> {
        self.slots.get(symbol).and_then(|s| s.window.minimum())
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.slots.get(symbol).and_then(|s| s.position.as_ref())
    }

    pub fn open_positions(&self) -> Vec<OpenPositionView> {
        self.slots
            .values()
            .filter_map(|slot| {
                let position = slot.position.as_ref()?;
                let last_price = slot.last_price().unwrap_or(position.entry_price);
                Some(OpenPositionView {
                    unrealized_pnl: position.unrealized_pnl(last_price),
                    last_price,
                    position: position.clone(),
                })
            })
            .collect()
    }

    pub fn open_position_count(&self) -> usize {
        self.slots.values().filter(|s| s.position.is_some()).count()
    }

    pub fn halted_symbols(&self) -> Vec<(&str, &str)> {
        self.slots
            .values()
            .filter_map(|s| s.halted.as_deref().map(|r| (s.symbol.as_str(), r)))
            .collect()
    }

    pub fn history(&self) -> &TradeHistory {
        &self.history
    }

    pub fn recent_trades(&self, n: usize) -> Vec<TradeRecord> {
        self.history.recent(n)
    }

    pub fn top_performers(&self, range: TimeRange, k: usize) -> Vec<SymbolPerformance> {
        self.history.top_performers_by_symbol(range, k)
    }

    pub fn best_trades(&self, n: usize) -> Vec<TradeRecord> {
        self.history.best_trades(n)
    }

    pub fn worst_trades(&self, n: usize) -> Vec<TradeRecord> {
        self.history.worst_trades(n)
    }

    pub fn outcome_counts(&self, since: DateTime<Utc>) -> OutcomeCounts {
        self.history.outcome_counts(since)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Full state for a store flush: balance, live (and refused) positions,
    /// and the in-memory trade history.
    pub fn snapshot(&self) -> PersistedState {
        let mut open_positions: Vec<Position> = self
            .slots
            .values()
            .filter_map(|s| s.position.clone())
            .collect();
        open_positions.extend(self.orphaned.iter().cloned());

        PersistedState {
            balance: self.ledger.current_balance(),
            open_positions,
            trades: self.history.iter().cloned().collect(),
            next_position_id: self.ids.peek(),
            closes_applied: self.ledger.applied_count(),
            config_fingerprint: Some(self.config.fingerprint()),
            outcome_totals: self.history.outcome_totals(),
        }
    }
}

fn stop_raised_event(p: &Position) -> EngineEvent {
    EngineEvent::StopRaised {
        symbol: p.symbol.clone(),
        position_id: p.id,
        peak_price: p.peak_price,
        trailing_stop_price: p.trailing_stop_price,
    }
}
