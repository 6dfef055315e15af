//! Balance ledger: running cash balance, updated once per closed position.
//!
//! Balance is untouched at entry and adjusted only by realized P&L at close.
//! No floor is applied: a losing streak may drive it negative.

use parking_lot::Mutex;

#[derive(Debug)]
pub struct BalanceLedger {
    starting_balance: f64,
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Clone, Copy)]
struct LedgerState {
    balance: f64,
    applied: u64,
}

impl BalanceLedger {
    pub fn new(starting_balance: f64) -> Self {
        Self::restored(starting_balance, starting_balance, 0)
    }

    /// Reopen a ledger with a balance reloaded from persisted state.
    pub fn restored(starting_balance: f64, balance: f64, applied: u64) -> Self {
        Self {
            starting_balance,
            inner: Mutex::new(LedgerState { balance, applied }),
        }
    }

    /// Add realized P&L. Returns the new balance.
    pub fn apply_realized_pnl(&self, amount: f64) -> f64 {
        let mut state = self.inner.lock();
        state.balance += amount;
        state.applied += 1;
        state.balance
    }

    pub fn current_balance(&self) -> f64 {
        self.inner.lock().balance
    }

    pub fn starting_balance(&self) -> f64 {
        self.starting_balance
    }

    /// Number of closes applied since the ledger was created or restored.
    pub fn applied_count(&self) -> u64 {
        self.inner.lock().applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_configured_balance() {
        let ledger = BalanceLedger::new(10_000.0);
        assert_eq!(ledger.current_balance(), 10_000.0);
        assert_eq!(ledger.starting_balance(), 10_000.0);
    }

    #[test]
    fn losses_can_go_negative() {
        let ledger = BalanceLedger::new(10.0);
        ledger.apply_realized_pnl(-25.0);
        assert_eq!(ledger.current_balance(), -15.0);
    }

    #[test]
    fn concurrent_applies_do_not_lose_updates() {
        let ledger = Arc::new(BalanceLedger::new(0.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.apply_realized_pnl(1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.current_balance(), 8000.0);
        assert_eq!(ledger.applied_count(), 8000);
    }
}
