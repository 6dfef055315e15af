//! Engine error taxonomy.
//!
//! Only invariant violations are errors here. Policy no-ops (an entry sized to
//! zero) are `None` results, and transport/persistence faults belong to the
//! runner.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// State corruption for one symbol. The mutation was refused and the
    /// symbol is halted.
    #[error("invariant violation on {symbol}: {reason}")]
    InvariantViolation { symbol: String, reason: String },

    #[error("symbol {0} is not in the configured universe")]
    UnknownSymbol(String),

    #[error("symbol {0} is halted after an invariant violation")]
    SymbolHalted(String),
}

impl EngineError {
    pub fn invariant(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}
