//! Tick: a single normalized price observation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a raw price event cannot become a [`Tick`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    #[error("tick symbol is empty")]
    EmptySymbol,
    #[error("tick price for {symbol} must be finite and positive, got {price}")]
    InvalidPrice { symbol: String, price: f64 },
}

/// A price observation for one symbol at one instant.
///
/// Ticks are ephemeral: they feed the window tracker and the live position
/// for their symbol and are never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub event_time: DateTime<Utc>,
}

impl Tick {
    /// Build a validated tick. Symbols are normalized to upper case.
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        event_time: DateTime<Utc>,
    ) -> Result<Self, TickError> {
        let symbol = symbol.into().trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(TickError::EmptySymbol);
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(TickError::InvalidPrice { symbol, price });
        }
        Ok(Self {
            symbol,
            price,
            event_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_uppercased() {
        let tick = Tick::new(" btcusdt ", 100.0, Utc::now()).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
    }

    #[test]
    fn rejects_non_positive_price() {
        assert!(matches!(
            Tick::new("X", 0.0, Utc::now()),
            Err(TickError::InvalidPrice { .. })
        ));
        assert!(matches!(
            Tick::new("X", -1.0, Utc::now()),
            Err(TickError::InvalidPrice { .. })
        ));
        assert!(matches!(
            Tick::new("X", f64::NAN, Utc::now()),
            Err(TickError::InvalidPrice { .. })
        ));
    }

    #[test]
    fn rejects_empty_symbol() {
        assert_eq!(Tick::new("  ", 1.0, Utc::now()), Err(TickError::EmptySymbol));
    }
}
