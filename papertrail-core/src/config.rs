//! Engine configuration: tunable parameters for one engine instance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("symbol universe is empty")]
    NoSymbols,
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
}

/// Longest accepted lookback: 30 days.
pub const MAX_LOOKBACK_SECS: u64 = 30 * 24 * 60 * 60;

/// Parameters for a single paper-trading engine.
///
/// Percent-like fields are fractions: `entry_rise_pct = 0.005` is 0.5%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub starting_balance: f64,
    pub symbols: BTreeSet<String>,
    pub lookback_secs: u64,
    pub entry_rise_pct: f64,
    pub trail_pct: f64,
    pub allocation_fraction: f64,
    pub clock_interval_ms: u64,
    /// Decimal places quantities are floored to; a quantity that floors to
    /// zero skips the entry.
    pub quantity_precision: u32,
    /// Closed trades kept in memory for queries.
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starting_balance: 10_000.0,
            symbols: BTreeSet::new(),
            lookback_secs: 600,
            entry_rise_pct: 0.005,
            trail_pct: 0.01,
            allocation_fraction: 0.01,
            clock_interval_ms: 1000,
            quantity_precision: 8,
            history_capacity: 1000,
        }
    }
}

impl EngineConfig {
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = Self::default();
        config.symbols = symbols.into_iter().map(Into::into).collect();
        config.normalize();
        config
    }

    /// Upper-case and trim symbols, dropping blanks.
    pub fn normalize(&mut self) {
        self.symbols = std::mem::take(&mut self.symbols)
            .into_iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        check(
            "starting_balance",
            "finite and positive",
            self.starting_balance,
            |v| v.is_finite() && v > 0.0,
        )?;
        check("entry_rise_pct", "in (0, 1)", self.entry_rise_pct, |v| {
            v > 0.0 && v < 1.0
        })?;
        check("trail_pct", "in (0, 1)", self.trail_pct, |v| v > 0.0 && v < 1.0)?;
        check(
            "allocation_fraction",
            "in (0, 1]",
            self.allocation_fraction,
            |v| v > 0.0 && v <= 1.0,
        )?;
        check(
            "lookback_secs",
            "in [1, 2592000]",
            self.lookback_secs as f64,
            |v| v > 0.0 && v <= MAX_LOOKBACK_SECS as f64,
        )?;
        check(
            "clock_interval_ms",
            "positive",
            self.clock_interval_ms as f64,
            |v| v > 0.0,
        )?;
        check(
            "history_capacity",
            "positive",
            self.history_capacity as f64,
            |v| v > 0.0,
        )?;
        Ok(())
    }

    /// Lookback as a duration, clamped to [`MAX_LOOKBACK_SECS`].
    pub fn lookback(&self) -> chrono::Duration {
        let secs = i64::try_from(self.lookback_secs.min(MAX_LOOKBACK_SECS))
            .unwrap_or(MAX_LOOKBACK_SECS as i64);
        chrono::Duration::seconds(secs)
    }

    pub fn clock_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.clock_interval_ms)
    }

    /// Stable hash of the decision parameters.
    ///
    /// Persisted with engine state so a restart under different parameters
    /// can be detected. Display-only settings are excluded.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "symbols": &self.symbols,
            "lookback_secs": self.lookback_secs,
            "entry_rise_pct": self.entry_rise_pct,
            "trail_pct": self.trail_pct,
            "allocation_fraction": self.allocation_fraction,
            "quantity_precision": self.quantity_precision,
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }
}

fn check(
    field: &'static str,
    expected: &'static str,
    value: f64,
    ok: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if ok(value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected,
            value,
        })
    }
}
