//! Entry rule: buy when price has risen a threshold above the window minimum.
//!
//! Pure: the decision depends only on the arguments, so the same inputs always
//! give the same answer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryRule {
    /// Required rise above the window minimum as a fraction (0.005 = 0.5%).
    pub rise_pct: f64,
}

impl EntryRule {
    pub fn new(rise_pct: f64) -> Self {
        assert!(rise_pct > 0.0, "rise_pct must be positive");
        Self { rise_pct }
    }

    /// Relative rise of `current_price` over `window_minimum`.
    pub fn rise(current_price: f64, window_minimum: f64) -> f64 {
        (current_price - window_minimum) / window_minimum
    }

    /// Enter when a minimum exists, price is above it, and the rise meets the
    /// threshold. An empty window (`None`) never enters.
    pub fn should_enter(
        &self,
        _symbol: &str,
        current_price: f64,
        window_minimum: Option<f64>,
    ) -> bool {
        let Some(minimum) = window_minimum else {
            return false;
        };
        if minimum.is_nan() || minimum <= 0.0 || current_price <= minimum {
            return false;
        }
        Self::rise(current_price, minimum) >= self.rise_pct
    }
}
