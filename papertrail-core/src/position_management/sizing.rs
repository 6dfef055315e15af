//! Allocation sizing: fixed fraction of current balance per new position.

/// Quantity for a new position: `balance * allocation_fraction / price`,
/// floored to `precision` decimal places.
///
/// Returns `None` when the result is not strictly positive (balance exhausted,
/// bad price, or a quantity too small for the precision). Callers treat `None`
/// as a skipped entry, not an error.
pub fn size_quantity(
    balance: f64,
    allocation_fraction: f64,
    price: f64,
    precision: u32,
) -> Option<f64> {
    if !balance.is_finite() || balance <= 0.0 || !price.is_finite() || price <= 0.0 {
        return None;
    }
    let notional = balance * allocation_fraction;
    let raw = notional / price;
    let factor = 10f64.powi(precision as i32);
    // absorb representation error so 0.002 does not floor to 0.00199999
    let quantity = (raw * factor + 1e-9).floor() / factor;
    (quantity > 0.0 && quantity.is_finite()).then_some(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_percent_of_ten_thousand_at_fifty_thousand() {
        let qty = size_quantity(10_000.0, 0.01, 50_000.0, 8).unwrap();
        assert!((qty - 0.002).abs() < 1e-12);
    }

    #[test]
    fn small_balance_still_sizes() {
        let qty = size_quantity(50.0, 0.01, 50_000.0, 8).unwrap();
        assert!((qty - 0.00001).abs() < 1e-12);
    }

    #[test]
    fn quantity_below_precision_is_skipped() {
        assert_eq!(size_quantity(50.0, 0.01, 5e12, 8), None);
    }

    #[test]
    fn non_positive_balance_is_skipped() {
        assert_eq!(size_quantity(0.0, 0.01, 100.0, 8), None);
        assert_eq!(size_quantity(-10.0, 0.01, 100.0, 8), None);
    }

    #[test]
    fn bad_price_is_skipped() {
        assert_eq!(size_quantity(10_000.0, 0.01, 0.0, 8), None);
        assert_eq!(size_quantity(10_000.0, 0.01, -1.0, 8), None);
        assert_eq!(size_quantity(10_000.0, 0.01, f64::INFINITY, 8), None);
    }
}
