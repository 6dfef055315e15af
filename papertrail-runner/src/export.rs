//! CSV export of closed trades.

use std::path::Path;

use anyhow::{Context, Result};

use papertrail_core::TradeRecord;

pub const TRADE_COLUMNS: [&str; 8] = [
    "position_id",
    "symbol",
    "entry_price",
    "exit_price",
    "quantity",
    "realized_pnl",
    "opened_at",
    "closed_at",
];

/// Render trades as CSV, one row per trade in the given order.
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(TRADE_COLUMNS)?;

    for t in trades {
        wtr.write_record([
            &t.position_id.0.to_string(),
            &t.symbol,
            &format!("{:.8}", t.entry_price),
            &format!("{:.8}", t.exit_price),
            &format!("{:.8}", t.quantity),
            &format!("{:.8}", t.realized_pnl),
            &t.opened_at.to_rfc3339(),
            &t.closed_at.to_rfc3339(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Write trades to `path` as CSV, creating parent directories.
pub fn write_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let csv = export_trades_csv(trades)?;
    std::fs::write(path, csv).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use papertrail_core::PositionId;

    fn sample_trade() -> TradeRecord {
        TradeRecord {
            position_id: PositionId(7),
            symbol: "BTCUSDT".into(),
            entry_price: 100.0,
            exit_price: 100.9,
            quantity: 0.5,
            peak_price: 102.0,
            trailing_stop_price: 100.98,
            realized_pnl: 0.45,
            opened_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            closed_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 5, 0).unwrap(),
        }
    }

    #[test]
    fn header_matches_columns() {
        let csv = export_trades_csv(&[sample_trade()]).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(header, TRADE_COLUMNS.join(","));
    }

    #[test]
    fn row_content() {
        let csv = export_trades_csv(&[sample_trade()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        let row = lines[1];
        assert!(row.starts_with("7,BTCUSDT,100.00000000,100.90000000,"));
        assert!(row.contains("0.45000000"));
        assert!(row.ends_with("2025-03-01T12:05:00+00:00"));
    }

    #[test]
    fn empty_trades_is_header_only() {
        let csv = export_trades_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn writes_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("trades.csv");
        write_trades_csv(&path, &[sample_trade()]).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("BTCUSDT"));
    }
}
