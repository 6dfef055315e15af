//! Trade history: append-only record of closed trades, ordered by close time.
//!
//! Logical history is append-only; the in-memory copy keeps only the most
//! recent `capacity` records for queries. Durable history lives in the store.
//! Windowed queries (recent, best/worst, outcome counts since a time, top
//! performers) see only the retained records; [`TradeHistory::outcome_totals`]
//! is a running tally over everything ever appended.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::TradeRecord;

/// Closed interval `[start, end]` over close times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The trailing `span` ending at `now`.
    pub fn trailing(span: Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - span,
            end: now,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Summed realized P&L for one symbol within a time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPerformance {
    pub symbol: String,
    pub summed_pnl: f64,
    pub trades: usize,
}

/// Win/loss tallies. Break-even trades count toward neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub wins: usize,
    pub losses: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, trade: &TradeRecord) {
        if trade.is_winner() {
            self.wins += 1;
        } else if trade.is_loser() {
            self.losses += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeHistory {
    records: VecDeque<TradeRecord>,
    capacity: usize,
    total_appended: u64,
    totals: OutcomeCounts,
}

impl TradeHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            total_appended: 0,
            totals: OutcomeCounts::default(),
        }
    }

    /// Append a closed trade, keeping records sorted by close time.
    ///
    /// Equal close times keep arrival order.
    pub fn append(&mut self, record: TradeRecord) {
        self.totals.record(&record);
        let in_order = self
            .records
            .back()
            .map_or(true, |last| last.closed_at <= record.closed_at);
        if in_order {
            self.records.push_back(record);
        } else {
            let idx = self
                .records
                .partition_point(|r| r.closed_at <= record.closed_at);
            self.records.insert(idx, record);
        }
        self.total_appended += 1;
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Last `n` closed trades, most recently closed first.
    pub fn recent(&self, n: usize) -> Vec<TradeRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    /// Symbols ranked by summed realized P&L of trades closed within `range`.
    ///
    /// Sorted descending by P&L; ties go to the lexically smaller symbol.
    pub fn top_performers_by_symbol(&self, range: TimeRange, k: usize) -> Vec<SymbolPerformance> {
        let mut by_symbol: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for trade in self.records.iter().filter(|t| range.contains(t.closed_at)) {
            let entry = by_symbol.entry(trade.symbol.as_str()).or_insert((0.0, 0));
            entry.0 += trade.realized_pnl;
            entry.1 += 1;
        }

        let mut ranked: Vec<SymbolPerformance> = by_symbol
            .into_iter()
            .map(|(symbol, (summed_pnl, trades))| SymbolPerformance {
                symbol: symbol.to_string(),
                summed_pnl,
                trades,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.summed_pnl
                .total_cmp(&a.summed_pnl)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranked.truncate(k);
        ranked
    }

    /// Winning trades, largest profit first.
    pub fn best_trades(&self, n: usize) -> Vec<TradeRecord> {
        let mut wins: Vec<&TradeRecord> = self.records.iter().filter(|t| t.is_winner()).collect();
        wins.sort_by(|a, b| {
            b.realized_pnl
                .total_cmp(&a.realized_pnl)
                .then_with(|| b.closed_at.cmp(&a.closed_at))
        });
        wins.into_iter().take(n).cloned().collect()
    }

    /// Losing trades, largest loss first.
    pub fn worst_trades(&self, n: usize) -> Vec<TradeRecord> {
        let mut losses: Vec<&TradeRecord> = self.records.iter().filter(|t| t.is_loser()).collect();
        losses.sort_by(|a, b| {
            a.realized_pnl
                .total_cmp(&b.realized_pnl)
                .then_with(|| b.closed_at.cmp(&a.closed_at))
        });
        losses.into_iter().take(n).cloned().collect()
    }

    /// Wins and losses among trades closed at or after `since`.
    pub fn outcome_counts(&self, since: DateTime<Utc>) -> OutcomeCounts {
        let start = self.records.partition_point(|t| t.closed_at < since);
        self.records
            .range(start..)
            .fold(OutcomeCounts::default(), |mut acc, t| {
                acc.record(t);
                acc
            })
    }

    /// Wins and losses over every trade ever appended, evicted ones included.
    pub fn outcome_totals(&self) -> OutcomeCounts {
        self.totals
    }

    /// Carry over totals kept from an earlier run. Per field, the larger of
    /// `persisted` and what was counted while re-appending wins, so state
    /// written without totals still counts its trades.
    pub fn restore_totals(&mut self, persisted: OutcomeCounts) {
        self.totals.wins = self.totals.wins.max(persisted.wins);
        self.totals.losses = self.totals.losses.max(persisted.losses);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends since construction, including ones evicted by the cap.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    pub fn iter(&self) -> impl Iterator<Item = &TradeRecord> {
        self.records.iter()
    }
}
