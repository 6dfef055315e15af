//! Query handle for a running engine service.
//!
//! Requests travel over a command channel and are answered by the engine
//! task between ticks and sweeps, so every answer reflects one consistent
//! engine state. The balance is read straight from the shared ledger.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use papertrail_core::{
    BalanceLedger, EngineStats, OpenPositionView, OutcomeCounts, SymbolPerformance, TimeRange,
    TradeRecord,
};

use crate::feed::FeedStatsSnapshot;
use crate::service::ServiceReport;

/// Trades shown in the dashboard's recent list.
pub const DASHBOARD_RECENT: usize = 5;
/// Length of the dashboard's best and worst trade lists.
pub const DASHBOARD_TOP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("engine service is no longer running")]
pub struct ServiceGone;

/// Everything a dashboard page shows, taken from one engine state.
///
/// Trade lists and `last_24h` come from the in-memory history, which keeps
/// the most recent `history_capacity` trades; `totals` counts every trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub balance: f64,
    pub recent_trades: Vec<TradeRecord>,
    pub best_trades: Vec<TradeRecord>,
    pub worst_trades: Vec<TradeRecord>,
    /// Lifetime wins and losses.
    pub totals: OutcomeCounts,
    /// Retained trades closed in the last 24 hours.
    pub last_24h: OutcomeCounts,
    pub open_positions: Vec<OpenPositionView>,
}

/// Live counters of a running service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub engine: EngineStats,
    pub feed: FeedStatsSnapshot,
    pub balance: f64,
    pub open_positions: usize,
    pub halted_symbols: Vec<(String, String)>,
    pub degraded: bool,
    /// Store writes queued and not yet finished.
    pub pending_writes: u64,
}

#[derive(Debug)]
pub(crate) enum Command {
    RecentTrades {
        n: usize,
        reply: oneshot::Sender<Vec<TradeRecord>>,
    },
    OpenPositions {
        reply: oneshot::Sender<Vec<OpenPositionView>>,
    },
    TopPerformers {
        range: TimeRange,
        k: usize,
        reply: oneshot::Sender<Vec<SymbolPerformance>>,
    },
    BestTrades {
        n: usize,
        reply: oneshot::Sender<Vec<TradeRecord>>,
    },
    WorstTrades {
        n: usize,
        reply: oneshot::Sender<Vec<TradeRecord>>,
    },
    OutcomeCounts {
        since: DateTime<Utc>,
        reply: oneshot::Sender<OutcomeCounts>,
    },
    Dashboard {
        now: DateTime<Utc>,
        reply: oneshot::Sender<Dashboard>,
    },
    Status {
        reply: oneshot::Sender<ServiceStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<ServiceReport>,
    },
}

#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    ledger: Arc<BalanceLedger>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>, ledger: Arc<BalanceLedger>) -> Self {
        Self { tx, ledger }
    }

    pub fn current_balance(&self) -> f64 {
        self.ledger.current_balance()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn recent_trades(&self, n: usize) -> Result<Vec<TradeRecord>, ServiceGone> {
        self.request(|reply| Command::RecentTrades { n, reply }).await
    }

    pub async fn open_positions(&self) -> Result<Vec<OpenPositionView>, ServiceGone> {
        self.request(|reply| Command::OpenPositions { reply }).await
    }

    pub async fn top_performers(
        &self,
        range: TimeRange,
        k: usize,
    ) -> Result<Vec<SymbolPerformance>, ServiceGone> {
        self.request(|reply| Command::TopPerformers { range, k, reply })
            .await
    }

    pub async fn best_trades(&self, n: usize) -> Result<Vec<TradeRecord>, ServiceGone> {
        self.request(|reply| Command::BestTrades { n, reply }).await
    }

    pub async fn worst_trades(&self, n: usize) -> Result<Vec<TradeRecord>, ServiceGone> {
        self.request(|reply| Command::WorstTrades { n, reply }).await
    }

    pub async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, ServiceGone> {
        self.request(|reply| Command::OutcomeCounts { since, reply })
            .await
    }

    pub async fn dashboard(&self, now: DateTime<Utc>) -> Result<Dashboard, ServiceGone> {
        self.request(|reply| Command::Dashboard { now, reply }).await
    }

    pub async fn status(&self) -> Result<ServiceStatus, ServiceGone> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stop the service: cancel the feed, flush a final snapshot, and return
    /// the run report.
    pub async fn shutdown(&self) -> Result<ServiceReport, ServiceGone> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceGone> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| ServiceGone)?;
        rx.await.map_err(|_| ServiceGone)
    }
}

/// Window for the dashboard's win/loss counts.
pub fn last_24h(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(24)
}
