//! Tick feeds: normalize external price events into [`Tick`]s.
//!
//! A feed hands out a [`Subscription`]: a cancellable stream of ticks backed
//! by a background task. Reconnects happen inside that task and show up to
//! the consumer only as a gap in the sequence.
//!
//! Every adapter routes its output through an [`OrderGuard`], so delivered
//! ticks are non-decreasing in event time per symbol and only cover the
//! subscribed symbols.

pub mod binance;
pub mod channel;
pub mod simulated;

use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use papertrail_core::Tick;

pub use binance::BinanceTradeFeed;
pub use channel::ChannelFeed;
pub use simulated::SimulatedFeed;

use crate::config::{FeedConfig, FeedKind};

/// Transport-level failures. Handled inside the adapter's retry loop and
/// never surfaced to the engine.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("no message received for {0:?}")]
    Idle(Duration),
    #[error("server closed the stream")]
    Closed,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("subscriber dropped")]
    SubscriberGone,
}

pub trait TickFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Start delivering ticks for `symbols`. Must be called inside a tokio
    /// runtime.
    fn subscribe(&self, symbols: &BTreeSet<String>) -> Subscription;
}

/// Build the feed described by `config`.
pub fn from_config(config: &FeedConfig) -> Box<dyn TickFeed> {
    match config.kind {
        FeedKind::Binance => Box::new(BinanceTradeFeed::new(config.clone())),
        FeedKind::Simulated => Box::new(SimulatedFeed::new(
            config.simulated.clone(),
            config.channel_capacity,
        )),
    }
}

/// Counters shared between a feed task and its subscription.
#[derive(Debug, Default)]
pub struct FeedStats {
    delivered: AtomicU64,
    malformed: AtomicU64,
    out_of_order: AtomicU64,
    foreign_symbol: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStatsSnapshot {
    pub delivered: u64,
    pub malformed: u64,
    pub out_of_order: u64,
    pub foreign_symbol: u64,
    pub reconnects: u64,
}

impl FeedStats {
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatsSnapshot {
        FeedStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            foreign_symbol: self.foreign_symbol.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Admits ticks for subscribed symbols in non-decreasing event time.
#[derive(Debug)]
pub struct OrderGuard {
    symbols: BTreeSet<String>,
    last_seen: HashMap<String, DateTime<Utc>>,
    stats: Arc<FeedStats>,
}

impl OrderGuard {
    pub fn new(symbols: BTreeSet<String>, stats: Arc<FeedStats>) -> Self {
        Self {
            symbols,
            last_seen: HashMap::new(),
            stats,
        }
    }

    pub fn admit(&mut self, tick: &Tick) -> bool {
        if !self.symbols.contains(&tick.symbol) {
            self.stats.foreign_symbol.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(symbol = %tick.symbol, "dropped tick for unsubscribed symbol");
            return false;
        }
        match self.last_seen.get_mut(&tick.symbol) {
            Some(last) if tick.event_time < *last => {
                self.stats.out_of_order.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(symbol = %tick.symbol, at = %tick.event_time, last = %last, "dropped out-of-order tick");
                false
            }
            Some(last) => {
                *last = tick.event_time;
                true
            }
            None => {
                self.last_seen.insert(tick.symbol.clone(), tick.event_time);
                true
            }
        }
    }
}

/// A live, cancellable stream of ticks.
///
/// Dropping the subscription (or calling [`Subscription::cancel`]) stops the
/// background task.
pub struct Subscription {
    inner: ReceiverStream<Tick>,
    task: Option<JoinHandle<()>>,
    stats: Arc<FeedStats>,
}

impl Subscription {
    pub fn new(
        rx: tokio::sync::mpsc::Receiver<Tick>,
        task: JoinHandle<()>,
        stats: Arc<FeedStats>,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            task: Some(task),
            stats,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.inner.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_none()
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, readable while the stream is being polled.
    pub fn stats_handle(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }
}

impl Stream for Subscription {
    type Item = Tick;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Tick>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn guard() -> OrderGuard {
        let symbols = ["BTCUSDT".to_string(), "ETHUSDT".to_string()].into_iter().collect();
        OrderGuard::new(symbols, Arc::new(FeedStats::default()))
    }

    #[test]
    fn guard_drops_older_ticks_per_symbol() {
        let mut guard = guard();
        let now = Utc::now();
        let later = now + ChronoDuration::seconds(1);
        assert!(guard.admit(&Tick::new("BTCUSDT", 1.0, later).unwrap()));
        assert!(!guard.admit(&Tick::new("BTCUSDT", 1.0, now).unwrap()));
        // other symbols are ordered independently
        assert!(guard.admit(&Tick::new("ETHUSDT", 1.0, now).unwrap()));
        // equal timestamps are allowed
        assert!(guard.admit(&Tick::new("BTCUSDT", 2.0, later).unwrap()));
        assert_eq!(guard.stats.snapshot().out_of_order, 1);
    }

    #[test]
    fn guard_drops_unsubscribed_symbols() {
        let mut guard = guard();
        assert!(!guard.admit(&Tick::new("DOGEUSDT", 1.0, Utc::now()).unwrap()));
        assert_eq!(guard.stats.snapshot().foreign_symbol, 1);
    }
}
