//! Binance spot trade stream adapter.
//!
//! Subscribes through the combined-stream URL (`/stream?streams=a@trade/...`),
//! so every reconnect resubscribes to exactly the original symbol set.
//! Reconnects use a fixed backoff with unlimited retries; connect and read
//! waits are bounded by timeouts.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use papertrail_core::Tick;

use super::{FeedError, FeedStats, OrderGuard, Subscription, TickFeed};
use crate::config::FeedConfig;

#[derive(Debug, Clone)]
pub struct BinanceTradeFeed {
    config: FeedConfig,
}

impl BinanceTradeFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

impl TickFeed for BinanceTradeFeed {
    fn name(&self) -> &str {
        "binance"
    }

    fn subscribe(&self, symbols: &BTreeSet<String>) -> Subscription {
        let (tx, rx) = mpsc::channel::<Tick>(self.config.channel_capacity.max(1));
        let stats = Arc::new(FeedStats::default());
        let endpoint = stream_url(&self.config.endpoint, symbols);
        let guard = OrderGuard::new(symbols.clone(), Arc::clone(&stats));
        let config = self.config.clone();
        let task_stats = Arc::clone(&stats);

        let task = tokio::spawn(async move {
            run_with_reconnect(endpoint, config, guard, tx, task_stats).await;
        });
        Subscription::new(rx, task, stats)
    }
}

/// Combined-stream URL for the given symbols.
pub fn stream_url(endpoint: &str, symbols: &BTreeSet<String>) -> String {
    let streams = symbols
        .iter()
        .map(|s| format!("{}@trade", s.to_lowercase()))
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/stream?streams={streams}", endpoint.trim_end_matches('/'))
}

async fn run_with_reconnect(
    endpoint: String,
    config: FeedConfig,
    mut guard: OrderGuard,
    tx: mpsc::Sender<Tick>,
    stats: Arc<FeedStats>,
) {
    let backoff = config.reconnect_backoff();
    loop {
        match run_session(&endpoint, &config, &mut guard, &tx, &stats).await {
            Err(FeedError::SubscriberGone) => break,
            Ok(()) => tracing::warn!("binance stream ended; reconnecting"),
            Err(err) => tracing::warn!(%err, "binance stream failed; reconnecting"),
        }
        if tx.is_closed() {
            break;
        }
        stats.record_reconnect();
        tokio::time::sleep(backoff).await;
    }
    tracing::debug!("binance feed task finished");
}

async fn run_session(
    endpoint: &str,
    config: &FeedConfig,
    guard: &mut OrderGuard,
    tx: &mpsc::Sender<Tick>,
    stats: &FeedStats,
) -> Result<(), FeedError> {
    let connect_timeout = config.connect_timeout();
    let idle_timeout = config.idle_timeout();

    let (mut ws, _) = tokio::time::timeout(connect_timeout, connect_async(endpoint))
        .await
        .map_err(|_| FeedError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout: connect_timeout,
        })??;
    tracing::info!(%endpoint, "binance stream connected");

    loop {
        let msg = match tokio::time::timeout(idle_timeout, ws.next()).await {
            Err(_) => return Err(FeedError::Idle(idle_timeout)),
            Ok(None) => return Ok(()),
            Ok(Some(msg)) => msg?,
        };
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => String::from_utf8_lossy(&b).to_string(),
            Message::Ping(v) => {
                ws.send(Message::Pong(v)).await?;
                continue;
            }
            Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(_) => return Err(FeedError::Closed),
        };

        match parse_trade_message(&text) {
            Ok(Some(tick)) => {
                if !guard.admit(&tick) {
                    continue;
                }
                tx.send(tick).await.map_err(|_| FeedError::SubscriberGone)?;
                stats.record_delivered();
            }
            Ok(None) => {}
            Err(err) => {
                stats.record_malformed();
                tracing::debug!(%err, "dropped feed message");
            }
        }
    }
}

/// Parse one combined-stream message.
///
/// `Ok(None)` is a control message (subscription ack, non-trade event);
/// a trade event without a usable symbol or price is `Malformed`.
pub fn parse_trade_message(text: &str) -> Result<Option<Tick>, FeedError> {
    let payload: Value =
        serde_json::from_str(text).map_err(|e| FeedError::Malformed(e.to_string()))?;
    let data = payload.get("data").unwrap_or(&payload);

    if data.get("result").is_some() || (data.get("id").is_some() && data.get("e").is_none()) {
        return Ok(None);
    }
    match data.get("e").and_then(Value::as_str) {
        Some("trade") | Some("aggTrade") | None => {}
        Some(_) => return Ok(None),
    }

    let symbol = data
        .get("s")
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::Malformed("missing symbol".into()))?;
    let price = match data.get("p") {
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        Some(v) => v.as_f64(),
        None => None,
    }
    .ok_or_else(|| FeedError::Malformed(format!("missing or unparsable price for {symbol}")))?;

    let event_time = data
        .get("T")
        .or_else(|| data.get("E"))
        .and_then(Value::as_i64)
        .and_then(millis_to_utc)
        .unwrap_or_else(Utc::now);

    Tick::new(symbol, price, event_time)
        .map(Some)
        .map_err(|e| FeedError::Malformed(e.to_string()))
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
