//! Feed driven by the embedding application through a channel sender.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use papertrail_core::Tick;

use super::{FeedStats, OrderGuard, Subscription, TickFeed};

/// Ticks pushed through [`ChannelFeed::sender`] are delivered to the single
/// subscriber after symbol and ordering checks.
pub struct ChannelFeed {
    sender: mpsc::Sender<Tick>,
    receiver: Mutex<Option<mpsc::Receiver<Tick>>>,
    capacity: usize,
}

impl ChannelFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            capacity: capacity.max(1),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Tick> {
        self.sender.clone()
    }
}

impl TickFeed for ChannelFeed {
    fn name(&self) -> &str {
        "channel"
    }

    fn subscribe(&self, symbols: &BTreeSet<String>) -> Subscription {
        let (tx, rx) = mpsc::channel::<Tick>(self.capacity);
        let stats = Arc::new(FeedStats::default());
        let mut guard = OrderGuard::new(symbols.clone(), Arc::clone(&stats));
        let task_stats = Arc::clone(&stats);
        let source = self.receiver.lock().take();
        if source.is_none() {
            tracing::warn!("channel feed already subscribed; new subscription will be empty");
        }

        let task = tokio::spawn(async move {
            let Some(mut source) = source else {
                return;
            };
            while let Some(tick) = source.recv().await {
                if !guard.admit(&tick) {
                    continue;
                }
                if tx.send(tick).await.is_err() {
                    return;
                }
                task_stats.record_delivered();
            }
        });
        Subscription::new(rx, task, stats)
    }
}
