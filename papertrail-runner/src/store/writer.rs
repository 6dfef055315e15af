//! Store writer: every [`StateStore`] call of a running service happens on a
//! blocking thread, never on the engine task.
//!
//! The engine task queues work and moves on. The writer drains whatever has
//! queued up and hands consecutive events to the store as one batch. After a
//! failed write the writer is degraded: queued events are skipped until a
//! full snapshot flush succeeds. Snapshots are queued behind the events they
//! already include, so a successful flush always covers everything skipped
//! before it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use papertrail_core::{EngineEvent, PersistedState};

use super::{StateStore, StoreError};

enum StoreOp {
    Apply(Vec<EngineEvent>),
    Flush {
        state: PersistedState,
        reply: Option<oneshot::Sender<bool>>,
    },
}

/// Durability state shared between the writer and the engine task.
#[derive(Debug, Default)]
pub struct WriterHealth {
    degraded: AtomicBool,
    episodes: AtomicU64,
    skipped: AtomicU64,
    queued: AtomicU64,
}

impl WriterHealth {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Times durability went from healthy to degraded.
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Relaxed)
    }

    /// Events that never reached the store individually.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Operations queued and not yet finished by the writer.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Acquire)
    }

    pub fn record_skipped(&self, events: usize) {
        self.skipped.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn mark_degraded(&self, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            self.episodes.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(%err, "persistence degraded; skipping events until a full flush succeeds");
        } else {
            tracing::debug!(%err, "persistence still degraded");
        }
    }

    /// Leave degraded mode. Returns whether it was degraded.
    pub fn mark_recovered(&self) -> bool {
        self.degraded.swap(false, Ordering::AcqRel)
    }
}

/// Handle to the writer thread. Dropping it lets the thread finish whatever
/// is queued and exit.
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreOp>,
    health: Arc<WriterHealth>,
    thread: JoinHandle<()>,
}

impl StoreWriter {
    /// Move `store` onto a blocking thread. Must be called inside a tokio
    /// runtime.
    pub fn spawn<S: StateStore>(store: S, health: Arc<WriterHealth>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread_health = Arc::clone(&health);
        let thread = tokio::task::spawn_blocking(move || run_writer(store, rx, &thread_health));
        Self { tx, health, thread }
    }

    pub fn health(&self) -> &WriterHealth {
        &self.health
    }

    /// Queue events for the store.
    pub fn apply(&self, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        self.send(StoreOp::Apply(events), count);
    }

    /// Queue a full snapshot behind everything already queued.
    pub fn flush(&self, state: PersistedState) {
        self.send(StoreOp::Flush { state, reply: None }, 0);
    }

    /// Flush `state` after everything already queued, stop the writer and
    /// report whether that last flush succeeded.
    pub async fn close(self, state: PersistedState) -> bool {
        let (reply, done) = oneshot::channel();
        self.send(
            StoreOp::Flush {
                state,
                reply: Some(reply),
            },
            0,
        );
        let Self { tx, thread, .. } = self;
        drop(tx);
        let flushed = done.await.unwrap_or(false);
        if let Err(err) = thread.await {
            tracing::error!(%err, "store writer stopped abnormally");
        }
        flushed
    }

    fn send(&self, op: StoreOp, events: usize) {
        self.health.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(op).is_err() {
            self.health.queued.fetch_sub(1, Ordering::AcqRel);
            self.health.record_skipped(events);
            tracing::error!("store writer is gone; dropping write");
        }
    }
}

fn run_writer<S: StateStore>(
    mut store: S,
    mut rx: mpsc::UnboundedReceiver<StoreOp>,
    health: &WriterHealth,
) {
    let mut batch: Vec<EngineEvent> = Vec::new();
    while let Some(first) = rx.blocking_recv() {
        let mut drained = 0u64;
        let mut next = Some(first);
        while let Some(op) = next.take() {
            drained += 1;
            match op {
                StoreOp::Apply(events) => batch.extend(events),
                StoreOp::Flush { state, reply } => {
                    write_batch(&mut store, &mut batch, health);
                    let flushed = flush(&mut store, &state, health);
                    if let Some(reply) = reply {
                        let _ = reply.send(flushed);
                    }
                }
            }
            next = rx.try_recv().ok();
        }
        write_batch(&mut store, &mut batch, health);
        health.queued.fetch_sub(drained, Ordering::AcqRel);
    }
    tracing::debug!("store writer finished");
}

fn write_batch<S: StateStore>(store: &mut S, batch: &mut Vec<EngineEvent>, health: &WriterHealth) {
    if batch.is_empty() {
        return;
    }
    if health.is_degraded() {
        health.record_skipped(batch.len());
    } else if let Err(err) = store.apply_batch(batch) {
        health.mark_degraded(&err);
        health.record_skipped(batch.len());
    }
    batch.clear();
}

fn flush<S: StateStore>(store: &mut S, state: &PersistedState, health: &WriterHealth) -> bool {
    match store.flush(state) {
        Ok(()) => {
            if health.mark_recovered() {
                tracing::info!("persistence recovered");
            }
            true
        }
        Err(err) => {
            health.mark_degraded(&err);
            false
        }
    }
}
