//! Engine service: the single task that owns the [`Engine`].
//!
//! The task `select!`s over handle commands, the engine clock and the tick
//! subscription. Each branch runs to completion before the next is polled,
//! so tick handling, sweeps and queries never interleave.
//!
//! Every emitted event is queued for a [`StoreWriter`], which does the file
//! I/O on its own thread. When a write fails the writer goes degraded and the
//! service queues a full snapshot on every clock tick until one succeeds.
//! If the writer falls too far behind, the service stops queueing events and
//! resyncs with a snapshot once the backlog has drained.

use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use papertrail_core::{Engine, EngineConfig, EngineError, EngineEvent, EngineStats, Tick};

use crate::clock::EngineClock;
use crate::feed::{FeedStats, FeedStatsSnapshot, Subscription};
use crate::handle::{
    last_24h, Command, Dashboard, EngineHandle, ServiceStatus, DASHBOARD_RECENT, DASHBOARD_TOP,
};
use crate::store::{StateStore, StoreWriter, WriterHealth};

const COMMAND_CAPACITY: usize = 64;

/// Queued writer operations beyond which events are skipped until a resync.
const WRITE_BACKLOG_LIMIT: u64 = 1024;

/// Summary returned when the service stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    pub engine: EngineStats,
    pub feed: FeedStatsSnapshot,
    pub balance: f64,
    pub open_positions: usize,
    /// Still degraded when the service stopped.
    pub degraded: bool,
    /// Times durability went from healthy to degraded.
    pub degraded_episodes: u64,
    /// Events not written individually while degraded.
    pub events_skipped_while_degraded: u64,
    pub final_flush_ok: bool,
}

pub struct EngineService<S: StateStore> {
    engine: Engine,
    store: S,
    health: Arc<WriterHealth>,
}

impl<S: StateStore> EngineService<S> {
    /// Build the engine, restoring from `store` when it holds state, and
    /// write an initial snapshot.
    pub fn start(config: EngineConfig, mut store: S) -> anyhow::Result<Self> {
        let persisted = store.load().context("load persisted state")?;
        let engine = match persisted {
            Some(state) => {
                let restored =
                    Engine::restore(config, state).context("restore engine from state")?;
                if restored.fingerprint_changed {
                    tracing::warn!("engine parameters changed since the state was written");
                }
                if !restored.violations.is_empty() {
                    tracing::warn!(
                        refused = restored.violations.len(),
                        "restored with halted symbols"
                    );
                }
                restored.engine
            }
            None => Engine::new(config).context("build engine")?,
        };

        let health = Arc::new(WriterHealth::default());
        if let Err(err) = store.flush(&engine.snapshot()) {
            health.mark_degraded(&err);
        }
        Ok(Self {
            engine,
            store,
            health,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run the service on its own task, with the store moved onto a writer
    /// thread. The returned handle answers queries until shutdown; the join
    /// handle yields the final report.
    pub fn spawn(self, subscription: Subscription) -> (EngineHandle, JoinHandle<ServiceReport>) {
        let Self {
            engine,
            store,
            health,
        } = self;
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = EngineHandle::new(tx, engine.ledger());
        let writer = StoreWriter::spawn(store, Arc::clone(&health));
        let running = RunningService {
            engine,
            writer,
            health,
            resync: false,
        };
        let task = tokio::spawn(running.run(subscription, rx));
        (handle, task)
    }
}

struct RunningService {
    engine: Engine,
    writer: StoreWriter,
    health: Arc<WriterHealth>,
    /// Events are being skipped until the next snapshot is queued.
    resync: bool,
}

impl RunningService {
    async fn run(
        mut self,
        mut subscription: Subscription,
        mut commands: mpsc::Receiver<Command>,
    ) -> ServiceReport {
        let mut clock = EngineClock::new(self.engine.config().clock_interval());
        let mut feed_closed = false;
        let mut shutdown_reply: Option<oneshot::Sender<ServiceReport>> = None;
        let feed_stats = subscription.stats_handle();

        tracing::info!(
            symbols = self.engine.config().symbols.len(),
            balance = self.engine.current_balance(),
            open = self.engine.open_position_count(),
            clock_ms = clock.period().as_millis() as u64,
            "engine started"
        );

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.answer(cmd, &feed_stats),
                    None => break,
                },
                now = clock.tick() => self.on_clock(now),
                tick = subscription.next(), if !feed_closed => match tick {
                    Some(tick) => self.on_tick(&tick),
                    None => {
                        feed_closed = true;
                        tracing::warn!("tick feed ended; clock keeps running");
                    }
                },
            }
        }

        subscription.cancel();
        let snapshot = self.engine.snapshot();
        let Self {
            engine,
            writer,
            health,
            ..
        } = self;
        let final_flush_ok = writer.close(snapshot).await;
        let report = ServiceReport {
            engine: engine.stats(),
            feed: subscription.stats(),
            balance: engine.current_balance(),
            open_positions: engine.open_position_count(),
            degraded: health.is_degraded(),
            degraded_episodes: health.episodes(),
            events_skipped_while_degraded: health.skipped(),
            final_flush_ok,
        };
        tracing::info!(
            balance = report.balance,
            opened = report.engine.positions_opened,
            closed = report.engine.positions_closed,
            degraded = report.degraded,
            "engine stopped"
        );
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(report.clone());
        }
        report
    }

    fn on_tick(&mut self, tick: &Tick) {
        match self.engine.on_tick(tick) {
            Ok(events) => self.persist(events),
            Err(EngineError::UnknownSymbol(symbol)) => {
                tracing::debug!(%symbol, "tick for symbol outside the universe");
            }
            Err(EngineError::SymbolHalted(_)) => {}
            Err(err) => tracing::error!(%err, "tick rejected"),
        }
    }

    fn on_clock(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let events = self.engine.on_clock(now);
        self.persist(events);
        // One snapshot in flight at a time: wait for the writer to go idle.
        if (self.resync || self.health.is_degraded()) && self.health.queued() == 0 {
            self.resync = false;
            self.writer.flush(self.engine.snapshot());
        }
    }

    fn persist(&mut self, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        if !self.resync && self.health.queued() >= WRITE_BACKLOG_LIMIT {
            self.resync = true;
            tracing::warn!(
                queued = self.health.queued(),
                "store writer backlog full; skipping events until it drains"
            );
        }
        if self.resync {
            self.health.record_skipped(events.len());
            return;
        }
        self.writer.apply(events);
    }

    fn answer(&self, cmd: Command, feed_stats: &FeedStats) {
        let engine = &self.engine;
        // A dropped reply receiver only means the caller stopped waiting.
        match cmd {
            Command::RecentTrades { n, reply } => {
                let _ = reply.send(engine.recent_trades(n));
            }
            Command::OpenPositions { reply } => {
                let _ = reply.send(engine.open_positions());
            }
            Command::TopPerformers { range, k, reply } => {
                let _ = reply.send(engine.top_performers(range, k));
            }
            Command::BestTrades { n, reply } => {
                let _ = reply.send(engine.best_trades(n));
            }
            Command::WorstTrades { n, reply } => {
                let _ = reply.send(engine.worst_trades(n));
            }
            Command::OutcomeCounts { since, reply } => {
                let _ = reply.send(engine.outcome_counts(since));
            }
            Command::Dashboard { now, reply } => {
                let _ = reply.send(Dashboard {
                    generated_at: now,
                    balance: engine.current_balance(),
                    recent_trades: engine.recent_trades(DASHBOARD_RECENT),
                    best_trades: engine.best_trades(DASHBOARD_TOP),
                    worst_trades: engine.worst_trades(DASHBOARD_TOP),
                    totals: engine.history().outcome_totals(),
                    last_24h: engine.outcome_counts(last_24h(now)),
                    open_positions: engine.open_positions(),
                });
            }
            Command::Status { reply } => {
                let _ = reply.send(ServiceStatus {
                    engine: engine.stats(),
                    feed: feed_stats.snapshot(),
                    balance: engine.current_balance(),
                    open_positions: engine.open_position_count(),
                    halted_symbols: engine
                        .halted_symbols()
                        .into_iter()
                        .map(|(s, r)| (s.to_string(), r.to_string()))
                        .collect(),
                    degraded: self.resync || self.health.is_degraded(),
                    pending_writes: self.health.queued(),
                });
            }
            Command::Shutdown { .. } => {}
        }
    }
}
