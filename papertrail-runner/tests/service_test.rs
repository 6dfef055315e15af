//! Engine service tests: live ticks through a channel feed, real clock.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;

use papertrail_core::{EngineConfig, EngineEvent, PersistedState, Tick};
use papertrail_runner::{
    ChannelFeed, EngineHandle, EngineService, MemoryStore, StateStore, StoreError, TickFeed,
};

fn config(symbols: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::with_symbols(symbols.iter().copied());
    config.clock_interval_ms = 5;
    config
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if check().await {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn send(tx: &mpsc::Sender<Tick>, symbol: &str, price: f64) {
    tx.send(Tick::new(symbol, price, Utc::now()).unwrap())
        .await
        .unwrap();
}

fn start(
    config: EngineConfig,
    store: MemoryStore,
) -> (
    EngineHandle,
    tokio::task::JoinHandle<papertrail_runner::ServiceReport>,
    mpsc::Sender<Tick>,
) {
    let feed = ChannelFeed::new(1024);
    let tx = feed.sender();
    let symbols = config.symbols.clone();
    let service = EngineService::start(config, store).unwrap();
    let subscription = feed.subscribe(&symbols);
    let (handle, task) = service.spawn(subscription);
    (handle, task, tx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rise_opens_then_stop_closes() {
    let store = MemoryStore::new();
    let (handle, task, tx) = start(config(&["AAA"]), store.clone());

    send(&tx, "AAA", 100.0).await;
    send(&tx, "AAA", 101.0).await;
    wait_for("position to open", || async {
        handle.open_positions().await.unwrap().len() == 1
    })
    .await;

    let open = handle.open_positions().await.unwrap();
    assert_eq!(open[0].position.entry_price, 101.0);
    assert_eq!(handle.current_balance(), 10_000.0);

    send(&tx, "AAA", 102.0).await;
    send(&tx, "AAA", 90.0).await;
    wait_for("position to close", || async {
        !handle.recent_trades(1).await.unwrap().is_empty()
    })
    .await;

    let trade = handle.recent_trades(1).await.unwrap().remove(0);
    assert_eq!(trade.exit_price, 90.0);
    assert!((trade.trailing_stop_price - 102.0 * 0.99).abs() < 1e-9);
    assert!(trade.realized_pnl < 0.0);
    assert!((handle.current_balance() - (10_000.0 + trade.realized_pnl)).abs() < 1e-9);

    let dashboard = handle.dashboard(Utc::now()).await.unwrap();
    assert_eq!(dashboard.recent_trades.len(), 1);
    assert_eq!(dashboard.worst_trades.len(), 1);
    assert!(dashboard.best_trades.is_empty());
    assert_eq!(dashboard.last_24h.losses, 1);
    assert_eq!(dashboard.totals.losses, 1);
    assert!(dashboard.open_positions.is_empty());

    let report = handle.shutdown().await.unwrap();
    assert!(report.final_flush_ok);
    assert_eq!(report.engine.positions_opened, 1);
    assert_eq!(report.engine.positions_closed, 1);
    assert_eq!(task.await.unwrap(), report);

    let state = store.state().unwrap();
    assert_eq!(state.trades.len(), 1);
    assert!(state.open_positions.is_empty());
    assert_eq!(state.balance, report.balance);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_and_queries_keep_one_position_per_symbol() {
    let symbols: Vec<String> = (0..20).map(|i| format!("SYM{i:02}")).collect();
    let symbol_refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
    let mut cfg = config(&symbol_refs);
    cfg.clock_interval_ms = 1;
    let store = MemoryStore::new();
    let (handle, task, tx) = start(cfg, store.clone());

    // Each producer owns a disjoint set of symbols so per-symbol order holds.
    let mut producers = Vec::new();
    for (n, chunk) in symbols.chunks(5).enumerate() {
        let chunk: Vec<String> = chunk.to_vec();
        let tx = tx.clone();
        producers.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(n as u64);
            let mut prices: Vec<f64> = vec![100.0; chunk.len()];
            for step in 0..400 {
                for (symbol, price) in chunk.iter().zip(prices.iter_mut()) {
                    *price *= 1.0 + rng.gen_range(-0.02..0.02);
                    let tick = Tick::new(symbol.as_str(), *price, Utc::now()).unwrap();
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                }
                if step % 20 == 0 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            }
        }));
    }

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let open = handle.open_positions().await.unwrap();
                    let distinct: HashSet<&str> =
                        open.iter().map(|v| v.position.symbol.as_str()).collect();
                    assert_eq!(distinct.len(), open.len());
                    let _ = handle.dashboard(Utc::now()).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        })
        .collect();

    for p in producers {
        p.await.unwrap();
    }
    for r in readers {
        r.await.unwrap();
    }
    // let the clock catch up with the last ticks
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(report.engine.positions_opened > 0, "random walk never entered");

    // Replay the event log: opens and closes alternate per symbol.
    let mut open: BTreeMap<String, u64> = BTreeMap::new();
    let mut ids = HashSet::new();
    let mut realized = 0.0;
    for event in store.events() {
        match event {
            EngineEvent::PositionOpened(p) => {
                assert!(ids.insert(p.id), "id {} reused", p.id);
                assert!(
                    open.insert(p.symbol.clone(), p.id.0).is_none(),
                    "second open position for {}",
                    p.symbol
                );
            }
            EngineEvent::PositionClosed { trade, balance } => {
                assert_eq!(open.remove(&trade.symbol), Some(trade.position_id.0));
                realized += trade.realized_pnl;
                assert!((balance - (10_000.0 + realized)).abs() < 1e-6);
            }
            EngineEvent::StopRaised { symbol, position_id, .. } => {
                assert_eq!(open.get(&symbol), Some(&position_id.0));
            }
            EngineEvent::SymbolHalted { symbol, reason } => {
                panic!("{symbol} halted: {reason}");
            }
        }
    }
    assert_eq!(open.len(), report.open_positions);
    assert!((report.balance - (10_000.0 + realized)).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_store_degrades_then_recovers_with_full_flush() {
    let store = MemoryStore::new();
    store.set_failing(true);
    let (handle, task, tx) = start(config(&["AAA"]), store.clone());

    assert!(handle.status().await.unwrap().degraded);

    send(&tx, "AAA", 100.0).await;
    send(&tx, "AAA", 101.0).await;
    wait_for("position to open", || async {
        handle.open_positions().await.unwrap().len() == 1
    })
    .await;
    assert!(store.state().is_none());
    assert!(store.events().is_empty());

    store.set_failing(false);
    wait_for("durability to recover", || async {
        !handle.status().await.unwrap().degraded
    })
    .await;

    let state = store.state().unwrap();
    assert_eq!(state.open_positions.len(), 1);
    assert_eq!(state.open_positions[0].symbol, "AAA");

    let report = handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(!report.degraded);
    assert_eq!(report.degraded_episodes, 1);
    assert!(report.events_skipped_while_degraded >= 1);
}

#[tokio::test]
async fn queries_after_shutdown_report_service_gone() {
    let (handle, task, _tx) = start(config(&["AAA"]), MemoryStore::new());
    let other = handle.clone();

    let report = handle.shutdown().await.unwrap();
    assert!(report.final_flush_ok);
    task.await.unwrap();

    assert!(other.recent_trades(5).await.is_err());
    assert!(other.shutdown().await.is_err());
    assert!(!other.is_running());
    // balance stays readable through the shared ledger
    assert_eq!(other.current_balance(), 10_000.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ticks_for_unknown_symbols_never_reach_the_engine() {
    let (handle, task, tx) = start(config(&["AAA"]), MemoryStore::new());

    send(&tx, "ZZZ", 1.0).await;
    send(&tx, "AAA", 50.0).await;
    wait_for("tick to apply", || async {
        handle.status().await.unwrap().engine.ticks_applied == 1
    })
    .await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.feed.foreign_symbol, 1);
    assert_eq!(status.engine.ticks_unknown_symbol, 0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

/// Blocks every `apply` until opened.
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn open(&self) {
        *self.0 .0.lock() = true;
        self.0 .1.notify_all();
    }

    fn wait(&self) {
        let mut open = self.0 .0.lock();
        while !*open {
            self.0 .1.wait(&mut open);
        }
    }
}

struct GatedStore {
    inner: MemoryStore,
    gate: Gate,
}

impl StateStore for GatedStore {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        self.inner.load()
    }

    fn apply(&mut self, event: &EngineEvent) -> Result<(), StoreError> {
        self.gate.wait();
        self.inner.apply(event)
    }

    fn flush(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        self.inner.flush(state)
    }
}

#[tokio::test]
async fn stalled_store_does_not_stall_the_engine() {
    let memory = MemoryStore::new();
    let gate = Gate::default();
    let store = GatedStore {
        inner: memory.clone(),
        gate: gate.clone(),
    };
    let cfg = config(&["AAA"]);
    let feed = ChannelFeed::new(64);
    let tx = feed.sender();
    let service = EngineService::start(cfg.clone(), store).unwrap();
    let (handle, task) = service.spawn(feed.subscribe(&cfg.symbols));

    send(&tx, "AAA", 100.0).await;
    send(&tx, "AAA", 101.0).await;
    // single-threaded runtime: these answers only come back if the engine
    // task is free while the writer is stuck
    wait_for("position to open", || async {
        handle.open_positions().await.unwrap().len() == 1
    })
    .await;
    wait_for("the open to queue", || async {
        handle.status().await.unwrap().pending_writes >= 1
    })
    .await;
    assert!(memory.events().is_empty());

    gate.open();
    wait_for("the writer to drain", || async {
        handle.status().await.unwrap().pending_writes == 0
    })
    .await;
    assert_eq!(memory.events().len(), 1);

    let report = handle.shutdown().await.unwrap();
    assert!(report.final_flush_ok);
    assert!(!report.degraded);
    task.await.unwrap();
}
