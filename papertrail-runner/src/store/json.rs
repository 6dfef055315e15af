//! JSON file store: `state.json` snapshot plus append-only `trades.jsonl`.
//!
//! `state.json` holds balance, open positions and counters and is replaced
//! atomically (write temp file, rename). Closed trades are appended to
//! `trades.jsonl`, one JSON object per line, before `state.json` is
//! rewritten; on load any trade whose position is still listed as open is
//! reconciled into the snapshot.
//!
//! The in-memory mirror never holds trades, so its size follows the open
//! position count rather than the length of the run.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use papertrail_core::{EngineEvent, PersistedState, PositionId, TradeRecord};

use super::{StateStore, StoreError};

const STATE_FILE: &str = "state.json";
const TRADES_FILE: &str = "trades.jsonl";

/// Default number of logged trade ids remembered for flush dedup.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

/// Most recently logged trade ids, oldest evicted first.
#[derive(Debug)]
struct LoggedIds {
    order: VecDeque<PositionId>,
    ids: HashSet<PositionId>,
    cap: usize,
}

impl LoggedIds {
    fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            cap: cap.max(1),
        }
    }

    fn contains(&self, id: PositionId) -> bool {
        self.ids.contains(&id)
    }

    fn insert(&mut self, id: PositionId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    /// Last written snapshot, `trades` always empty.
    mirror: Option<PersistedState>,
    logged: LoggedIds,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            mirror: None,
            logged: LoggedIds::new(DEFAULT_DEDUP_WINDOW),
        })
    }

    /// Remember this many logged trade ids when deciding which trades of a
    /// flushed snapshot are already in `trades.jsonl`. Should be at least the
    /// engine's history capacity; anything older than the window is assumed
    /// logged.
    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.logged = LoggedIds::new(window);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn trades_path(&self) -> PathBuf {
        self.dir.join(TRADES_FILE)
    }

    /// Every trade in `trades.jsonl`, oldest first. Malformed lines are
    /// skipped; repeated position ids keep the first record.
    pub fn read_trades(&self) -> Result<Vec<TradeRecord>, StoreError> {
        read_trades(&self.trades_path())
    }

    /// Append the trades not yet logged, in one open of the log.
    fn append_trades<'a>(
        &mut self,
        trades: impl IntoIterator<Item = &'a TradeRecord>,
    ) -> Result<(), StoreError> {
        let mut file: Option<fs::File> = None;
        for trade in trades {
            if self.logged.contains(trade.position_id) {
                continue;
            }
            let json = serde_json::to_string(trade)?;
            let out = match file.as_mut() {
                Some(out) => out,
                None => file.insert(
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(self.trades_path())?,
                ),
            };
            writeln!(out, "{json}")?;
            self.logged.insert(trade.position_id);
        }
        if let Some(mut out) = file {
            out.flush()?;
        }
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        let state_path = self.state_path();
        let trades = self.read_trades()?;
        self.logged.clear();
        for trade in &trades {
            self.logged.insert(trade.position_id);
        }

        let mut state = match fs::read_to_string(&state_path) {
            Ok(content) => serde_json::from_str::<PersistedState>(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if trades.is_empty() {
                    return Ok(None);
                }
                return Err(StoreError::Unavailable(format!(
                    "{} missing while {} has {} trades",
                    state_path.display(),
                    TRADES_FILE,
                    trades.len()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        reconcile(&mut state, &trades);
        state.trades = Vec::new();
        self.mirror = Some(state.clone());
        state.trades = trades;
        Ok(Some(state))
    }

    fn apply(&mut self, event: &EngineEvent) -> Result<(), StoreError> {
        self.apply_batch(std::slice::from_ref(event))
    }

    /// Log the batch's closes, fold every event into the mirror, then rewrite
    /// `state.json` once.
    fn apply_batch(&mut self, events: &[EngineEvent]) -> Result<(), StoreError> {
        if self.mirror.is_none() {
            return Err(StoreError::Unavailable(
                "apply before initial flush".to_string(),
            ));
        }
        self.append_trades(events.iter().filter_map(|event| match event {
            EngineEvent::PositionClosed { trade, .. } => Some(trade),
            _ => None,
        }))?;

        let state_path = self.state_path();
        let Some(mirror) = self.mirror.as_mut() else {
            return Ok(());
        };
        let mut changed = false;
        for event in events {
            mirror.apply(event);
            changed |= !matches!(event, EngineEvent::SymbolHalted { .. });
        }
        mirror.trades.clear();
        if changed {
            write_state(&state_path, mirror)?;
        }
        Ok(())
    }

    fn flush(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        self.append_trades(&state.trades)?;
        let snapshot = PersistedState {
            balance: state.balance,
            open_positions: state.open_positions.clone(),
            trades: Vec::new(),
            next_position_id: state.next_position_id,
            closes_applied: state.closes_applied,
            config_fingerprint: state.config_fingerprint.clone(),
            outcome_totals: state.outcome_totals,
        };
        write_state(&self.state_path(), &snapshot)?;
        self.mirror = Some(snapshot);
        Ok(())
    }
}

/// Replace `path` with `state` via a synced temp file and rename.
fn write_state(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_trades(path: &Path) -> Result<Vec<TradeRecord>, StoreError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut seen = HashSet::new();
    let mut trades = Vec::new();
    for (lineno, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeRecord>(&line) {
            Ok(trade) => {
                if seen.insert(trade.position_id) {
                    trades.push(trade);
                }
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), line = lineno + 1, %err, "skipping malformed trade line");
            }
        }
    }
    trades.sort_by_key(|t| t.closed_at);
    Ok(trades)
}

/// Fold in closes that reached the trade log but not the snapshot.
fn reconcile(state: &mut PersistedState, trades: &[TradeRecord]) {
    for trade in trades {
        let Some(idx) = state
            .open_positions
            .iter()
            .position(|p| p.id == trade.position_id)
        else {
            continue;
        };
        state.open_positions.remove(idx);
        state.balance += trade.realized_pnl;
        state.closes_applied += 1;
        state.outcome_totals.record(trade);
        state.next_position_id = state.next_position_id.max(trade.position_id.0 + 1);
        tracing::warn!(
            position_id = %trade.position_id,
            symbol = %trade.symbol,
            "reconciled close found only in trade log"
        );
    }
}
