//! In-memory store for tests and `--ephemeral` runs.

use std::sync::Arc;

use parking_lot::Mutex;

use papertrail_core::{EngineEvent, PersistedState};

use super::{StateStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    state: Option<PersistedState>,
    events: Vec<EngineEvent>,
    failing: bool,
    flushes: u64,
}

/// Cloneable handle; clones share the same storage, so a test can keep one
/// clone while the service owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        let store = Self::default();
        store.inner.lock().state = Some(state);
        store
    }

    /// Make every subsequent `apply` and `flush` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    pub fn state(&self) -> Option<PersistedState> {
        self.inner.lock().state.clone()
    }

    /// Every event applied successfully, in order.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.inner.lock().events.clone()
    }

    pub fn flush_count(&self) -> u64 {
        self.inner.lock().flushes
    }
}

impl StateStore for MemoryStore {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        Ok(self.inner.lock().state.clone())
    }

    fn apply(&mut self, event: &EngineEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        if let Some(state) = inner.state.as_mut() {
            state.apply(event);
        }
        inner.events.push(event.clone());
        Ok(())
    }

    fn flush(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        inner.state = Some(state.clone());
        inner.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use papertrail_core::{Position, PositionId};

    #[test]
    fn clones_share_state() {
        let store = MemoryStore::new();
        let mut owned = store.clone();
        owned.flush(&PersistedState::fresh(10.0)).unwrap();
        assert_eq!(store.state().unwrap().balance, 10.0);
        assert_eq!(store.flush_count(), 1);
    }

    #[test]
    fn failing_store_rejects_writes() {
        let mut store = MemoryStore::with_state(PersistedState::fresh(10.0));
        store.set_failing(true);
        let pos = Position::open(PositionId(1), "A", 1.0, Utc::now(), 1.0, 0.01);
        assert!(store.apply(&EngineEvent::PositionOpened(pos)).is_err());
        assert!(store.events().is_empty());
        store.set_failing(false);
        assert!(store.flush(&PersistedState::fresh(11.0)).is_ok());
    }
}
