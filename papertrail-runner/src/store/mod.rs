//! Persistence for engine state.
//!
//! The service writes every [`EngineEvent`] through [`StateStore::apply`] and
//! a full [`PersistedState`] through [`StateStore::flush`] at startup,
//! after recovering from write failures, and at shutdown. Once the service
//! runs, all of that happens on a [`StoreWriter`] thread rather than on the
//! engine task.

pub mod json;
pub mod memory;
pub mod writer;

use std::io;

use thiserror::Error;

use papertrail_core::{EngineEvent, PersistedState};

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use writer::{StoreWriter, WriterHealth};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait StateStore: Send + 'static {
    /// Last durable state, or `None` when nothing has been stored yet.
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError>;

    /// Persist one state change.
    fn apply(&mut self, event: &EngineEvent) -> Result<(), StoreError>;

    /// Persist consecutive state changes. Stores that rewrite a snapshot per
    /// change override this to rewrite once per batch.
    fn apply_batch(&mut self, events: &[EngineEvent]) -> Result<(), StoreError> {
        events.iter().try_for_each(|event| self.apply(event))
    }

    /// Replace the stored state with `state`.
    fn flush(&mut self, state: &PersistedState) -> Result<(), StoreError>;
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn load(&mut self) -> Result<Option<PersistedState>, StoreError> {
        (**self).load()
    }

    fn apply(&mut self, event: &EngineEvent) -> Result<(), StoreError> {
        (**self).apply(event)
    }

    fn apply_batch(&mut self, events: &[EngineEvent]) -> Result<(), StoreError> {
        (**self).apply_batch(events)
    }

    fn flush(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        (**self).flush(state)
    }
}
