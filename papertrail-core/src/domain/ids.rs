use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique, monotonically assigned position identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// Sequential id generator. Seeded past the highest persisted id on restart.
#[derive(Debug, Clone)]
pub struct IdGen {
    next: u64,
}

impl IdGen {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn starting_at(next: u64) -> Self {
        Self { next: next.max(1) }
    }

    pub fn next_position_id(&mut self) -> PositionId {
        let id = PositionId(self.next);
        self.next += 1;
        id
    }

    /// Make sure future ids never collide with `seen`.
    pub fn observe(&mut self, seen: PositionId) {
        if seen.0 >= self.next {
            self.next = seen.0 + 1;
        }
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
