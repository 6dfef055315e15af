//! Position management: sizing, trailing stops, and the per-symbol
//! open/close state machine.

pub mod manager;
pub mod sizing;

pub use manager::{ExitCheck, PositionManager};
pub use sizing::size_quantity;
