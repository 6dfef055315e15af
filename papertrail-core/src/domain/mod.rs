//! Domain types for papertrail

pub mod ids;
pub mod position;
pub mod tick;
pub mod trade;

pub use ids::{IdGen, PositionId};
pub use position::{trailing_stop_for, Position, PositionStatus};
pub use tick::{Tick, TickError};
pub use trade::TradeRecord;
