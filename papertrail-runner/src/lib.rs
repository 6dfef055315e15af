//! papertrail runner: live orchestration around the core engine.
//!
//! - Tick feeds (Binance trade stream, simulated random walk, channel)
//! - The engine service task and its query [`EngineHandle`]
//! - Persistence stores (JSON files, in-memory)
//! - Application config, tracing setup and CSV export

pub mod clock;
pub mod config;
pub mod export;
pub mod feed;
pub mod handle;
pub mod observability;
pub mod service;
pub mod store;

pub use clock::EngineClock;
pub use config::{AppConfig, AppConfigError, FeedConfig, FeedKind, SimulatedConfig, StoreConfig};
pub use export::{export_trades_csv, write_trades_csv};
pub use feed::{
    BinanceTradeFeed, ChannelFeed, FeedError, FeedStatsSnapshot, SimulatedFeed, Subscription,
    TickFeed,
};
pub use handle::{Dashboard, EngineHandle, ServiceGone, ServiceStatus};
pub use observability::init_tracing;
pub use service::{EngineService, ServiceReport};
pub use store::{JsonFileStore, MemoryStore, StateStore, StoreError, StoreWriter, WriterHealth};
