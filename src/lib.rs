//! Market depth replication library
//!
//! Keeps local replicas of Binance spot and USD-M futures order books in
//! sync from REST snapshots and WebSocket diff streams, and publishes the
//! most significant levels of each book to subscribers.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod replica;
pub mod rest;
pub mod server;
pub mod symbol;
pub mod websocket;

pub use config::Config;
pub use error::{DepthError, Result};
pub use orderbook::{BookSnapshot, CupSnapshot, LevelAggregator, LevelClassifier, TopLevelView};
pub use parser::{DepthEvent, DepthUpdate, OrderBookSnapshot, ParsedMessage};
pub use publisher::{Distributor, Publisher};
pub use replica::{EventIngestQueue, ReplicaRegistry, ReplicaSyncEngine, ResyncScheduler, SyncState};
pub use rest::{RateLimiter, RestSnapshotClient, SnapshotFetcher};
pub use symbol::{MarketSymbol, Segment};
pub use websocket::WebSocketManager;

/// Application state shared across components
pub struct AppState {
    pub registry: Arc<ReplicaRegistry>,
    pub scheduler: Arc<ResyncScheduler>,
    pub config: Arc<Config>,
}
