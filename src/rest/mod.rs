//! REST module for Binance snapshot requests

mod rate_limit;
mod snapshot;

pub use rate_limit::RateLimiter;
pub use snapshot::{depth_request_weight, fetch_fresh_snapshot, RestSnapshotClient, SnapshotFetcher};

#[cfg(test)]
pub use snapshot::MockSnapshotFetcher;
