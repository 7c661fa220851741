//! Order book module
//!
//! Full-resolution replica per symbol, the bounded top-N views derived from
//! it, tier classification and the traded-volume ranking.

mod aggregator;
mod classifier;
mod view;
mod volumes;

pub use aggregator::{AggregatorLimits, LevelAggregator};
pub use classifier::{ClassifierConfig, DistanceBand, LevelClassifier, MAX_TIER};
pub use view::TopLevelView;
pub use volumes::{GVolume, TopNVolumes, VolumeTracker};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::replica::SyncState;
use crate::symbol::{MarketSymbol, Segment};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A price level that changed while applying a diff. A zero quantity means
/// the level was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelChange {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub first_seen_ms: i64,
}

impl LevelChange {
    pub fn removed(side: Side, price: Decimal) -> Self {
        Self {
            side,
            price,
            quantity: Decimal::ZERO,
            first_seen_ms: 0,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// One entry of a published cup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CupLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub distance_pct: Decimal,
    pub tier: u8,
    /// Milliseconds since the price level first appeared
    pub age_ms: i64,
}

/// Value object handed to the distributor for one view of one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CupSnapshot {
    pub symbol: String,
    pub segment: Segment,
    pub profile: String,
    pub timestamp: i64,
    /// Highest tier in the cup, -1 when empty
    pub max_tier: i32,
    /// Best price first
    pub bids: Vec<CupLevel>,
    /// Best price first
    pub asks: Vec<CupLevel>,
}

/// Ad-hoc read of a replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: MarketSymbol,
    pub state: SyncState,
    pub last_update_id: u64,
    pub mid_price: Option<Decimal>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Percentage distance of `price` from `mid`
pub fn distance_pct(price: Decimal, mid: Decimal) -> Decimal {
    if mid.is_zero() {
        return Decimal::ZERO;
    }
    ((price - mid) / mid * Decimal::ONE_HUNDRED).abs()
}
