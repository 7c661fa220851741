//! Market symbols and the per-segment sequence continuity rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DepthError;
use crate::parser::DepthEvent;

/// Binance market segment. Each segment proves diff continuity differently:
/// spot streams carry a `U..u` window, futures streams chain on `pu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Spot,
    Futures,
}

/// Outcome of checking the first diff after a snapshot was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialCheck {
    /// The event window bridges the snapshot id
    Accept,
    /// The event starts after the snapshot id, updates are missing
    Gap,
    /// The event is fully covered by the snapshot
    Stale,
}

impl Segment {
    pub const ALL: [Segment; 2] = [Segment::Spot, Segment::Futures];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Spot => "spot",
            Segment::Futures => "futures",
        }
    }

    /// Validate the first event applied on top of a snapshot with id `last`.
    pub fn check_initial(&self, last: u64, event: &DepthEvent) -> InitialCheck {
        if event.first_update_id > last + 1 {
            InitialCheck::Gap
        } else if event.final_update_id < last {
            InitialCheck::Stale
        } else {
            InitialCheck::Accept
        }
    }

    /// Whether `event` directly continues a replica whose last applied id is `last`.
    pub fn continues(&self, last: u64, event: &DepthEvent) -> bool {
        match self {
            Segment::Spot => last + 1 >= event.first_update_id && last < event.final_update_id,
            Segment::Futures => {
                event.prev_final_update_id == Some(last) && event.final_update_id >= last
            }
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = DepthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Segment::Spot),
            "futures" | "perp" | "usdm" => Ok(Segment::Futures),
            other => Err(DepthError::ParseError(format!("unknown segment: {other}"))),
        }
    }
}

/// A tradable symbol on one segment. `BTCUSDT` spot and `BTCUSDT` futures
/// are separate replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketSymbol {
    pub name: String,
    pub segment: Segment,
}

impl MarketSymbol {
    pub fn new(name: &str, segment: Segment) -> Self {
        Self {
            name: name.trim().to_uppercase(),
            segment,
        }
    }

    pub fn spot(name: &str) -> Self {
        Self::new(name, Segment::Spot)
    }

    pub fn futures(name: &str) -> Self {
        Self::new(name, Segment::Futures)
    }
}

impl fmt::Display for MarketSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.name)
    }
}
