//! Tier classification of price levels
//!
//! A level's tier grows with its notional value and shrinks with its distance
//! from the mid price. Distance selects an offset into an ascending table of
//! notional steps: a level close to mid needs `steps[tier - 1]` to reach
//! `tier`, a level in a farther band needs `steps[tier - 1 + offset]`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DepthError, Result};

/// Highest tier a level can be classified into
pub const MAX_TIER: u8 = 4;

/// Distance band: levels at most `max_distance_pct` away from mid skip the
/// first `offset` notional steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceBand {
    pub max_distance_pct: Decimal,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Ascending notional thresholds in quote currency
    pub notional_steps: Vec<Decimal>,
    /// Bands sorted by ascending distance
    pub distance_bands: Vec<DistanceBand>,
    /// Symbols whose thresholds are multiplied by `boost_factor`
    pub boosted_symbols: Vec<String>,
    pub boost_factor: Decimal,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            notional_steps: [50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000, 5_000_000]
                .into_iter()
                .map(Decimal::from)
                .collect(),
            distance_bands: [(1, 0), (3, 1), (6, 2), (10, 3)]
                .into_iter()
                .map(|(pct, offset)| DistanceBand {
                    max_distance_pct: Decimal::from(pct),
                    offset,
                })
                .collect(),
            boosted_symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            boost_factor: Decimal::from(10),
        }
    }
}

impl ClassifierConfig {
    /// Reject tables that would make the tier non-monotonic.
    pub fn validate(&self) -> Result<()> {
        if self.notional_steps.is_empty() {
            return Err(DepthError::ConfigError(
                "classifier needs at least one notional step".into(),
            ));
        }
        if self.notional_steps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DepthError::ConfigError(
                "classifier notional steps must be strictly increasing".into(),
            ));
        }
        if self.distance_bands.is_empty() {
            return Err(DepthError::ConfigError(
                "classifier needs at least one distance band".into(),
            ));
        }
        let unordered = self.distance_bands.windows(2).any(|w| {
            w[0].max_distance_pct >= w[1].max_distance_pct || w[0].offset > w[1].offset
        });
        if unordered {
            return Err(DepthError::ConfigError(
                "classifier distance bands must grow in distance and offset".into(),
            ));
        }
        if self.boost_factor < Decimal::ONE {
            return Err(DepthError::ConfigError("classifier boost factor must be >= 1".into()));
        }
        Ok(())
    }
}

/// Maps (price, quantity, distance, symbol) to a tier in `0..=MAX_TIER`
#[derive(Debug, Clone)]
pub struct LevelClassifier {
    config: ClassifierConfig,
}

impl LevelClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn classify(
        &self,
        price: Decimal,
        quantity: Decimal,
        distance_pct: Decimal,
        symbol: &str,
    ) -> u8 {
        let Some(offset) = self.band_offset(distance_pct) else {
            return 0;
        };

        let notional = price * quantity;
        let scale = if self.is_boosted(symbol) {
            self.config.boost_factor
        } else {
            Decimal::ONE
        };

        for tier in (1..=MAX_TIER).rev() {
            let idx = tier as usize - 1 + offset;
            if let Some(step) = self.config.notional_steps.get(idx) {
                if notional >= *step * scale {
                    return tier;
                }
            }
        }
        0
    }

    fn band_offset(&self, distance_pct: Decimal) -> Option<usize> {
        self.config
            .distance_bands
            .iter()
            .find(|band| distance_pct.abs() <= band.max_distance_pct)
            .map(|band| band.offset)
    }

    fn is_boosted(&self, symbol: &str) -> bool {
        self.config.boosted_symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

impl Default for LevelClassifier {
    fn default() -> Self {
        Self {
            config: ClassifierConfig::default(),
        }
    }
}
