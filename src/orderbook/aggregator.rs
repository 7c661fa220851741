//! Full-resolution order book replica
//!
//! Both sides are kept in ascending `BTreeMap`s; bids are read from the back
//! (highest first), asks from the front. Only levels within the configured
//! distance from mid are admitted, and each side is truncated once it grows
//! beyond the high-water mark.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::{distance_pct, Level, LevelChange, Side};
use crate::error::{DepthError, Result};
use crate::parser::PriceLevel;

/// Admission and truncation bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorLimits {
    /// Maximum distance from mid, in percent, for a new level to be admitted
    pub max_distance_pct: Decimal,
    /// Truncation starts once a side holds more levels than this
    pub high_water: usize,
    /// Truncation stops once a side is at or below this
    pub low_water: usize,
    /// Levels removed per truncation round
    pub batch: usize,
    /// Number of farthest levels considered in each round
    pub window: usize,
}

impl Default for AggregatorLimits {
    fn default() -> Self {
        Self {
            max_distance_pct: Decimal::TEN,
            high_water: 10_000,
            low_water: 10_000,
            batch: 5,
            window: 20,
        }
    }
}

#[derive(Debug)]
struct BookSide {
    side: Side,
    levels: BTreeMap<Decimal, Decimal>,
    first_seen: HashMap<Decimal, i64>,
}

impl BookSide {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            first_seen: HashMap::new(),
        }
    }

    fn best(&self) -> Option<Decimal> {
        match self.side {
            Side::Bid => self.levels.last_key_value().map(|(p, _)| *p),
            Side::Ask => self.levels.first_key_value().map(|(p, _)| *p),
        }
    }

    fn best_first(&self) -> Box<dyn Iterator<Item = (&Decimal, &Decimal)> + '_> {
        match self.side {
            Side::Bid => Box::new(self.levels.iter().rev()),
            Side::Ask => Box::new(self.levels.iter()),
        }
    }

    fn farthest_first(&self) -> Box<dyn Iterator<Item = (&Decimal, &Decimal)> + '_> {
        match self.side {
            Side::Bid => Box::new(self.levels.iter()),
            Side::Ask => Box::new(self.levels.iter().rev()),
        }
    }

    fn remove(&mut self, price: &Decimal) -> bool {
        let existed = self.levels.remove(price).is_some();
        self.first_seen.remove(price);
        existed
    }

    fn upsert(
        &mut self,
        level: &PriceLevel,
        mid: Option<Decimal>,
        max_distance_pct: Decimal,
        now_ms: i64,
        ages: Option<&HashMap<Decimal, i64>>,
    ) -> Option<LevelChange> {
        if level.quantity.is_zero() {
            return self
                .remove(&level.price)
                .then(|| LevelChange::removed(self.side, level.price));
        }

        if let Some(quantity) = self.levels.get_mut(&level.price) {
            // Age reflects first appearance, not last update
            *quantity = level.quantity;
            let first_seen_ms = self
                .first_seen
                .get(&level.price)
                .copied()
                .unwrap_or(now_ms);
            return Some(LevelChange {
                side: self.side,
                price: level.price,
                quantity: level.quantity,
                first_seen_ms,
            });
        }

        if let Some(mid) = mid {
            if distance_pct(level.price, mid) > max_distance_pct {
                return None;
            }
        }

        let first_seen_ms = ages
            .and_then(|ages| ages.get(&level.price).copied())
            .unwrap_or(now_ms);
        self.levels.insert(level.price, level.quantity);
        self.first_seen.insert(level.price, first_seen_ms);
        Some(LevelChange {
            side: self.side,
            price: level.price,
            quantity: level.quantity,
            first_seen_ms,
        })
    }

    fn truncate(&mut self, mid: Option<Decimal>, limits: &AggregatorLimits) -> Vec<LevelChange> {
        let mut removed = Vec::new();
        if self.levels.len() <= limits.high_water {
            return removed;
        }

        // Levels left outside the band by mid drift go first
        if let Some(mid) = mid {
            let drifted: Vec<Decimal> = self
                .levels
                .keys()
                .filter(|price| distance_pct(**price, mid) > limits.max_distance_pct)
                .copied()
                .collect();
            for price in drifted {
                self.remove(&price);
                removed.push(LevelChange::removed(self.side, price));
            }
        }

        while self.levels.len() > limits.low_water {
            let mut window: Vec<(Decimal, Decimal)> = self
                .farthest_first()
                .take(limits.window.max(1))
                .map(|(p, q)| (*p, *q))
                .collect();
            // Stable: equal quantities go farthest first
            window.sort_by(|a, b| a.1.cmp(&b.1));

            for (price, _) in window.into_iter().take(limits.batch.max(1)) {
                self.remove(&price);
                removed.push(LevelChange::removed(self.side, price));
            }
        }

        removed
    }

    fn clear(&mut self) -> HashMap<Decimal, i64> {
        self.levels.clear();
        std::mem::take(&mut self.first_seen)
    }
}

/// Distance- and size-bounded replica of one symbol's order book
#[derive(Debug)]
pub struct LevelAggregator {
    symbol: String,
    bids: BookSide,
    asks: BookSide,
    /// First-seen times carried across a resync, keyed per side
    age_backup: Option<(HashMap<Decimal, i64>, HashMap<Decimal, i64>)>,
    limits: AggregatorLimits,
}

impl LevelAggregator {
    /// Create a new empty aggregator
    pub fn new(symbol: &str, limits: AggregatorLimits) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BookSide::new(Side::Bid),
            asks: BookSide::new(Side::Ask),
            age_backup: None,
            limits,
        }
    }

    /// Apply bid and ask levels.
    ///
    /// With `initial` set the book is replaced: mid is taken from the first
    /// bid/ask pair and every level within the distance band is admitted.
    /// Otherwise levels are applied as a diff against the current mid.
    /// Returns every level that changed.
    pub fn apply(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        initial: bool,
        now_ms: i64,
    ) -> Vec<LevelChange> {
        let max_distance = self.limits.max_distance_pct;
        let mut changes = Vec::with_capacity(bids.len() + asks.len());

        if initial {
            let (bid_ages, ask_ages) = match self.age_backup.take() {
                Some(ages) => {
                    self.bids.clear();
                    self.asks.clear();
                    ages
                }
                None => (self.bids.clear(), self.asks.clear()),
            };

            let mid = match (bids.first(), asks.first()) {
                (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
                _ => None,
            };

            for level in bids.iter().filter(|l| !l.quantity.is_zero()) {
                let change = self
                    .bids
                    .upsert(level, mid, max_distance, now_ms, Some(&bid_ages));
                changes.extend(change);
            }
            for level in asks.iter().filter(|l| !l.quantity.is_zero()) {
                let change = self
                    .asks
                    .upsert(level, mid, max_distance, now_ms, Some(&ask_ages));
                changes.extend(change);
            }

            debug!(
                symbol = %self.symbol,
                bids = self.bids.levels.len(),
                asks = self.asks.levels.len(),
                "Aggregator initialized from snapshot"
            );
        } else {
            let mid = self.market_price().ok();
            for level in bids {
                changes.extend(self.bids.upsert(level, mid, max_distance, now_ms, None));
            }
            for level in asks {
                changes.extend(self.asks.upsert(level, mid, max_distance, now_ms, None));
            }
        }

        changes
    }

    /// Shrink any side that grew beyond the high-water mark. Returns the
    /// removed levels.
    pub fn truncate(&mut self) -> Vec<LevelChange> {
        let mid = self.market_price().ok();
        let mut removed = self.bids.truncate(mid, &self.limits);
        removed.extend(self.asks.truncate(mid, &self.limits));

        if !removed.is_empty() {
            debug!(
                symbol = %self.symbol,
                removed = removed.len(),
                bids = self.bids.levels.len(),
                asks = self.asks.levels.len(),
                "Truncated order book"
            );
        }
        removed
    }

    /// Drop all levels. First-seen times are kept aside so levels that
    /// survive the next snapshot keep their age.
    pub fn clear(&mut self) {
        let bid_ages = self.bids.clear();
        let ask_ages = self.asks.clear();
        if !bid_ages.is_empty() || !ask_ages.is_empty() {
            self.age_backup = Some((bid_ages, ask_ages));
        }
    }

    /// Average of best bid and best ask
    pub fn market_price(&self) -> Result<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Ok((bid + ask) / Decimal::TWO),
            _ => Err(DepthError::NotInitialized(self.symbol.clone())),
        }
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.best()
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.best()
    }

    pub fn len(&self, side: Side) -> usize {
        self.side(side).levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.levels.is_empty() && self.asks.levels.is_empty()
    }

    pub fn quantity(&self, side: Side, price: &Decimal) -> Option<Decimal> {
        self.side(side).levels.get(price).copied()
    }

    pub fn first_seen(&self, side: Side, price: &Decimal) -> Option<i64> {
        self.side(side).first_seen.get(price).copied()
    }

    /// Levels of one side, best price first, with their first-seen time
    pub fn levels_with_age(
        &self,
        side: Side,
    ) -> impl Iterator<Item = (Decimal, Decimal, i64)> + '_ {
        let book_side = self.side(side);
        book_side
            .best_first()
            .map(|(p, q)| (*p, *q, book_side.first_seen.get(p).copied().unwrap_or_default()))
    }

    /// Levels of one side, best price first
    pub fn levels(&self, side: Side) -> Vec<Level> {
        self.side(side)
            .best_first()
            .map(|(p, q)| Level {
                price: *p,
                quantity: *q,
            })
            .collect()
    }

    /// Whether every tracked price has exactly one first-seen entry
    pub fn ages_consistent(&self) -> bool {
        [&self.bids, &self.asks].iter().all(|side| {
            side.levels.len() == side.first_seen.len()
                && side.levels.keys().all(|p| side.first_seen.contains_key(p))
        })
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, quantity: Decimal) -> PriceLevel {
        PriceLevel::new(price, quantity)
    }

    fn create_test_book() -> LevelAggregator {
        let mut book = LevelAggregator::new("BTCUSDT", AggregatorLimits::default());
        book.apply(
            &[level(dec!(50000), dec!(1.0)), level(dec!(49999), dec!(2.0))],
            &[level(dec!(50001), dec!(1.5)), level(dec!(50002), dec!(2.5))],
            true,
            1_000,
        );
        book
    }

    #[test]
    fn test_best_bid_ask() {
        let book = create_test_book();
        assert_eq!(book.best_bid(), Some(dec!(50000)));
        assert_eq!(book.best_ask(), Some(dec!(50001)));
    }

    #[test]
    fn test_market_price() {
        let book = create_test_book();
        assert_eq!(book.market_price().unwrap(), dec!(50000.5));

        let empty = LevelAggregator::new("BTCUSDT", AggregatorLimits::default());
        assert!(matches!(empty.market_price(), Err(DepthError::NotInitialized(_))));
    }

    #[test]
    fn test_snapshot_respects_distance_band() {
        let mut book = LevelAggregator::new("BTCUSDT", AggregatorLimits::default());
        book.apply(
            &[level(dec!(100), dec!(1)), level(dec!(91), dec!(1)), level(dec!(80), dec!(1))],
            &[level(dec!(102), dec!(1)), level(dec!(150), dec!(1))],
            true,
            0,
        );
        // mid 101: 91 is 9.9% away, 80 and 150 are outside
        assert_eq!(book.len(Side::Bid), 2);
        assert_eq!(book.len(Side::Ask), 1);
        assert_eq!(book.quantity(Side::Bid, &dec!(80)), None);
    }

    #[test]
    fn test_diff_updates_in_place_and_keeps_age() {
        let mut book = create_test_book();
        let changes = book.apply(&[level(dec!(50000), dec!(3.0))], &[], false, 5_000);

        assert_eq!(changes.len(), 1);
        assert_eq!(book.quantity(Side::Bid, &dec!(50000)), Some(dec!(3.0)));
        assert_eq!(book.first_seen(Side::Bid, &dec!(50000)), Some(1_000));

        book.apply(&[level(dec!(49998), dec!(1.0))], &[], false, 6_000);
        assert_eq!(book.first_seen(Side::Bid, &dec!(49998)), Some(6_000));
        assert!(book.ages_consistent());
    }

    #[test]
    fn test_diff_rejects_far_levels() {
        let mut book = create_test_book();
        let changes = book.apply(
            &[level(dec!(40000), dec!(9))],
            &[level(dec!(60000), dec!(9))],
            false,
            0,
        );
        assert!(changes.is_empty());
        assert_eq!(book.len(Side::Bid), 2);
        assert_eq!(book.len(Side::Ask), 2);
    }

    #[test]
    fn test_zero_quantity_is_idempotent() {
        let mut book = create_test_book();
        let first = book.apply(&[level(dec!(49999), Decimal::ZERO)], &[], false, 0);
        assert_eq!(first, vec![LevelChange::removed(Side::Bid, dec!(49999))]);
        assert_eq!(book.len(Side::Bid), 1);

        let second = book.apply(&[level(dec!(49999), Decimal::ZERO)], &[], false, 0);
        assert!(second.is_empty());
        assert_eq!(book.len(Side::Bid), 1);

        let absent = book.apply(&[], &[level(dec!(50100), Decimal::ZERO)], false, 0);
        assert!(absent.is_empty());
        assert!(book.ages_consistent());
    }

    #[test]
    fn test_ages_survive_clear_and_snapshot() {
        let mut book = create_test_book();
        book.clear();
        assert!(book.is_empty());

        book.apply(
            &[level(dec!(50000), dec!(4.0)), level(dec!(49990), dec!(1.0))],
            &[level(dec!(50001), dec!(1.0))],
            true,
            9_000,
        );
        assert_eq!(book.first_seen(Side::Bid, &dec!(50000)), Some(1_000));
        assert_eq!(book.first_seen(Side::Bid, &dec!(49990)), Some(9_000));
        assert_eq!(book.first_seen(Side::Ask, &dec!(50001)), Some(1_000));
    }

    #[test]
    fn test_truncate_removes_smallest_far_levels() {
        let limits = AggregatorLimits::default();
        let mut book = LevelAggregator::new("BTCUSDT", limits);

        let small = [90_003, 90_007, 90_012, 90_015, 90_019];
        let bids: Vec<PriceLevel> = (0..10_001)
            .map(|i| {
                let price = 100_001 - i;
                let qty = if small.contains(&price) {
                    dec!(1)
                } else if price == 95_000 {
                    dec!(0.5)
                } else {
                    dec!(10)
                };
                level(Decimal::from(price), qty)
            })
            .collect();
        book.apply(&bids, &[level(dec!(100002), dec!(10))], true, 0);
        assert_eq!(book.len(Side::Bid), 10_001);

        let removed = book.truncate();
        assert_eq!(removed.len(), 5);
        assert!(book.len(Side::Bid) <= 10_000);
        for price in small {
            assert_eq!(book.quantity(Side::Bid, &Decimal::from(price)), None);
        }
        // small but close to mid: kept
        assert_eq!(book.quantity(Side::Bid, &dec!(95000)), Some(dec!(0.5)));
        assert!(book.ages_consistent());
    }

    #[test]
    fn test_truncate_noop_below_high_water() {
        let mut book = create_test_book();
        assert!(book.truncate().is_empty());
        assert_eq!(book.len(Side::Bid), 2);
    }
}
