//! Bounded top-N view of an order book
//!
//! Each side keeps at most `cup_size` levels ranked by (tier, quantity,
//! price). A `BTreeSet` holds the ranking, a `BTreeMap` indexes entries by
//! price; both always contain the same prices.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{CupLevel, CupSnapshot, LevelAggregator, LevelClassifier, Side};
use crate::symbol::MarketSymbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    tier: u8,
    quantity: Decimal,
    price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
struct ViewEntry {
    quantity: Decimal,
    distance_pct: Decimal,
    tier: u8,
    first_seen_ms: i64,
}

impl ViewEntry {
    fn rank(&self, price: Decimal) -> RankKey {
        RankKey {
            tier: self.tier,
            quantity: self.quantity,
            price,
        }
    }
}

#[derive(Debug, Default)]
struct RankedSide {
    ranked: BTreeSet<RankKey>,
    index: BTreeMap<Decimal, ViewEntry>,
}

impl RankedSide {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn remove(&mut self, price: &Decimal) -> bool {
        match self.index.remove(price) {
            Some(entry) => {
                self.ranked.remove(&entry.rank(*price));
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, price: Decimal, entry: ViewEntry) {
        self.ranked.insert(entry.rank(price));
        self.index.insert(price, entry);
    }

    fn max_tier(&self) -> Option<u8> {
        self.ranked.last().map(|key| key.tier)
    }

    fn clear(&mut self) {
        self.ranked.clear();
        self.index.clear();
    }
}

/// Top-N "interesting" levels of one symbol for one subscription profile
#[derive(Debug)]
pub struct TopLevelView {
    profile: String,
    symbol: MarketSymbol,
    cup_size: usize,
    classifier: Arc<LevelClassifier>,
    bids: RankedSide,
    asks: RankedSide,
    /// Tier reported with the last published cup, -1 if never published
    last_published: i32,
    dirty: bool,
    /// Sides that lost an entry while full and may need a refill
    vacated: [bool; 2],
}

impl TopLevelView {
    pub fn new(
        profile: &str,
        symbol: MarketSymbol,
        cup_size: usize,
        classifier: Arc<LevelClassifier>,
    ) -> Self {
        Self {
            profile: profile.to_string(),
            symbol,
            cup_size: cup_size.max(1),
            classifier,
            bids: RankedSide::default(),
            asks: RankedSide::default(),
            last_published: -1,
            dirty: false,
            vacated: [false; 2],
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn cup_size(&self) -> usize {
        self.cup_size
    }

    /// Insert, update or remove (`quantity == 0`) one level.
    pub fn add_or_update(
        &mut self,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        distance_pct: Decimal,
        first_seen_ms: i64,
    ) {
        let cup_size = self.cup_size;
        let ranked = self.side_mut(side);

        if quantity.is_zero() {
            let was_full = ranked.len() == cup_size;
            if ranked.remove(&price) {
                self.dirty = true;
                if was_full {
                    self.vacated[side_slot(side)] = true;
                }
            }
            return;
        }

        let tier = self
            .classifier
            .classify(price, quantity, distance_pct, &self.symbol.name);
        let entry = ViewEntry {
            quantity,
            distance_pct,
            tier,
            first_seen_ms,
        };
        let ranked = self.side_mut(side);

        if let Some(existing) = ranked.index.get(&price) {
            let first_seen_ms = existing.first_seen_ms;
            ranked.remove(&price);
            ranked.insert(price, ViewEntry { first_seen_ms, ..entry });
            self.dirty = true;
            return;
        }

        if ranked.len() < cup_size {
            ranked.insert(price, entry);
            self.dirty = true;
            return;
        }

        let candidate = entry.rank(price);
        let Some(minimum) = ranked.ranked.first().copied() else {
            return;
        };
        if candidate > minimum {
            ranked.remove(&minimum.price);
            ranked.insert(price, entry);
            self.dirty = true;
        }
    }

    /// Apply `add_or_update` for a whole side from the aggregator.
    pub fn rebuild_side(&mut self, side: Side, book: &LevelAggregator, mid: Decimal) {
        self.side_mut(side).clear();
        for (price, quantity, first_seen_ms) in book.levels_with_age(side) {
            let distance = super::distance_pct(price, mid);
            self.add_or_update(side, price, quantity, distance, first_seen_ms);
        }
        self.vacated[side_slot(side)] = false;
        self.dirty = true;
    }

    /// Fill the slots a full side lost with the best-ranked book levels not
    /// already in the view. Entries still in the view are left as they are.
    pub fn refill(&mut self, book: &LevelAggregator, mid: Decimal) {
        for side in [Side::Bid, Side::Ask] {
            let slot = side_slot(side);
            if !self.vacated[slot] {
                continue;
            }
            self.vacated[slot] = false;

            let held = self.side(side).len();
            let missing = self.cup_size.saturating_sub(held);
            if missing == 0 || book.len(side) <= held {
                continue;
            }

            let mut candidates: BTreeMap<RankKey, ViewEntry> = BTreeMap::new();
            for (price, quantity, first_seen_ms) in book.levels_with_age(side) {
                if self.side(side).index.contains_key(&price) {
                    continue;
                }
                let distance_pct = super::distance_pct(price, mid);
                let tier = self
                    .classifier
                    .classify(price, quantity, distance_pct, &self.symbol.name);
                let entry = ViewEntry {
                    quantity,
                    distance_pct,
                    tier,
                    first_seen_ms,
                };
                candidates.insert(entry.rank(price), entry);
                if candidates.len() > missing {
                    candidates.pop_first();
                }
            }

            if candidates.is_empty() {
                continue;
            }
            let ranked = self.side_mut(side);
            for (key, entry) in candidates {
                ranked.insert(key.price, entry);
            }
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        if self.bids.len() + self.asks.len() > 0 {
            self.dirty = true;
        }
        self.bids.clear();
        self.asks.clear();
        self.vacated = [false; 2];
    }

    /// Highest tier on either side, -1 when both sides are empty
    pub fn max_level(&self) -> i32 {
        match (self.bids.max_tier(), self.asks.max_tier()) {
            (None, None) => -1,
            (bid, ask) => bid.max(ask).map(i32::from).unwrap_or(-1),
        }
    }

    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    pub fn contains(&self, side: Side, price: &Decimal) -> bool {
        self.side(side).index.contains_key(price)
    }

    /// Whether ranking and index agree on size and membership on both sides
    pub fn is_consistent(&self) -> bool {
        [&self.bids, &self.asks].iter().all(|side| {
            side.ranked.len() == side.index.len()
                && side.ranked.len() <= self.cup_size
                && side.ranked.iter().all(|key| {
                    side.index
                        .get(&key.price)
                        .map(|entry| entry.rank(key.price) == *key)
                        .unwrap_or(false)
                })
        })
    }

    /// Cup to publish, if the view changed and is (or just stopped being)
    /// interesting. A drop from tier >= 1 to below is published so
    /// subscribers see the removal.
    pub fn take_publication(&mut self, now_ms: i64) -> Option<CupSnapshot> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let level = self.max_level();
        if level < 1 && self.last_published < 1 {
            return None;
        }
        self.last_published = level;
        Some(self.snapshot(now_ms))
    }

    pub fn snapshot(&self, now_ms: i64) -> CupSnapshot {
        CupSnapshot {
            symbol: self.symbol.name.clone(),
            segment: self.symbol.segment,
            profile: self.profile.clone(),
            timestamp: now_ms,
            max_tier: self.max_level(),
            bids: cup_levels(&self.bids, Side::Bid, now_ms),
            asks: cup_levels(&self.asks, Side::Ask, now_ms),
        }
    }

    fn side(&self, side: Side) -> &RankedSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut RankedSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}

fn side_slot(side: Side) -> usize {
    match side {
        Side::Bid => 0,
        Side::Ask => 1,
    }
}

fn cup_levels(ranked: &RankedSide, side: Side, now_ms: i64) -> Vec<CupLevel> {
    let to_level = |(price, entry): (&Decimal, &ViewEntry)| CupLevel {
        price: *price,
        quantity: entry.quantity,
        distance_pct: entry.distance_pct,
        tier: entry.tier,
        age_ms: (now_ms - entry.first_seen_ms).max(0),
    };
    match side {
        Side::Bid => ranked.index.iter().rev().map(to_level).collect(),
        Side::Ask => ranked.index.iter().map(to_level).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{AggregatorLimits, ClassifierConfig};
    use crate::parser::PriceLevel;
    use rust_decimal_macros::dec;

    /// Unboosted symbol, tiers at 50k/100k/250k/500k near mid
    fn view(cup_size: usize) -> TopLevelView {
        let classifier = Arc::new(LevelClassifier::new(ClassifierConfig::default()).unwrap());
        TopLevelView::new("default", MarketSymbol::spot("SOLUSDT"), cup_size, classifier)
    }

    #[test]
    fn test_admits_until_full() {
        let mut view = view(3);
        view.add_or_update(Side::Bid, dec!(99), dec!(10), dec!(0.5), 0);
        view.add_or_update(Side::Bid, dec!(98), dec!(20), dec!(0.5), 0);
        view.add_or_update(Side::Bid, dec!(97), dec!(30), dec!(0.5), 0);
        view.add_or_update(Side::Bid, dec!(96), dec!(5), dec!(0.5), 0);

        assert_eq!(view.len(Side::Bid), 3);
        assert!(!view.contains(Side::Bid, &dec!(96)));
        assert!(view.is_consistent());
    }

    #[test]
    fn test_higher_tier_evicts_lowest_regardless_of_quantity() {
        let mut view = view(5);
        // tier 2 (100k..250k notional)
        for (i, qty) in [1200, 1300, 1400, 1500, 2000].iter().enumerate() {
            let price = Decimal::from(100 - i as i64);
            view.add_or_update(Side::Ask, price, Decimal::from(*qty), dec!(0.5), 0);
        }
        assert_eq!(view.max_level(), 2);

        // tier 3 with far less quantity than any resident
        view.add_or_update(Side::Ask, dec!(1000), dec!(300), dec!(0.5), 0);
        assert_eq!(view.len(Side::Ask), 5);
        assert!(view.contains(Side::Ask, &dec!(1000)));
        // lowest ranked tier-2 entry: price 100, qty 1200
        assert!(!view.contains(Side::Ask, &dec!(100)));
        assert_eq!(view.max_level(), 3);
        assert!(view.is_consistent());
    }

    #[test]
    fn test_rejects_candidate_not_above_minimum() {
        let mut view = view(2);
        view.add_or_update(Side::Bid, dec!(100), dec!(600), dec!(0.5), 0);
        view.add_or_update(Side::Bid, dec!(99), dec!(700), dec!(0.5), 0);
        // same tier, smaller quantity
        view.add_or_update(Side::Bid, dec!(101), dec!(500), dec!(0.5), 0);
        assert!(!view.contains(Side::Bid, &dec!(101)));
        assert_eq!(view.len(Side::Bid), 2);
    }

    #[test]
    fn test_update_reranks_and_keeps_age() {
        let mut view = view(2);
        view.add_or_update(Side::Bid, dec!(100), dec!(600), dec!(0.5), 10);
        view.add_or_update(Side::Bid, dec!(99), dec!(700), dec!(0.5), 20);
        view.add_or_update(Side::Bid, dec!(100), dec!(5000), dec!(0.5), 99);

        let cup = view.snapshot(1_000);
        assert_eq!(cup.bids[0].price, dec!(100));
        assert_eq!(cup.bids[0].tier, 4);
        assert_eq!(cup.bids[0].age_ms, 990);
        assert!(view.is_consistent());
    }

    #[test]
    fn test_zero_quantity_removes_once() {
        let mut view = view(2);
        view.add_or_update(Side::Ask, dec!(100), dec!(600), dec!(0.5), 0);
        view.add_or_update(Side::Ask, dec!(100), Decimal::ZERO, dec!(0.5), 0);
        view.add_or_update(Side::Ask, dec!(100), Decimal::ZERO, dec!(0.5), 0);
        view.add_or_update(Side::Ask, dec!(105), Decimal::ZERO, dec!(0.5), 0);
        assert_eq!(view.len(Side::Ask), 0);
        assert_eq!(view.max_level(), -1);
        assert!(view.is_consistent());
    }

    #[test]
    fn test_publication_rules() {
        let mut view = view(2);
        // uninteresting: nothing published
        view.add_or_update(Side::Bid, dec!(100), dec!(1), dec!(0.5), 0);
        assert!(view.take_publication(0).is_none());

        view.add_or_update(Side::Bid, dec!(99), dec!(600), dec!(0.5), 0);
        let cup = view.take_publication(0).expect("tier 1 cup");
        assert_eq!(cup.max_tier, 1);

        // unchanged view is not republished
        assert!(view.take_publication(0).is_none());

        // dropping below tier 1 publishes a removal once
        view.add_or_update(Side::Bid, dec!(99), Decimal::ZERO, dec!(0.5), 0);
        let removal = view.take_publication(0).expect("removal notice");
        assert_eq!(removal.max_tier, 0);
        view.add_or_update(Side::Bid, dec!(98), dec!(2), dec!(0.5), 0);
        assert!(view.take_publication(0).is_none());
    }

    #[test]
    fn test_refill_after_vacating_full_side() {
        let mut book = LevelAggregator::new("SOLUSDT", AggregatorLimits::default());
        let bids: Vec<PriceLevel> = (0..4)
            .map(|i| PriceLevel::new(Decimal::from(100 - i), Decimal::from(1 + i)))
            .collect();
        book.apply(&bids, &[PriceLevel::new(dec!(101), dec!(1))], true, 0);
        let mid = book.market_price().unwrap();

        // all tier 0, ranked by quantity
        let mut view = view(2);
        view.rebuild_side(Side::Bid, &book, mid);
        assert!(view.contains(Side::Bid, &dec!(97)));
        assert!(view.contains(Side::Bid, &dec!(98)));

        book.apply(&[PriceLevel::new(dec!(97), Decimal::ZERO)], &[], false, 0);
        view.add_or_update(Side::Bid, dec!(97), Decimal::ZERO, Decimal::ZERO, 0);
        assert_eq!(view.len(Side::Bid), 1);

        view.refill(&book, mid);
        assert_eq!(view.len(Side::Bid), 2);
        assert!(view.contains(Side::Bid, &dec!(98)));
        assert!(view.contains(Side::Bid, &dec!(99)));
        assert!(view.is_consistent());

        // nothing vacated since: a second refill is a no-op
        view.take_publication(0);
        view.refill(&book, mid);
        assert_eq!(view.len(Side::Bid), 2);
    }
}
