//! Traded-volume ranking across symbols
//!
//! Same bounded ranked structure as the top-level view, keyed by symbol and
//! ranked by the change in traded notional between two windows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::symbol::MarketSymbol;

/// Traded notional of a symbol over the last window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GVolume {
    pub symbol: MarketSymbol,
    pub volume: Decimal,
    /// Change against the previous window
    pub delta: Decimal,
}

/// Bounded top-N of symbols by score
#[derive(Debug)]
pub struct TopNVolumes {
    capacity: usize,
    ranked: BTreeSet<(Decimal, MarketSymbol)>,
    index: HashMap<MarketSymbol, Decimal>,
}

impl TopNVolumes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ranked: BTreeSet::new(),
            index: HashMap::new(),
        }
    }

    /// Insert or re-score a symbol. Returns whether it is ranked afterwards.
    pub fn offer(&mut self, symbol: &MarketSymbol, score: Decimal) -> bool {
        if let Some(previous) = self.index.remove(symbol) {
            self.ranked.remove(&(previous, symbol.clone()));
        }

        if self.index.len() >= self.capacity {
            match self.ranked.first().cloned() {
                Some((min_score, min_symbol)) if (score, symbol) > (min_score, &min_symbol) => {
                    self.index.remove(&min_symbol);
                    self.ranked.remove(&(min_score, min_symbol));
                }
                _ => return false,
            }
        }

        self.ranked.insert((score, symbol.clone()));
        self.index.insert(symbol.clone(), score);
        true
    }

    pub fn remove(&mut self, symbol: &MarketSymbol) -> bool {
        match self.index.remove(symbol) {
            Some(score) => self.ranked.remove(&(score, symbol.clone())),
            None => false,
        }
    }

    pub fn score(&self, symbol: &MarketSymbol) -> Option<Decimal> {
        self.index.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Highest score first
    pub fn ranking(&self) -> Vec<(MarketSymbol, Decimal)> {
        self.ranked
            .iter()
            .rev()
            .map(|(score, symbol)| (symbol.clone(), *score))
            .collect()
    }
}

/// Accumulates traded notional per symbol and ranks the window-over-window
/// change.
#[derive(Debug)]
pub struct VolumeTracker {
    top_n: usize,
    current: HashMap<MarketSymbol, Decimal>,
    previous: HashMap<MarketSymbol, Decimal>,
}

impl VolumeTracker {
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n,
            current: HashMap::new(),
            previous: HashMap::new(),
        }
    }

    pub fn record(&mut self, symbol: &MarketSymbol, notional: Decimal) {
        *self.current.entry(symbol.clone()).or_insert(Decimal::ZERO) += notional;
    }

    /// Close the current window and return the top movers, largest delta first.
    pub fn rotate(&mut self) -> Vec<GVolume> {
        let mut top = TopNVolumes::new(self.top_n);
        let mut volumes = HashMap::new();

        let symbols: BTreeSet<&MarketSymbol> =
            self.current.keys().chain(self.previous.keys()).collect();
        for symbol in symbols {
            let volume = self.current.get(symbol).copied().unwrap_or_default();
            let delta = volume - self.previous.get(symbol).copied().unwrap_or_default();
            top.offer(symbol, delta);
            volumes.insert(symbol.clone(), volume);
        }

        self.previous = std::mem::take(&mut self.current);

        top.ranking()
            .into_iter()
            .map(|(symbol, delta)| GVolume {
                volume: volumes.get(&symbol).copied().unwrap_or_default(),
                symbol,
                delta,
            })
            .collect()
    }
}
