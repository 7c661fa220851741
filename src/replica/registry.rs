//! Replica registry
//!
//! Owns one sync engine per subscribed symbol.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{ProcessOutcome, ReplicaStatus, ReplicaSyncEngine};
use crate::config::{Config, ReplicaConfig, SnapshotConfig};
use crate::error::Result;
use crate::orderbook::{BookSnapshot, LevelClassifier};
use crate::parser::DepthEvent;
use crate::publisher::Distributor;
use crate::symbol::MarketSymbol;

/// Manages replicas for multiple symbols
pub struct ReplicaRegistry {
    replicas: RwLock<HashMap<MarketSymbol, Arc<ReplicaSyncEngine>>>,
    config: ReplicaConfig,
    snapshot_config: SnapshotConfig,
    classifier: Arc<LevelClassifier>,
    distributor: Arc<dyn Distributor>,
}

impl ReplicaRegistry {
    pub fn new(
        config: ReplicaConfig,
        snapshot_config: SnapshotConfig,
        classifier: Arc<LevelClassifier>,
        distributor: Arc<dyn Distributor>,
    ) -> Self {
        Self {
            replicas: RwLock::new(HashMap::new()),
            config,
            snapshot_config,
            classifier,
            distributor,
        }
    }

    /// Build from the application config
    pub fn from_config(config: &Config, distributor: Arc<dyn Distributor>) -> Result<Self> {
        let classifier = LevelClassifier::new(config.classifier.clone())?;
        Ok(Self::new(
            config.replica.clone(),
            config.snapshot.clone(),
            Arc::new(classifier),
            distributor,
        ))
    }

    /// Start replicating `symbol`. Subscribing twice returns the existing
    /// engine.
    pub async fn subscribe(&self, symbol: MarketSymbol) -> Arc<ReplicaSyncEngine> {
        let mut replicas = self.replicas.write().await;
        if let Some(engine) = replicas.get(&symbol) {
            return Arc::clone(engine);
        }

        let engine = Arc::new(ReplicaSyncEngine::new(
            symbol.clone(),
            &self.config,
            self.snapshot_config.clone(),
            Arc::clone(&self.classifier),
            Arc::clone(&self.distributor),
        ));
        info!(symbol = %symbol, "Replica subscribed");
        replicas.insert(symbol, Arc::clone(&engine));
        engine
    }

    /// Stop replicating `symbol` and drop its replica
    pub async fn unsubscribe(&self, symbol: &MarketSymbol) -> bool {
        match self.replicas.write().await.remove(symbol) {
            Some(engine) => {
                engine.retire();
                info!(symbol = %symbol, "Replica unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Make the subscribed set equal to `symbols`. Returns the number of
    /// replicas added and removed.
    pub async fn sync_symbols(&self, symbols: &[MarketSymbol]) -> (usize, usize) {
        let wanted: HashSet<&MarketSymbol> = symbols.iter().collect();
        let stale: Vec<MarketSymbol> = self
            .symbols()
            .await
            .into_iter()
            .filter(|symbol| !wanted.contains(symbol))
            .collect();

        let mut removed = 0;
        for symbol in &stale {
            if self.unsubscribe(symbol).await {
                removed += 1;
            }
        }

        let mut added = 0;
        for symbol in wanted {
            if !self.contains(symbol).await {
                self.subscribe(symbol.clone()).await;
                added += 1;
            }
        }
        (added, removed)
    }

    pub async fn get(&self, symbol: &MarketSymbol) -> Option<Arc<ReplicaSyncEngine>> {
        self.replicas.read().await.get(symbol).cloned()
    }

    pub async fn contains(&self, symbol: &MarketSymbol) -> bool {
        self.replicas.read().await.contains_key(symbol)
    }

    /// Route an event to its replica; `None` if the symbol is not subscribed
    pub async fn dispatch(&self, event: DepthEvent) -> Option<ProcessOutcome> {
        let engine = self.get(&event.symbol).await?;
        Some(engine.process(event).await)
    }

    /// Full replica of `symbol`, if subscribed and initialized
    pub async fn get_order_book(&self, symbol: &MarketSymbol) -> Option<BookSnapshot> {
        let engine = self.get(symbol).await?;
        engine.book_snapshot().await.ok()
    }

    /// Get list of symbols being replicated
    pub async fn symbols(&self) -> Vec<MarketSymbol> {
        let mut symbols: Vec<MarketSymbol> = self.replicas.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn statuses(&self) -> Vec<ReplicaStatus> {
        let engines: Vec<Arc<ReplicaSyncEngine>> =
            self.replicas.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(engines.len());
        for engine in engines {
            statuses.push(engine.status().await);
        }
        statuses.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        statuses
    }

    pub async fn len(&self) -> usize {
        self.replicas.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.replicas.read().await.is_empty()
    }
}
