//! Per-symbol replica state machine
//!
//! `RESYNC_NEEDED -> RESYNCING -> INITIAL_EVENT_PENDING -> SYNCED`, falling
//! back to `RESYNC_NEEDED` on any sequence inconsistency. The aggregator and
//! views sit behind one async mutex; the state is an atomic so the ingest
//! drain can classify events without taking the lock.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::{AtomicSyncState, SyncState};
use crate::config::{ReplicaConfig, SnapshotConfig};
use crate::error::{DepthError, Result};
use crate::metrics;
use crate::orderbook::{
    distance_pct, BookSnapshot, CupSnapshot, LevelAggregator, LevelChange, LevelClassifier, Side,
    TopLevelView,
};
use crate::parser::{DepthEvent, OrderBookSnapshot};
use crate::publisher::Distributor;
use crate::rest::{fetch_fresh_snapshot, SnapshotFetcher};
use crate::symbol::{InitialCheck, MarketSymbol};

/// Result of handing one event to an engine
#[derive(Debug)]
pub enum ProcessOutcome {
    Applied,
    /// Event already covered by the installed snapshot
    Ignored,
    /// Resync in flight or engine retired
    Dropped,
    /// Continuity broken, replica cleared
    GapDetected,
    /// The event triggered a resync; the caller must schedule the task
    Resync(ResyncTask),
}

/// How a resync task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// Snapshot installed and the triggering event applied
    Synced,
    /// Snapshot installed, it already covers the triggering event
    AwaitingEvent,
    /// Snapshot installed but the triggering event starts beyond it
    Gap,
    /// No usable snapshot within the retry bound
    Failed,
    /// The symbol was unsubscribed meanwhile
    Retired,
}

impl ResyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResyncOutcome::Synced => "synced",
            ResyncOutcome::AwaitingEvent => "awaiting_event",
            ResyncOutcome::Gap => "gap",
            ResyncOutcome::Failed => "failed",
            ResyncOutcome::Retired => "retired",
        }
    }
}

/// Snapshot synchronization for one replica, run on its segment's worker.
///
/// The replica stays `RESYNCING` while the task exists. Dropping the task
/// without running it hands the replica back to `RESYNC_NEEDED`.
#[must_use = "the replica stays RESYNCING until the task is run or dropped"]
pub struct ResyncTask {
    engine: Arc<ReplicaSyncEngine>,
    /// Taken by `run`
    trigger: Option<DepthEvent>,
}

impl ResyncTask {
    pub fn symbol(&self) -> &MarketSymbol {
        &self.engine.symbol
    }

    pub fn trigger(&self) -> Option<&DepthEvent> {
        self.trigger.as_ref()
    }

    pub async fn run(mut self, fetcher: &dyn SnapshotFetcher) -> ResyncOutcome {
        let engine = Arc::clone(&self.engine);
        match self.trigger.take() {
            Some(trigger) => engine.resync(trigger, fetcher).await,
            None => ResyncOutcome::Failed,
        }
    }

    /// Give the task up without running it; the replica waits for the next
    /// event to try again.
    pub fn abandon(self) {
        drop(self);
    }
}

impl Drop for ResyncTask {
    fn drop(&mut self) {
        if self.trigger.is_some()
            && self
                .engine
                .state
                .transition(SyncState::Resyncing, SyncState::ResyncNeeded)
        {
            debug!(symbol = %self.engine.symbol, "Resync task dropped before running");
        }
    }
}

impl fmt::Debug for ResyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResyncTask")
            .field("symbol", &self.engine.symbol)
            .field("first_update_id", &self.trigger.as_ref().map(|e| e.first_update_id))
            .field("final_update_id", &self.trigger.as_ref().map(|e| e.final_update_id))
            .finish()
    }
}

/// Point-in-time summary for status logging
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub symbol: MarketSymbol,
    pub state: SyncState,
    pub last_update_id: u64,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub mid_price: Option<Decimal>,
}

struct ReplicaBook {
    last_update_id: u64,
    last_resync: Option<Instant>,
    book: LevelAggregator,
    views: Vec<TopLevelView>,
}

/// Keeps one symbol's replica consistent with the exchange
pub struct ReplicaSyncEngine {
    symbol: MarketSymbol,
    state: AtomicSyncState,
    retired: AtomicBool,
    resync_interval: Option<Duration>,
    snapshot_config: SnapshotConfig,
    distributor: Arc<dyn Distributor>,
    replica: Mutex<ReplicaBook>,
}

impl ReplicaSyncEngine {
    pub fn new(
        symbol: MarketSymbol,
        config: &ReplicaConfig,
        snapshot_config: SnapshotConfig,
        classifier: Arc<LevelClassifier>,
        distributor: Arc<dyn Distributor>,
    ) -> Self {
        let views = config
            .profiles
            .iter()
            .map(|profile| {
                TopLevelView::new(
                    &profile.key,
                    symbol.clone(),
                    profile.cup_size,
                    Arc::clone(&classifier),
                )
            })
            .collect();

        Self {
            replica: Mutex::new(ReplicaBook {
                last_update_id: 0,
                last_resync: None,
                book: LevelAggregator::new(&symbol.to_string(), config.limits.clone()),
                views,
            }),
            symbol,
            state: AtomicSyncState::new(SyncState::ResyncNeeded),
            retired: AtomicBool::new(false),
            resync_interval: (config.resync_interval_secs > 0)
                .then(|| Duration::from_secs(config.resync_interval_secs)),
            snapshot_config,
            distributor,
        }
    }

    pub fn symbol(&self) -> &MarketSymbol {
        &self.symbol
    }

    pub fn state(&self) -> SyncState {
        self.state.load()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Mark the engine unsubscribed. Queued events and in-flight resyncs for
    /// it complete without effect.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Handle one diff event.
    pub async fn process(self: &Arc<Self>, event: DepthEvent) -> ProcessOutcome {
        if self.is_retired() {
            return ProcessOutcome::Dropped;
        }

        match self.state.load() {
            SyncState::ResyncNeeded => self.begin_resync(event),
            SyncState::Resyncing => ProcessOutcome::Dropped,
            SyncState::InitialEventPending | SyncState::Synced => {
                let mut replica = self.replica.lock().await;
                match self.state.load() {
                    SyncState::InitialEventPending => self.apply_initial(&mut replica, event),
                    SyncState::Synced => self.apply_steady(&mut replica, event),
                    _ => ProcessOutcome::Dropped,
                }
            }
        }
    }

    /// Fetch a snapshot fresh enough for `trigger`, install it and run the
    /// initial-event check on `trigger`.
    pub async fn resync(
        self: &Arc<Self>,
        trigger: DepthEvent,
        fetcher: &dyn SnapshotFetcher,
    ) -> ResyncOutcome {
        if self.is_retired() {
            return ResyncOutcome::Retired;
        }

        let fetched = fetch_fresh_snapshot(
            fetcher,
            &self.symbol,
            trigger.first_update_id,
            &self.snapshot_config,
        )
        .await;
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    symbol = %self.symbol,
                    error = %e,
                    "Resync failed, waiting for next event"
                );
                self.state.store(SyncState::ResyncNeeded);
                return ResyncOutcome::Failed;
            }
        };

        let mut replica = self.replica.lock().await;
        if self.is_retired() {
            return ResyncOutcome::Retired;
        }

        self.install(&mut replica, &snapshot, now_ms());
        self.state.store(SyncState::InitialEventPending);
        info!(
            symbol = %self.symbol,
            snapshot_id = snapshot.last_update_id,
            first_update_id = trigger.first_update_id,
            final_update_id = trigger.final_update_id,
            "Snapshot installed"
        );

        match self.apply_initial(&mut replica, trigger) {
            ProcessOutcome::Applied => ResyncOutcome::Synced,
            ProcessOutcome::GapDetected => ResyncOutcome::Gap,
            _ => ResyncOutcome::AwaitingEvent,
        }
    }

    /// Install `snapshot` directly and wait for the event that bridges it.
    pub async fn install_snapshot(&self, snapshot: &OrderBookSnapshot) {
        if self.is_retired() {
            return;
        }
        let mut replica = self.replica.lock().await;
        self.install(&mut replica, snapshot, now_ms());
        self.state.store(SyncState::InitialEventPending);
    }

    /// Ad-hoc read of the full replica
    pub async fn book_snapshot(&self) -> Result<BookSnapshot> {
        let replica = self.replica.lock().await;
        let state = self.state.load();
        let readable = matches!(state, SyncState::Synced | SyncState::InitialEventPending);
        if !readable || replica.book.is_empty() {
            return Err(DepthError::NotInitialized(self.symbol.to_string()));
        }

        Ok(BookSnapshot {
            symbol: self.symbol.clone(),
            state,
            last_update_id: replica.last_update_id,
            mid_price: replica.book.market_price().ok(),
            bids: replica.book.levels(Side::Bid),
            asks: replica.book.levels(Side::Ask),
        })
    }

    /// Current cup of every view, published or not
    pub async fn cups(&self) -> Vec<CupSnapshot> {
        let replica = self.replica.lock().await;
        let now = now_ms();
        replica.views.iter().map(|view| view.snapshot(now)).collect()
    }

    pub async fn status(&self) -> ReplicaStatus {
        let replica = self.replica.lock().await;
        ReplicaStatus {
            symbol: self.symbol.clone(),
            state: self.state.load(),
            last_update_id: replica.last_update_id,
            bid_levels: replica.book.len(Side::Bid),
            ask_levels: replica.book.len(Side::Ask),
            mid_price: replica.book.market_price().ok(),
        }
    }

    fn begin_resync(self: &Arc<Self>, trigger: DepthEvent) -> ProcessOutcome {
        if self.state.transition(SyncState::ResyncNeeded, SyncState::Resyncing) {
            debug!(
                symbol = %self.symbol,
                first_update_id = trigger.first_update_id,
                "Resync requested"
            );
            ProcessOutcome::Resync(ResyncTask {
                engine: Arc::clone(self),
                trigger: Some(trigger),
            })
        } else {
            ProcessOutcome::Dropped
        }
    }

    fn apply_initial(&self, replica: &mut ReplicaBook, event: DepthEvent) -> ProcessOutcome {
        match self.symbol.segment.check_initial(replica.last_update_id, &event) {
            InitialCheck::Accept => {
                self.apply_diff(replica, &event, now_ms());
                self.state.store(SyncState::Synced);
                info!(
                    symbol = %self.symbol,
                    last_update_id = replica.last_update_id,
                    "Replica synced"
                );
                ProcessOutcome::Applied
            }
            InitialCheck::Gap => {
                warn!(
                    symbol = %self.symbol,
                    snapshot_id = replica.last_update_id,
                    first_update_id = event.first_update_id,
                    "First event does not bridge snapshot"
                );
                self.invalidate(replica);
                ProcessOutcome::GapDetected
            }
            InitialCheck::Stale => {
                trace!(
                    symbol = %self.symbol,
                    final_update_id = event.final_update_id,
                    "Event covered by snapshot, ignoring"
                );
                ProcessOutcome::Ignored
            }
        }
    }

    fn apply_steady(
        self: &Arc<Self>,
        replica: &mut ReplicaBook,
        event: DepthEvent,
    ) -> ProcessOutcome {
        if let (Some(interval), Some(at)) = (self.resync_interval, replica.last_resync) {
            if at.elapsed() >= interval {
                info!(symbol = %self.symbol, "Periodic resync due");
                self.reset(replica, now_ms());
                self.state.store(SyncState::ResyncNeeded);
                return self.begin_resync(event);
            }
        }

        let last = replica.last_update_id;
        if self.symbol.segment.continues(last, &event) {
            self.apply_diff(replica, &event, now_ms());
            return ProcessOutcome::Applied;
        }

        warn!(
            symbol = %self.symbol,
            last_update_id = last,
            first_update_id = event.first_update_id,
            final_update_id = event.final_update_id,
            prev_final_update_id = ?event.prev_final_update_id,
            "Sequence gap detected"
        );
        self.invalidate(replica);
        ProcessOutcome::GapDetected
    }

    fn invalidate(&self, replica: &mut ReplicaBook) {
        self.reset(replica, now_ms());
        self.state.store(SyncState::ResyncNeeded);
        if let Some(m) = metrics::get() {
            m.sequence_gaps.with_label_values(&[self.symbol.segment.as_str()]).inc();
        }
    }

    fn apply_diff(&self, replica: &mut ReplicaBook, event: &DepthEvent, now: i64) {
        let ReplicaBook {
            last_update_id,
            book,
            views,
            ..
        } = replica;

        let mut changes = book.apply(&event.bids, &event.asks, false, now);
        changes.extend(book.truncate());
        *last_update_id = event.final_update_id;

        self.update_views(book, views, &changes, now);
        if let Some(m) = metrics::get() {
            m.events_applied.with_label_values(&[self.symbol.segment.as_str()]).inc();
        }
    }

    fn install(&self, replica: &mut ReplicaBook, snapshot: &OrderBookSnapshot, now: i64) {
        let ReplicaBook {
            last_update_id,
            last_resync,
            book,
            views,
        } = replica;

        book.apply(&snapshot.bids, &snapshot.asks, true, now);
        book.truncate();
        *last_update_id = snapshot.last_update_id;
        *last_resync = Some(Instant::now());

        let mid = book.market_price().ok();
        for view in views.iter_mut() {
            match mid {
                Some(mid) => {
                    view.rebuild_side(Side::Bid, book, mid);
                    view.rebuild_side(Side::Ask, book, mid);
                }
                None => view.clear(),
            }
            self.publish(view, now);
        }
    }

    /// Drop the replica; views publish their removal if they were interesting.
    fn reset(&self, replica: &mut ReplicaBook, now: i64) {
        replica.book.clear();
        for view in replica.views.iter_mut() {
            view.clear();
            self.publish(view, now);
        }
    }

    /// Without a mid price only removals reach the views; new and changed
    /// levels cannot be classified until both sides are quoted again.
    fn update_views(
        &self,
        book: &LevelAggregator,
        views: &mut [TopLevelView],
        changes: &[LevelChange],
        now: i64,
    ) {
        let mid = book.market_price().ok();
        for view in views.iter_mut() {
            for change in changes {
                match mid {
                    Some(mid) => view.add_or_update(
                        change.side,
                        change.price,
                        change.quantity,
                        distance_pct(change.price, mid),
                        change.first_seen_ms,
                    ),
                    None if change.quantity.is_zero() => view.add_or_update(
                        change.side,
                        change.price,
                        Decimal::ZERO,
                        Decimal::ZERO,
                        change.first_seen_ms,
                    ),
                    None => {}
                }
            }
            if let Some(mid) = mid {
                view.refill(book, mid);
            }
            self.publish(view, now);
        }
    }

    fn publish(&self, view: &mut TopLevelView, now: i64) {
        if let Some(cup) = view.take_publication(now) {
            self.distributor.distribute(view.profile(), cup.max_tier, cup);
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewProfile;
    use crate::parser::PriceLevel;
    use crate::publisher::MockDistributor;
    use crate::rest::MockSnapshotFetcher;
    use rust_decimal_macros::dec;

    fn quiet() -> MockDistributor {
        let mut distributor = MockDistributor::new();
        distributor.expect_distribute().returning(|_, _, _| ());
        distributor
    }

    fn engine_with(symbol: MarketSymbol, distributor: MockDistributor) -> Arc<ReplicaSyncEngine> {
        let config = ReplicaConfig {
            profiles: vec![ViewProfile {
                key: "default".to_string(),
                cup_size: 5,
            }],
            ..ReplicaConfig::default()
        };
        let snapshot_config = SnapshotConfig {
            limit: 1000,
            max_attempts: 3,
            retry_delay_ms: 1,
        };
        Arc::new(ReplicaSyncEngine::new(
            symbol,
            &config,
            snapshot_config,
            Arc::new(LevelClassifier::default()),
            Arc::new(distributor),
        ))
    }

    fn snapshot(id: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            last_update_id: id,
            bids: vec![
                PriceLevel::new(dec!(100), dec!(1)),
                PriceLevel::new(dec!(99.5), dec!(2)),
            ],
            asks: vec![
                PriceLevel::new(dec!(101), dec!(1)),
                PriceLevel::new(dec!(101.5), dec!(2)),
            ],
        }
    }

    fn event(symbol: &MarketSymbol, first: u64, last: u64, prev: Option<u64>) -> DepthEvent {
        DepthEvent {
            symbol: symbol.clone(),
            event_time: 0,
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: prev,
            bids: vec![PriceLevel::new(dec!(100.2), dec!(3))],
            asks: vec![],
        }
    }

    async fn last_update_id(engine: &ReplicaSyncEngine) -> u64 {
        engine.replica.lock().await.last_update_id
    }

    #[tokio::test]
    async fn test_snapshot_then_bridging_event_syncs() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        engine.install_snapshot(&snapshot(100)).await;
        assert_eq!(engine.state(), SyncState::InitialEventPending);

        let outcome = engine.process(event(&symbol, 101, 105, None)).await;
        assert!(matches!(outcome, ProcessOutcome::Applied));
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(last_update_id(&engine).await, 105);

        let book = engine.book_snapshot().await.unwrap();
        assert_eq!(book.bids[0].price, dec!(100.2));
    }

    #[tokio::test]
    async fn test_stale_initial_event_is_ignored() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        engine.install_snapshot(&snapshot(100)).await;

        let outcome = engine.process(event(&symbol, 90, 99, None)).await;
        assert!(matches!(outcome, ProcessOutcome::Ignored));
        assert_eq!(engine.state(), SyncState::InitialEventPending);
        assert_eq!(last_update_id(&engine).await, 100);
    }

    #[tokio::test]
    async fn test_initial_gap_requires_resync() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        engine.install_snapshot(&snapshot(100)).await;

        let outcome = engine.process(event(&symbol, 103, 110, None)).await;
        assert!(matches!(outcome, ProcessOutcome::GapDetected));
        assert_eq!(engine.state(), SyncState::ResyncNeeded);
    }

    #[tokio::test]
    async fn test_spot_gap_clears_replica() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        engine.install_snapshot(&snapshot(100)).await;
        engine.process(event(&symbol, 101, 105, None)).await;

        let outcome = engine.process(event(&symbol, 107, 110, None)).await;
        assert!(matches!(outcome, ProcessOutcome::GapDetected));
        assert_eq!(engine.state(), SyncState::ResyncNeeded);
        assert!(matches!(
            engine.book_snapshot().await,
            Err(DepthError::NotInitialized(_))
        ));
        assert_eq!(engine.status().await.bid_levels, 0);
    }

    #[tokio::test]
    async fn test_futures_chain_on_previous_final_id() {
        let symbol = MarketSymbol::futures("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        engine.install_snapshot(&snapshot(195)).await;
        engine.process(event(&symbol, 190, 200, Some(189))).await;
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(last_update_id(&engine).await, 200);

        let outcome = engine.process(event(&symbol, 201, 210, Some(200))).await;
        assert!(matches!(outcome, ProcessOutcome::Applied));
        assert_eq!(last_update_id(&engine).await, 210);

        let outcome = engine.process(event(&symbol, 211, 220, Some(209))).await;
        assert!(matches!(outcome, ProcessOutcome::GapDetected));
        assert_eq!(engine.state(), SyncState::ResyncNeeded);
    }

    #[tokio::test]
    async fn test_resync_task_lifecycle() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());

        let task = match engine.process(event(&symbol, 101, 105, None)).await {
            ProcessOutcome::Resync(task) => task,
            other => panic!("expected resync, got {:?}", other),
        };
        assert_eq!(engine.state(), SyncState::Resyncing);
        // only one task in flight
        assert!(matches!(
            engine.process(event(&symbol, 106, 107, None)).await,
            ProcessOutcome::Dropped
        ));

        let mut fetcher = MockSnapshotFetcher::new();
        fetcher.expect_fetch_snapshot().times(1).returning(|_| Ok(snapshot(100)));
        assert_eq!(task.run(&fetcher).await, ResyncOutcome::Synced);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(last_update_id(&engine).await, 105);
    }

    #[tokio::test]
    async fn test_dropped_resync_task_releases_replica() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());

        let outcome = engine.process(event(&symbol, 101, 105, None)).await;
        assert_eq!(engine.state(), SyncState::Resyncing);
        drop(outcome);
        assert_eq!(engine.state(), SyncState::ResyncNeeded);

        // the next event asks again instead of being dropped
        let outcome = engine.process(event(&symbol, 106, 108, None)).await;
        assert!(matches!(outcome, ProcessOutcome::Resync(_)));
    }

    #[tokio::test]
    async fn test_exhausted_resync_returns_to_resync_needed() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());

        let outcome = engine.process(event(&symbol, 501, 505, None)).await;
        let ProcessOutcome::Resync(task) = outcome else {
            panic!("expected resync");
        };
        let mut fetcher = MockSnapshotFetcher::new();
        fetcher.expect_fetch_snapshot().times(3).returning(|_| Ok(snapshot(100)));

        assert_eq!(task.run(&fetcher).await, ResyncOutcome::Failed);
        assert_eq!(engine.state(), SyncState::ResyncNeeded);
    }

    #[tokio::test]
    async fn test_retired_engine_ignores_resync() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        let outcome = engine.process(event(&symbol, 101, 105, None)).await;
        let ProcessOutcome::Resync(task) = outcome else {
            panic!("expected resync");
        };
        engine.retire();

        let fetcher = MockSnapshotFetcher::new();
        assert_eq!(task.run(&fetcher).await, ResyncOutcome::Retired);
        assert!(matches!(
            engine.process(event(&symbol, 106, 107, None)).await,
            ProcessOutcome::Dropped
        ));
    }

    #[tokio::test]
    async fn test_periodic_resync_reuses_current_event() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let engine = engine_with(symbol.clone(), quiet());
        engine.install_snapshot(&snapshot(100)).await;
        engine.process(event(&symbol, 101, 105, None)).await;

        engine.replica.lock().await.last_resync =
            Instant::now().checked_sub(Duration::from_secs(7200));

        let outcome = engine.process(event(&symbol, 106, 108, None)).await;
        let ProcessOutcome::Resync(task) = outcome else {
            panic!("expected periodic resync");
        };
        assert_eq!(task.trigger().map(|e| e.first_update_id), Some(106));
        assert_eq!(engine.state(), SyncState::Resyncing);
    }

    #[tokio::test]
    async fn test_one_sided_book_does_not_classify_levels() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let mut distributor = MockDistributor::new();
        distributor.expect_distribute().times(0);
        let engine = engine_with(symbol.clone(), distributor);
        engine
            .install_snapshot(&OrderBookSnapshot {
                last_update_id: 100,
                bids: vec![PriceLevel::new(dec!(100), dec!(1))],
                asks: vec![],
            })
            .await;

        // large enough for tier 1 if it were measured against a mid
        let mut diff = event(&symbol, 101, 105, None);
        diff.bids = vec![PriceLevel::new(dec!(100.3), dec!(600))];
        assert!(matches!(engine.process(diff).await, ProcessOutcome::Applied));

        let cups = engine.cups().await;
        assert_eq!(cups[0].max_tier, -1);
        assert!(cups[0].bids.is_empty());
    }

    #[tokio::test]
    async fn test_interesting_level_is_distributed() {
        let symbol = MarketSymbol::spot("SOLUSDT");
        let mut distributor = MockDistributor::new();
        // 100.3 * 600 = 60,180 notional within 1% of mid: tier 1
        distributor
            .expect_distribute()
            .withf(|profile, tier, cup| {
                profile == "default" && *tier == 1 && cup.bids[0].price == dec!(100.3)
            })
            .times(1)
            .returning(|_, _, _| ());
        let engine = engine_with(symbol.clone(), distributor);
        engine.install_snapshot(&snapshot(100)).await;

        let mut diff = event(&symbol, 101, 105, None);
        diff.bids = vec![PriceLevel::new(dec!(100.3), dec!(600))];
        engine.process(diff).await;

        let cups = engine.cups().await;
        assert_eq!(cups.len(), 1);
        assert_eq!(cups[0].max_tier, 1);
    }
}
