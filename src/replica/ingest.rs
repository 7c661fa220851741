//! Bounded ingest queue between the transport and the replicas
//!
//! The transport offers events without blocking; a single drain task takes
//! everything queued on a fixed period and dispatches it. Events of a
//! replica that is resyncing stay queued, in order, until a later pass.
//! Held events share the queue's capacity; once it is used up, new events
//! of resyncing replicas are dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::{ProcessOutcome, ReplicaRegistry, ResyncScheduler, SyncState};
use crate::config::IngestConfig;
use crate::metrics;
use crate::parser::DepthEvent;
use crate::symbol::MarketSymbol;

/// Transport side of the ingest queue
#[derive(Clone)]
pub struct IngestSender {
    tx: mpsc::Sender<DepthEvent>,
}

impl IngestSender {
    /// Queue an event; false if it was dropped because the queue is full
    /// or the drain task is gone.
    pub fn offer(&self, event: DepthEvent) -> bool {
        if let Some(m) = metrics::get() {
            m.events_received.with_label_values(&[event.symbol.segment.as_str()]).inc();
        }

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                trace!(symbol = %event.symbol, "Ingest queue full, dropping event");
                metrics::record_drop("overflow");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// What one drain pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainStats {
    pub dispatched: usize,
    pub applied: usize,
    /// Kept for a later pass because the replica is resyncing
    pub held: usize,
    /// Dropped because held events already fill the queue's capacity
    pub dropped_held: usize,
    pub dropped_unknown: usize,
    /// Dropped because the segment's resync backlog is over the threshold
    pub dropped_backlog: usize,
    pub resyncs_scheduled: usize,
    pub gaps: usize,
}

/// Drain side of the ingest queue
pub struct EventIngestQueue {
    rx: mpsc::Receiver<DepthEvent>,
    held: VecDeque<DepthEvent>,
    capacity: usize,
    drain_interval: Duration,
    schedule_threshold: usize,
}

/// Create a bounded ingest queue
pub fn ingest_channel(config: &IngestConfig) -> (IngestSender, EventIngestQueue) {
    let capacity = config.capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        IngestSender { tx },
        EventIngestQueue {
            rx,
            held: VecDeque::new(),
            capacity,
            drain_interval: Duration::from_millis(config.drain_interval_ms.max(1)),
            schedule_threshold: config.schedule_threshold,
        },
    )
}

impl EventIngestQueue {
    /// Events carried over to the next pass
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Dispatch everything currently queued, held events first.
    pub async fn drain(
        &mut self,
        registry: &ReplicaRegistry,
        scheduler: &ResyncScheduler,
    ) -> DrainStats {
        let mut batch: Vec<DepthEvent> = self.held.drain(..).collect();
        while let Ok(event) = self.rx.try_recv() {
            batch.push(event);
        }

        let mut stats = DrainStats::default();
        let mut ineligible: HashSet<MarketSymbol> = HashSet::new();

        for event in batch {
            if ineligible.contains(&event.symbol) {
                self.hold(event, &mut stats);
                continue;
            }

            let Some(engine) = registry.get(&event.symbol).await else {
                stats.dropped_unknown += 1;
                metrics::record_drop("unknown_symbol");
                continue;
            };

            match engine.state() {
                SyncState::Resyncing => {
                    ineligible.insert(event.symbol.clone());
                    self.hold(event, &mut stats);
                    continue;
                }
                SyncState::ResyncNeeded
                    if scheduler.queue_depth(event.symbol.segment) > self.schedule_threshold =>
                {
                    stats.dropped_backlog += 1;
                    metrics::record_drop("resync_backlog");
                    continue;
                }
                _ => {}
            }

            stats.dispatched += 1;
            match engine.process(event).await {
                ProcessOutcome::Applied => stats.applied += 1,
                ProcessOutcome::GapDetected => stats.gaps += 1,
                ProcessOutcome::Resync(task) => {
                    stats.resyncs_scheduled += 1;
                    scheduler.schedule(task);
                }
                ProcessOutcome::Dropped => metrics::record_drop("resync_in_flight"),
                ProcessOutcome::Ignored => metrics::record_drop("stale"),
            }
        }

        if let Some(m) = metrics::get() {
            m.held_events.set(self.held.len() as i64);
        }
        stats
    }

    fn hold(&mut self, event: DepthEvent, stats: &mut DrainStats) {
        if self.held.len() >= self.capacity {
            trace!(symbol = %event.symbol, "Held events at capacity, dropping event");
            stats.dropped_held += 1;
            metrics::record_drop("held_overflow");
            return;
        }
        self.held.push_back(event);
        stats.held += 1;
    }

    /// Drain on a fixed period until every sender is gone.
    pub async fn run(mut self, registry: Arc<ReplicaRegistry>, scheduler: Arc<ResyncScheduler>) {
        let mut ticker = tokio::time::interval(self.drain_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.drain_interval.as_millis() as u64, "Ingest drain started");

        loop {
            ticker.tick().await;
            let stats = self.drain(&registry, &scheduler).await;
            if stats.dropped_backlog > 0 || stats.dropped_held > 0 || stats.gaps > 0 {
                warn!(
                    dropped_backlog = stats.dropped_backlog,
                    dropped_held = stats.dropped_held,
                    gaps = stats.gaps,
                    resyncing = scheduler.resyncing(),
                    "Drain pass shed events"
                );
            } else if stats.dispatched > 0 {
                trace!(?stats, "Drain pass");
            }

            if self.rx.is_closed() && self.rx.is_empty() && self.held.is_empty() {
                break;
            }
        }
        debug!("Ingest drain stopped");
    }
}
