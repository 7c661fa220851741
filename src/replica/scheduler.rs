//! Per-segment resync workers
//!
//! Each segment gets one worker draining an unbounded channel, so at most
//! one snapshot synchronization per segment runs at a time and scheduling
//! never blocks the event path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ResyncOutcome, ResyncTask};
use crate::metrics;
use crate::rest::SnapshotFetcher;
use crate::symbol::Segment;

struct SegmentQueue {
    tx: mpsc::UnboundedSender<ResyncTask>,
    /// Queued plus running tasks
    backlog: Arc<AtomicUsize>,
}

pub struct ResyncScheduler {
    spot: SegmentQueue,
    futures: SegmentQueue,
}

impl ResyncScheduler {
    /// Spawn one worker per segment. Must be called inside a tokio runtime.
    pub fn start(fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        Self {
            spot: spawn_worker(Segment::Spot, Arc::clone(&fetcher)),
            futures: spawn_worker(Segment::Futures, fetcher),
        }
    }

    /// Queue a resync on its segment's worker
    pub fn schedule(&self, task: ResyncTask) {
        let segment = task.symbol().segment;
        let queue = self.queue(segment);

        queue.backlog.fetch_add(1, Ordering::AcqRel);
        report_backlog(segment, &queue.backlog);
        debug!(symbol = %task.symbol(), "Resync scheduled");

        if let Err(mpsc::error::SendError(task)) = queue.tx.send(task) {
            warn!(symbol = %task.symbol(), "Resync worker stopped, abandoning task");
            queue.backlog.fetch_sub(1, Ordering::AcqRel);
            report_backlog(segment, &queue.backlog);
            task.abandon();
        }
    }

    /// Queued plus running resyncs of one segment
    pub fn queue_depth(&self, segment: Segment) -> usize {
        self.queue(segment).backlog.load(Ordering::Acquire)
    }

    /// Symbols currently mid-resync across both segments
    pub fn resyncing(&self) -> usize {
        Segment::ALL.iter().map(|segment| self.queue_depth(*segment)).sum()
    }

    fn queue(&self, segment: Segment) -> &SegmentQueue {
        match segment {
            Segment::Spot => &self.spot,
            Segment::Futures => &self.futures,
        }
    }
}

fn spawn_worker(segment: Segment, fetcher: Arc<dyn SnapshotFetcher>) -> SegmentQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<ResyncTask>();
    let backlog = Arc::new(AtomicUsize::new(0));
    let worker_backlog = Arc::clone(&backlog);

    tokio::spawn(async move {
        info!(segment = %segment, "Resync worker started");
        while let Some(task) = rx.recv().await {
            let symbol = task.symbol().clone();
            let outcome = task.run(fetcher.as_ref()).await;

            worker_backlog.fetch_sub(1, Ordering::AcqRel);
            report_backlog(segment, &worker_backlog);
            if let Some(m) = metrics::get() {
                m.resyncs.with_label_values(&[outcome.as_str()]).inc();
            }

            match outcome {
                ResyncOutcome::Failed | ResyncOutcome::Gap => {
                    warn!(symbol = %symbol, outcome = outcome.as_str(), "Resync did not complete")
                }
                _ => debug!(symbol = %symbol, outcome = outcome.as_str(), "Resync finished"),
            }
        }
        info!(segment = %segment, "Resync worker stopped");
    });

    SegmentQueue { tx, backlog }
}

fn report_backlog(segment: Segment, backlog: &AtomicUsize) {
    if let Some(m) = metrics::get() {
        m.resync_backlog
            .with_label_values(&[segment.as_str()])
            .set(backlog.load(Ordering::Acquire) as i64);
    }
}
