//! Replica synchronization
//!
//! One [`ReplicaSyncEngine`] per subscribed symbol combines REST snapshots
//! with diff events. Snapshot work runs on the [`ResyncScheduler`]; events
//! reach engines through the [`EventIngestQueue`] and the
//! [`ReplicaRegistry`].

mod engine;
mod ingest;
mod registry;
mod scheduler;

pub use engine::{ProcessOutcome, ReplicaStatus, ReplicaSyncEngine, ResyncOutcome, ResyncTask};
pub use ingest::{ingest_channel, DrainStats, EventIngestQueue, IngestSender};
pub use registry::ReplicaRegistry;
pub use scheduler::ResyncScheduler;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Synchronization state of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No usable book; the next event triggers a resync
    ResyncNeeded,
    /// A resync task is queued or running
    Resyncing,
    /// Snapshot installed, waiting for the event that bridges it
    InitialEventPending,
    Synced,
}

impl SyncState {
    fn as_u8(self) -> u8 {
        match self {
            SyncState::ResyncNeeded => 0,
            SyncState::Resyncing => 1,
            SyncState::InitialEventPending => 2,
            SyncState::Synced => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncState::Resyncing,
            2 => SyncState::InitialEventPending,
            3 => SyncState::Synced,
            _ => SyncState::ResyncNeeded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::ResyncNeeded => "resync_needed",
            SyncState::Resyncing => "resyncing",
            SyncState::InitialEventPending => "initial_event_pending",
            SyncState::Synced => "synced",
        }
    }
}

/// Lock-free sync state, readable without the replica lock
#[derive(Debug)]
pub(crate) struct AtomicSyncState(AtomicU8);

impl AtomicSyncState {
    pub(crate) fn new(state: SyncState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn load(&self) -> SyncState {
        SyncState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: SyncState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move from `current` to `new`; false if the state was not `current`
    pub(crate) fn transition(&self, current: SyncState, new: SyncState) -> bool {
        self.0
            .compare_exchange(
                current.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_is_exclusive() {
        let state = AtomicSyncState::new(SyncState::ResyncNeeded);
        assert!(state.transition(SyncState::ResyncNeeded, SyncState::Resyncing));
        assert!(!state.transition(SyncState::ResyncNeeded, SyncState::Resyncing));
        assert_eq!(state.load(), SyncState::Resyncing);
    }
}
