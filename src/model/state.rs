//! # Shared Spa State Snapshot
//!
//! The aggregate `SpaState` is the single shared mutable object in the
//! gateway. It is published as an atomically swapped immutable snapshot
//! behind a read-write lock: each decoder step rebuilds a full snapshot by
//! merging the previous one with newly decoded fields and replaces the `Arc`
//! under the write lock; readers clone the `Arc` under the read lock and
//! never hold it across I/O.

use crate::model::components::Components;
use crate::model::controller::Controller;
use crate::model::info::{SetupParams, SystemInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Aggregate snapshot of everything decoded from the bus so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaState {
    pub controller: Option<Controller>,
    pub components: Option<Components>,
    pub system_info: Option<SystemInfo>,
    pub setup_params: Option<SetupParams>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Handle to the shared snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedSpaState {
    inner: Arc<RwLock<Arc<SpaState>>>,
}

impl SharedSpaState {
    pub fn new() -> SharedSpaState {
        SharedSpaState {
            inner: Arc::new(RwLock::new(Arc::new(SpaState::default()))),
        }
    }

    /// Returns the current snapshot. Cheap: clones the `Arc`, not the state.
    pub fn snapshot(&self) -> Arc<SpaState> {
        self.inner.read().expect("spa state lock poisoned").clone()
    }

    /// Atomically replaces the snapshot.
    pub fn publish(&self, state: SpaState) {
        let mut guard = self.inner.write().expect("spa state lock poisoned");
        *guard = Arc::new(state);
    }

    /// Merges a change into a copy of the current snapshot and publishes the
    /// result. The write lock is held only for the pointer swap; `merge`
    /// runs on a private copy.
    pub fn update<F>(&self, merge: F)
    where
        F: FnOnce(&mut SpaState),
    {
        let mut next = (*self.snapshot()).clone();
        merge(&mut next);
        next.last_update = Some(Utc::now());
        self.publish(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::controller::Controller;

    #[test]
    fn test_update_merges_and_stamps() {
        let shared = SharedSpaState::new();
        assert!(shared.snapshot().last_update.is_none());

        shared.update(|state| {
            state.controller = Some(Controller {
                target_water_temperature: 100,
                ..Controller::default()
            });
        });

        let snapshot = shared.snapshot();
        assert_eq!(
            snapshot.controller.as_ref().unwrap().target_water_temperature,
            100
        );
        assert!(snapshot.last_update.is_some());
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let shared = SharedSpaState::new();
        let before = shared.snapshot();
        shared.update(|state| {
            state.system_info = Some(Default::default());
        });
        // The previously taken snapshot is unaffected by the swap.
        assert!(before.system_info.is_none());
        assert!(shared.snapshot().system_info.is_some());
    }
}
