//! Epoch-based memory reclamation (spec §4.8).
//!
//! A global monotonic counter, one local-epoch slot per worker, and a
//! per-worker retire list of deferred drop glue. An object retired at
//! epoch `E` is freed once every *active* local epoch exceeds `E` — a
//! worker with no local epoch currently set (not between `enter`/`exit`,
//! or reclamation mode is `None`/not tracking) does not block reclamation.

use std::sync::Mutex;

use crate::config::ReclamationMode;
use crate::sync_compat::{AtomicU64, Ordering};
use crate::topology::WorkerId;

const INACTIVE: u64 = u64::MAX;

struct LocalEpoch(AtomicU64);

impl LocalEpoch {
    fn new() -> Self {
        Self(AtomicU64::new(INACTIVE))
    }

    fn enter(&self, epoch: u64) {
        self.0.store(epoch, Ordering::Release);
    }

    fn exit(&self) {
        self.0.store(INACTIVE, Ordering::Release);
    }

    fn load(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            INACTIVE => None,
            epoch => Some(epoch),
        }
    }
}

/// Type-erased drop glue for a retired allocation. Callers build this with
/// a closure that reconstructs the original `Box<T>` and lets it drop.
type DropGlue = Box<dyn FnOnce() + Send>;

struct Retired {
    epoch: u64,
    drop_glue: DropGlue,
}

/// Global epoch counter, per-worker local epochs, and per-worker retire
/// lists (spec "Epoch state").
pub struct EpochManager {
    mode: ReclamationMode,
    global_epoch: AtomicU64,
    local_epochs: Vec<LocalEpoch>,
    retire_lists: Vec<Mutex<Vec<Retired>>>,
}

impl EpochManager {
    pub fn new(count_workers: u16, mode: ReclamationMode) -> Self {
        let count_workers = count_workers as usize;
        Self {
            mode,
            global_epoch: AtomicU64::new(0),
            local_epochs: (0..count_workers).map(|_| LocalEpoch::new()).collect(),
            retire_lists: (0..count_workers).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub fn mode(&self) -> ReclamationMode {
        self.mode
    }

    pub fn global_epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::Acquire)
    }

    /// Advances the global epoch by one. Called periodically by the
    /// reclamation thread under `UpdateEpochPeriodically`.
    pub fn bump_global_epoch(&self) -> u64 {
        self.global_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Marks `worker_id` as observing the current global epoch. Called at
    /// the top of an optimistic-read execution (`OnRead`) or at the top of
    /// each pool-drain cycle (`Periodic`).
    pub fn enter(&self, worker_id: WorkerId) {
        self.local_epochs[worker_id.0 as usize].enter(self.global_epoch());
    }

    /// Clears `worker_id`'s local epoch, unblocking reclamation of objects
    /// retired at or after it.
    pub fn exit(&self, worker_id: WorkerId) {
        self.local_epochs[worker_id.0 as usize].exit();
    }

    /// Defers destruction of an object until no worker's local epoch can
    /// still observe it. Under `ReclamationMode::None` the object is freed
    /// immediately instead — the client is responsible for not running
    /// optimistic readers against it concurrently.
    pub fn retire(&self, worker_id: WorkerId, drop_glue: DropGlue) {
        if self.mode == ReclamationMode::None {
            drop_glue();
            return;
        }
        let epoch = self.global_epoch();
        self.retire_lists[worker_id.0 as usize]
            .lock()
            .expect("retire list mutex poisoned")
            .push(Retired { epoch, drop_glue });
    }

    fn min_active_local_epoch(&self) -> Option<u64> {
        self.local_epochs.iter().filter_map(LocalEpoch::load).min()
    }

    /// Runs drop glue for every object in `worker_id`'s retire list whose
    /// epoch is strictly below the lowest currently-active local epoch.
    /// Returns the number reclaimed.
    pub fn reclaim(&self, worker_id: WorkerId) -> usize {
        let threshold = self.min_active_local_epoch();
        let mut list = self.retire_lists[worker_id.0 as usize]
            .lock()
            .expect("retire list mutex poisoned");

        let (safe, pending): (Vec<Retired>, Vec<Retired>) = list.drain(..).partition(|retired| match threshold {
            None => true,
            Some(t) => retired.epoch < t,
        });
        *list = pending;
        let count = safe.len();
        for retired in safe {
            (retired.drop_glue)();
        }
        count
    }

    /// Unconditionally runs drop glue for every retired object across every
    /// worker, ignoring active local epochs. Called once on runtime
    /// shutdown (spec §4.8: "On runtime shutdown, all retire lists are
    /// flushed").
    pub fn flush_all(&self) {
        for list in &self.retire_lists {
            let mut list = list.lock().expect("retire list mutex poisoned");
            for retired in list.drain(..) {
                (retired.drop_glue)();
            }
        }
    }

    pub fn pending_count(&self, worker_id: WorkerId) -> usize {
        self.retire_lists[worker_id.0 as usize].lock().expect("retire list mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn retired_object_survives_while_a_worker_holds_an_older_epoch() {
        let manager = EpochManager::new(2, ReclamationMode::UpdateEpochPeriodically);
        let freed = Arc::new(AtomicBool::new(false));

        manager.enter(WorkerId(1));
        manager.bump_global_epoch();
        let freed_clone = freed.clone();
        manager.retire(WorkerId(0), Box::new(move || freed_clone.store(true, Ordering::SeqCst)));

        // Worker 1 is still pinned at epoch 0, at or below the retired
        // object's epoch: nothing may be freed yet.
        assert_eq!(manager.reclaim(WorkerId(0)), 0);
        assert!(!freed.load(Ordering::SeqCst));

        manager.exit(WorkerId(1));
        assert_eq!(manager.reclaim(WorkerId(0)), 1);
        assert!(freed.load(Ordering::SeqCst));
    }

    #[test]
    fn reclamation_mode_none_frees_immediately() {
        let manager = EpochManager::new(1, ReclamationMode::None);
        let freed = Arc::new(AtomicBool::new(false));
        let freed_clone = freed.clone();
        manager.retire(WorkerId(0), Box::new(move || freed_clone.store(true, Ordering::SeqCst)));
        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(manager.pending_count(WorkerId(0)), 0);
    }

    #[test]
    fn flush_all_reclaims_regardless_of_active_epochs() {
        let manager = EpochManager::new(1, ReclamationMode::UpdateEpochPeriodically);
        manager.enter(WorkerId(0));
        let freed = Arc::new(AtomicBool::new(false));
        let freed_clone = freed.clone();
        manager.retire(WorkerId(0), Box::new(move || freed_clone.store(true, Ordering::SeqCst)));
        manager.flush_all();
        assert!(freed.load(Ordering::SeqCst));
    }
}

#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::atomic::AtomicBool;
    use loom::sync::Arc;

    /// A reader that enters before the global epoch advances keeps its
    /// retired object alive until it exits, under every interleaving of
    /// `bump_global_epoch`/`retire`/`reclaim` loom can schedule.
    #[test]
    fn reader_blocks_reclamation_until_it_exits() {
        loom::model(|| {
            let manager = Arc::new(EpochManager::new(2, ReclamationMode::UpdateEpochPeriodically));
            let freed = Arc::new(AtomicBool::new(false));

            manager.enter(WorkerId(1));

            let writer_manager = manager.clone();
            let writer_freed = freed.clone();
            let writer = loom::thread::spawn(move || {
                writer_manager.bump_global_epoch();
                let freed = writer_freed.clone();
                writer_manager.retire(WorkerId(0), Box::new(move || freed.store(true, Ordering::SeqCst)));
                writer_manager.reclaim(WorkerId(0));
            });

            writer.join().unwrap();
            assert!(!freed.load(Ordering::SeqCst));

            manager.exit(WorkerId(1));
            manager.reclaim(WorkerId(0));
            assert!(freed.load(Ordering::SeqCst));
        });
    }
}
