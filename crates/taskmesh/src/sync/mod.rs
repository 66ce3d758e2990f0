//! Synchronization dispatcher: selects and applies the execution wrapper
//! implied by a task's resource annotation (spec §4.9).

pub mod optimistic;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::ReclamationMode;
use crate::epoch::EpochManager;
use crate::resource::{ResourcePtr, SyncPrimitive};
use crate::task::{AccessIntent, TaskRef, TaskResult};
use crate::topology::WorkerId;
use optimistic::BackupStack;

/// Latch + version state for one resource, keyed by its packed address.
/// Registered at `Runtime::new_resource`, dropped at `delete_resource`
/// (spec §6 "Resource type contract").
struct SyncState {
    latch: RwLock<()>,
    version: AtomicU64,
}

impl SyncState {
    fn new() -> Self {
        Self { latch: RwLock::new(()), version: AtomicU64::new(0) }
    }
}

/// Process-wide table of per-resource synchronization state.
#[derive(Default)]
pub struct SyncRegistry {
    table: Mutex<HashMap<u64, Arc<SyncState>>>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: ResourcePtr) {
        self.table.lock().expect("sync registry mutex poisoned").insert(resource.address(), Arc::new(SyncState::new()));
    }

    pub fn unregister(&self, resource: ResourcePtr) {
        self.table.lock().expect("sync registry mutex poisoned").remove(&resource.address());
    }

    fn state(&self, resource: ResourcePtr) -> Arc<SyncState> {
        self.table
            .lock()
            .expect("sync registry mutex poisoned")
            .get(&resource.address())
            .cloned()
            .expect("resource used under synchronization before being registered")
    }
}

/// Runs `task` under the execution wrapper implied by `resource`'s
/// synchronization primitive and `access_intent` (spec §4.9's table).
/// `backup` is the calling worker's own backup stack, needed by the
/// optimistic paths. `epoch_manager` is entered immediately before and
/// exited immediately after an optimistic read, but only under
/// `ReclamationMode::UpdateEpochOnRead` (spec §4.8) — under
/// `UpdateEpochPeriodically` the worker loop already brackets the whole
/// drain cycle, and entering here too would double-count.
pub fn dispatch(
    registry: &SyncRegistry,
    backup: &mut BackupStack,
    epoch_manager: &EpochManager,
    resource: ResourcePtr,
    access_intent: AccessIntent,
    worker_id: WorkerId,
    task: TaskRef,
) -> TaskResult {
    let on_read = epoch_manager.mode() == ReclamationMode::UpdateEpochOnRead;
    let optimistic_read = |version: &AtomicU64, backup: &mut BackupStack, task: TaskRef| {
        if on_read {
            epoch_manager.enter(worker_id);
        }
        let result = optimistic::run_optimistic_read(version, backup, task, worker_id);
        if on_read {
            epoch_manager.exit(worker_id);
            epoch_manager.reclaim(worker_id);
        }
        result
    };

    match resource.primitive() {
        SyncPrimitive::ExclusiveLatch => {
            let state = registry.state(resource);
            let _guard = state.latch.write().expect("resource latch poisoned");
            task.execute(worker_id)
        }
        SyncPrimitive::ReaderWriterLatch => {
            let state = registry.state(resource);
            match access_intent {
                AccessIntent::Read => {
                    let _guard = state.latch.read().expect("resource latch poisoned");
                    task.execute(worker_id)
                }
                AccessIntent::Write => {
                    let _guard = state.latch.write().expect("resource latch poisoned");
                    task.execute(worker_id)
                }
            }
        }
        SyncPrimitive::ScheduleWriter => {
            let state = registry.state(resource);
            match access_intent {
                AccessIntent::Read if resource.worker_id() == worker_id => task.execute(worker_id),
                AccessIntent::Read => optimistic_read(&state.version, backup, task),
                AccessIntent::Write => optimistic::run_guarded_write(&state.version, task, worker_id),
            }
        }
        SyncPrimitive::Olfit => {
            let state = registry.state(resource);
            match access_intent {
                AccessIntent::Read => optimistic_read(&state.version, backup, task),
                AccessIntent::Write => optimistic::run_cas_write(&state.version, task, worker_id),
            }
        }
        SyncPrimitive::RestrictedTransactionalMemory => {
            // No HTM backend; per spec §4.9, fall back to serial execution
            // under an exclusive latch.
            let state = registry.state(resource);
            let _guard = state.latch.write().expect("resource latch poisoned");
            task.execute(worker_id)
        }
        SyncPrimitive::ScheduleAll | SyncPrimitive::Batched => {
            // The scheduler's dispatch routing already serializes these at
            // the home worker; no wrapper needed.
            task.execute(worker_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::slab::Slab;
    use crate::task::{Annotation, Destination, Task};

    struct NoopTask(Annotation);
    impl Task for NoopTask {
        fn execute(&mut self, _worker_id: WorkerId) -> TaskResult {
            TaskResult::done()
        }
        fn annotation(&self) -> &Annotation {
            &self.0
        }
        fn annotation_mut(&mut self) -> &mut Annotation {
            &mut self.0
        }
    }

    #[test]
    fn exclusive_latch_runs_the_task_once() {
        let slab = Slab::new();
        let registry = SyncRegistry::new();
        let resource = ResourcePtr::make(0x1000, WorkerId(0), SyncPrimitive::ExclusiveLatch, 0);
        registry.register(resource);

        let mut annotation = Annotation::with_resource(AccessIntent::Write, resource);
        annotation.set_destination(Destination::Resource(resource));
        let task = slab.new_task(NoopTask(annotation));
        let mut backup = BackupStack::new();
        let epoch_manager = EpochManager::new(1, ReclamationMode::None);

        let result = dispatch(&registry, &mut backup, &epoch_manager, resource, AccessIntent::Write, WorkerId(0), task);
        assert!(result.remove);

        unsafe { slab.delete_task(task) };
    }

    #[test]
    fn schedule_all_runs_without_a_latch() {
        let slab = Slab::new();
        let registry = SyncRegistry::new();
        let resource = ResourcePtr::make(0x2000, WorkerId(0), SyncPrimitive::ScheduleAll, 0);
        let task = slab.new_task(NoopTask(Annotation::with_resource(AccessIntent::Write, resource)));
        let mut backup = BackupStack::new();
        let epoch_manager = EpochManager::new(1, ReclamationMode::None);

        let result = dispatch(&registry, &mut backup, &epoch_manager, resource, AccessIntent::Write, WorkerId(0), task);
        assert!(result.remove);

        unsafe { slab.delete_task(task) };
    }

    #[test]
    fn reader_on_a_remote_worker_enters_and_exits_the_epoch_under_on_read_mode() {
        let slab = Slab::new();
        let registry = SyncRegistry::new();
        let resource = ResourcePtr::make(0x3000, WorkerId(0), SyncPrimitive::Olfit, 0);
        registry.register(resource);
        let task = slab.new_task(NoopTask(Annotation::with_resource(AccessIntent::Read, resource)));
        let mut backup = BackupStack::new();
        let epoch_manager = EpochManager::new(2, ReclamationMode::UpdateEpochOnRead);

        let result = dispatch(&registry, &mut backup, &epoch_manager, resource, AccessIntent::Read, WorkerId(1), task);
        assert!(result.remove);

        // dispatch() must have exited worker 1's local epoch again on the
        // way out: with no worker left holding an active epoch, a retire
        // reclaims immediately instead of sitting pinned forever.
        epoch_manager.retire(WorkerId(1), Box::new(|| ()));
        assert_eq!(epoch_manager.reclaim(WorkerId(1)), 1);

        unsafe { slab.delete_task(task) };
        registry.unregister(resource);
    }
}
