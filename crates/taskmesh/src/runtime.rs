//! Runtime façade: the library's public entry points (spec §4.15).
//!
//! Grounded on `runtime.h`/`scheduler.cpp` (`start_and_wait`/`dispatch`).
//! Actual core pinning (`system::thread::pin` in the source) is not
//! ported — spawning OS threads and relying on the OS scheduler's
//! locality heuristics is the portable substitute; see `DESIGN.md`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::info;

use crate::config::{ReclamationMode, RuntimeConfig};
use crate::epoch::EpochManager;
use crate::error::{InitError, SpawnError};
use crate::resource::{ExpectedAccessFrequency, ResourcePtr, SyncPrimitive};
use crate::scheduler::{QueueLayoutKind, Scheduler};
use crate::squad::{SquadSpawnTask, TaskSquad};
use crate::sync::SyncRegistry;
use crate::task::slab::Slab;
use crate::task::{ResourceBoundness, Task, TaskRef};
use crate::topology::{CoreSet, Topology, WorkerId};
use crate::worker::Worker;

/// Polling interval for the dedicated reclamation thread under
/// `UpdateEpochPeriodically`.
const RECLAMATION_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Owns the worker pool, scheduler, epoch manager, and synchronization
/// registry for one runtime instance.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    epoch_manager: Arc<EpochManager>,
    sync_registry: Arc<SyncRegistry>,
    slab: Arc<Slab>,
    running: Arc<AtomicBool>,
    config: RuntimeConfig,
    topology: Arc<Topology>,
}

impl Runtime {
    /// Builds a runtime pinned to `core_set`, not yet running. Idempotent
    /// in the sense that each call produces an independent instance; a
    /// previous instance must have had `stop()` called and
    /// `start_and_wait()` return before its threads' resources are fully
    /// released.
    pub fn init(core_set: CoreSet, config: RuntimeConfig, layout: QueueLayoutKind) -> Result<Self, InitError> {
        let count_workers = core_set.count_cores();
        config.validate(count_workers, count_workers)?;

        let topology = Arc::new(Topology::new(core_set));
        let scheduler = Arc::new(Scheduler::new(topology.clone(), layout, &config));
        let epoch_manager = Arc::new(EpochManager::new(count_workers, config.memory_reclamation));
        let sync_registry = Arc::new(SyncRegistry::new());
        let slab = Arc::new(Slab::new());
        let running = Arc::new(AtomicBool::new(false));

        Ok(Self { scheduler, epoch_manager, sync_registry, slab, running, config, topology })
    }

    pub fn count_workers(&self) -> u16 {
        self.scheduler.count_workers()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Submits `task` from outside any worker context (e.g. from the
    /// thread driving `init`/`start_and_wait`).
    pub fn spawn(&self, task: TaskRef) -> Result<WorkerId, SpawnError> {
        self.scheduler.dispatch(task, None)
    }

    /// Submits `task` as if spawned from inside `local_worker`'s own
    /// execution — used when a task's `execute` hands back a successor.
    pub fn spawn_from(&self, task: TaskRef, local_worker: WorkerId) -> Result<WorkerId, SpawnError> {
        self.scheduler.dispatch(task, Some(local_worker))
    }

    /// Submits a pre-linked `first..=last` chain directly to
    /// `local_worker`'s own local queue in one O(1) splice (spec §4.11,
    /// the squad-flush fast path).
    pub fn spawn_chain(&self, first: TaskRef, last: TaskRef, local_worker: WorkerId) -> Result<(), SpawnError> {
        if local_worker.0 >= self.scheduler.count_workers() {
            return Err(SpawnError::InvalidWorker(local_worker.0));
        }
        unsafe { self.scheduler.worker(local_worker).pool_mut().push_back_local_chain(first, last) };
        Ok(())
    }

    /// Enqueues a [`SquadSpawnTask`] on `home_worker` (after boundness
    /// remap), which flushes `squad` and splices its contents into that
    /// worker's local queue the next time it runs (spec §4.11).
    pub fn spawn_squad(
        &self,
        squad: &mut TaskSquad,
        home_worker: WorkerId,
        boundness: ResourceBoundness,
        local_worker: Option<WorkerId>,
    ) -> Result<WorkerId, SpawnError> {
        let mut spawn_task = SquadSpawnTask::new(squad as *mut TaskSquad, self.scheduler.clone());
        spawn_task.annotation_mut().set_resource_boundness(boundness);
        spawn_task.annotation_mut().set_destination(crate::task::Destination::Worker(home_worker));
        let spawn_task = self.slab.new_task(spawn_task);
        self.scheduler.dispatch(spawn_task, local_worker)
    }

    pub fn new_task<T: Task + 'static>(&self, task: T) -> TaskRef {
        self.slab.new_task(task)
    }

    /// Returns a task to the slab. The task must already have been removed
    /// from every queue and must not be used again afterward.
    ///
    /// # Safety
    /// Same contract as [`Slab::delete_task`].
    pub unsafe fn delete_task(&self, task: TaskRef) {
        self.slab.delete_task(task)
    }

    /// Constructs a resource: picks the home worker with the lowest
    /// occupancy prediction vector, registers synchronization state (for
    /// primitives that need one), and returns the packed handle (spec
    /// §4.13). The predicted frequency is stashed in the handle's 3-bit
    /// info field so `delete_resource` can revoke the matching counter
    /// without a side table.
    pub fn new_resource<T: Send + Sync + 'static>(
        &self,
        primitive: SyncPrimitive,
        expected_frequency: ExpectedAccessFrequency,
        value: T,
    ) -> ResourcePtr {
        let home = self.select_home_worker();
        let addr = Box::into_raw(Box::new(value)) as u64;
        let resource = ResourcePtr::make(addr, home, primitive, expected_frequency as u8);

        self.scheduler.worker(home).pool().predict_usage(expected_frequency);
        if primitive != SyncPrimitive::Batched {
            self.sync_registry.register(resource);
        }
        resource
    }

    /// Destructs the resource `T` at `resource`'s address and retires the
    /// memory via the epoch manager (spec §4.15 `delete_resource`).
    ///
    /// # Safety
    /// `resource` must have been produced by `new_resource::<T>` with the
    /// same `T`, and must not be dereferenced again by any in-flight task
    /// after this call.
    pub unsafe fn delete_resource<T: Send + 'static>(&self, resource: ResourcePtr) {
        let home = resource.worker_id();
        let frequency = ExpectedAccessFrequency::ALL[resource.info() as usize];
        self.scheduler.worker(home).pool().revoke(frequency);
        if resource.primitive() != SyncPrimitive::Batched {
            self.sync_registry.unregister(resource);
        }

        let addr = resource.address() as usize;
        self.epoch_manager.retire(home, Box::new(move || drop(Box::from_raw(addr as *mut T))));
    }

    fn select_home_worker(&self) -> WorkerId {
        (0..self.scheduler.count_workers())
            .map(WorkerId)
            .min_by_key(|&id| self.scheduler.worker(id).pool().occupancy_score())
            .unwrap_or(WorkerId(0))
    }

    /// Spawns one OS thread per worker plus (if reclamation is periodic) a
    /// dedicated reclamation thread, starts them, and blocks until
    /// [`Runtime::stop`] is called and every thread has exited.
    pub fn start_and_wait(&self) {
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.scheduler.count_workers() as usize + 1);

        for id in 0..self.scheduler.count_workers() {
            let worker_id = WorkerId(id);
            let worker = Worker::new(
                worker_id,
                self.scheduler.clone(),
                self.epoch_manager.clone(),
                self.sync_registry.clone(),
                self.slab.clone(),
                self.running.clone(),
                self.config.clone(),
            );
            handles.push(
                thread::Builder::new()
                    .name(format!("taskmesh-worker-{id}"))
                    .spawn(move || worker.run())
                    .expect("failed to spawn worker thread"),
            );
        }

        if self.epoch_manager.mode() == ReclamationMode::UpdateEpochPeriodically {
            let epoch_manager = self.epoch_manager.clone();
            let running = self.running.clone();
            let count_workers = self.scheduler.count_workers();
            handles.push(
                thread::Builder::new()
                    .name("taskmesh-reclaim".to_string())
                    .spawn(move || {
                        while running.load(Ordering::Acquire) {
                            thread::sleep(RECLAMATION_POLL_INTERVAL);
                            epoch_manager.bump_global_epoch();
                            for id in 0..count_workers {
                                epoch_manager.reclaim(WorkerId(id));
                            }
                        }
                    })
                    .expect("failed to spawn reclamation thread"),
            );
        }

        info!(workers = self.scheduler.count_workers(), "runtime starting");
        self.running.store(true, Ordering::Release);

        for handle in handles {
            let _ = handle.join();
        }

        self.epoch_manager.flush_all();
        info!("runtime stopped");
    }

    /// Clears the running flag. Workers exit after finishing their current
    /// task; any tasks still queued are dropped (spec §5 "Cancellation
    /// semantics").
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::task::{Annotation, Destination, TaskResult};

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

    fn runtime(count_workers: u16) -> Runtime {
        let core_set = CoreSet::single_numa_node(count_workers);
        Runtime::init(core_set, RuntimeConfig::default(), QueueLayoutKind::Single).unwrap()
    }

    #[test]
    fn spawn_without_worker_context_routes_through_anywhere() {
        let runtime = runtime(2);
        let mut annotation = Annotation::default();
        annotation.set_destination(Destination::Anywhere);
        let task = runtime.new_task(NoopTask(annotation));

        let target = runtime.spawn(task).unwrap();
        assert!(target.0 < 2);

        unsafe { runtime.delete_task(task) };
    }

    #[test]
    fn new_resource_picks_the_least_occupied_worker() {
        let runtime = runtime(4);
        let resource = runtime.new_resource(SyncPrimitive::ExclusiveLatch, ExpectedAccessFrequency::Normal, 7u32);
        assert!(resource.worker_id().0 < 4);
        unsafe {
            runtime.delete_resource::<u32>(resource);
        }
    }

    #[test]
    fn init_rejects_more_workers_than_the_core_set() {
        let mut config = RuntimeConfig::default();
        config.sample_period = 0; // deliberately invalid alongside a valid core count
        let err = Runtime::init(CoreSet::single_numa_node(2), config, QueueLayoutKind::Single).unwrap_err();
        assert_eq!(err, InitError::InvalidSamplePeriod(0));
    }
}
