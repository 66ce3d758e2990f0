//! Dispatch policy: chooses a task's destination worker from its
//! annotation and routes it to that worker's pool (spec §4.14).
//!
//! Grounded on `scheduler.cpp`'s `Scheduler::dispatch` overloads. Resource
//! boundness remap (`bound_aware_worker_id`) and the local-vs-remote
//! preference (`keep_task_local`) are ported with the same branch
//! structure; NUMA-node and `Anywhere` destinations are not implemented in
//! the retrieved original (`Scheduler::dispatch`'s NUMA branch is dead,
//! commented-out code there) and are supplemented here per spec §4.14 —
//! see `DESIGN.md`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::config::RuntimeConfig;
use crate::error::SpawnError;
use crate::pool::{RemoteLayout, TaskPool};
use crate::resource::SyncPrimitive;
use crate::squad::TaskSquad;
use crate::stats::{self, Counter};
use crate::task::{Destination, ResourceBoundness, TaskRef};
use crate::topology::{NumaNodeId, Topology, WorkerId};

/// One worker's pool, reachable from any thread for remote (thread-safe)
/// pushes. Local (`&mut`) access is only ever taken by the worker thread
/// that owns this handle — the scheduler never hands out `pool_mut()`
/// across threads, mirroring the raw-pointer ownership discipline the
/// source's `Scheduler`/`Worker` pair already relies on.
pub struct WorkerHandle {
    pool: UnsafeCell<TaskPool>,
    numa_node: NumaNodeId,
}

unsafe impl Sync for WorkerHandle {}

impl WorkerHandle {
    pub fn new(remote: RemoteLayout, numa_node: NumaNodeId) -> Self {
        Self { pool: UnsafeCell::new(TaskPool::new(remote)), numa_node }
    }

    pub fn pool(&self) -> &TaskPool {
        unsafe { &*self.pool.get() }
    }

    /// # Safety
    /// Caller must be the single worker thread that owns this handle.
    pub unsafe fn pool_mut(&self) -> &mut TaskPool {
        &mut *self.pool.get()
    }
}

/// How remote queues fan in across the whole runtime — decided once at
/// `Runtime::init` and used to build every worker's [`RemoteLayout`]
/// consistently (spec §3 "Queue fan-in is configurable").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueLayoutKind {
    Single,
    NumaLocal,
    WorkerLocal,
}

pub struct Scheduler {
    topology: Arc<Topology>,
    workers: Vec<WorkerHandle>,
    anywhere_cursor: AtomicUsize,
    resource_boundness_routing: bool,
    collect_task_counters: bool,
}

impl Scheduler {
    pub fn new(topology: Arc<Topology>, layout: QueueLayoutKind, config: &RuntimeConfig) -> Self {
        let count_workers = topology.count_workers();
        let workers = (0..count_workers)
            .map(|id| {
                let worker_id = WorkerId(id);
                let numa_node = topology.numa_node_of(worker_id);
                let remote = match layout {
                    QueueLayoutKind::Single => RemoteLayout::single(),
                    QueueLayoutKind::NumaLocal => RemoteLayout::numa_local(numa_node),
                    QueueLayoutKind::WorkerLocal => RemoteLayout::worker_local(worker_id, count_workers),
                };
                WorkerHandle::new(remote, numa_node)
            })
            .collect();
        Self {
            topology,
            workers,
            anywhere_cursor: AtomicUsize::new(0),
            resource_boundness_routing: config.resource_boundness_routing,
            collect_task_counters: config.collect_task_counters,
        }
    }

    pub fn count_workers(&self) -> u16 {
        self.workers.len() as u16
    }

    pub fn worker(&self, worker_id: WorkerId) -> &WorkerHandle {
        &self.workers[worker_id.0 as usize]
    }

    fn check_worker(&self, worker_id: WorkerId) -> Result<(), SpawnError> {
        if (worker_id.0 as usize) < self.workers.len() {
            Ok(())
        } else {
            Err(SpawnError::InvalidWorker(worker_id.0))
        }
    }

    /// SMT-aware remap of a home worker id (spec §4.14 step 2), skipped
    /// entirely when `RuntimeConfig::resource_boundness_routing` is false.
    fn bound_aware_worker_id(&self, home: WorkerId, boundness: ResourceBoundness) -> WorkerId {
        if !self.resource_boundness_routing {
            return home;
        }
        match self.topology.physical_core_siblings(home) {
            None => home,
            Some((memory_bound, compute_bound)) => match boundness {
                ResourceBoundness::Memory => memory_bound,
                ResourceBoundness::Compute => compute_bound,
                ResourceBoundness::Mixed => home,
            },
        }
    }

    /// Whether a task should be pushed onto `local_worker`'s own queue
    /// rather than routed (possibly remotely) to `target`. Always true when
    /// they're the same worker. Otherwise: `ExclusiveLatch`/
    /// `ReaderWriterLatch`/`Olfit`/`RestrictedTransactionalMemory` grant the
    /// local-push shortcut unconditionally, since those primitives already
    /// serialize or tolerate concurrent access wherever a task runs;
    /// `ScheduleWriter` and a task with no resource at all (`primitive =
    /// None`, i.e. plain `Worker`/`NumaNode`/`Anywhere` destinations) only
    /// get it for a read; `ScheduleAll` never does, since every one of its
    /// writers must observe the same total order.
    fn prefers_local(&self, is_readonly: bool, primitive: Option<SyncPrimitive>, target: WorkerId, local_worker: WorkerId) -> bool {
        if target == local_worker {
            return true;
        }
        match primitive {
            None | Some(SyncPrimitive::ScheduleWriter) => is_readonly,
            Some(SyncPrimitive::ExclusiveLatch | SyncPrimitive::ReaderWriterLatch | SyncPrimitive::Olfit | SyncPrimitive::RestrictedTransactionalMemory) => true,
            Some(SyncPrimitive::ScheduleAll | SyncPrimitive::Batched) => false,
        }
    }

    /// Routes `task` to its destination worker and pushes it, returning
    /// the worker id for caller bookkeeping (spec §4.14).
    ///
    /// `local_worker` is `None` when called from outside any worker
    /// context (an external client thread); `Some(id)` when called from
    /// inside worker `id`'s own execution (e.g. spawning a successor).
    pub fn dispatch(&self, task: TaskRef, local_worker: Option<WorkerId>) -> Result<WorkerId, SpawnError> {
        let annotation = task.annotation();
        let destination = annotation.destination();
        let is_readonly = annotation.is_readonly();
        let boundness = annotation.resource_boundness();

        if let Some(local) = local_worker {
            stats::increment(self.collect_task_counters, local, Counter::Dispatched);
        }

        match destination {
            Destination::Resource(resource) => {
                let home = resource.worker_id();
                self.check_worker(home)?;

                if resource.primitive() == SyncPrimitive::Batched {
                    let squad = unsafe { &mut *resource.as_ptr::<TaskSquad>() };
                    if local_worker == Some(home) {
                        squad.push_back_local(task);
                    } else {
                        squad.push_back_remote(task)?;
                    }
                    return Ok(home);
                }

                let target = self.bound_aware_worker_id(home, boundness);
                self.route(task, target, Some(resource.primitive()), is_readonly, local_worker)?;
                Ok(target)
            }
            Destination::Worker(worker_id) => {
                self.check_worker(worker_id)?;
                let target = self.bound_aware_worker_id(worker_id, boundness);
                self.route(task, target, None, is_readonly, local_worker)?;
                Ok(target)
            }
            Destination::NumaNode(numa_node) => {
                let target = self.first_worker_on_numa_node(numa_node).ok_or(SpawnError::InvalidWorker(numa_node.0 as u16))?;
                self.route(task, target, None, is_readonly, local_worker)?;
                Ok(target)
            }
            Destination::Local => match local_worker {
                Some(home) => {
                    let target = self.bound_aware_worker_id(home, boundness);
                    unsafe { self.worker(target).pool_mut().push_back_local(task) };
                    stats::increment(self.collect_task_counters, home, Counter::DispatchedLocally);
                    Ok(target)
                }
                None => {
                    debug_assert!(false, "Destination::Local spawned with no worker context");
                    warn!("dropping task annotated Destination::Local with no worker context");
                    Err(SpawnError::InvalidWorker(WorkerId::INVALID.0))
                }
            },
            Destination::Anywhere => {
                let index = self.anywhere_cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
                let target = WorkerId(index as u16);
                self.route(task, target, None, is_readonly, local_worker)?;
                Ok(target)
            }
        }
    }

    fn first_worker_on_numa_node(&self, numa_node: NumaNodeId) -> Option<WorkerId> {
        (0..self.workers.len()).map(|i| WorkerId(i as u16)).find(|&id| self.topology.numa_node_of(id) == numa_node)
    }

    fn route(&self, task: TaskRef, target: WorkerId, primitive: Option<SyncPrimitive>, is_readonly: bool, local_worker: Option<WorkerId>) -> Result<(), SpawnError> {
        let prefer_local = match local_worker {
            Some(local) => self.prefers_local(is_readonly, primitive, target, local),
            None => false,
        };

        if prefer_local {
            let local = local_worker.expect("prefer_local implies a local worker context");
            unsafe { self.worker(local).pool_mut().push_back_local(task) };
            stats::increment(self.collect_task_counters, local, Counter::DispatchedLocally);
            return Ok(());
        }

        let (producer_numa, producer_worker) = match local_worker {
            Some(local) => (self.topology.numa_node_of(local), local),
            None => (NumaNodeId(0), WorkerId::INVALID),
        };
        self.worker(target).pool().push_back_remote(task, producer_numa, producer_worker)?;
        if let Some(local) = local_worker {
            stats::increment(self.collect_task_counters, local, Counter::DispatchedRemotely);
        }
        Ok(())
    }
}
