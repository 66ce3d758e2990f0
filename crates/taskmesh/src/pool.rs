//! Per-worker task pool: local SPSC queue, remote MPSC queues (fan-in
//! layout configurable), and the usage-prediction occupancy counters used
//! for home-worker placement (spec §3 "Task pool (per worker)", §4.4).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::TaskBuffer;
use crate::config::MAX_NUMA_NODES;
use crate::error::QueuePushError;
use crate::queue::priority::{LocalPriorityQueue, RemotePriorityQueue};
use crate::resource::ExpectedAccessFrequency;
use crate::task::{Priority, TaskRef};
use crate::topology::{NumaNodeId, WorkerId};

const REMOTE_QUEUE_CAPACITY: usize = 1 << 16;

/// Four atomic counters, one per [`ExpectedAccessFrequency`] variant,
/// incremented/decremented as resources are assigned to or removed from
/// this worker. Ported from `TaskPoolOccupancy`.
#[derive(Default)]
pub struct TaskPoolOccupancy {
    counters: [AtomicU64; 4],
}

impl TaskPoolOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn predict(&self, frequency: ExpectedAccessFrequency) {
        self.counters[frequency as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn revoke(&self, frequency: ExpectedAccessFrequency) {
        self.counters[frequency as usize].fetch_sub(1, Ordering::Relaxed);
    }

    pub fn has_excessive_usage_prediction(&self) -> bool {
        self.counters[ExpectedAccessFrequency::Excessive as usize].load(Ordering::Relaxed) > 0
    }

    /// Highest non-zero category, `Unused` if none.
    pub fn predicted_usage(&self) -> ExpectedAccessFrequency {
        for frequency in [
            ExpectedAccessFrequency::Excessive,
            ExpectedAccessFrequency::High,
            ExpectedAccessFrequency::Normal,
        ] {
            if self.counters[frequency as usize].load(Ordering::Relaxed) > 0 {
                return frequency;
            }
        }
        ExpectedAccessFrequency::Unused
    }

    /// Counts of `(excessive, high, normal)`, used to compare workers
    /// lexicographically when the scheduler picks a home worker (spec
    /// §4.13).
    pub fn score(&self) -> (u64, u64, u64) {
        (
            self.counters[ExpectedAccessFrequency::Excessive as usize].load(Ordering::Relaxed),
            self.counters[ExpectedAccessFrequency::High as usize].load(Ordering::Relaxed),
            self.counters[ExpectedAccessFrequency::Normal as usize].load(Ordering::Relaxed),
        )
    }
}

/// How remote (cross-worker) queues fan in (spec §3 "Queue fan-in is
/// configurable").
pub enum RemoteLayout {
    /// One shared remote queue for all producers.
    Single(RemotePriorityQueue),
    /// One remote queue per NUMA node; drained starting at the producer's
    /// own node, then round-robin over the rest.
    NumaLocal { queues: Vec<RemotePriorityQueue>, home_numa_node: NumaNodeId },
    /// One remote queue per remote worker; drained round-robin starting at
    /// the owner's own id.
    WorkerLocal { queues: Vec<RemotePriorityQueue>, home_worker_id: WorkerId },
}

impl RemoteLayout {
    pub fn single() -> Self {
        Self::Single(RemotePriorityQueue::with_capacity(REMOTE_QUEUE_CAPACITY))
    }

    pub fn numa_local(home_numa_node: NumaNodeId) -> Self {
        let queues = (0..MAX_NUMA_NODES).map(|_| RemotePriorityQueue::with_capacity(REMOTE_QUEUE_CAPACITY)).collect();
        Self::NumaLocal { queues, home_numa_node }
    }

    pub fn worker_local(home_worker_id: WorkerId, count_workers: u16) -> Self {
        let queues =
            (0..count_workers).map(|_| RemotePriorityQueue::with_capacity(REMOTE_QUEUE_CAPACITY)).collect();
        Self::WorkerLocal { queues, home_worker_id }
    }

    fn push(&self, priority: Priority, task: TaskRef, producer_numa: NumaNodeId, producer_worker: WorkerId) -> Result<(), QueuePushError> {
        match self {
            RemoteLayout::Single(queue) => queue.push(priority, task),
            RemoteLayout::NumaLocal { queues, .. } => queues[producer_numa.0 as usize].push(priority, task),
            RemoteLayout::WorkerLocal { queues, .. } => queues[producer_worker.0 as usize].push(priority, task),
        }
    }

    /// Drains up to `available` tasks of `priority` into `buffer`, in the
    /// layout's canonical round-robin order, returning how many slots are
    /// left after filling.
    fn fill(&mut self, buffer: &mut TaskBuffer, priority: Priority, mut available: u16) -> u16 {
        if available == 0 {
            return 0;
        }
        match self {
            RemoteLayout::Single(queue) => {
                available -= fill_one(buffer, queue, priority, available);
            }
            RemoteLayout::NumaLocal { queues, home_numa_node } => {
                let count = queues.len();
                for offset in 0..count {
                    if available == 0 {
                        break;
                    }
                    let index = (home_numa_node.0 as usize + offset) & (count - 1);
                    available -= fill_one(buffer, &mut queues[index], priority, available);
                }
            }
            RemoteLayout::WorkerLocal { queues, home_worker_id } => {
                let count = queues.len();
                for offset in 0..count {
                    if available == 0 {
                        break;
                    }
                    let index = (home_worker_id.0 as usize + offset) % count;
                    available -= fill_one(buffer, &mut queues[index], priority, available);
                }
            }
        }
        available
    }

    fn is_fully_empty(&self) -> bool {
        match self {
            RemoteLayout::Single(queue) => queue.is_fully_empty(),
            RemoteLayout::NumaLocal { queues, .. } | RemoteLayout::WorkerLocal { queues, .. } => {
                queues.iter().all(RemotePriorityQueue::is_fully_empty)
            }
        }
    }
}

fn fill_one(buffer: &mut TaskBuffer, queue: &mut RemotePriorityQueue, priority: Priority, available: u16) -> u16 {
    struct Adapter<'a>(&'a mut RemotePriorityQueue, Priority);
    impl crate::queue::TaskSource for Adapter<'_> {
        fn pop_front(&mut self) -> Option<TaskRef> {
            self.0.pop(self.1)
        }
        fn is_empty(&self) -> bool {
            self.0.is_empty(self.1)
        }
    }
    buffer.fill(&mut Adapter(queue, priority), available)
}

/// One worker's queue set: owner-only local list plus cross-worker remote
/// queues, wrapped with occupancy bookkeeping (spec §3/§4.4).
pub struct TaskPool {
    local: LocalPriorityQueue,
    remote: RemoteLayout,
    occupancy: TaskPoolOccupancy,
}

impl TaskPool {
    pub fn new(remote: RemoteLayout) -> Self {
        Self { local: LocalPriorityQueue::new(), remote, occupancy: TaskPoolOccupancy::new() }
    }

    /// Owner-only: push a single task to the local queue.
    pub fn push_back_local(&mut self, task: TaskRef) {
        let priority = task.annotation().priority();
        self.local.push_back(priority, task);
    }

    /// Owner-only: splice an already-linked `first..=last` chain, e.g. a
    /// flushed squad, into the local queue in O(1).
    pub fn push_back_local_chain(&mut self, first: TaskRef, last: TaskRef) {
        let priority = first.annotation().priority();
        self.local.push_back_chain(priority, first, last);
    }

    /// Producer-context-aware push to a remote queue (spec §4.4).
    pub fn push_back_remote(&self, task: TaskRef, producer_numa: NumaNodeId, producer_worker: WorkerId) -> Result<(), QueuePushError> {
        let priority = task.annotation().priority();
        self.remote.push(priority, task, producer_numa, producer_worker)
    }

    /// Drains at most `buffer.available_slots()` tasks into `buffer`: first
    /// normal-priority (local then remote), then low-priority only if the
    /// buffer remained empty after that pass (spec §4.4: "this ensures
    /// low-priority starvation is bounded only by empty buffer states").
    pub fn withdraw(&mut self, buffer: &mut TaskBuffer) -> u16 {
        let filled_normal = self.fill_priority(buffer, Priority::Normal, buffer.available_slots());
        if buffer.is_empty() {
            return filled_normal + self.fill_priority(buffer, Priority::Low, buffer.available_slots());
        }
        filled_normal
    }

    fn fill_priority(&mut self, buffer: &mut TaskBuffer, priority: Priority, available: u16) -> u16 {
        if available == 0 {
            return 0;
        }
        let filled_local = buffer.fill(&mut LocalAdapter(&mut self.local, priority), available);
        let remaining = available - filled_local;
        let remaining_after_remote = self.remote.fill(buffer, priority, remaining);
        (available - remaining) + (remaining - remaining_after_remote)
    }

    pub fn predict_usage(&self, frequency: ExpectedAccessFrequency) {
        self.occupancy.predict(frequency);
    }

    pub fn revoke(&self, frequency: ExpectedAccessFrequency) {
        self.occupancy.revoke(frequency);
    }

    pub fn predicted_usage(&self) -> ExpectedAccessFrequency {
        self.occupancy.predicted_usage()
    }

    pub fn has_excessive_usage_prediction(&self) -> bool {
        self.occupancy.has_excessive_usage_prediction()
    }

    pub fn occupancy_score(&self) -> (u64, u64, u64) {
        self.occupancy.score()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_fully_empty() && self.remote.is_fully_empty()
    }
}

struct LocalAdapter<'a>(&'a mut LocalPriorityQueue, Priority);
impl crate::queue::TaskSource for LocalAdapter<'_> {
    fn pop_front(&mut self) -> Option<TaskRef> {
        self.0.pop_front(self.1)
    }
    fn is_empty(&self) -> bool {
        self.0.is_empty(self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrefetchDistance;
    use crate::task::slab::Slab;
    use crate::task::{Annotation, Task, TaskResult};

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
    fn withdraw_drains_normal_before_low_and_low_only_when_empty() {
        let slab = Slab::new();
        let mut pool = TaskPool::new(RemoteLayout::single());

        let mut low_annotation = Annotation::default();
        low_annotation.set_priority(Priority::Low);
        let low_task = slab.new_task(NoopTask(low_annotation));
        pool.push_back_local(low_task);

        let mut normal_annotation = Annotation::default();
        normal_annotation.set_priority(Priority::Normal);
        let normal_task = slab.new_task(NoopTask(normal_annotation));
        pool.push_back_local(normal_task);

        let mut buffer = TaskBuffer::new(8, PrefetchDistance::None);
        // Only one slot available: normal-priority task wins.
        let filled = pool.fill_priority(&mut buffer, Priority::Normal, 1);
        assert_eq!(filled, 1);
        assert_eq!(buffer.next(), Some(normal_task));

        unsafe {
            slab.delete_task(low_task);
            slab.delete_task(normal_task);
        }
    }

    #[test]
    fn occupancy_score_tracks_predict_and_revoke() {
        let pool = TaskPool::new(RemoteLayout::single());
        pool.predict_usage(ExpectedAccessFrequency::Excessive);
        assert!(pool.has_excessive_usage_prediction());
        assert_eq!(pool.occupancy_score(), (1, 0, 0));
        pool.revoke(ExpectedAccessFrequency::Excessive);
        assert!(!pool.has_excessive_usage_prediction());
    }
}
