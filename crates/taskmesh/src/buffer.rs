//! Per-worker task buffer: the ring between a worker's task pool and its
//! executor, where software prefetches are interleaved with scheduled
//! tasks (spec §4.5/§4.6).
//!
//! Ported from `task_buffer.h`'s `TaskBuffer<S>::fill`, with the three
//! prefetch modes kept as near-literal translations of the three branches
//! there (disabled / automatic / fixed). `Q::pop_front` is single-item
//! here (see [`crate::queue::TaskSource`]) rather than the source's
//! SPSC-specific batched `pop_front(n)` — functionally equivalent for
//! every invariant this buffer cares about (FIFO order, slot occupancy),
//! just simpler to implement safely.

use crate::config::PrefetchDistance;
use crate::prefetch::history::TaskExecutionTimeHistory;
use crate::prefetch::PrefetchDescriptor;
use crate::queue::TaskSource;
use crate::resource::ResourcePtr;
use crate::sampler::TaskCycleSampler;
use crate::task::TaskRef;

#[derive(Clone, Copy, Default)]
struct ScheduledPrefetch {
    resource: Option<ResourcePtr>,
    descriptor: PrefetchDescriptor,
}

impl ScheduledPrefetch {
    fn issue(&self) {
        if let Some(resource) = self.resource {
            // SAFETY: the address embedded in a `ResourcePtr` is only ever
            // dereferenced for prefetch, never loaded as a real `T` here.
            let addr = unsafe { resource.as_ptr::<u8>() };
            self.descriptor.issue(addr);
        }
    }
}

#[derive(Default)]
struct Slot {
    task: Option<TaskRef>,
    prefetch: ScheduledPrefetch,
}

/// Fixed-capacity ring buffer of task slots (spec §3 "Task buffer").
/// Capacity must be a power of two; `head`/`tail` wrap via a bitmask.
pub struct TaskBuffer {
    prefetch_distance: PrefetchDistance,
    capacity: u16,
    mask: u16,
    head: u16,
    tail: u16,
    slots: Vec<Slot>,
    history: TaskExecutionTimeHistory,
    sampler: TaskCycleSampler,
}

impl TaskBuffer {
    pub fn new(capacity: usize, prefetch_distance: PrefetchDistance) -> Self {
        assert!(capacity.is_power_of_two() && capacity > 0, "task buffer capacity must be a power of two");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            prefetch_distance,
            capacity: capacity as u16,
            mask: (capacity - 1) as u16,
            head: 0,
            tail: 0,
            slots,
            history: TaskExecutionTimeHistory::new(),
            sampler: TaskCycleSampler::new(),
        }
    }

    fn normalize(&self, index: u16) -> u16 {
        index & self.mask
    }

    fn normalize_backward(&self, index: u16, offset: u16) -> u16 {
        index.wrapping_sub(offset) & self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.slots[self.head as usize].task.is_none()
    }

    pub fn size(&self) -> u16 {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.capacity - (self.head - self.tail)
        }
    }

    pub fn max_size(&self) -> u16 {
        self.capacity
    }

    pub fn available_slots(&self) -> u16 {
        self.capacity - self.size()
    }

    /// Consumes the head slot: issues its prefetch (if any) and returns the
    /// task scheduled there, advancing `head`. `None` if the buffer is
    /// empty.
    pub fn next(&mut self) -> Option<TaskRef> {
        let index = self.head as usize;
        self.head = self.normalize(self.head + 1);
        let slot = &mut self.slots[index];
        slot.prefetch.issue();
        slot.task.take()
    }

    pub fn sampler_mut(&mut self) -> &mut TaskCycleSampler {
        &mut self.sampler
    }

    /// The task currently at `head`, without consuming it — used by the
    /// worker loop to prefetch the following slot's task descriptor ahead
    /// of dispatching it (spec §4.12 step e).
    pub fn peek_head(&self) -> Option<TaskRef> {
        self.slots[self.head as usize].task
    }

    pub fn refill_threshold(&self) -> u16 {
        match self.prefetch_distance {
            PrefetchDistance::None => 0,
            PrefetchDistance::Fixed(distance) => distance as u16,
            PrefetchDistance::Automatic => self.history.size() as u16,
        }
    }

    /// Pulls up to `count` tasks from `queue` into successive tail slots,
    /// programming prefetch slots per the configured [`PrefetchDistance`].
    /// Returns the number of tasks actually scheduled (fewer than `count`
    /// if `queue` ran dry).
    pub fn fill<Q: TaskSource>(&mut self, queue: &mut Q, count: u16) -> u16 {
        if count == 0 || queue.is_empty() {
            return 0;
        }

        match self.prefetch_distance {
            PrefetchDistance::None => self.fill_unprefetched(queue, count),
            PrefetchDistance::Automatic => self.fill_automatic(queue, count),
            PrefetchDistance::Fixed(distance) => self.fill_fixed(queue, count, distance as u16),
        }
    }

    fn fill_unprefetched<Q: TaskSource>(&mut self, queue: &mut Q, count: u16) -> u16 {
        let mut filled = 0;
        while filled < count {
            let Some(task) = queue.pop_front() else { break };
            let index = self.tail as usize;
            self.tail = self.normalize(self.tail + 1);
            self.slots[index].task = Some(task);
            filled += 1;
        }
        filled
    }

    fn fill_automatic<Q: TaskSource>(&mut self, queue: &mut Q, count: u16) -> u16 {
        let mut filled = 0;
        while filled < count {
            let Some(task) = queue.pop_front() else { break };

            let task_buffer_index = self.tail;
            self.tail = self.normalize(self.tail + 1);
            self.slots[task_buffer_index as usize].task = Some(task);

            if let Some((resource, descriptor)) = task.annotation().prefetch_hint() {
                let line_count = descriptor.line_count() as u32;
                let needed_cycles = line_count * crate::config::LATENCY_PER_PREFETCHED_LINE_CYCLES;
                let distance = self.history.prefetch_distance(needed_cycles) as u16;
                let prefetch_index = self.normalize_backward(task_buffer_index, distance);
                self.slots[prefetch_index as usize].prefetch = ScheduledPrefetch { resource: Some(resource), descriptor };
            }

            let task_cycles = self.sampler.cycles_for(&task);
            self.history.push(task_cycles);

            filled += 1;
        }
        filled
    }

    fn fill_fixed<Q: TaskSource>(&mut self, queue: &mut Q, count: u16, distance: u16) -> u16 {
        let size_before = self.size();
        let mut prefetch_tail = self.normalize_backward(self.tail, distance);
        let mut filled = 0;
        while filled < count {
            let Some(task) = queue.pop_front() else { break };

            let index = self.tail;
            self.tail = self.normalize(self.tail + 1);
            self.slots[index as usize].task = Some(task);

            if size_before + filled >= distance {
                if let Some((resource, descriptor)) = task.annotation().prefetch_hint() {
                    self.slots[prefetch_tail as usize].prefetch = ScheduledPrefetch { resource: Some(resource), descriptor };
                }
            }
            prefetch_tail = self.normalize(prefetch_tail + 1);

            filled += 1;
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::slab::Slab;
    use crate::task::{Annotation, Task, TaskResult};
    use crate::topology::WorkerId;
    use crate::queue::spsc::SpscList;

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
    fn fill_unprefetched_drains_fifo_order() {
        let slab = Slab::new();
        let mut queue = SpscList::new();
        let a = slab.new_task(NoopTask(Annotation::default()));
        let b = slab.new_task(NoopTask(Annotation::default()));
        queue.push_back(a);
        queue.push_back(b);

        let mut buffer = TaskBuffer::new(8, PrefetchDistance::None);
        let filled = buffer.fill(&mut queue, 8);
        assert_eq!(filled, 2);
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.next(), Some(a));
        assert_eq!(buffer.next(), Some(b));
        assert_eq!(buffer.next(), None);

        unsafe {
            slab.delete_task(a);
            slab.delete_task(b);
        }
    }

    #[test]
    fn fill_stops_early_when_queue_runs_dry() {
        let slab = Slab::new();
        let mut queue = SpscList::new();
        let a = slab.new_task(NoopTask(Annotation::default()));
        queue.push_back(a);

        let mut buffer = TaskBuffer::new(8, PrefetchDistance::None);
        assert_eq!(buffer.fill(&mut queue, 8), 1);

        unsafe { slab.delete_task(a) };
    }
}
