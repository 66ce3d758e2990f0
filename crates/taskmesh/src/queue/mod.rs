//! Backing queues for task pools (spec §4.3).
//!
//! Three layouts share these two building blocks: a single-queue layout
//! uses one [`mpsc::Mpsc`] for all remote producers, a NUMA-local layout
//! uses one per NUMA node, and a worker-local layout uses one per remote
//! worker. [`pool::TaskPool`](crate::pool::TaskPool) picks among them.

pub mod mpsc;
pub mod priority;
pub mod spsc;

use crate::task::TaskRef;

/// Something a task buffer can drain tasks from (spec §4.5 `fill<Queue>`).
/// Implemented by both the local SPSC list and the remote MPSC ring so
/// `TaskBuffer::fill` is written once and works against either.
pub trait TaskSource {
    fn pop_front(&mut self) -> Option<TaskRef>;
    fn is_empty(&self) -> bool;
}

impl TaskSource for spsc::SpscList {
    fn pop_front(&mut self) -> Option<TaskRef> {
        spsc::SpscList::pop_front(self)
    }
    fn is_empty(&self) -> bool {
        spsc::SpscList::is_empty(self)
    }
}

impl TaskSource for mpsc::Mpsc<TaskRef> {
    fn pop_front(&mut self) -> Option<TaskRef> {
        self.pop()
    }
    fn is_empty(&self) -> bool {
        mpsc::Mpsc::is_empty(self)
    }
}
