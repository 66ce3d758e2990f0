//! Two-tier priority wrapper over the local and remote queue families
//! (spec §4.3: "a priority queue holding exactly two underlying queues
//! (`low`, `normal`) and dispatching on `annotation.priority`").

use crate::error::QueuePushError;
use crate::queue::mpsc::Mpsc;
use crate::queue::spsc::SpscList;
use crate::task::{Priority, TaskRef};

/// Priority-tiered SPSC local queue: only the owning worker pushes or pops.
#[derive(Default)]
pub struct LocalPriorityQueue {
    low: SpscList,
    normal: SpscList,
}

impl LocalPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, priority: Priority, task: TaskRef) {
        self.tier_mut(priority).push_back(task);
    }

    pub fn push_back_chain(&mut self, priority: Priority, first: TaskRef, last: TaskRef) {
        self.tier_mut(priority).push_back_chain(first, last);
    }

    pub fn pop_front(&mut self, priority: Priority) -> Option<TaskRef> {
        self.tier_mut(priority).pop_front()
    }

    pub fn is_empty(&self, priority: Priority) -> bool {
        self.tier(priority).is_empty()
    }

    pub fn is_fully_empty(&self) -> bool {
        self.low.is_empty() && self.normal.is_empty()
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut SpscList {
        match priority {
            Priority::Low => &mut self.low,
            Priority::Normal => &mut self.normal,
        }
    }

    fn tier(&self, priority: Priority) -> &SpscList {
        match priority {
            Priority::Low => &self.low,
            Priority::Normal => &self.normal,
        }
    }
}

/// Priority-tiered MPSC remote queue: any worker may push, only the owner
/// pops.
pub struct RemotePriorityQueue {
    low: Mpsc<TaskRef>,
    normal: Mpsc<TaskRef>,
}

impl RemotePriorityQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { low: Mpsc::with_capacity(capacity), normal: Mpsc::with_capacity(capacity) }
    }

    pub fn push(&self, priority: Priority, task: TaskRef) -> Result<(), QueuePushError> {
        self.tier(priority).push(task)
    }

    pub fn pop(&self, priority: Priority) -> Option<TaskRef> {
        self.tier(priority).pop()
    }

    pub fn is_empty(&self, priority: Priority) -> bool {
        self.tier(priority).is_empty()
    }

    pub fn is_fully_empty(&self) -> bool {
        self.low.is_empty() && self.normal.is_empty()
    }

    fn tier(&self, priority: Priority) -> &Mpsc<TaskRef> {
        match priority {
            Priority::Low => &self.low,
            Priority::Normal => &self.normal,
        }
    }
}
