//! Intrusive SPSC linked list: the per-worker local task queue.
//!
//! Ported from the source's `mx::queue::List<TaskInterface>`: a plain
//! singly linked list over the task's own `next` field. Only the owning
//! worker ever touches it (spec §4.3), so no synchronization is needed at
//! all — this is a thin safe wrapper over the raw `next` links already
//! carried by `TaskRef`.

use crate::task::TaskRef;

#[derive(Default)]
pub struct SpscList {
    head: Option<TaskRef>,
    tail: Option<TaskRef>,
}

impl SpscList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends a single task.
    pub fn push_back(&mut self, task: TaskRef) {
        task.set_next(None);
        match self.tail {
            Some(tail) => tail.set_next(Some(task)),
            None => self.head = Some(task),
        }
        self.tail = Some(task);
    }

    /// Appends an already-linked chain `first..=last` in one O(1) splice.
    /// Used by the squad system to move 250-task batches without walking
    /// them one at a time.
    pub fn push_back_chain(&mut self, first: TaskRef, last: TaskRef) {
        match self.tail {
            Some(tail) => tail.set_next(Some(first)),
            None => self.head = Some(first),
        }
        self.tail = Some(last);
    }

    /// Pops and returns the head of the list, or `None` if empty.
    pub fn pop_front(&mut self) -> Option<TaskRef> {
        let head = self.head?;
        self.head = head.take_next();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(head)
    }

    /// Removes and returns the whole chain as `(first, last)`, leaving the
    /// list empty. Used by the squad system to hand a batch to another
    /// queue in one O(1) splice rather than popping task by task.
    pub fn take_all(&mut self) -> Option<(TaskRef, TaskRef)> {
        let first = self.head.take()?;
        let last = self.tail.take().expect("tail must be set whenever head is");
        Some((first, last))
    }
}
