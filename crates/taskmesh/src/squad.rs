//! Task squad: a producer-side batch accumulator for many tasks destined
//! for one worker (spec §4.11).
//!
//! Grounded on `task_squad.h`/`task_squad.cpp`. The source's `flush()`
//! drains the remote MPSC ring's whole linked chain in one `pop()`; this
//! port drains it task-by-task through [`crate::queue::mpsc::Mpsc::pop`]
//! (see the `TaskSource` deviation note in `DESIGN.md`) but preserves the
//! same end state: every remote-pushed task ends up spliced into the local
//! list, FIFO.

use std::sync::Arc;

use crate::error::QueuePushError;
use crate::queue::mpsc::Mpsc;
use crate::queue::spsc::SpscList;
use crate::scheduler::Scheduler;
use crate::task::{Destination, Task, TaskResult, TaskRef};
use crate::topology::WorkerId;

const SQUAD_REMOTE_CAPACITY: usize = 1024;

/// Accumulates tasks for a single target worker before a one-shot
/// dispatch. Local pushes go straight to the owner's SPSC list; remote
/// pushes (from other workers) go through an MPSC ring until `flush`.
pub struct TaskSquad {
    local_queue: SpscList,
    remote_queue: Mpsc<TaskRef>,
}

impl TaskSquad {
    pub fn new() -> Self {
        Self { local_queue: SpscList::new(), remote_queue: Mpsc::with_capacity(SQUAD_REMOTE_CAPACITY) }
    }

    pub fn push_back_local(&mut self, task: TaskRef) {
        self.local_queue.push_back(task);
    }

    pub fn push_back_remote(&self, task: TaskRef) -> Result<(), QueuePushError> {
        self.remote_queue.push(task)
    }

    /// Moves every task currently in the remote ring into the local list.
    pub fn flush(&mut self) {
        while let Some(task) = self.remote_queue.pop() {
            self.local_queue.push_back(task);
        }
    }

    pub fn pop_front(&mut self) -> Option<TaskRef> {
        self.local_queue.pop_front()
    }

    /// Removes the whole local list as a `(first, last)` chain, or `None`
    /// if it is empty.
    pub fn take_all(&mut self) -> Option<(TaskRef, TaskRef)> {
        self.local_queue.take_all()
    }
}

impl Default for TaskSquad {
    fn default() -> Self {
        Self::new()
    }
}

/// Special task enqueued on the target worker when a squad is spawned: it
/// flushes the squad's remote ring, then re-dispatches the whole local
/// chain as an ordinary spawn with the first task's destination forced to
/// `Local` (spec §4.11: "that task flushes and re-dispatches each task as
/// an ordinary spawn, with destination=local on the first element").
pub struct SquadSpawnTask {
    squad: *mut TaskSquad,
    scheduler: Arc<Scheduler>,
    annotation: crate::task::Annotation,
}

// SAFETY: a `SquadSpawnTask` is always spawned onto the squad's own target
// worker and never touched concurrently from elsewhere; the squad it
// points to outlives the spawn (owned by the producer until the spawn
// task has run).
unsafe impl Send for SquadSpawnTask {}

impl SquadSpawnTask {
    pub fn new(squad: *mut TaskSquad, scheduler: Arc<Scheduler>) -> Self {
        Self { squad, scheduler, annotation: crate::task::Annotation::default() }
    }

    /// Drains the squad and returns the flushed `(first, last)` chain with
    /// the first task's destination forced to `Local`, ready to splice into
    /// a worker's local queue as a single chained push.
    pub fn flush_and_take(&self) -> Option<(TaskRef, TaskRef)> {
        let squad = unsafe { &mut *self.squad };
        squad.flush();
        let (first, last) = squad.take_all()?;
        first.annotation_mut().set_destination(Destination::Local);
        Some((first, last))
    }
}

impl Task for SquadSpawnTask {
    fn execute(&mut self, worker_id: WorkerId) -> TaskResult {
        if let Some((first, last)) = self.flush_and_take() {
            // SAFETY: a `SquadSpawnTask` only ever executes on the worker
            // it was dispatched to, which is the same thread running this
            // `execute` call — satisfying `pool_mut`'s ownership contract.
            unsafe { self.scheduler.worker(worker_id).pool_mut().push_back_local_chain(first, last) };
        }
        TaskResult::done()
    }

    fn annotation(&self) -> &crate::task::Annotation {
        &self.annotation
    }

    fn annotation_mut(&mut self) -> &mut crate::task::Annotation {
        &mut self.annotation
    }
}
