//! Backup stack and the optimistic retry loops used by `ScheduleWriter`
//! and `OLFIT` (spec §4.9/§4.10).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TASK_SIZE;
use crate::task::{TaskRef, TaskResult};
use crate::topology::WorkerId;

/// Per-worker LIFO of fixed-size byte slots, used to save and restore a
/// task's own state across an optimistic-read retry (spec §4.10). Private
/// to its worker — no synchronization.
pub struct BackupStack {
    slots: Vec<[u8; TASK_SIZE]>,
}

impl BackupStack {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Copies the task's descriptor bytes (capped at `TASK_SIZE`) onto the
    /// stack.
    ///
    /// # Safety
    /// `task` must reference a live node whose concrete task type does not
    /// exceed `TASK_SIZE` bytes — the same fixed-size contract the slab
    /// allocator enforces (spec §4.10: "clients must therefore keep task
    /// state small").
    pub fn backup(&mut self, task: TaskRef) {
        let mut slot = [0u8; TASK_SIZE];
        unsafe { std::ptr::copy_nonoverlapping(task.data_ptr(), slot.as_mut_ptr(), TASK_SIZE) };
        self.slots.push(slot);
    }

    /// Restores the most recently backed-up bytes onto `task`, undoing any
    /// mutation the retried `execute` performed.
    pub fn restore(&mut self, task: TaskRef) {
        let slot = self.slots.pop().expect("restore without a matching backup");
        unsafe { std::ptr::copy_nonoverlapping(slot.as_ptr(), task.data_ptr() as *mut u8, TASK_SIZE) };
    }
}

impl Default for BackupStack {
    fn default() -> Self {
        Self::new()
    }
}

/// `v % 2 == 1` marks a writer in progress; readers and OLFIT writers spin
/// until it clears.
fn is_writer_in_progress(version: u64) -> bool {
    version % 2 == 1
}

/// `ScheduleWriter`/`OLFIT` reader path: back up, execute, and only accept
/// the result if the version hasn't moved — otherwise restore and retry
/// (spec §4.9 "Optimistic read protocol").
pub fn run_optimistic_read(version: &AtomicU64, backup: &mut BackupStack, task: TaskRef, worker_id: WorkerId) -> TaskResult {
    loop {
        let before = version.load(Ordering::Acquire);
        if is_writer_in_progress(before) {
            std::hint::spin_loop();
            continue;
        }

        backup.backup(task);
        let result = task.execute(worker_id);

        if version.load(Ordering::Acquire) == before {
            return result;
        }
        backup.restore(task);
    }
}

/// `ScheduleWriter` writer path: bump the version to odd, run, bump back to
/// even. No CAS — the scheduler already guarantees at most one writer
/// reaches the home worker at a time for this primitive.
pub fn run_guarded_write(version: &AtomicU64, task: TaskRef, worker_id: WorkerId) -> TaskResult {
    version.fetch_add(1, Ordering::AcqRel);
    let result = task.execute(worker_id);
    version.fetch_add(1, Ordering::Release);
    result
}

/// `OLFIT` writer path: writers may arrive on any worker, so the odd-version
/// transition itself is compare-exchanged.
pub fn run_cas_write(version: &AtomicU64, task: TaskRef, worker_id: WorkerId) -> TaskResult {
    loop {
        let before = version.load(Ordering::Acquire);
        if is_writer_in_progress(before) {
            std::hint::spin_loop();
            continue;
        }
        if version.compare_exchange(before, before + 1, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            let result = task.execute(worker_id);
            version.store(before + 2, Ordering::Release);
            return result;
        }
    }
}
