//! The worker loop: drains a worker's pool into its buffer, executes each
//! slot through the synchronization dispatcher, and spawns any successors
//! (spec §4.12).
//!
//! Ported from `worker.cpp::Worker::execute` close to line-for-line: the
//! `count_to_execute` formula, the epoch-enter-twice-per-cycle dance under
//! `UpdateEpochPeriodically`, and the prefetch-then-sample-then-dispatch
//! sequence per slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::buffer::TaskBuffer;
use crate::config::{ReclamationMode, RuntimeConfig};
use crate::epoch::EpochManager;
use crate::prefetch::prefetch_task_descriptor;
use crate::scheduler::Scheduler;
use crate::stats::{self, Counter, Load};
use crate::sync::optimistic::BackupStack;
use crate::sync::{self, SyncRegistry};
use crate::task::slab::Slab;
use crate::task::{AccessIntent, Destination, Successor, TaskRef};
use crate::topology::WorkerId;

/// Owns everything a single worker thread needs to run its loop. Built by
/// [`crate::runtime::Runtime`] and handed to a dedicated OS thread.
pub struct Worker {
    id: WorkerId,
    scheduler: Arc<Scheduler>,
    epoch_manager: Arc<EpochManager>,
    sync_registry: Arc<SyncRegistry>,
    slab: Arc<Slab>,
    running: Arc<AtomicBool>,
    config: RuntimeConfig,
    buffer: TaskBuffer,
    backup_stack: BackupStack,
    load: Load,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        scheduler: Arc<Scheduler>,
        epoch_manager: Arc<EpochManager>,
        sync_registry: Arc<SyncRegistry>,
        slab: Arc<Slab>,
        running: Arc<AtomicBool>,
        config: RuntimeConfig,
    ) -> Self {
        let buffer = TaskBuffer::new(crate::config::TASK_BUFFER_SIZE, config.prefetch_distance);
        Self {
            id,
            scheduler,
            epoch_manager,
            sync_registry,
            slab,
            running,
            config,
            buffer,
            backup_stack: BackupStack::new(),
            load: Load::default(),
        }
    }

    /// Fraction of the task buffer filled by the most recent `withdraw`
    /// call (spec §G.2), a diagnostic alongside `TaskCounter`.
    #[cfg(feature = "stats")]
    pub fn load(&self) -> f32 {
        self.load.get()
    }

    /// Blocks until `running` is set, then loops draining and executing
    /// tasks until `running` clears. Intended to be the body of the
    /// worker's dedicated OS thread.
    pub fn run(mut self) {
        while !self.running.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }

        debug!(worker = self.id.0, "worker started");

        let periodic = self.epoch_manager.mode() == ReclamationMode::UpdateEpochPeriodically;
        let refill_threshold = self.buffer.refill_threshold() as i32;
        let mut task_counter: u32 = 0;

        while self.running.load(Ordering::Acquire) {
            if periodic {
                self.epoch_manager.enter(self.id);
            }

            let pool = unsafe { self.scheduler.worker(self.id).pool_mut() };
            let mut filled = pool.withdraw(&mut self.buffer);
            self.load.set(filled, self.buffer.max_size() as u16);
            stats::increment(self.config.collect_task_counters, self.id, Counter::FilledBuffer);

            if filled == 0 {
                while filled == 0 && self.running.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                    filled = pool.withdraw(&mut self.buffer);
                }
                self.load.set(filled, self.buffer.max_size() as u16);
                stats::increment(self.config.collect_task_counters, self.id, Counter::FilledBuffer);
            }

            if periodic {
                self.epoch_manager.enter(self.id);
            }

            let filled = filled as i32;
            let count_available = task_counter as i32 + std::cmp::max(filled - refill_threshold, std::cmp::min(filled, refill_threshold));
            let count_available = count_available.max(0) as u32;

            while task_counter < count_available {
                let is_sampling = self.config.sample_period > 0 && (task_counter & (self.config.sample_period - 1)) == 0;

                let Some(task) = self.buffer.next() else { break };

                if let Some(next_head) = self.buffer.peek_head() {
                    prefetch_task_descriptor(next_head.data_ptr());
                }

                let sample_start = is_sampling.then(Instant::now);

                let result = self.execute_with_sync(task);

                if let (true, Some(start)) = (is_sampling, sample_start) {
                    let elapsed_cycles = start.elapsed().as_nanos().min(u32::MAX as u128) as u32;
                    self.buffer.sampler_mut().add(task.trace_id(), elapsed_cycles);
                }

                if let Some(successor) = result.successor {
                    self.spawn_successor(successor);
                }

                if result.remove {
                    unsafe { self.slab.delete_task(task) };
                }

                task_counter += 1;
            }
        }

        debug!(worker = self.id.0, "worker stopping");
    }

    fn execute_with_sync(&mut self, task: TaskRef) -> crate::task::TaskResult {
        let annotation = task.annotation();
        stats::increment(self.config.collect_task_counters, self.id, Counter::Executed);

        match annotation.destination() {
            Destination::Resource(resource) => {
                trace!(worker = self.id.0, ?resource, "dispatching resource-annotated task");
                match annotation.access_intent() {
                    AccessIntent::Read => stats::increment(self.config.collect_task_counters, self.id, Counter::ExecutedReader),
                    AccessIntent::Write => stats::increment(self.config.collect_task_counters, self.id, Counter::ExecutedWriter),
                }
                sync::dispatch(
                    &self.sync_registry,
                    &mut self.backup_stack,
                    &self.epoch_manager,
                    resource,
                    annotation.access_intent(),
                    self.id,
                    task,
                )
            }
            _ => task.execute(self.id),
        }
    }

    fn spawn_successor(&self, successor: Successor) {
        match successor {
            Successor::Task(next) => {
                if let Err(err) = self.scheduler.dispatch(next, Some(self.id)) {
                    debug!(worker = self.id.0, ?err, "failed to dispatch successor task");
                }
            }
            Successor::Resource(resource) => {
                // A resource successor signals "re-evaluate this resource's
                // pending work" rather than handing over a concrete task —
                // currently only meaningful for `Batched` squads, whose
                // pending remote pushes are drained the next time their
                // `SquadSpawnTask` runs. No action needed here.
                trace!(worker = self.id.0, ?resource, "successor resource acknowledged");
            }
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }
}
