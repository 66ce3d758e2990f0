//! Optional per-worker task counters and channel-load diagnostic (spec §7
//! class 2, SPEC_FULL §E/§G.2), exposed through the `metrics` facade only
//! when built with the `stats` feature; otherwise every call here compiles
//! to nothing.
//!
//! Ported from `task_counter.h`'s `TaskCounter::increment` (the seven
//! counters below match its `Counter` enum exactly) and `load.h`'s `Load`.

use crate::topology::WorkerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    Dispatched,
    DispatchedLocally,
    DispatchedRemotely,
    Executed,
    ExecutedReader,
    ExecutedWriter,
    FilledBuffer,
}

impl Counter {
    const fn name(self) -> &'static str {
        match self {
            Counter::Dispatched => "taskmesh_dispatched_total",
            Counter::DispatchedLocally => "taskmesh_dispatched_locally_total",
            Counter::DispatchedRemotely => "taskmesh_dispatched_remotely_total",
            Counter::Executed => "taskmesh_executed_total",
            Counter::ExecutedReader => "taskmesh_executed_reader_total",
            Counter::ExecutedWriter => "taskmesh_executed_writer_total",
            Counter::FilledBuffer => "taskmesh_filled_buffer_total",
        }
    }
}

/// Increments `counter` for `worker_id` by one, if `enabled`
/// (`RuntimeConfig::collect_task_counters`) is true. A no-op unless the
/// crate is also built with the `stats` feature.
#[cfg(feature = "stats")]
pub fn increment(enabled: bool, worker_id: WorkerId, counter: Counter) {
    if enabled {
        metrics::counter!(counter.name(), "worker_id" => worker_id.0.to_string()).increment(1);
    }
}

#[cfg(not(feature = "stats"))]
#[inline]
pub fn increment(_enabled: bool, _worker_id: WorkerId, _counter: Counter) {}

/// Channel load: the fraction of the task buffer filled by the most recent
/// `TaskPool::withdraw` call. A read-only diagnostic alongside
/// `TaskPoolOccupancy`; nothing in the scheduler reads it back.
#[derive(Default)]
pub struct Load(f32);

impl Load {
    pub fn set(&mut self, withdrawn: u16, buffer_size: u16) {
        self.0 = withdrawn as f32 / buffer_size as f32;
    }

    pub fn get(&self) -> f32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_is_the_withdrawn_fraction_of_buffer_capacity() {
        let mut load = Load::default();
        load.set(16, 64);
        assert_eq!(load.get(), 0.25);
    }
}
