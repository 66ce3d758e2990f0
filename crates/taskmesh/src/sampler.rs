//! Online task-cycle sampling, feeding the prefetch pipeline's "where do
//! cycles come from" choice (spec §4.6/§4.7).
//!
//! Ported from `task_cycle_sampler.h`'s `TaskCycleSampler`/`Sample`. Gated
//! by the `cycle-sampling` feature: without it, a task's own
//! `annotation.cycles()` hint is always used (see `cycles_for`'s fallback),
//! matching spec §4.7's "if a task has no sampled entry, fall back to
//! `annotation.cycles`".

use std::collections::HashMap;

use crate::task::TaskRef;

#[derive(Clone, Copy, Debug, Default)]
struct Sample {
    count: u64,
    cycles: u64,
    average_cycles: u32,
}

impl Sample {
    fn new(cycles: u64) -> Self {
        Self { count: 1, cycles, average_cycles: cycles as u32 }
    }

    fn add(&mut self, cycles: u32) {
        self.count += 1;
        self.cycles += cycles as u64;
        self.average_cycles = (self.cycles / self.count) as u32;
    }
}

/// Per-worker sampler: on every Nth executed task, the worker measures the
/// cycle delta and attributes it to the task's `trace_id`.
#[derive(Default)]
pub struct TaskCycleSampler {
    samples: HashMap<u64, Sample>,
}

impl TaskCycleSampler {
    pub fn new() -> Self {
        Self { samples: HashMap::with_capacity(16) }
    }

    /// Records a measured execution of `cycles` cycles for `trace_id`.
    /// `trace_id == 0` is the "untraced" sentinel and is never recorded,
    /// matching the source's `if (task_id != 0U)` guard.
    pub fn add(&mut self, trace_id: u64, cycles: u32) {
        if trace_id == 0 {
            return;
        }
        self.samples.entry(trace_id).and_modify(|s| s.add(cycles)).or_insert_with(|| Sample::new(cycles as u64));
    }

    /// The estimated cycle cost to use for `task`: the sampled average for
    /// its `trace_id` if one has been recorded (and the `cycle-sampling`
    /// feature is enabled), else its annotation's static hint.
    pub fn cycles_for(&self, task: &TaskRef) -> u32 {
        #[cfg(feature = "cycle-sampling")]
        {
            let trace_id = task.trace_id();
            if let Some(sample) = self.samples.get(&trace_id) {
                return sample.average_cycles;
            }
        }
        task.annotation().cycles() as u32
    }

    pub fn sample_count(&self, trace_id: u64) -> u64 {
        self.samples.get(&trace_id).map(|s| s.count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_across_samples_for_the_same_trace_id() {
        let mut sampler = TaskCycleSampler::new();
        sampler.add(7, 100);
        sampler.add(7, 300);
        assert_eq!(sampler.samples.get(&7).unwrap().average_cycles, 200);
        assert_eq!(sampler.sample_count(7), 2);
    }

    #[test]
    fn trace_id_zero_is_never_recorded() {
        let mut sampler = TaskCycleSampler::new();
        sampler.add(0, 999);
        assert_eq!(sampler.sample_count(0), 0);
    }
}
