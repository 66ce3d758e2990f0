//! Compile-time constants and the runtime-selectable [`RuntimeConfig`].
//!
//! The original's `mx/tasking/config.h` is a header of `constexpr` toggles
//! baked into the binary. Most of those toggles are genuine runtime
//! contracts here (selected once, at `Runtime::init`, and passed around as
//! data) rather than build-time switches — only the two concerns that are
//! truly compile-time-only (cycle sampling, loom model checking) stay Cargo
//! features. See `SPEC_FULL.md` §D.

use crate::error::InitError;

/// Upper bound on the number of workers a single runtime instance may pin.
pub const MAX_WORKERS: u16 = 64;

/// Default fixed size of a task object, in bytes.
pub const TASK_SIZE: usize = 128;

/// Default number of slots in a worker's task buffer. Must stay a power of
/// two: the buffer's ring arithmetic uses a bitmask, not a modulo.
pub const TASK_BUFFER_SIZE: usize = 64;

/// Upper bound on distinct NUMA nodes a runtime instance may span.
pub const MAX_NUMA_NODES: usize = 8;

/// Cycles charged per prefetched cache line when converting a task's access
/// hint (line count) into an expected latency for the automatic prefetch
/// distance algorithm (spec §4.6). 400 matches the value used by the
/// adaptive-prefetch-distance testable property (spec §8 Scenario C).
pub const LATENCY_PER_PREFETCHED_LINE_CYCLES: u32 = 400;

/// Default period (in executed tasks) of the cycle sampler: every Nth task
/// is timed. Must be a power of two (spec §4.7).
pub const DEFAULT_SAMPLE_PERIOD: u32 = 4096;

/// How a worker's task buffer picks the prefetch distance for the next slot
/// (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchDistance {
    /// No software prefetch is issued.
    None,
    /// Prefetch exactly `d` slots ahead of the slot being filled.
    Fixed(u8),
    /// Compute `d` per task from the rolling cycle history (spec §4.6/§4.7).
    Automatic,
}

/// Epoch-based reclamation mode (spec §4.8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclamationMode {
    /// No automatic reclamation; retired objects accumulate until the
    /// runtime shuts down and flushes every retire list.
    None,
    /// A worker enters the epoch immediately before an optimistic read and
    /// leaves right after it succeeds.
    UpdateEpochOnRead,
    /// A worker enters the epoch once per pool-drain cycle; a dedicated
    /// reclamation thread advances the global epoch periodically.
    UpdateEpochPeriodically,
}

/// Runtime-selectable configuration passed to `Runtime::init` (spec §4.15).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub prefetch_distance: PrefetchDistance,
    pub memory_reclamation: ReclamationMode,
    /// Whether to maintain the optional `TaskCounter` statistics (spec §7
    /// class 2, "counted in statistics if enabled") — the seven per-worker
    /// dispatch/execution counters in `stats::Counter`. Has no effect
    /// unless the crate is also built with the `stats` feature; unrelated
    /// to the task-cycle sampler, which is gated solely by `sample_period`
    /// and the `cycle-sampling` feature.
    pub collect_task_counters: bool,
    /// Period, in executed tasks, of the cycle sampler. Must be a nonzero
    /// power of two.
    pub sample_period: u32,
    /// Whether `Scheduler::bound_aware_worker_id` remaps a resource-bound
    /// task's home worker to its SMT sibling (spec §4.14); when false the
    /// remap is skipped and the resource's own home worker is always used.
    pub resource_boundness_routing: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            prefetch_distance: PrefetchDistance::Automatic,
            memory_reclamation: ReclamationMode::UpdateEpochOnRead,
            collect_task_counters: false,
            sample_period: DEFAULT_SAMPLE_PERIOD,
            resource_boundness_routing: true,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self, count_workers: u16, available_cores: u16) -> Result<(), InitError> {
        if count_workers > MAX_WORKERS {
            return Err(InitError::TooManyWorkers(count_workers));
        }
        if count_workers > available_cores {
            return Err(InitError::NotEnoughCores { requested: count_workers, available: available_cores });
        }
        if self.sample_period == 0 || !self.sample_period.is_power_of_two() {
            return Err(InitError::InvalidSamplePeriod(self.sample_period));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_against_a_matching_core_set() {
        let config = RuntimeConfig::default();
        assert!(config.validate(4, 4).is_ok());
    }

    #[test]
    fn rejects_more_workers_than_cores() {
        let config = RuntimeConfig::default();
        assert_eq!(
            config.validate(8, 4),
            Err(InitError::NotEnoughCores { requested: 8, available: 4 })
        );
    }

    #[test]
    fn rejects_non_power_of_two_sample_period() {
        let mut config = RuntimeConfig::default();
        config.sample_period = 100;
        assert_eq!(config.validate(4, 4), Err(InitError::InvalidSamplePeriod(100)));
    }
}
