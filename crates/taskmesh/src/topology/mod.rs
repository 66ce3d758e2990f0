//! CPU/NUMA topology oracle.
//!
//! Maps worker ids to logical cores and NUMA nodes, and answers SMT-sibling
//! queries for the scheduler's resource-boundness routing (spec §4.14).

use std::fmt;

/// Dense worker identifier, `0..count_workers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u16);

impl WorkerId {
    pub const INVALID: WorkerId = WorkerId(u16::MAX);

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u16::MAX
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// NUMA node identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumaNodeId(pub u8);

/// One core entry in a `CoreSet`: the logical core id the OS schedules onto,
/// the NUMA node it belongs to, and whether it is the second (SMT) thread of
/// a physical core.
#[derive(Clone, Copy, Debug)]
pub struct CoreDescriptor {
    pub core_id: u16,
    pub numa_node: NumaNodeId,
    pub is_smt_thread: bool,
}

/// Ordered list of cores the runtime is allowed to pin workers to. Worker ids
/// are assigned densely in the order cores appear here, so `core_set[i]` is
/// the physical binding for `WorkerId(i)`.
#[derive(Clone, Debug)]
pub struct CoreSet {
    cores: Vec<CoreDescriptor>,
}

impl CoreSet {
    pub fn new(cores: Vec<CoreDescriptor>) -> Self {
        assert!(!cores.is_empty(), "a core set must contain at least one core");
        Self { cores }
    }

    /// All cores of a single NUMA node, no SMT siblings flagged.
    pub fn single_numa_node(count_cores: u16) -> Self {
        let cores = (0..count_cores)
            .map(|core_id| CoreDescriptor {
                core_id,
                numa_node: NumaNodeId(0),
                is_smt_thread: false,
            })
            .collect();
        Self { cores }
    }

    pub fn count_cores(&self) -> u16 {
        self.cores.len() as u16
    }

    pub fn get(&self, worker_id: WorkerId) -> CoreDescriptor {
        self.cores[worker_id.0 as usize]
    }
}

/// Precomputed worker ⇄ core ⇄ NUMA map plus SMT sibling pairs, built once at
/// [`crate::runtime::Runtime::init`].
pub struct Topology {
    core_set: CoreSet,
    numa_node_of: Vec<NumaNodeId>,
    /// For a worker on a physical core with an SMT sibling: `(memory_bound,
    /// compute_bound)` worker ids for that physical core. `None` when the
    /// worker has no SMT sibling, in which case boundness routing is a no-op
    /// (spec §4.14: "Without SMT pairing, target = resource.home").
    physical_core_siblings: Vec<Option<(WorkerId, WorkerId)>>,
    count_numa_nodes: u8,
}

impl Topology {
    pub fn new(core_set: CoreSet) -> Self {
        let count_workers = core_set.count_cores() as usize;
        let mut numa_node_of = Vec::with_capacity(count_workers);
        let mut max_numa = 0u8;
        for i in 0..count_workers {
            let node = core_set.get(WorkerId(i as u16)).numa_node;
            max_numa = max_numa.max(node.0);
            numa_node_of.push(node);
        }

        // Pair up workers that share a physical core id: two workers with
        // the same core_id but different is_smt_thread flags are siblings.
        let mut physical_core_siblings = vec![None; count_workers];
        for i in 0..count_workers {
            if physical_core_siblings[i].is_some() {
                continue;
            }
            let a = core_set.get(WorkerId(i as u16));
            for j in (i + 1)..count_workers {
                let b = core_set.get(WorkerId(j as u16));
                if a.core_id == b.core_id {
                    let (memory_bound, compute_bound) = if a.is_smt_thread {
                        (WorkerId(i as u16), WorkerId(j as u16))
                    } else {
                        (WorkerId(j as u16), WorkerId(i as u16))
                    };
                    physical_core_siblings[i] = Some((memory_bound, compute_bound));
                    physical_core_siblings[j] = Some((memory_bound, compute_bound));
                    break;
                }
            }
        }

        Self {
            core_set,
            numa_node_of,
            physical_core_siblings,
            count_numa_nodes: max_numa + 1,
        }
    }

    pub fn count_workers(&self) -> u16 {
        self.core_set.count_cores()
    }

    pub fn count_numa_nodes(&self) -> u8 {
        self.count_numa_nodes
    }

    pub fn numa_node_of(&self, worker_id: WorkerId) -> NumaNodeId {
        self.numa_node_of[worker_id.0 as usize]
    }

    pub fn core_id_of(&self, worker_id: WorkerId) -> u16 {
        self.core_set.get(worker_id).core_id
    }

    /// `(memory_bound_worker, compute_bound_worker)` for the physical core
    /// `worker_id` sits on, or `None` if it has no SMT sibling.
    pub fn physical_core_siblings(&self, worker_id: WorkerId) -> Option<(WorkerId, WorkerId)> {
        self.physical_core_siblings[worker_id.0 as usize]
    }
}
