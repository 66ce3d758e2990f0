//! Task descriptor, annotation, and the intrusive task handle.
//!
//! The source models a task as a fixed-size struct with a virtual `execute`
//! entry point (`worker.cpp`'s dispatch calls `task->execute(worker_id)`
//! through a vtable). Rust's trait-object analogue is the natural match
//! here — the task set is open (clients define their own task types) and
//! the hot path calls `execute` exactly once per task, so dynamic dispatch
//! cost is negligible (spec §9 "Dynamic dispatch of tasks").

pub mod slab;

use std::ptr::NonNull;

use crate::prefetch::PrefetchDescriptor;
use crate::resource::ResourcePtr;
use crate::topology::{NumaNodeId, WorkerId};

/// Whether a task reads or writes the resource it is annotated with.
/// A task is a writer by default, matching the source's
/// `access_intention::write` default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessIntent {
    Read,
    Write,
}

impl Default for AccessIntent {
    fn default() -> Self {
        AccessIntent::Write
    }
}

/// Scheduling priority. Low-priority tasks run only when a worker's normal
/// queues are empty (spec §4.4 `withdraw`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Advisory hint for SMT-sibling routing (spec §4.14). Only honored when
/// the task's target worker has a paired SMT sibling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceBoundness {
    Memory,
    Compute,
    Mixed,
}

impl Default for ResourceBoundness {
    fn default() -> Self {
        ResourceBoundness::Mixed
    }
}

/// Where a task should be dispatched (spec §3 "Annotation" / §4.14).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Worker(WorkerId),
    NumaNode(NumaNodeId),
    Resource(ResourcePtr),
    /// Run on whatever worker is currently dispatching (requires a worker
    /// context; see `Annotation`'s debug-assertion policy).
    Local,
    /// No placement preference; routed to the global shared queue if one
    /// is configured.
    Anywhere,
}

/// Per-task metadata controlling scheduling and synchronization (spec §3).
/// Default destination is `Local`, matching the source's
/// `_destination{execution_destination::local}` default member initializer.
#[derive(Clone, Copy, Debug)]
pub struct Annotation {
    access_intent: AccessIntent,
    priority: Priority,
    resource_boundness: ResourceBoundness,
    cycles: u16,
    destination: Destination,
    prefetch_hint: Option<(ResourcePtr, PrefetchDescriptor)>,
    trace_id: u64,
}

impl Default for Annotation {
    fn default() -> Self {
        Self {
            access_intent: AccessIntent::default(),
            priority: Priority::default(),
            resource_boundness: ResourceBoundness::default(),
            cycles: 500,
            destination: Destination::Local,
            prefetch_hint: None,
            trace_id: 0,
        }
    }
}

impl Annotation {
    pub fn new(destination: Destination) -> Self {
        Self { destination, ..Self::default() }
    }

    pub fn with_resource(access_intent: AccessIntent, resource: ResourcePtr) -> Self {
        Self { access_intent, destination: Destination::Resource(resource), ..Self::default() }
    }

    pub fn is_readonly(&self) -> bool {
        self.access_intent == AccessIntent::Read
    }

    pub fn access_intent(&self) -> AccessIntent {
        self.access_intent
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn resource_boundness(&self) -> ResourceBoundness {
        self.resource_boundness
    }

    pub fn cycles(&self) -> u16 {
        self.cycles
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn prefetch_hint(&self) -> Option<(ResourcePtr, PrefetchDescriptor)> {
        self.prefetch_hint
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn set_access_intent(&mut self, access_intent: AccessIntent) {
        self.access_intent = access_intent;
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn set_resource_boundness(&mut self, boundness: ResourceBoundness) {
        self.resource_boundness = boundness;
    }

    pub fn set_cycles(&mut self, cycles: u16) {
        self.cycles = cycles;
    }

    pub fn set_destination(&mut self, destination: Destination) {
        self.destination = destination;
    }

    pub fn set_prefetch_hint(&mut self, resource: ResourcePtr, descriptor: PrefetchDescriptor) {
        self.prefetch_hint = Some((resource, descriptor));
    }

    pub fn set_trace_id(&mut self, trace_id: u64) {
        self.trace_id = trace_id;
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.access_intent == other.access_intent
            && self.priority == other.priority
            && self.destination == other.destination
            && self.prefetch_hint == other.prefetch_hint
    }
}

/// What a task hands back to the worker after `execute` (spec §4.2).
pub enum Successor {
    Task(TaskRef),
    Resource(ResourcePtr),
}

/// Outcome of running a task once.
///
/// `remove=true, successor=None` frees the task and ends the chain.
/// `successor=Some(x), remove=true` is the common hot path: hand the worker
/// a follow-up and free this task. A "stop the runtime" result is modeled
/// by returning a successor task whose `execute` calls
/// [`crate::runtime::Runtime::stop`] — there is no separate variant for it,
/// matching spec §4.2's "a special 'stop runtime' result is constructed by
/// submitting a `StopTask` as successor".
pub struct TaskResult {
    pub successor: Option<Successor>,
    pub remove: bool,
}

impl TaskResult {
    pub fn done() -> Self {
        Self { successor: None, remove: true }
    }

    pub fn reschedule_self() -> Self {
        Self { successor: None, remove: false }
    }

    pub fn and_then(successor: TaskRef) -> Self {
        Self { successor: Some(Successor::Task(successor)), remove: true }
    }

    pub fn and_then_resource(resource: ResourcePtr) -> Self {
        Self { successor: Some(Successor::Resource(resource)), remove: true }
    }
}

/// The execution contract every client task type implements. Analogous to
/// the source's `mx::tasking::task_interface` virtual base.
pub trait Task: Send {
    fn execute(&mut self, worker_id: WorkerId) -> TaskResult;

    fn annotation(&self) -> &Annotation;
    fn annotation_mut(&mut self) -> &mut Annotation;

    /// Identifier used by the cycle sampler and, if enabled, task tracing.
    /// Defaults to 0, matching the source's optional override.
    fn trace_id(&self) -> u64 {
        0
    }
}

/// Intrusive node wrapping a boxed task with the `next` link used by the
/// SPSC local queue and in-buffer staging (spec §3 "Task descriptor").
/// `next` is read/written only by whichever queue currently owns the node.
pub(crate) struct TaskNode {
    pub next: Option<TaskRef>,
    pub task: Box<dyn Task>,
}

/// A non-owning handle to a heap-allocated [`TaskNode`]. Queues hold
/// `TaskRef`s; the slab (see [`slab`]) owns the backing allocation.
///
/// Copy, not Clone-only: a `TaskRef` is a bare handle, equivalent to a raw
/// pointer. Whoever currently has queue ownership of the referenced node is
/// responsible for not aliasing mutable access across threads — which in
/// practice means exactly one worker or queue touches a given `TaskRef` at
/// a time, enforced by the scheduler's hand-off protocol rather than by the
/// type system.
#[derive(Clone, Copy)]
pub struct TaskRef(NonNull<TaskNode>);

unsafe impl Send for TaskRef {}

impl TaskRef {
    pub(crate) fn from_raw(ptr: NonNull<TaskNode>) -> Self {
        Self(ptr)
    }

    pub(crate) fn as_ptr(self) -> NonNull<TaskNode> {
        self.0
    }

    /// # Safety
    /// The caller must ensure no other reference to this node is live for
    /// the duration of the borrow.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn node_mut(&self) -> &mut TaskNode {
        &mut *self.0.as_ptr()
    }

    pub fn annotation(&self) -> &Annotation {
        unsafe { self.node_mut().task.annotation() }
    }

    pub fn annotation_mut(&self) -> &mut Annotation {
        unsafe { self.node_mut().task.annotation_mut() }
    }

    pub fn trace_id(&self) -> u64 {
        unsafe { self.node_mut().task.trace_id() }
    }

    pub fn execute(&self, worker_id: WorkerId) -> TaskResult {
        unsafe { self.node_mut().task.execute(worker_id) }
    }

    pub fn take_next(&self) -> Option<TaskRef> {
        unsafe { self.node_mut().next.take() }
    }

    pub fn set_next(&self, next: Option<TaskRef>) {
        unsafe { self.node_mut().next = next };
    }

    /// Raw data pointer to the boxed task's own memory (the vtable half of
    /// the fat pointer dropped), for prefetching and the optimistic
    /// backup/restore stack.
    pub(crate) fn data_ptr(&self) -> *const u8 {
        let node = unsafe { self.node_mut() };
        let trait_ptr: *const dyn Task = &*node.task;
        (trait_ptr as *const ()) as *const u8
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for TaskRef {}
