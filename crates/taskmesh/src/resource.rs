//! The resource handle (`ResourcePtr`): a 64-bit fat pointer fusing identity,
//! home worker, and synchronization mode into one machine word.
//!
//! Bitwise layout is ABI-stable by contract (spec §4.1) — code that embeds a
//! `ResourcePtr` elsewhere may rely on the field widths below never changing
//! within a major version.
//!
//! Layout (low to high bit):
//! `[ address: 45 | home_worker: 13 | sync_primitive: 3 | info: 3 ]`
//!
//! spec §3 describes the fields as "48 bits / ~14 bits / enum of 7 /
//! remainder"; 48+14+3 already exceeds 64 with no room for the remainder, so
//! this layout trims the address field to 45 bits (every pointer this crate
//! packs is a heap allocation well under 2^45 bytes in practice, and x86-64/
//! AArch64 user-space addresses fit in 47 bits anyway) and the home-worker
//! field to 13 bits (8192 workers, far beyond `MAX_WORKERS`). That leaves
//! exactly 3 bits for the info/flag tag the squad system uses. See
//! `DESIGN.md`.

use crate::topology::WorkerId;

const ADDRESS_BITS: u32 = 45;
const WORKER_BITS: u32 = 13;
const SYNC_BITS: u32 = 3;
const INFO_BITS: u32 = 64 - ADDRESS_BITS - WORKER_BITS - SYNC_BITS;

const ADDRESS_MASK: u64 = (1u64 << ADDRESS_BITS) - 1;
const WORKER_MASK: u64 = (1u64 << WORKER_BITS) - 1;
const SYNC_MASK: u64 = (1u64 << SYNC_BITS) - 1;
const INFO_MASK: u64 = (1u64 << INFO_BITS) - 1;

const WORKER_SHIFT: u32 = ADDRESS_BITS;
const SYNC_SHIFT: u32 = ADDRESS_BITS + WORKER_BITS;
const INFO_SHIFT: u32 = ADDRESS_BITS + WORKER_BITS + SYNC_BITS;

/// The closed set of execution wrappers the scheduler may apply to a task
/// annotated with a resource (spec §4.9). A task with no resource at all
/// (`annotation.destination` is not `Resource(..)`) skips this entirely —
/// that is why there are 7 variants here, not 8: "no synchronization" is the
/// absence of a `SyncPrimitive`, not a member of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncPrimitive {
    ExclusiveLatch = 0,
    ReaderWriterLatch = 1,
    ScheduleWriter = 2,
    Olfit = 3,
    RestrictedTransactionalMemory = 4,
    ScheduleAll = 5,
    Batched = 6,
}

impl SyncPrimitive {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => SyncPrimitive::ExclusiveLatch,
            1 => SyncPrimitive::ReaderWriterLatch,
            2 => SyncPrimitive::ScheduleWriter,
            3 => SyncPrimitive::Olfit,
            4 => SyncPrimitive::RestrictedTransactionalMemory,
            5 => SyncPrimitive::ScheduleAll,
            6 => SyncPrimitive::Batched,
            _ => panic!("invalid synchronization primitive tag"),
        }
    }
}

/// Packed 64-bit handle: address + home worker + synchronization primitive +
/// auxiliary info bits. Immutable for the resource's lifetime (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourcePtr(u64);

impl ResourcePtr {
    /// Builds a handle. `addr` must fit in `ADDRESS_BITS` bits (debug-checked
    /// only — the dispatcher never needs this to fail cheaply in release).
    pub fn make(addr: u64, worker_id: WorkerId, primitive: SyncPrimitive, info: u8) -> Self {
        debug_assert!(addr & !ADDRESS_MASK == 0, "resource address does not fit in {ADDRESS_BITS} bits");
        debug_assert!((worker_id.0 as u64) <= WORKER_MASK, "worker id does not fit in {WORKER_BITS} bits");
        debug_assert!((info as u64) <= INFO_MASK, "info tag does not fit in {INFO_BITS} bits");

        let bits = (addr & ADDRESS_MASK)
            | ((worker_id.0 as u64 & WORKER_MASK) << WORKER_SHIFT)
            | ((primitive as u64 & SYNC_MASK) << SYNC_SHIFT)
            | ((info as u64 & INFO_MASK) << INFO_SHIFT);
        Self(bits)
    }

    #[inline]
    pub const fn address(self) -> u64 {
        self.0 & ADDRESS_MASK
    }

    #[inline]
    pub const fn worker_id(self) -> WorkerId {
        WorkerId(((self.0 >> WORKER_SHIFT) & WORKER_MASK) as u16)
    }

    #[inline]
    pub const fn primitive(self) -> SyncPrimitive {
        SyncPrimitive::from_bits(((self.0 >> SYNC_SHIFT) & SYNC_MASK) as u8)
    }

    #[inline]
    pub const fn info(self) -> u8 {
        ((self.0 >> INFO_SHIFT) & INFO_MASK) as u8
    }

    /// Reinterprets the address bits as a raw pointer to `T`. Callers are
    /// responsible for the resource actually being a live `T` at that
    /// address — this is the one place the handle's "fat pointer" nature
    /// leaks into unsafe code, matching spec §4.1's codegen contract.
    ///
    /// # Safety
    /// The caller must ensure the address was produced by `make` from a
    /// valid, still-live `*mut T`.
    #[inline]
    pub unsafe fn as_ptr<T>(self) -> *mut T {
        self.address() as *mut T
    }
}

/// Predicted access frequency supplied when a resource is constructed
/// (spec §4.13). Drives both home-worker selection and the per-worker
/// occupancy predictor's four counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ExpectedAccessFrequency {
    Unused = 0,
    Normal = 1,
    High = 2,
    Excessive = 3,
}

impl ExpectedAccessFrequency {
    pub const ALL: [ExpectedAccessFrequency; 4] =
        [Self::Unused, Self::Normal, Self::High, Self::Excessive];
}

impl std::fmt::Debug for ResourcePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePtr")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("worker_id", &self.worker_id())
            .field("primitive", &self.primitive())
            .field("info", &self.info())
            .finish()
    }
}
