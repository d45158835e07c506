//! Handle types for the core's fixed-capacity pools.
//!
//! §9 Design Notes: "Cyclic ownership graphs... must be represented as
//! indices or weak back-pointers; a natural translation is: TCBs in a
//! fixed pool indexed by u32, synchronization objects holding a
//! `Option<ThreadId>` owner field". [`ThreadId`]/[`SynchId`]/[`TimerId`]
//! are that translation — plain `u32` newtypes, `Copy`, comparable, with
//! no lifetime tied to the pool that hands them out.

use core::fmt;

macro_rules! pool_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", stringify!($name), self.0)
                } else {
                    write!(f, "{}(invalid)", stringify!($name))
                }
            }
        }
    };
}

pool_id!(ThreadId, "Index into a pod's fixed thread pool.");
pool_id!(SynchId, "Index into a pod's fixed synchronization-object pool.");
pool_id!(TimerId, "Index into a pod's fixed standalone-timer pool.");

/// Bitmask of schedulable CPUs a thread may run on (§3 "per-CPU affinity
/// mask"). 64 bits is more CPUs than any SMP configuration this core
/// targets (§5: "a small bounded number of CPUs"), so a plain `u64` avoids
/// a dependency on `nanopod-lib`'s `MAX_CPUS` from this leaf crate.
pub type CpuMask = u64;

#[inline]
pub const fn cpu_mask_all() -> CpuMask {
    CpuMask::MAX
}

#[inline]
pub const fn cpu_mask_one(cpu: usize) -> CpuMask {
    if cpu >= 64 { 0 } else { 1 << cpu }
}
