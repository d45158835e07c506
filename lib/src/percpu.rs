//! Fixed-size per-CPU slot arrays.
//!
//! Generalizes the teacher's `CpuLocal`/`CPU_SCHEDULERS: [PerCpuScheduler; MAX_CPUS]`
//! idiom (`core::scheduler::per_cpu`) into a small reusable container: a
//! `'static` array sized to `MAX_CPUS`, indexed by [`crate::irq::current_cpu`].

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Upper bound on schedulable CPUs. The spec calls for "a small bounded
/// number of CPUs"; this mirrors the teacher's fixed `MAX_CPUS` constant
/// rather than a runtime-sized `Vec`, so per-CPU arrays stay `const`-init.
pub const MAX_CPUS: usize = 32;

/// A `T` slot per CPU, cache-line padded so adjacent CPUs' writes don't
/// false-share. `T` must be `Sync`; interior mutability is the caller's
/// responsibility (typically an atomic or an `IrqMutex<..>` field of `T`).
#[repr(align(64))]
pub struct CacheAligned<T>(pub T);

impl<T> core::ops::Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Per-CPU preemption bookkeeping: nesting count and a deferred-reschedule
/// flag, one slot per possible CPU. Replaces the teacher's GS-segment-based
/// `pcr::current_pcr()` (architecture-specific) with a plain indexed array,
/// since this crate no longer assumes x86_64.
pub struct PreemptCell {
    pub count: AtomicU32,
    pub reschedule_pending: AtomicU8,
}

impl PreemptCell {
    const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            reschedule_pending: AtomicU8::new(0),
        }
    }
}

static PREEMPT_CELLS: [CacheAligned<PreemptCell>; MAX_CPUS] =
    [const { CacheAligned(PreemptCell::new()) }; MAX_CPUS];

/// Returns the preemption cell for the calling CPU.
///
/// # Panics
/// Panics (in tests) if `current_cpu()` reports an index `>= MAX_CPUS`; in
/// `no_std` builds this indicates a topology-hook bug and is a programmer
/// error, not a recoverable condition.
pub fn current_preempt_cell() -> &'static PreemptCell {
    let idx = crate::irq::current_cpu();
    &PREEMPT_CELLS[idx % MAX_CPUS].0
}
