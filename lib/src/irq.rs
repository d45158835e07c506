//! Interrupt-mask and CPU-topology hooks.
//!
//! `nanopod-lib` is architecture-neutral: it knows how to build ticket locks,
//! nesting-counted preemption guards and per-CPU slot arrays, but it has no
//! opinion on how a given machine disables interrupts or numbers its CPUs.
//! Those primitives are supplied once, at boot, by whatever embeds this
//! crate — the same pattern the registration points in `preempt.rs` use for
//! the deferred-reschedule callback.

use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

pub type SaveFlagsCliFn = fn() -> u64;
pub type RestoreFlagsFn = fn(u64);
pub type CurrentCpuFn = fn() -> usize;
pub type CpuCountFn = fn() -> usize;

static SAVE_FLAGS_CLI: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static RESTORE_FLAGS: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static CURRENT_CPU: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static CPU_COUNT: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Single-CPU fallback when nothing has been registered yet (early boot, or
/// host-side tests that never call [`register_cpu_topology_hooks`]).
static FALLBACK_CPU_INDEX: AtomicUsize = AtomicUsize::new(0);

/// Register the architecture's IRQ-mask primitives.
///
/// `save_cli` must disable interrupts on the calling CPU and return an
/// opaque flags word that `restore` later passes back unchanged.
pub fn register_irq_hooks(save_cli: SaveFlagsCliFn, restore: RestoreFlagsFn) {
    SAVE_FLAGS_CLI.store(save_cli as *mut (), Ordering::Release);
    RESTORE_FLAGS.store(restore as *mut (), Ordering::Release);
}

/// Register CPU-topology queries (current CPU index, online CPU count).
pub fn register_cpu_topology_hooks(current_cpu: CurrentCpuFn, cpu_count: CpuCountFn) {
    CURRENT_CPU.store(current_cpu as *mut (), Ordering::Release);
    CPU_COUNT.store(cpu_count as *mut (), Ordering::Release);
}

#[inline]
pub fn save_flags_cli() -> u64 {
    let ptr = SAVE_FLAGS_CLI.load(Ordering::Acquire);
    if ptr.is_null() {
        return 0;
    }
    let f: SaveFlagsCliFn = unsafe { core::mem::transmute(ptr) };
    f()
}

#[inline]
pub fn restore_flags(flags: u64) {
    let ptr = RESTORE_FLAGS.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    let f: RestoreFlagsFn = unsafe { core::mem::transmute(ptr) };
    f(flags)
}

#[inline]
pub fn current_cpu() -> usize {
    let ptr = CURRENT_CPU.load(Ordering::Acquire);
    if ptr.is_null() {
        return FALLBACK_CPU_INDEX.load(Ordering::Relaxed);
    }
    let f: CurrentCpuFn = unsafe { core::mem::transmute(ptr) };
    f()
}

#[inline]
pub fn cpu_count() -> usize {
    let ptr = CPU_COUNT.load(Ordering::Acquire);
    if ptr.is_null() {
        return 1;
    }
    let f: CpuCountFn = unsafe { core::mem::transmute(ptr) };
    f().max(1)
}

#[cfg(test)]
pub fn set_fallback_cpu_index_for_test(idx: usize) {
    FALLBACK_CPU_INDEX.store(idx, Ordering::Relaxed);
}
