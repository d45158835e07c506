//! Ambient concurrency and diagnostics primitives for the nanopod core.
//!
//! `nanopod-lib` is architecture-neutral: it knows how to build ticket
//! locks, nesting-counted preemption guards, per-CPU slot arrays and a
//! leveled kernel-log frontend, but it has no opinion on how a given
//! machine disables interrupts, numbers its CPUs, or drains a log line to
//! a console. Those primitives are supplied once, at boot, by whatever
//! embeds this crate, via the registration points in [`irq`] and [`klog`].

#![cfg_attr(not(test), no_std)]

pub mod irq;
pub mod klog;
pub mod once_lock;
pub mod percpu;
pub mod pod_lock;
pub mod preempt;
pub mod spinlock;

pub use irq::{current_cpu, cpu_count, register_cpu_topology_hooks, register_irq_hooks};
pub use klog::{
    KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level,
};
pub use once_lock::OnceLock;
pub use percpu::{CacheAligned, MAX_CPUS};
pub use pod_lock::{DeferredRescheduleFn, PodLock, PodLockGuard};
pub use preempt::{IrqPreemptGuard, PreemptGuard, is_preemption_disabled, preempt_count};
pub use spinlock::{IrqMutex, IrqMutexGuard, IrqRwLock, IrqRwLockReadGuard, IrqRwLockWriteGuard};
