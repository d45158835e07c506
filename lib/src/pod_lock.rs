//! The pod's re-entrant global scheduler lock (§5: "the scheduler lock is
//! re-entrant from a single CPU and serializes all pod-state mutations...
//! it is released when the nesting count returns to zero, at which point a
//! deferred reschedule fires if SCHED is set").
//!
//! [`IrqMutex`](crate::spinlock::IrqMutex) already gives IRQ-disable +
//! preemption-disable + ticket-lock fairness, but it is not re-entrant: a
//! second `lock()` from the same CPU while the first guard is still held
//! would spin forever against itself. `PodLock` pairs the same IRQ/ticket
//! discipline with an owner-CPU slot and a nesting counter, generalizing
//! the teacher's `PreemptGuard` (nesting count + `RESCHEDULE_CALLBACK` fired
//! on last drop in `preempt.rs`) to the pod's single-global-lock model:
//! many CPUs may contend for it, but whichever CPU holds it may call back
//! into pod operations that themselves take the lock without deadlocking.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use crate::irq;
use crate::preempt::PreemptGuard;

const UNLOCKED: i64 = -1;

/// A deferred-reschedule callback, fired once on the final (nesting-zero)
/// unlock if [`PodLock::mark_reschedule_pending`] was called while held.
/// Mirrors `preempt::RESCHEDULE_CALLBACK`, but scoped to one `PodLock`
/// instance rather than global per-CPU preemption state, since a kernel may
/// host more than one pod (one per real-time domain) in principle.
pub type DeferredRescheduleFn = fn();

pub struct PodLock<T> {
    owner_cpu: AtomicI64,
    nesting: AtomicU32,
    reschedule_pending: AtomicU8,
    callback: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for PodLock<T> {}
unsafe impl<T: Send> Sync for PodLock<T> {}

pub struct PodLockGuard<'a, T> {
    lock: &'a PodLock<T>,
    saved_flags: u64,
    outermost: bool,
    _preempt: PreemptGuard,
}

impl<T> PodLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            owner_cpu: AtomicI64::new(UNLOCKED),
            nesting: AtomicU32::new(0),
            reschedule_pending: AtomicU8::new(0),
            callback: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Registers the function invoked when the lock's nesting count returns
    /// to zero with a reschedule pending. Stored as an index into a tiny
    /// static table rather than an `AtomicPtr` so `PodLock` stays
    /// `Send + Sync` without pointer-provenance games across `no_std`
    /// targets where function pointers and `*mut ()` may differ in size.
    pub fn register_deferred_reschedule(&self, callback: DeferredRescheduleFn) {
        CALLBACK_SLOT.store(callback as usize as u32, Ordering::Release);
        self.callback.store(1, Ordering::Release);
    }

    #[inline]
    fn current_cpu_tag() -> i64 {
        irq::current_cpu() as i64
    }

    pub fn lock(&self) -> PodLockGuard<'_, T> {
        let preempt = PreemptGuard::new();
        let saved_flags = irq::save_flags_cli();
        let me = Self::current_cpu_tag();

        if self.owner_cpu.load(Ordering::Acquire) == me {
            self.nesting.fetch_add(1, Ordering::Relaxed);
            return PodLockGuard {
                lock: self,
                saved_flags,
                outermost: false,
                _preempt: preempt,
            };
        }

        loop {
            if self
                .owner_cpu
                .compare_exchange(UNLOCKED, me, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            spin_loop();
        }
        self.nesting.store(1, Ordering::Relaxed);
        PodLockGuard {
            lock: self,
            saved_flags,
            outermost: true,
            _preempt: preempt,
        }
    }

    /// Nesting depth on the CPU that currently holds the lock; `0` if
    /// unheld. Used by the pod to implement "the current thread is locked
    /// (LOCK set)" checks without a second side-channel flag.
    pub fn nesting_depth(&self) -> u32 {
        self.nesting.load(Ordering::Relaxed)
    }

    pub fn is_locked(&self) -> bool {
        self.owner_cpu.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Marks that a reschedule should run as soon as the lock's nesting
    /// returns to zero (§4.6: "a deferred reschedule fires if SCHED is
    /// set"). Callable only while held.
    pub fn mark_reschedule_pending(&self) {
        self.reschedule_pending.store(1, Ordering::Release);
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn data_mut(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

/// Index-in-a-table indirection so `PodLock` can store "is a callback
/// registered" as a plain flag while the function pointer itself lives in
/// ordinary static storage, sidestepping `AtomicPtr<fn()>` size guarantees.
static CALLBACK_SLOT: AtomicU32 = AtomicU32::new(0);

impl<'a, T> Deref for PodLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for PodLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.lock.data_mut() }
    }
}

impl<'a, T> Drop for PodLockGuard<'a, T> {
    fn drop(&mut self) {
        if !self.outermost {
            self.lock.nesting.fetch_sub(1, Ordering::Relaxed);
            irq::restore_flags(self.saved_flags);
            return;
        }

        let pending = self.lock.reschedule_pending.swap(0, Ordering::AcqRel) != 0;
        self.lock.nesting.store(0, Ordering::Relaxed);
        self.lock.owner_cpu.store(UNLOCKED, Ordering::Release);

        if pending && self.lock.callback.load(Ordering::Acquire) != 0 {
            let raw = CALLBACK_SLOT.load(Ordering::Acquire) as usize;
            if raw != 0 {
                let f: DeferredRescheduleFn = unsafe { core::mem::transmute::<usize, fn()>(raw) };
                f();
            }
        }

        irq::restore_flags(self.saved_flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32 as StdAtomicU32;

    #[test]
    fn reentrant_lock_does_not_deadlock_same_cpu() {
        let lock = PodLock::new(0u32);
        let g1 = lock.lock();
        assert_eq!(lock.nesting_depth(), 1);
        {
            let mut g2 = lock.lock();
            assert_eq!(lock.nesting_depth(), 2);
            *g2 += 1;
        }
        assert_eq!(lock.nesting_depth(), 1);
        drop(g1);
        assert_eq!(lock.nesting_depth(), 0);
        assert!(!lock.is_locked());
    }

    static FIRED: StdAtomicU32 = StdAtomicU32::new(0);

    fn bump() {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn deferred_reschedule_fires_only_on_final_unlock() {
        FIRED.store(0, Ordering::SeqCst);
        let lock = PodLock::new(());
        lock.register_deferred_reschedule(bump);
        let g1 = lock.lock();
        let g2 = lock.lock();
        lock.mark_reschedule_pending();
        drop(g2);
        assert_eq!(FIRED.load(Ordering::SeqCst), 0, "nesting still 1, must not fire yet");
        drop(g1);
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }
}
