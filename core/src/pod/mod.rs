//! The pod: the scheduler singleton (§4.6).
//!
//! §9 Design Notes: "Model it as an explicit scheduler context passed into
//! every core operation... Do not reintroduce thread-local globals." This
//! crate follows the explicit-context branch of that choice: [`Pod`] is a
//! plain value with no internal locking and no hidden global state; every
//! operation takes `&mut self` (plus, where the spec's per-CPU ready
//! queues matter, an explicit `cpu: usize`) rather than reading
//! `current_cpu()` implicitly. Rust's own borrow checker is then the
//! enforcement of "the scheduler lock serializes all pod-state mutations"
//! (§5): a kernel embedding this crate wraps its one `Pod` instance in
//! [`nanopod_lib::PodLock`] and the `&mut Pod` handed to these methods
//! *is* the critical section, instead of the pod re-implementing locking
//! against itself. See `DESIGN.md` for the full resolution of this open
//! question.
//!
//! # Why `Pod` is split into `PodCore` + `timers`
//!
//! [`crate::timer::TimerWheel<X>`] is generic over a caller-supplied
//! context `X` so that a firing timer's callback can act on whatever owns
//! it (§4.3). The pod's own per-thread delay timers use this: their
//! callback needs the thread pool, ready queues and wait queues — i.e.
//! most of the pod. If `Pod` held `timers: TimerWheel<Pod>` directly,
//! calling `self.timers.do_timers(n, /* &mut Pod */)` would borrow `self`
//! twice (once as the receiver's owning field, once as the context
//! argument) — a self-referential borrow the compiler rejects outright.
//! Splitting the non-timer state into a sibling field, [`PodCore`], makes
//! the two borrows disjoint: `self.timers.do_timers(n, &mut self.core)`
//! borrows two different fields of `self`, which is ordinary, supported
//! disjoint-field borrowing. [`Pod`] derefs to [`PodCore`] so every other
//! method reads just as if the fields were flat.

mod hooks;
mod rr;
mod sync_ops;
mod synch_ops;

pub use hooks::{HookFn, HOOK_CAPACITY};

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use bitflags::bitflags;

use nanopod_abi::{
    DEFAULT_THREAD_STACK_SIZE, MAX_SYNCHS, MAX_THREADS, MAX_TIMERS, PodError, PodResult, Priority,
    PriorityDirection, SynchId, ThreadId, ThreadState,
};
use nanopod_lib::{klog_debug, klog_error, klog_warn};

use crate::queue::PrioQueue;
use crate::synch::SynchPool;
use crate::thread::{Location, Tcb, ThreadEntry, ThreadPool};
use crate::timer::TimerWheel;

bitflags! {
    /// Pod status bits (§3, expanded per `SPEC_FULL.md`'s "pod status bits
    /// as a real bitflag set"). `RPRIO` is `reverse_priority` from §3
    /// represented as a bit instead of a separate bool, matching the
    /// original single `pod->status` word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct PodFlags: u32 {
        /// A timer (periodic or aperiodic) is installed.
        const TIMED  = 1 << 0;
        /// Hardware timer mode is periodic (vs. aperiodic one-shot).
        const TMPER  = 1 << 1;
        /// Wallclock has been explicitly set via `set_time`.
        const TMSET  = 1 << 2;
        /// A reschedule is pending (set by anything that changes the
        /// ready queue head; cleared at the top of `schedule()`).
        const SCHED  = 1 << 3;
        /// The pod has hit a fatal condition and is halted.
        const FATAL  = 1 << 4;
        /// A hook chain is currently dispatching; `schedule()` is a no-op.
        const KCOUT  = 1 << 5;
        /// Legacy compatibility: a priority change does not reorder the
        /// wait queue the thread occupies (§4.5 "precise" PIP section).
        const DREORD = 1 << 6;
        /// Numerically smaller priority is more urgent (`reverse_priority`).
        const RPRIO  = 1 << 7;
    }
}

/// Everything the pod owns except the timer wheel — see the module docs
/// for why this is a separate type from [`Pod`].
pub struct PodCore {
    pub minpri: Priority,
    pub maxpri: Priority,
    pub direction: PriorityDirection,
    pub flags: PodFlags,
    pub threads: ThreadPool,
    pub synchs: SynchPool,
    pub ready: Vec<PrioQueue<ThreadId>>,
    pub suspendq: Vec<ThreadId>,
    pub runthread: Vec<ThreadId>,
    pub root: Vec<ThreadId>,
    /// Per-CPU current FPU register owner, `ThreadId::INVALID` if none
    /// (§4.6 step 5 "lazily save the old FPU holder's registers").
    pub fpu_holder: Vec<ThreadId>,
    pub ncpus: usize,
    pub start_hooks: hooks::HookChain,
    pub switch_hooks: hooks::HookChain,
    pub delete_hooks: hooks::HookChain,
    pub tick_ns: u64,
    pub ticks_per_sec: u64,
    pub wallclock_base: u64,
    pub rr_quantum_default: u32,
}

/// The pod singleton (§3, §4.6).
pub struct Pod {
    pub core: PodCore,
    pub timers: TimerWheel<PodCore>,
}

impl Deref for Pod {
    type Target = PodCore;
    fn deref(&self) -> &PodCore {
        &self.core
    }
}

impl DerefMut for Pod {
    fn deref_mut(&mut self) -> &mut PodCore {
        &mut self.core
    }
}

/// Logs and halts (§7 Propagation: "precondition violations that indicate
/// internal corruption... invoke a fatal handler that freezes timers,
/// dumps the thread table, and halts the pod"). Under `cargo test` this
/// panics instead of spinning forever, matching the teacher's
/// `sched_panic_cleanup` pattern of "log, then loop/halt rather than
/// unwind" translated to a host-testable equivalent.
#[cfg(not(test))]
pub fn fatal(reason: &str) -> ! {
    klog_error!("pod: FATAL: {}", reason);
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
pub fn fatal(reason: &str) -> ! {
    klog_error!("pod: FATAL: {}", reason);
    panic!("pod fatal: {reason}");
}

impl Pod {
    /// `init(pod, minpri, maxpri, flags)` (§4.6), extended with an
    /// explicit CPU count since this core addresses ready queues by CPU
    /// index rather than an implicit `current_cpu()` (module docs).
    pub fn init(minpri: Priority, maxpri: Priority, flags: PodFlags, ncpus: usize) -> PodResult<Self> {
        if minpri > maxpri || ncpus == 0 {
            return Err(PodError::Inval);
        }
        let direction = PriorityDirection::from_reverse_flag(flags.contains(PodFlags::RPRIO));
        let core = PodCore {
            minpri,
            maxpri,
            direction,
            flags,
            threads: ThreadPool::new(),
            synchs: SynchPool::with_capacity(MAX_SYNCHS),
            ready: (0..ncpus).map(|_| PrioQueue::new(direction)).collect(),
            suspendq: Vec::new(),
            runthread: alloc::vec![ThreadId::INVALID; ncpus],
            root: alloc::vec![ThreadId::INVALID; ncpus],
            fpu_holder: alloc::vec![ThreadId::INVALID; ncpus],
            ncpus,
            start_hooks: hooks::HookChain::new(),
            switch_hooks: hooks::HookChain::new(),
            delete_hooks: hooks::HookChain::new(),
            tick_ns: 0,
            ticks_per_sec: 0,
            wallclock_base: 0,
            rr_quantum_default: 0,
        };
        let mut pod = Pod {
            core,
            timers: TimerWheel::with_capacity(MAX_TIMERS),
        };

        for cpu in 0..ncpus {
            let root_prio = pod.root_prio_base();
            let tid = pod
                .spawn_tcb("ROOT", root_prio, DEFAULT_THREAD_STACK_SIZE, None, 0, 0)
                .ok_or(PodError::Nomem)?;
            if let Some(tcb) = pod.threads.get_mut(tid) {
                tcb.state = ThreadState::STARTED | ThreadState::ROOT;
            }
            pod.root[cpu] = tid;
            pod.runthread[cpu] = tid;
        }

        klog_debug!(
            "pod: init minpri={} maxpri={} ncpus={} direction={:?}",
            minpri,
            maxpri,
            ncpus,
            direction
        );
        Ok(pod)
    }

    /// `shutdown(xtype)` (§4.6): stops the timer, deletes every non-ROOT
    /// thread, clears the heap/timer-relay the caller owns.
    pub fn shutdown(&mut self) {
        self.flags.remove(PodFlags::TIMED | PodFlags::TMPER);
        let victims: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, t)| !t.state.contains(ThreadState::ROOT))
            .map(|(id, _)| id)
            .collect();
        for tid in victims {
            self.delete_thread(tid).ok();
        }
        klog_debug!("pod: shutdown complete");
    }

    /// Allocates a TCB into the pool, wiring up its delay timer. Internal
    /// helper shared by `init()` (ROOT threads) and `init_thread` (§4.4):
    /// the delay timer's cookie is the thread's own ID, which isn't known
    /// until after the TCB occupies a pool slot, so the TCB is inserted
    /// with a placeholder timer id first and patched afterward.
    pub(crate) fn spawn_tcb(
        &mut self,
        name: &str,
        prio: Priority,
        stacksize: usize,
        entry: Option<ThreadEntry>,
        cookie: u64,
        magic: u32,
    ) -> Option<ThreadId> {
        let tcb = Tcb::new(
            name,
            prio,
            stacksize,
            entry,
            cookie,
            magic,
            nanopod_abi::TimerId::INVALID,
        );
        let tid = self.threads.insert(tcb)?;
        let timer_id = self.timers.init(Self::delay_timer_fired, tid.0)?;
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.delay_timer = timer_id;
        }
        Some(tid)
    }

    /// Default handler bound to every thread's delay timer (§4.4 `init`:
    /// "initializes a delay timer bound to a default handler that sets
    /// TIMEO and resumes the thread").
    fn delay_timer_fired(
        _id: nanopod_abi::TimerId,
        core: &mut PodCore,
        wheel: &mut TimerWheel<PodCore>,
        cookie: u64,
    ) {
        let tid = ThreadId::new(cookie as u32);
        if core.threads.get(tid).is_none() {
            return;
        }
        core.end_wait(tid, ThreadState::TIMEO, wheel);
    }

    // -- Standard priorities (§3, SPEC_FULL "standard priority derivation") --

    pub fn root_prio_base(&self) -> Priority {
        self.minpri - 1
    }

    pub fn isvc_prio_idle(&self) -> Priority {
        self.minpri - 2
    }

    /// Interrupt-service-thread priority band above the idle one. The
    /// original's `XNPOD_ISVC_PRIO_BASE(iprio)` is not otherwise specified
    /// in the distilled spec; this anchors it to `isvc_prio_idle` the same
    /// way `root_prio_base`/`isvc_prio_idle` anchor to `minpri` (documented
    /// in `DESIGN.md`).
    pub fn isvc_prio_base(&self, iprio: i32) -> Priority {
        self.isvc_prio_idle() + iprio
    }

    pub fn more_urgent(&self, a: Priority, b: Priority) -> bool {
        self.direction.more_urgent(a, b)
    }

    // -- Context / hook-reentrancy guard --

    /// §4.6: "No-op inside an interrupt or hook context"; `KCOUT` mirrors
    /// the original's `nkpod->status & XNKCOUT` check.
    pub fn in_hook_context(&self) -> bool {
        self.flags.contains(PodFlags::KCOUT)
    }

    /// `check_context` (§6): true if the caller may safely invoke
    /// suspension-point APIs (not inside a hook/interrupt dispatch).
    pub fn check_context(&self) -> bool {
        !self.in_hook_context()
    }

    pub fn register_debugger(&mut self) {
        // No debugger skin in this core (§"SUPPLEMENTED FROM ORIGINAL
        // SOURCE"); kept as an empty registration point only.
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn new_pod(minpri: Priority, maxpri: Priority) -> Pod {
        Pod::init(minpri, maxpri, PodFlags::empty(), 1).unwrap()
    }

    pub fn start_thread(pod: &mut Pod, name: &str, prio: Priority) -> ThreadId {
        let tid = pod
            .init_thread(name, prio, 0, None, 0, ThreadState::empty(), 0xAAAA)
            .unwrap();
        pod.start_thread(tid).unwrap();
        tid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_one_root_thread_per_cpu() {
        let pod = Pod::init(1, 255, PodFlags::empty(), 2).unwrap();
        assert_eq!(pod.root.len(), 2);
        for &tid in &pod.root {
            assert!(tid.is_valid());
            let tcb = pod.threads.get(tid).unwrap();
            assert!(tcb.state.contains(ThreadState::ROOT));
            assert!(tcb.state.contains(ThreadState::STARTED));
        }
    }

    #[test]
    fn init_rejects_inverted_priority_range() {
        assert_eq!(Pod::init(100, 1, PodFlags::empty(), 1).unwrap_err(), PodError::Inval);
    }

    #[test]
    fn standard_priorities_are_derived_below_minpri() {
        let pod = Pod::init(10, 255, PodFlags::empty(), 1).unwrap();
        assert_eq!(pod.root_prio_base(), 9);
        assert_eq!(pod.isvc_prio_idle(), 8);
    }

    #[test]
    fn reverse_priority_flag_selects_down_direction() {
        let pod = Pod::init(1, 99, PodFlags::RPRIO, 1).unwrap();
        assert_eq!(pod.direction, PriorityDirection::Down);
        assert!(pod.more_urgent(1, 50));
    }
}
