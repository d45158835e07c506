//! Thread control block (§3, §4.4).
//!
//! A [`Tcb`] is owned by a fixed-capacity [`ThreadPool`] indexed by
//! [`ThreadId`] (§9 Design Notes: "TCBs in a fixed pool indexed by u32").
//! Unlike the teacher's `*mut Task` scheduler core, nothing here holds a raw
//! pointer to another thread: the wait channel, claim list, and affinity
//! mask are all `ThreadId`/`SynchId` values, so the whole pod state can move
//! or be inspected without pinning.

use alloc::vec::Vec;

use nanopod_abi::{
    DEFAULT_THREAD_STACK_SIZE, MAX_THREADS, MAX_TRAP_VECTORS, Priority, SynchId,
    THREAD_NAME_MAX_LEN, ThreadId, ThreadState, cpu_mask_all,
};

pub type CpuMask = nanopod_abi::CpuMask;
pub type ThreadEntry = fn(cookie: u64);
pub type AsrHandler = fn(pending: u32);
/// A per-thread, per-trap-vector handler (§4.8). Returns `true` if it
/// handled the fault, `false` to let the default policy run.
pub type TrapHandlerFn = fn(vector: u32, fault_pc: u64) -> bool;

/// A fixed-size thread name, matching the teacher's `TASK_NAME_MAX_LEN`
/// fixed-buffer convention rather than an owned `String`.
#[derive(Clone, Copy)]
pub struct ThreadName {
    bytes: [u8; THREAD_NAME_MAX_LEN],
    len: u8,
}

impl ThreadName {
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; THREAD_NAME_MAX_LEN];
        let n = name.len().min(THREAD_NAME_MAX_LEN);
        bytes[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self { bytes, len: n as u8 }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl core::fmt::Debug for ThreadName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Where a thread's `rlink`/wait-queue holder currently lives, kept as an
/// explicit tag so the invariant "a TCB is in at most one of {ready queue,
/// suspend queue, wait queue}" (§3 Invariants, §8 property 1) is a field
/// read, not an emergent property of scattered state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// Not linked into any queue (e.g. the currently running thread, or a
    /// thread only present via its delay timer).
    None,
    Ready,
    Suspended,
    WaitQueue(SynchId),
}

/// Thread control block (§3).
pub struct Tcb {
    pub name: ThreadName,
    pub bprio: Priority,
    pub iprio: Priority,
    pub cprio: Priority,
    pub state: ThreadState,
    pub stack: Vec<u8>,
    pub entry: Option<ThreadEntry>,
    pub cookie: u64,
    pub pending_signals: u32,
    pub asr: Option<AsrHandler>,
    pub asr_imask: u32,
    /// Asynchronous Signal Disable Interrupts: suppress ASR dispatch.
    pub asdi: bool,
    pub wait_channel: Option<SynchId>,
    pub delay_timer: nanopod_abi::TimerId,
    /// Objects this thread currently owns that are boosting its priority,
    /// kept sorted so the head is always the most urgent claim.
    claim_list: Vec<(SynchId, Priority)>,
    pub affinity: CpuMask,
    pub rr_quantum: u32,
    pub rr_credit: u32,
    pub magic: u32,
    pub location: Location,
    /// CPU whose ready queue this thread belongs to while READY (or last
    /// belonged to). Chosen once at `start_thread` from `affinity`; this
    /// core does not model load-balancing migration between CPUs.
    pub home_cpu: usize,
    /// Period set by `set_thread_periodic`, in wheel ticks; zero means no
    /// period has been configured.
    pub period_ticks: u64,
    /// Accumulated ticks spent as `runthread` on its CPU, for `get_cpu_time`.
    pub runtime_ticks: u64,
    /// Wheel tick at which this thread was last switched in, used to accrue
    /// `runtime_ticks` when it is switched back out.
    pub last_scheduled_jiffy: u64,
    /// Per-trap-vector handlers (§4.8): `trap_fault` consults this table
    /// before falling back to the pod's default fault policy.
    pub trap_handlers: [Option<TrapHandlerFn>; MAX_TRAP_VECTORS],
}

impl Tcb {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        prio: Priority,
        stacksize: usize,
        entry: Option<ThreadEntry>,
        cookie: u64,
        magic: u32,
        delay_timer: nanopod_abi::TimerId,
    ) -> Self {
        let stacksize = if stacksize == 0 {
            DEFAULT_THREAD_STACK_SIZE
        } else {
            stacksize
        };
        Self {
            name: ThreadName::new(name),
            bprio: prio,
            iprio: prio,
            cprio: prio,
            state: ThreadState::DORMANT | ThreadState::SUSP,
            stack: alloc::vec![0u8; stacksize],
            entry,
            cookie,
            pending_signals: 0,
            asr: None,
            asr_imask: 0,
            asdi: false,
            wait_channel: None,
            delay_timer,
            claim_list: Vec::new(),
            affinity: cpu_mask_all(),
            rr_quantum: 0,
            rr_credit: 0,
            magic,
            location: Location::None,
            home_cpu: 0,
            period_ticks: 0,
            runtime_ticks: 0,
            last_scheduled_jiffy: 0,
            trap_handlers: [None; MAX_TRAP_VECTORS],
        }
    }

    /// Installs (or clears, passing `None`) the handler for `vector`.
    /// Returns `false` if `vector` is out of range.
    pub fn set_trap_handler(&mut self, vector: u32, handler: Option<TrapHandlerFn>) -> bool {
        match self.trap_handlers.get_mut(vector as usize) {
            Some(slot) => {
                *slot = handler;
                true
            }
            None => false,
        }
    }

    pub fn trap_handler(&self, vector: u32) -> Option<TrapHandlerFn> {
        self.trap_handlers.get(vector as usize).copied().flatten()
    }

    pub fn is_boosted(&self) -> bool {
        self.state.contains(ThreadState::BOOST)
    }

    pub fn claim_list_is_empty(&self) -> bool {
        self.claim_list.is_empty()
    }

    pub fn highest_claim(&self) -> Option<Priority> {
        self.claim_list.first().map(|(_, p)| *p)
    }

    /// Inserts `synch` into the claim list keyed by `prio`, kept sorted
    /// descending by `prio` in the caller's priority direction (caller
    /// passes an already-direction-adjusted key so this module need not
    /// depend on [`nanopod_abi::PriorityDirection`]).
    pub fn claim_insert(&mut self, synch: SynchId, prio: Priority, more_urgent: impl Fn(Priority, Priority) -> bool) {
        let pos = self
            .claim_list
            .iter()
            .position(|(_, p)| more_urgent(prio, *p))
            .unwrap_or(self.claim_list.len());
        self.claim_list.insert(pos, (synch, prio));
    }

    pub fn claim_remove(&mut self, synch: SynchId) -> bool {
        if let Some(pos) = self.claim_list.iter().position(|(s, _)| *s == synch) {
            self.claim_list.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn claim_list(&self) -> &[(SynchId, Priority)] {
        &self.claim_list
    }

    /// Drops every claim outright, used by `restart_thread`/`delete_thread`
    /// (§3 Lifecycle: "claim list released with PIP undone") once the
    /// owned objects themselves have already been handed off to their next
    /// owner or released.
    pub fn claim_clear(&mut self) {
        self.claim_list.clear();
    }
}

enum Slot {
    Occupied(Tcb),
    Free { next_free: Option<u32> },
}

/// Fixed-capacity pool of [`Tcb`]s, capacity [`MAX_THREADS`].
pub struct ThreadPool {
    slots: Vec<Slot>,
    free_head: Option<u32>,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(MAX_THREADS),
            free_head: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `init(thread, ...)` (§4.4): inserts `tcb` into the pool. Returns
    /// `None` ([`nanopod_abi::PodError::Nomem`] at the call site) if the
    /// pool is at [`MAX_THREADS`].
    pub fn insert(&mut self, tcb: Tcb) -> Option<ThreadId> {
        if let Some(idx) = self.free_head {
            let slot = &mut self.slots[idx as usize];
            let next_free = match slot {
                Slot::Free { next_free } => *next_free,
                Slot::Occupied(_) => unreachable!(),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied(tcb);
            return Some(ThreadId::new(idx));
        }
        if self.slots.len() >= MAX_THREADS {
            return None;
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot::Occupied(tcb));
        Some(ThreadId::new(idx))
    }

    pub fn get(&self, id: ThreadId) -> Option<&Tcb> {
        match self.slots.get(id.index())? {
            Slot::Occupied(t) => Some(t),
            Slot::Free { .. } => None,
        }
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        match self.slots.get_mut(id.index())? {
            Slot::Occupied(t) => Some(t),
            Slot::Free { .. } => None,
        }
    }

    /// `cleanup` (§4.4): releases the stack and removes the TCB from the
    /// pool, returning it so the caller (the pod) can release its delay
    /// timer and run any final bookkeeping. The pool slot is freed for
    /// reuse — a deliberate divergence from "TCB storage itself remains
    /// owned by its creator": a fixed index pool owns its storage outright
    /// (see `DESIGN.md`).
    pub fn cleanup(&mut self, id: ThreadId) -> Option<Tcb> {
        let slot = self.slots.get_mut(id.index())?;
        if matches!(slot, Slot::Free { .. }) {
            return None;
        }
        let old = core::mem::replace(
            slot,
            Slot::Free {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(id.0);
        match old {
            Slot::Occupied(t) => Some(t),
            Slot::Free { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &Tcb)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied(t) => Some((ThreadId::new(i as u32), t)),
            Slot::Free { .. } => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ThreadId, &mut Tcb)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied(t) => Some((ThreadId::new(i as u32), t)),
            Slot::Free { .. } => None,
        })
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanopod_abi::TimerId;

    fn entry_stub(_cookie: u64) {}

    fn make_tcb(name: &str, prio: Priority) -> Tcb {
        Tcb::new(name, prio, 0, Some(entry_stub), 0, 0xABCD, TimerId::INVALID)
    }

    #[test]
    fn new_thread_starts_dormant_and_suspended() {
        let tcb = make_tcb("t1", 10);
        assert!(tcb.state.contains(ThreadState::DORMANT));
        assert!(tcb.state.contains(ThreadState::SUSP));
        assert!(!tcb.state.is_runnable());
        assert_eq!(tcb.bprio, tcb.cprio);
        assert_eq!(tcb.stack.len(), DEFAULT_THREAD_STACK_SIZE);
    }

    #[test]
    fn pool_insert_get_cleanup_round_trip() {
        let mut pool = ThreadPool::new();
        let id = pool.insert(make_tcb("t1", 10)).unwrap();
        assert_eq!(pool.get(id).unwrap().name.as_str(), "t1");
        let removed = pool.cleanup(id);
        assert!(removed.is_some());
        assert!(pool.get(id).is_none());
    }

    #[test]
    fn claim_list_keeps_highest_priority_first() {
        let mut tcb = make_tcb("t1", 10);
        let up_more_urgent = |a: Priority, b: Priority| a > b;
        tcb.claim_insert(SynchId::new(0), 15, up_more_urgent);
        tcb.claim_insert(SynchId::new(1), 30, up_more_urgent);
        tcb.claim_insert(SynchId::new(2), 20, up_more_urgent);
        assert_eq!(tcb.highest_claim(), Some(30));
        tcb.claim_remove(SynchId::new(1));
        assert_eq!(tcb.highest_claim(), Some(20));
    }

    #[test]
    fn pool_capacity_is_bounded() {
        let mut pool = ThreadPool::new();
        for i in 0..MAX_THREADS {
            assert!(pool.insert(make_tcb("t", i as Priority)).is_some());
        }
        assert!(pool.insert(make_tcb("overflow", 0)).is_none());
    }
}
