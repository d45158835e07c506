//! Shadow threads (§4.7): pairs a real-time thread with a host-kernel task
//! so the pair can migrate between the real-time domain (this pod) and the
//! host domain (the surrounding OS).
//!
//! Every other cross-cutting algorithm in this crate (`pod::synch_ops`,
//! `pod::sync_ops`) takes `&mut Pod` because it mutates pod-owned queues.
//! The thread/host-task *pairing* itself is not pod state in that sense —
//! it is auxiliary bookkeeping the embedding kernel's host domain also
//! needs to reach (e.g. from its own syscall-dispatch path, which has no
//! `&mut Pod` of its own to thread through). It is kept as its own small
//! registry behind a lock, the same `AtomicPtr`/static-registration shape
//! `platform.rs` uses for architecture hooks, rather than a field on
//! [`PodCore`] — see `DESIGN.md` for why this is not the thread-local
//! global §9 Design Notes warns against (the registry holds no scheduler
//! state; every operation that touches a thread's state mask still goes
//! through `&mut Pod`).

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use bitflags::bitflags;

use nanopod_abi::{GATEKEEPER_RING_CAPACITY, MAX_SHADOWS, PodError, PodResult, Priority, ThreadId, ThreadState};
use nanopod_lib::{IrqMutex, klog_debug, klog_warn};

use crate::platform::{self, HostTaskId};
use crate::pod::Pod;

bitflags! {
    /// Per-pair shadow behavior flags, distinct from [`ThreadState`] (§9
    /// Design Notes: "state is a flag value, not a class hierarchy" — these
    /// are shadow-specific, not part of the core thread state contract).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ShadowFlags: u32 {
        /// Automatically relax before a host syscall the shadow didn't
        /// intercept, and re-harden on return (§4.7 "System-call interception").
        const AUTOSW = 1 << 0;
        /// Set on a shadow whose last host syscall took the `AUTOSW` path,
        /// so the return path knows to re-harden exactly once.
        const SYSSW  = 1 << 1;
    }
}

#[derive(Clone, Copy)]
struct ShadowPair {
    thread: ThreadId,
    host_task: HostTaskId,
    flags: ShadowFlags,
    magic: u32,
    /// The ROOT thread's priority as it was before the most recent
    /// `relax()` reniced it to the shadow's priority, so `harden()` can put
    /// it back (§4.7 scenario E: "ROOT reniced back to its base").
    root_prio_before_relax: Option<Priority>,
}

/// A pending migration request the gatekeeper consumes (§9 Design Notes:
/// "a dedicated task/fiber in the host domain driven by a bounded ring
/// buffer of migration requests; the ring is MPSC").
#[derive(Clone, Copy)]
struct MigrationRequest {
    thread: ThreadId,
}

struct ShadowRegistry {
    pairs: Vec<Option<ShadowPair>>,
    gatekeeper: Option<HostTaskId>,
    registered_skins: Vec<u32>,
    ring: VecDeque<MigrationRequest>,
    /// Count of shadows currently executing in the host domain; the shield
    /// is up iff this is nonzero (§4.7 "Interrupt shielding").
    shield_depth: u32,
}

impl ShadowRegistry {
    const fn new() -> Self {
        Self {
            pairs: Vec::new(),
            gatekeeper: None,
            registered_skins: Vec::new(),
            ring: VecDeque::new(),
            shield_depth: 0,
        }
    }

    fn find(&self, tid: ThreadId) -> Option<usize> {
        self.pairs.iter().position(|p| matches!(p, Some(pair) if pair.thread == tid))
    }
}

static REGISTRY: IrqMutex<ShadowRegistry> = IrqMutex::new(ShadowRegistry::new());

/// `register_skin`/`unregister_skin` (§6 Shadow): a personality layer
/// registers its magic cookie before it may `map` shadow threads, so
/// `map` can refuse a cookie no skin claimed.
pub fn register_skin(magic: u32) {
    let mut reg = REGISTRY.lock();
    if !reg.registered_skins.contains(&magic) {
        reg.registered_skins.push(magic);
    }
}

pub fn unregister_skin(magic: u32) {
    let mut reg = REGISTRY.lock();
    reg.registered_skins.retain(|&m| m != magic);
}

pub fn register_gatekeeper(host_task: HostTaskId) {
    REGISTRY.lock().gatekeeper = Some(host_task);
}

fn is_shadow_of(pod: &Pod, tid: ThreadId) -> bool {
    pod.threads.get(tid).is_some_and(|t| t.state.contains(ThreadState::SHADOW))
}

/// The magic cookie of the skin that owns `tid`'s pairing, if any — lets a
/// skin sharing this core with others recognize threads it did not map.
pub fn magic_of(tid: ThreadId) -> Option<u32> {
    let reg = REGISTRY.lock();
    reg.find(tid).and_then(|i| reg.pairs[i]).map(|p| p.magic)
}

/// `map(thread, name, prio, syncpid, u_syncp, magic)` (§4.7): creates the
/// shadow thread DORMANT+SHADOW, pairs it with `host_task`, and wakes the
/// initiator via `syncpid`'s sync word.
#[allow(clippy::too_many_arguments)]
pub fn map(
    pod: &mut Pod,
    host_task: HostTaskId,
    name: &str,
    prio: Priority,
    syncpid: u64,
    u_syncp: u64,
    magic: u32,
) -> PodResult<ThreadId> {
    {
        let reg = REGISTRY.lock();
        if !reg.registered_skins.contains(&magic) {
            return Err(PodError::Inval);
        }
        if reg.pairs.iter().filter(|p| p.is_some()).count() >= MAX_SHADOWS {
            return Err(PodError::Nomem);
        }
    }

    let tid = pod.init_thread(name, prio, 0, None, 0, ThreadState::SHADOW, magic)?;

    let mut reg = REGISTRY.lock();
    let pair = ShadowPair {
        thread: tid,
        host_task,
        flags: ShadowFlags::empty(),
        magic,
        root_prio_before_relax: None,
    };
    let slot = reg.pairs.iter().position(|p| p.is_none());
    match slot {
        Some(idx) => reg.pairs[idx] = Some(pair),
        None if reg.pairs.len() < MAX_SHADOWS => reg.pairs.push(Some(pair)),
        None => {
            drop(reg);
            pod.delete_thread(tid).ok();
            return Err(PodError::Nomem);
        }
    }
    drop(reg);

    klog_debug!("shadow: map {:?} host={:?} syncpid={} u_syncp={}", tid, host_task, syncpid, u_syncp);
    platform::host_wake(host_task);
    Ok(tid)
}

/// `start` (§6 Shadow): starts the underlying thread and immediately parks
/// it `RELAX` — a mapped shadow always begins life executing in the host
/// domain; it only enters the real-time domain once its host task calls
/// [`harden`].
pub fn start(pod: &mut Pod, tid: ThreadId) -> PodResult<()> {
    if !is_shadow_of(pod, tid) {
        return Err(PodError::Inval);
    }
    let cpu = pod.threads.get(tid).ok_or(PodError::Inval)?.home_cpu;
    pod.start_thread(tid)?;
    pod.suspend_thread(tid, ThreadState::RELAX, nanopod_abi::INFINITE, cpu)
}

/// `harden()` (§4.7): the calling host task's migration request is
/// serviced by the gatekeeper, which resumes the shadow out of `RELAX` on
/// the real-time side. Modeled synchronously — there is no separate
/// gatekeeper fiber to hand off to in this crate's test/host environment —
/// but the ring buffer is still the hand-off point a threaded embedding
/// would drive from the gatekeeper task instead of calling this directly.
pub fn harden(pod: &mut Pod, tid: ThreadId) -> PodResult<()> {
    if !is_shadow_of(pod, tid) {
        return Err(PodError::Inval);
    }
    {
        let mut reg = REGISTRY.lock();
        if reg.ring.len() >= GATEKEEPER_RING_CAPACITY {
            klog_warn!("shadow: gatekeeper ring full, dropping migration request for {:?}", tid);
        } else {
            reg.ring.push_back(MigrationRequest { thread: tid });
        }
        if let Some(gk) = reg.gatekeeper {
            platform::host_wake(gk);
        }
    }

    service_gatekeeper_ring(pod);

    let cpu = pod.threads.get(tid).ok_or(PodError::Inval)?.home_cpu;
    pod.resume_thread(tid, ThreadState::RELAX)?;

    let root_prio_before = {
        let mut reg = REGISTRY.lock();
        match reg.find(tid).and_then(|i| reg.pairs[i].as_mut()) {
            Some(pair) => pair.root_prio_before_relax.take(),
            None => None,
        }
    };
    if let Some(prio) = root_prio_before {
        let root = pod.root[cpu];
        pod.renice_thread(root, prio).ok();
    }

    let still_in_host_domain = {
        let mut reg = REGISTRY.lock();
        reg.shield_depth = reg.shield_depth.saturating_sub(1);
        reg.shield_depth > 0
    };
    if !still_in_host_domain {
        platform::shield_disable();
    }

    klog_debug!("shadow: harden {:?}", tid);
    Ok(())
}

/// Drains every queued migration request, resuming each from `RELAX` —
/// the gatekeeper's own service loop (§9 Design Notes), invoked inline by
/// [`harden`] since this crate has no separate fiber to run it on.
fn service_gatekeeper_ring(pod: &mut Pod) {
    let drained: Vec<MigrationRequest> = {
        let mut reg = REGISTRY.lock();
        reg.ring.drain(..).collect()
    };
    for req in drained {
        if pod.threads.get(req.thread).is_some() {
            pod.resume_thread(req.thread, ThreadState::RELAX).ok();
        }
    }
}

/// `relax()` (§4.7): the running real-time shadow hands control back to
/// its host task. Wakes the host task, renices `ROOT` to the shadow's
/// current priority (so the host task, which this pod sees only as
/// `ROOT` running, inherits it while it runs), sets the host task's fixed
/// scheduling priority, then self-suspends `RELAX` and reschedules.
pub fn relax(pod: &mut Pod, tid: ThreadId) -> PodResult<()> {
    if !is_shadow_of(pod, tid) {
        return Err(PodError::Inval);
    }
    let (cpu, cprio, host_task) = {
        let tcb = pod.threads.get(tid).ok_or(PodError::Inval)?;
        let reg = REGISTRY.lock();
        let idx = reg.find(tid).ok_or(PodError::Inval)?;
        (tcb.home_cpu, tcb.cprio, reg.pairs[idx].unwrap().host_task)
    };

    platform::host_wake(host_task);
    platform::host_set_fixed_priority(host_task, cprio);

    let root = pod.root[cpu];
    let root_prio_before = pod.threads.get(root).map(|t| t.bprio).unwrap_or(cprio);
    pod.renice_thread(root, cprio).ok();

    {
        let mut reg = REGISTRY.lock();
        if let Some(idx) = reg.find(tid) {
            if let Some(pair) = reg.pairs[idx].as_mut() {
                pair.root_prio_before_relax = Some(root_prio_before);
            }
        }
        reg.shield_depth += 1;
        if reg.shield_depth == 1 {
            drop(reg);
            platform::shield_enable();
        }
    }

    klog_debug!("shadow: relax {:?} cprio={}", tid, cprio);
    pod.suspend_thread(tid, ThreadState::RELAX, nanopod_abi::INFINITE, cpu)
}

/// `unmap` (§6 Shadow): severs the pairing without touching the thread's
/// lifecycle — used by a skin tearing down its own bookkeeping ahead of an
/// ordinary `delete_thread`.
pub fn unmap(pod: &mut Pod, tid: ThreadId) -> PodResult<()> {
    let mut reg = REGISTRY.lock();
    let Some(idx) = reg.find(tid) else {
        return Err(PodError::Inval);
    };
    reg.pairs[idx] = None;
    drop(reg);
    if let Some(tcb) = pod.threads.get_mut(tid) {
        tcb.state.remove(ThreadState::SHADOW);
    }
    Ok(())
}

/// `exit()` (§4.7): the shadow is being deleted. Its host task is resumed
/// one last time (to let it unwind and terminate itself via the host
/// kernel — out of this crate's scope per §1) and the real-time side is
/// torn down through the ordinary `delete_thread` path.
pub fn exit(pod: &mut Pod, tid: ThreadId) -> PodResult<()> {
    let host_task = {
        let mut reg = REGISTRY.lock();
        let idx = reg.find(tid);
        let host_task = idx.and_then(|i| reg.pairs[i].map(|p| p.host_task));
        if let Some(i) = idx {
            reg.pairs[i] = None;
        }
        host_task
    };
    if let Some(host_task) = host_task {
        platform::host_run(host_task);
    }
    klog_debug!("shadow: exit {:?}", tid);
    pod.delete_thread(tid)
}

/// Outcome of [`intercept_syscall`] (§4.7 "System-call interception").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Serviced entirely by the real-time equivalent; the host never sees it.
    Handled,
    /// Not one of the substituted calls; the host processes it. If the
    /// shadow has `AUTOSW`, it has already been relaxed and
    /// [`syscall_return`] must be called once the host call completes.
    Propagate,
}

/// A host syscall eligible for real-time substitution (§4.7: "a small
/// subset — sleep, interval timer get/set").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowSyscall {
    Sleep { ns: u64 },
    GetIntervalTimer,
    SetIntervalTimer { period_ticks: u64 },
    Other,
}

/// `intercept_syscall` (§4.7): inspects a call the host is about to run on
/// behalf of `tid`. `Sleep`/interval-timer calls are serviced with the
/// real-time equivalents directly (after hardening, so the caller is
/// certainly on the real-time side while they run); everything else
/// propagates to the host, auto-relaxing first if `AUTOSW` is set.
pub fn intercept_syscall(pod: &mut Pod, tid: ThreadId, call: ShadowSyscall, cpu: usize) -> PodResult<SyscallOutcome> {
    if !is_shadow_of(pod, tid) {
        return Err(PodError::Inval);
    }
    match call {
        ShadowSyscall::Sleep { ns } => {
            harden(pod, tid)?;
            pod.suspend_thread(tid, ThreadState::DELAY, ns, cpu)?;
            Ok(SyscallOutcome::Handled)
        }
        ShadowSyscall::GetIntervalTimer | ShadowSyscall::SetIntervalTimer { .. } => {
            harden(pod, tid)?;
            if let ShadowSyscall::SetIntervalTimer { period_ticks } = call {
                pod.set_thread_periodic(tid, period_ticks)?;
            }
            Ok(SyscallOutcome::Handled)
        }
        ShadowSyscall::Other => {
            let autosw = {
                let reg = REGISTRY.lock();
                reg.find(tid).and_then(|i| reg.pairs[i]).map(|p| p.flags.contains(ShadowFlags::AUTOSW)).unwrap_or(false)
            };
            if autosw {
                relax(pod, tid)?;
                let mut reg = REGISTRY.lock();
                if let Some(idx) = reg.find(tid) {
                    if let Some(pair) = reg.pairs[idx].as_mut() {
                        pair.flags.insert(ShadowFlags::SYSSW);
                    }
                }
            }
            Ok(SyscallOutcome::Propagate)
        }
    }
}

/// Re-hardens `tid` on return from a propagated host call if it took the
/// `AUTOSW` path out (§4.7: "re-hardened on return, with SYSSW marking
/// that this path was taken"). A no-op if `SYSSW` was not set.
pub fn syscall_return(pod: &mut Pod, tid: ThreadId) -> PodResult<()> {
    let took_autosw_path = {
        let mut reg = REGISTRY.lock();
        match reg.find(tid).and_then(|i| reg.pairs[i].as_mut()) {
            Some(pair) if pair.flags.contains(ShadowFlags::SYSSW) => {
                pair.flags.remove(ShadowFlags::SYSSW);
                true
            }
            _ => false,
        }
    };
    if took_autosw_path {
        harden(pod, tid)?;
    }
    Ok(())
}

pub fn set_autosw(tid: ThreadId, enabled: bool) -> PodResult<()> {
    let mut reg = REGISTRY.lock();
    let idx = reg.find(tid).ok_or(PodError::Inval)?;
    let pair = reg.pairs[idx].as_mut().unwrap();
    if enabled {
        pair.flags.insert(ShadowFlags::AUTOSW);
    } else {
        pair.flags.remove(ShadowFlags::AUTOSW);
    }
    Ok(())
}

/// Called from [`crate::pod::Pod::renice_thread`] whenever a thread's
/// priority changes: if it is paired with a host task, the host task's
/// fixed scheduling priority is updated to match (§4.6 "Priority change":
/// "If the thread has a shadow, propagate the request to the mated host
/// task").
pub fn propagate_renice(tid: ThreadId, newprio: Priority) {
    let reg = REGISTRY.lock();
    if let Some(idx) = reg.find(tid) {
        if let Some(pair) = reg.pairs[idx] {
            platform::host_set_fixed_priority(pair.host_task, newprio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::PodFlags;
    use nanopod_abi::ThreadState;

    fn reset_registry() {
        let mut reg = REGISTRY.lock();
        reg.pairs.clear();
        reg.gatekeeper = None;
        reg.registered_skins.clear();
        reg.ring.clear();
        reg.shield_depth = 0;
    }

    fn new_pod() -> Pod {
        reset_registry();
        Pod::init(1, 255, PodFlags::empty(), 1).unwrap()
    }

    #[test]
    fn map_requires_registered_skin() {
        let mut pod = new_pod();
        let err = map(&mut pod, HostTaskId(1), "sh", 10, 0, 0, 0xABCD).unwrap_err();
        assert_eq!(err, PodError::Inval);
    }

    #[test]
    fn map_creates_dormant_shadow_thread() {
        let mut pod = new_pod();
        register_skin(0xABCD);
        let tid = map(&mut pod, HostTaskId(1), "sh", 10, 0, 0, 0xABCD).unwrap();
        let tcb = pod.threads.get(tid).unwrap();
        assert!(tcb.state.contains(ThreadState::DORMANT));
        assert!(tcb.state.contains(ThreadState::SHADOW));
        unregister_skin(0xABCD);
    }

    #[test]
    fn start_parks_shadow_in_relax() {
        let mut pod = new_pod();
        register_skin(1);
        let tid = map(&mut pod, HostTaskId(1), "sh", 10, 0, 0, 1).unwrap();
        start(&mut pod, tid).unwrap();
        assert!(pod.threads.get(tid).unwrap().state.contains(ThreadState::RELAX));
        unregister_skin(1);
    }

    #[test]
    fn harden_relax_round_trip_restores_root_priority() {
        let mut pod = new_pod();
        register_skin(1);
        let tid = map(&mut pod, HostTaskId(1), "sh", 30, 0, 0, 1).unwrap();
        start(&mut pod, tid).unwrap();

        let root = pod.root[0];
        let root_base = pod.threads.get(root).unwrap().bprio;

        harden(&mut pod, tid).unwrap();
        assert!(!pod.threads.get(tid).unwrap().state.contains(ThreadState::RELAX));

        relax(&mut pod, tid).unwrap();
        assert!(pod.threads.get(tid).unwrap().state.contains(ThreadState::RELAX));
        assert_eq!(pod.threads.get(root).unwrap().cprio, 30);

        harden(&mut pod, tid).unwrap();
        assert_eq!(pod.threads.get(root).unwrap().cprio, root_base);
        unregister_skin(1);
    }

    #[test]
    fn unmap_clears_shadow_bit_without_deleting_thread() {
        let mut pod = new_pod();
        register_skin(1);
        let tid = map(&mut pod, HostTaskId(1), "sh", 10, 0, 0, 1).unwrap();
        unmap(&mut pod, tid).unwrap();
        assert!(!pod.threads.get(tid).unwrap().state.contains(ThreadState::SHADOW));
        assert!(pod.threads.get(tid).is_some());
        unregister_skin(1);
    }

    #[test]
    fn exit_deletes_the_thread() {
        let mut pod = new_pod();
        register_skin(1);
        let tid = map(&mut pod, HostTaskId(1), "sh", 10, 0, 0, 1).unwrap();
        exit(&mut pod, tid).unwrap();
        assert!(pod.threads.get(tid).is_none());
        unregister_skin(1);
    }

    #[test]
    fn autosw_syscall_relaxes_and_resumes_on_return() {
        let mut pod = new_pod();
        register_skin(1);
        let tid = map(&mut pod, HostTaskId(1), "sh", 10, 0, 0, 1).unwrap();
        start(&mut pod, tid).unwrap();
        harden(&mut pod, tid).unwrap();
        set_autosw(tid, true).unwrap();

        let outcome = intercept_syscall(&mut pod, tid, ShadowSyscall::Other, 0).unwrap();
        assert_eq!(outcome, SyscallOutcome::Propagate);
        assert!(pod.threads.get(tid).unwrap().state.contains(ThreadState::RELAX));

        syscall_return(&mut pod, tid).unwrap();
        assert!(!pod.threads.get(tid).unwrap().state.contains(ThreadState::RELAX));
        unregister_skin(1);
    }
}
