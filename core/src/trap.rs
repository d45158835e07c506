//! Trap/fault dispatch (§4.8): the pod's single entry point for a CPU
//! exception the architecture layer could not resolve on its own.
//!
//! Per-thread trap-vector handler tables already live on [`Tcb`]
//! (`set_trap_handler`/`trap_handler`); what's added here is the pod-level
//! default policy `trap_fault` falls back to once a thread has no handler
//! installed for the faulting vector.

use nanopod_abi::{INFINITE, ThreadState};
use nanopod_lib::klog_warn;

use crate::platform::FaultInfo;
use crate::pod::Pod;

/// `trap_fault(fltinfo)` (§4.8): dispatches a fault the architecture layer
/// reports against `cpu`. Returns `true` if the real-time side has fully
/// handled it (the faulting thread is parked and will not resume without
/// intervention), `false` if the host must process the fault itself (no
/// real-time thread was running, or the fault was handed off to a shadow's
/// host task).
pub fn trap_fault(pod: &mut Pod, cpu: usize, info: FaultInfo) -> bool {
    let Some(tid) = pod.runthread.get(cpu).copied().filter(|t| t.is_valid()) else {
        return false;
    };
    let Some(tcb) = pod.threads.get(tid) else {
        return false;
    };
    if tcb.state.contains(ThreadState::ROOT) {
        return false;
    }

    if let Some(handler) = tcb.trap_handler(info.vector) {
        return handler(info.vector, info.pc);
    }

    if tcb.state.contains(ThreadState::SHADOW) {
        klog_warn!("trap: vector={} pc={:#x} {:?} relaxing shadow", info.vector, info.pc, tid);
        crate::shadow::relax(pod, tid).ok();
        return false;
    }

    klog_warn!(
        "trap: vector={} pc={:#x} {:?} no handler, suspending DORMANT",
        info.vector,
        info.pc,
        tid
    );
    pod.suspend_thread(tid, ThreadState::DORMANT, INFINITE, cpu).ok();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::PodFlags;
    use crate::pod::test_support::{new_pod, start_thread};

    fn fault(vector: u32) -> FaultInfo {
        FaultInfo { pc: 0xDEAD_BEEF, vector }
    }

    #[test]
    fn unhandled_fault_on_root_is_not_handled() {
        let mut pod = Pod::init(1, 255, PodFlags::empty(), 1).unwrap();
        assert!(!trap_fault(&mut pod, 0, fault(13)));
    }

    #[test]
    fn unhandled_fault_on_plain_thread_suspends_it_dormant() {
        let mut pod = new_pod(1, 255);
        let tid = start_thread(&mut pod, "victim", 10);
        pod.runthread[0] = tid;

        assert!(trap_fault(&mut pod, 0, fault(13)));
        assert!(pod.threads.get(tid).unwrap().state.contains(ThreadState::DORMANT));
    }

    #[test]
    fn installed_handler_is_consulted_first() {
        let mut pod = new_pod(1, 255);
        let tid = start_thread(&mut pod, "victim", 10);
        pod.runthread[0] = tid;
        pod.threads.get_mut(tid).unwrap().set_trap_handler(13, Some(|_vector, _pc| true));

        assert!(trap_fault(&mut pod, 0, fault(13)));
        assert!(!pod.threads.get(tid).unwrap().state.contains(ThreadState::DORMANT));
    }

    #[test]
    fn fault_on_shadow_relaxes_it_and_is_not_handled() {
        let mut pod = new_pod(1, 255);
        crate::shadow::register_skin(7);
        let tid = crate::shadow::map(&mut pod, crate::platform::HostTaskId(1), "sh", 10, 0, 0, 7).unwrap();
        pod.start_thread(tid).unwrap();
        pod.runthread[0] = tid;

        // schedule() needs somewhere to go once `tid` blocks on RELAX; give
        // it ROOT, the CPU's idle fallback, the way it would have been had
        // `tid` actually preempted ROOT via an ordinary `schedule()` call.
        let root = pod.root[0];
        let root_base = pod.root_prio_base();
        pod.ready[0].insert_fifo(root_base, root);
        pod.threads.get_mut(root).unwrap().state.insert(ThreadState::READY);

        assert!(!trap_fault(&mut pod, 0, fault(13)));
        assert!(pod.threads.get(tid).unwrap().state.contains(ThreadState::RELAX));
        crate::shadow::unregister_skin(7);
    }

    #[test]
    fn fault_with_no_running_thread_is_not_handled() {
        let mut pod = new_pod(1, 255);
        pod.runthread[0] = nanopod_abi::ThreadId::INVALID;
        assert!(!trap_fault(&mut pod, 0, fault(13)));
    }
}
