//! Round-robin scheduling within a priority group (§4.6 "Round-robin",
//! §8 scenario A).
//!
//! The wheel/ready-queue model doesn't need a separate rotation data
//! structure: "rotate" is just "remove from the ready queue and reinsert at
//! the tail of the same priority group", the same operation
//! [`super::sync_ops`]'s PIP code already needs after a `renice` (there:
//! reinsert at the *new* priority's tail; here: reinsert at the *same*
//! priority's tail). Both paths share [`super::Pod::reposition_if_ready`].

use nanopod_abi::{PodError, PodResult, ThreadId, ThreadState};

use super::{Pod, PodFlags};

impl Pod {
    /// `activate_rr(thread, quantum)` (§6): `quantum == 0` means "use the
    /// pod's default" (§3 TCB "round-robin quantum/credit").
    pub fn activate_rr(&mut self, tid: ThreadId, quantum: u32) -> PodResult<()> {
        let default = self.rr_quantum_default;
        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        tcb.rr_quantum = if quantum == 0 { default } else { quantum };
        tcb.rr_credit = tcb.rr_quantum;
        tcb.state.insert(ThreadState::RRB);
        Ok(())
    }

    pub fn deactivate_rr(&mut self, tid: ThreadId) -> PodResult<()> {
        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        tcb.state.remove(ThreadState::RRB);
        Ok(())
    }

    /// `rotate_readyq(thread)` (§6): the manual rotation primitive exposed
    /// to skins, sharing the same tail-reinsert [`announce_tick`]'s
    /// internal round-robin bookkeeping uses.
    pub fn rotate_readyq(&mut self, tid: ThreadId) -> PodResult<()> {
        if self.threads.get(tid).is_none() {
            return Err(PodError::Inval);
        }
        self.reposition_if_ready(tid);
        Ok(())
    }

    /// Per-CPU round-robin bookkeeping run once per [`Pod::announce_tick`]
    /// (§4.6 "Round-robin"): only applies to the thread currently running
    /// on `cpu`, only in periodic mode, and never to a thread holding the
    /// scheduler lock.
    pub(crate) fn rr_tick(&mut self, cpu: usize, hits: u32) {
        if !self.flags.contains(PodFlags::TMPER) {
            return;
        }
        let Some(&tid) = self.runthread.get(cpu) else {
            return;
        };
        let Some(tcb) = self.threads.get_mut(tid) else {
            return;
        };
        if !tcb.state.contains(ThreadState::RRB) || tcb.state.contains(ThreadState::LOCK) {
            return;
        }
        if tcb.rr_quantum == 0 {
            return;
        }
        tcb.rr_credit = tcb.rr_credit.saturating_sub(hits);
        if tcb.rr_credit == 0 {
            tcb.rr_credit = tcb.rr_quantum;
            self.reposition_if_ready(tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::test_support::{new_pod, start_thread};

    #[test]
    fn round_robin_rotates_equal_priority_group_every_quantum() {
        let mut pod = new_pod(1, 255);
        let t1 = start_thread(&mut pod, "t1", 10);
        let t2 = start_thread(&mut pod, "t2", 10);
        let t3 = start_thread(&mut pod, "t3", 10);
        for t in [t1, t2, t3] {
            pod.activate_rr(t, 5).unwrap();
        }
        pod.flags.insert(PodFlags::TMPER);

        // Head of the ready queue is whichever started first.
        assert_eq!(pod.ready[0].peek_head().map(|(_, t)| t), Some(t1));

        // After 5 ticks t1's credit is exhausted and it rotates behind t2, t3.
        for _ in 0..5 {
            pod.rr_tick(0, 1);
        }
        let order: alloc::vec::Vec<ThreadId> = pod.ready[0].iter().map(|(_, t)| t).collect();
        assert_eq!(order, alloc::vec![t2, t3, t1]);
    }

    #[test]
    fn locked_thread_is_not_rotated() {
        let mut pod = new_pod(1, 255);
        let t1 = start_thread(&mut pod, "t1", 10);
        pod.activate_rr(t1, 1).unwrap();
        pod.flags.insert(PodFlags::TMPER);
        pod.threads.get_mut(t1).unwrap().state.insert(ThreadState::LOCK);
        pod.rr_tick(0, 10);
        assert_eq!(pod.ready[0].peek_head().map(|(_, t)| t), Some(t1));
    }
}
