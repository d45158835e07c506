//! Synchronization-object operations and priority inheritance (§4.5).
//!
//! `synch.rs` owns a [`crate::synch::SynchObject`]'s own data; this module
//! is the `xnsynch_*`-equivalent algorithm layer that needs the whole pod
//! at once — the thread pool (to boost/deboost an owner), the ready queues
//! (to wake a sleeper), and potentially other synchronization objects
//! transitively (a boosted owner can itself be blocked on another object).

use alloc::vec::Vec;

use nanopod_abi::{PodError, PodResult, Priority, SynchId, ThreadId, ThreadState};

use crate::synch::{SynchObject, WaitOrder};
use crate::thread::Location;

use super::{Pod, PodCore};

impl PodCore {
    /// Recomputes `owner`'s current boosted priority from its base
    /// priority and its claim list's highest entry, applying `BOOST`
    /// (§4.5 "owner's priority becomes the max of its base priority and
    /// every object it owns' most urgent waiter"). Does not recurse to any
    /// further owner — callers that need the transitive chain walk it
    /// themselves via [`PodCore::boost_owner_chain`]/[`PodCore::deboost`].
    fn recompute_boost(&mut self, owner: ThreadId) -> bool {
        let Some(tcb) = self.threads.get(owner) else {
            return false;
        };
        let bprio = tcb.bprio;
        let new_cprio = match tcb.highest_claim() {
            Some(claim_prio) if self.direction.more_urgent(claim_prio, bprio) => claim_prio,
            _ => bprio,
        };
        let old_cprio = tcb.cprio;
        if new_cprio == old_cprio {
            return false;
        }
        let Some(tcb) = self.threads.get_mut(owner) else {
            return false;
        };
        tcb.cprio = new_cprio;
        if new_cprio != tcb.bprio {
            tcb.state.insert(ThreadState::BOOST);
        } else {
            tcb.state.remove(ThreadState::BOOST);
        }
        true
    }

    /// `xnsynch_renice_owner`-equivalent (§4.5 "Boosting is transitive"):
    /// after `synch`'s most urgent waiter has changed, recompute `owner`'s
    /// boosted priority and, if it changed, reposition it in whatever
    /// collection it occupies and — if it is itself blocked waiting on
    /// another PIP-enabled object — recurse onto *that* object's owner.
    /// Bounded by the number of distinct objects in the pod, so this
    /// cannot loop forever short of an (invariant-violating) ownership
    /// cycle.
    pub(crate) fn boost_owner_chain(&mut self, owner: ThreadId) {
        if !self.recompute_boost(owner) {
            return;
        }
        self.reposition_after_prio_change(owner);

        let next_wchan = self.threads.get(owner).and_then(|t| t.wait_channel);
        if let Some(synch) = next_wchan {
            if let Some(obj) = self.synchs.get(synch) {
                if obj.pip {
                    if let Some(next_owner) = obj.owner {
                        self.boost_owner_chain(next_owner);
                    }
                }
            }
        }
    }

    /// Re-inserts `tid` wherever its `Location` says it currently lives,
    /// at the new `cprio`'s position, after a priority change (§4.5, §4.6
    /// "Priority change" step 2). A no-op for a thread with no queue
    /// membership (blocked on a plain delay, or not yet started).
    pub(crate) fn reposition_after_prio_change(&mut self, tid: ThreadId) {
        let Some(tcb) = self.threads.get(tid) else {
            return;
        };
        match tcb.location {
            Location::Ready => self.reposition_if_ready(tid),
            Location::WaitQueue(synch) => {
                if self.flags.contains(super::PodFlags::DREORD) {
                    return;
                }
                let Some(obj) = self.synchs.get_mut(synch) else {
                    return;
                };
                let new_key = obj.insert_key(tcb.cprio);
                obj.waitq.remove(tid);
                obj.waitq.insert_fifo(new_key, tid);
            }
            Location::Suspended | Location::None => {}
        }
    }

    /// Undoes `synch`'s claim on `owner` (releasing ownership, or losing
    /// the most urgent waiter): removes the claim and recomputes the
    /// owner's boost from whatever remains in its claim list (§4.5
    /// "deboost" — never jumps straight back to base priority if other
    /// claims remain).
    fn deboost(&mut self, owner: ThreadId, synch: SynchId) {
        if let Some(tcb) = self.threads.get_mut(owner) {
            tcb.claim_remove(synch);
        }
        self.boost_owner_chain(owner);
    }

    /// Re-evaluates whether `synch`'s claim entry in `owner`'s claim list
    /// still reflects the object's current most urgent waiter, updating it
    /// in place if not, then reruns the boost computation (§4.5 "Claiming":
    /// the claim list always mirrors live most-urgent-waiter values, not a
    /// stale snapshot).
    fn reconsider_claim_boost(&mut self, owner: ThreadId, synch: SynchId) {
        let Some(obj) = self.synchs.get(synch) else {
            return;
        };
        match obj.waitq.head_priority() {
            Some(head_prio) => {
                if let Some(tcb) = self.threads.get_mut(owner) {
                    tcb.claim_remove(synch);
                    let more_urgent = self.direction;
                    tcb.claim_insert(synch, head_prio, |a, b| more_urgent.more_urgent(a, b));
                }
                if let Some(obj) = self.synchs.get_mut(synch) {
                    obj.claimed = true;
                }
            }
            None => {
                if let Some(tcb) = self.threads.get_mut(owner) {
                    tcb.claim_remove(synch);
                }
                if let Some(obj) = self.synchs.get_mut(synch) {
                    obj.claimed = false;
                }
            }
        }
        self.boost_owner_chain(owner);
    }

    /// Dequeues `tid` from `synch`'s wait queue without waking it runnable
    /// (§4.5 `forget_sleeper`): used by [`PodCore::end_wait`] when a wait
    /// ends abnormally (timeout, `unblock`) rather than by a normal
    /// wakeup. If `synch` is PIP-enabled, re-evaluates the owner's claim
    /// since the most urgent waiter may have just left.
    pub(crate) fn forget_sleeper(&mut self, tid: ThreadId, synch: SynchId) {
        let Some(obj) = self.synchs.get_mut(synch) else {
            return;
        };
        obj.waitq.remove(tid);
        let pip = obj.pip;
        let owner = obj.owner;
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.wait_channel = None;
        }
        if pip {
            if let Some(owner) = owner {
                self.reconsider_claim_boost(owner, synch);
            }
        }
    }
}

impl Pod {
    /// `synch_init(synch, flags)` (§4.5 `init`).
    pub fn synch_init(&mut self, order: WaitOrder, pip: bool) -> PodResult<SynchId> {
        let direction = self.direction;
        self.synchs
            .insert(SynchObject::new(order, pip, direction))
            .ok_or(PodError::Nomem)
    }

    /// `sleep_on(synch, timeout)` (§4.5): links the caller onto `synch`'s
    /// own wait queue (keyed per the object's configured order) and then
    /// suspends it with `PEND` (plus `DELAY` if `timeout` is finite). If
    /// `synch` has PIP enabled and is currently owned, boosts the owner
    /// (and transitively whatever it's itself waiting on).
    pub fn sleep_on(&mut self, synch: SynchId, tid: ThreadId, timeout: u64) -> PodResult<()> {
        let tcb = self.threads.get(tid).ok_or(PodError::Inval)?;
        let cprio = tcb.cprio;
        let obj = self.synchs.get_mut(synch).ok_or(PodError::Inval)?;
        let key = obj.insert_key(cprio);
        obj.waitq.insert_fifo(key, tid);
        let pip = obj.pip;
        let owner = obj.owner;

        self.core
            .suspend_bits(tid, ThreadState::PEND, timeout, Some(synch), &mut self.timers)?;

        if pip {
            if let Some(owner) = owner {
                self.core.reconsider_claim_boost(owner, synch);
            }
        }
        Ok(())
    }

    /// `wakeup_one_sleeper(synch)` (§4.5): pops the most urgent (or
    /// longest-waiting, in FIFO order) sleeper and makes it runnable,
    /// transferring ownership to it if `synch` is an owned (mutex-like)
    /// object. Returns the woken thread, if any.
    pub fn wakeup_one_sleeper(&mut self, synch: SynchId) -> PodResult<Option<ThreadId>> {
        let obj = self.synchs.get_mut(synch).ok_or(PodError::Inval)?;
        let Some((_, tid)) = obj.waitq.pop_head() else {
            return Ok(None);
        };
        let pip = obj.pip;
        let prior_owner = obj.owner;

        if pip {
            if let Some(prior_owner) = prior_owner {
                self.core.deboost(prior_owner, synch);
            }
            let obj = self.synchs.get_mut(synch).unwrap();
            obj.owner = Some(tid);
            obj.claimed = false;
            let still_waiting = obj.waitq.head_priority();
            if let Some(waiter_prio) = still_waiting {
                let direction = self.direction;
                if let Some(tcb) = self.threads.get_mut(tid) {
                    tcb.claim_insert(synch, waiter_prio, |a, b| direction.more_urgent(a, b));
                }
                if let Some(obj) = self.synchs.get_mut(synch) {
                    obj.claimed = true;
                }
                self.core.boost_owner_chain(tid);
            }
        }

        let cpu = self.threads.get(tid).map(|t| t.home_cpu).unwrap_or(0);
        self.schedule_runnable(tid, false, false, cpu);
        Ok(Some(tid))
    }

    /// `wakeup_this_sleeper(synch, thread)` (§4.5): wakes a specific
    /// sleeper out of order (used by condvar-style broadcast and explicit
    /// hand-off), with the same PIP bookkeeping as
    /// [`Pod::wakeup_one_sleeper`].
    pub fn wakeup_this_sleeper(&mut self, synch: SynchId, tid: ThreadId) -> PodResult<()> {
        let obj = self.synchs.get_mut(synch).ok_or(PodError::Inval)?;
        if !obj.contains_waiter(tid) {
            return Err(PodError::Inval);
        }
        obj.waitq.remove(tid);
        let pip = obj.pip;
        let prior_owner = obj.owner;

        if pip {
            if let Some(prior_owner) = prior_owner {
                self.core.deboost(prior_owner, synch);
            }
            let obj = self.synchs.get_mut(synch).unwrap();
            obj.owner = Some(tid);
            self.core.reconsider_claim_boost(tid, synch);
        }

        let cpu = self.threads.get(tid).map(|t| t.home_cpu).unwrap_or(0);
        self.schedule_runnable(tid, false, false, cpu);
        Ok(())
    }

    /// `flush(synch, reason)` (§4.5, §8 scenario D "destroy while
    /// waiting"): wakes every sleeper with `reason` (typically `RMID`)
    /// instead of a normal grant, undoes any PIP boost the object was
    /// holding over its owner, and clears the object's own wait queue.
    /// Used by a skin's object-destroy path before removing the object
    /// from the pool.
    pub fn flush(&mut self, synch: SynchId, reason: ThreadState) -> PodResult<()> {
        let obj = self.synchs.get_mut(synch).ok_or(PodError::Inval)?;
        let waiters: Vec<ThreadId> = obj.waitq.iter().map(|(_, t)| t).collect();
        let owner = obj.owner;
        let pip = obj.pip;
        obj.owner = None;
        obj.claimed = false;
        for &tid in &waiters {
            obj.waitq.remove(tid);
        }

        if pip {
            if let Some(owner) = owner {
                self.core.deboost(owner, synch);
            }
        }

        for tid in waiters {
            self.core.end_wait(tid, reason, &mut self.timers);
        }
        Ok(())
    }

    /// `release_all_ownerships(thread)` (§4.4 `delete`/`restart`: "every
    /// synchronization object it owns has its ownership released and PIP
    /// undone"). Walks the thread's own claim list — every object it has a
    /// claim on is, by construction, an object it owns — handing each one
    /// to its next waiter (if any) or releasing it outright.
    pub(crate) fn release_all_ownerships(&mut self, tid: ThreadId) {
        let owned: Vec<SynchId> = self
            .synchs
            .iter()
            .filter(|(_, obj)| obj.owner == Some(tid))
            .map(|(id, _)| id)
            .collect();
        for synch in owned {
            if self.synchs.get(synch).map(|o| o.is_empty()).unwrap_or(true) {
                if let Some(obj) = self.synchs.get_mut(synch) {
                    obj.owner = None;
                    obj.claimed = false;
                }
            } else {
                self.wakeup_one_sleeper(synch).ok();
            }
        }
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.claim_clear();
            tcb.state.remove(ThreadState::BOOST);
        }
    }

    /// `renice_sleeper(synch, thread, newprio)` (§4.5): repositions a
    /// sleeper within `synch`'s wait queue after its priority changed,
    /// reconsidering the owner's claim since the sleeper may no longer be
    /// (or may now newly be) the most urgent one.
    pub fn renice_sleeper(&mut self, synch: SynchId, tid: ThreadId, newprio: Priority) -> PodResult<()> {
        let obj = self.synchs.get_mut(synch).ok_or(PodError::Inval)?;
        obj.waitq.remove(tid);
        let key = obj.insert_key(newprio);
        obj.waitq.insert_fifo(key, tid);
        let pip = obj.pip;
        let owner = obj.owner;
        if pip {
            if let Some(owner) = owner {
                self.core.reconsider_claim_boost(owner, synch);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::test_support::{new_pod, start_thread};
    use nanopod_abi::INFINITE;

    #[test]
    fn sleep_and_wakeup_round_trip() {
        let mut pod = new_pod(1, 255);
        let synch = pod.synch_init(WaitOrder::Fifo, false).unwrap();
        let t1 = start_thread(&mut pod, "t1", 10);
        pod.sleep_on(synch, t1, INFINITE).unwrap();
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::PEND));
        let woken = pod.wakeup_one_sleeper(synch).unwrap();
        assert_eq!(woken, Some(t1));
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::READY));
    }

    #[test]
    fn pip_boosts_owner_to_waiters_priority() {
        let mut pod = new_pod(1, 255);
        let synch = pod.synch_init(WaitOrder::Prio, true).unwrap();
        let owner = start_thread(&mut pod, "owner", 10);
        pod.synchs.get_mut(synch).unwrap().owner = Some(owner);

        let waiter = start_thread(&mut pod, "waiter", 50);
        pod.sleep_on(synch, waiter, INFINITE).unwrap();

        assert_eq!(pod.threads.get(owner).unwrap().cprio, 50);
        assert!(pod.threads.get(owner).unwrap().state.contains(ThreadState::BOOST));
    }

    #[test]
    fn deboost_on_release_restores_base_priority() {
        let mut pod = new_pod(1, 255);
        let synch = pod.synch_init(WaitOrder::Prio, true).unwrap();
        let owner = start_thread(&mut pod, "owner", 10);
        pod.synchs.get_mut(synch).unwrap().owner = Some(owner);
        let waiter = start_thread(&mut pod, "waiter", 50);
        pod.sleep_on(synch, waiter, INFINITE).unwrap();

        pod.wakeup_one_sleeper(synch).unwrap();

        assert_eq!(pod.threads.get(owner).unwrap().cprio, 10);
        assert!(!pod.threads.get(owner).unwrap().state.contains(ThreadState::BOOST));
    }

    #[test]
    fn flush_wakes_every_sleeper_with_rmid() {
        let mut pod = new_pod(1, 255);
        let synch = pod.synch_init(WaitOrder::Fifo, false).unwrap();
        let t1 = start_thread(&mut pod, "t1", 10);
        let t2 = start_thread(&mut pod, "t2", 10);
        pod.sleep_on(synch, t1, INFINITE).unwrap();
        pod.sleep_on(synch, t2, INFINITE).unwrap();

        pod.flush(synch, ThreadState::RMID).unwrap();

        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::RMID));
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::READY));
        assert!(pod.threads.get(t2).unwrap().state.contains(ThreadState::RMID));
    }
}
