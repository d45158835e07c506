//! Thread lifecycle and core scheduling operations (§4.4, §4.6).
//!
//! Named `sync_ops` — scheduler-*synchronous* operations on [`Pod`] itself
//! (start/stop/suspend/resume/renice/schedule/tick) — as distinct from the
//! sibling [`super::synch_ops`] module, which covers a *synchronization
//! object's* own wait/wake/priority-inheritance machinery. The split
//! mirrors the `xnpod_*` vs. `xnsynch_*` namespacing in the Xenomai
//! sources this spec was distilled from (see `DESIGN.md`).
//!
//! The low-level bit-twiddling helpers (`suspend_bits`, `resume_bits`,
//! `end_wait`, queue unlinking) live on [`PodCore`] and take the timer
//! wheel as an explicit parameter, for the same reason `PodCore`/`Pod` are
//! split in the first place (see the `pod` module's doc comment). The
//! public, skin-facing operations live on [`Pod`], which owns both fields
//! and threads them through.

use nanopod_abi::{INFINITE, PodError, PodResult, Priority, SynchId, ThreadId, ThreadState};
use nanopod_lib::klog_debug;

use crate::thread::{Location, ThreadEntry};
use crate::timer::TimerWheel;

use super::hooks::HookKind;
use super::{Pod, PodCore, PodFlags};

impl PodCore {
    /// Re-inserts a READY thread at the tail of its (possibly just
    /// changed) priority group, without disturbing any other thread.
    /// Shared by `rr_tick`'s same-priority rotation and a priority change
    /// that moves a running/ready thread into a different group.
    pub(crate) fn reposition_if_ready(&mut self, tid: ThreadId) {
        let Some(tcb) = self.threads.get(tid) else {
            return;
        };
        if !tcb.state.contains(ThreadState::READY) {
            return;
        }
        let cpu = tcb.home_cpu;
        let prio = tcb.cprio;
        self.ready[cpu].remove(tid);
        self.ready[cpu].insert_fifo(prio, tid);
        self.flags.insert(PodFlags::SCHED);
    }

    /// Unlinks `tid` from whatever collection it currently occupies (ready
    /// queue, suspend queue, or a synchronization object's wait queue),
    /// per its [`Location`] tag, without touching its state mask. Leaves
    /// `location` at `Location::None` afterward.
    pub(crate) fn unlink_from_current_queue(&mut self, tid: ThreadId) {
        let Some(tcb) = self.threads.get(tid) else {
            return;
        };
        match tcb.location {
            Location::Ready => {
                let cpu = tcb.home_cpu;
                self.ready[cpu].remove(tid);
            }
            Location::Suspended => {
                if let Some(pos) = self.suspendq.iter().position(|&t| t == tid) {
                    self.suspendq.remove(pos);
                }
            }
            Location::WaitQueue(synch) => {
                if let Some(obj) = self.synchs.get_mut(synch) {
                    obj.waitq.remove(tid);
                }
            }
            Location::None => {}
        }
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.location = Location::None;
        }
    }

    /// Core of `suspend(thread, mask, timeout, wchan)` (§4.6). The caller
    /// (`Pod::sleep_on`/`Pod::suspend_thread`) is responsible for already
    /// having linked `tid` onto `wchan`'s own wait queue before calling
    /// this — this only records the wait channel and queue placement, it
    /// does not itself enqueue on a synchronization object.
    pub(crate) fn suspend_bits(
        &mut self,
        tid: ThreadId,
        mask: ThreadState,
        timeout: u64,
        wchan: Option<SynchId>,
        wheel: &mut TimerWheel<PodCore>,
    ) -> PodResult<()> {
        let existing_wchan = self.threads.get(tid).ok_or(PodError::Inval)?.wait_channel;
        if existing_wchan.is_some() && wchan.is_some() {
            super::fatal("conjunctive wait: thread already has a wait channel");
        }

        self.unlink_from_current_queue(tid);

        let non_delay_only = !mask.difference(ThreadState::DELAY).is_empty();

        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        tcb.state = tcb.state.clear_reason_bits();
        tcb.state.insert(mask);

        if let Some(synch) = wchan {
            tcb.wait_channel = Some(synch);
            tcb.location = Location::WaitQueue(synch);
        } else if non_delay_only {
            tcb.location = Location::Suspended;
            self.suspendq.push(tid);
        } else {
            tcb.location = Location::None;
        }

        if timeout != INFINITE {
            let delay_timer = self.threads.get(tid).unwrap().delay_timer;
            wheel.start(delay_timer, timeout, 0);
            if let Some(tcb) = self.threads.get_mut(tid) {
                tcb.state.insert(ThreadState::DELAY);
            }
        }
        Ok(())
    }

    /// Core of `resume(thread, mask)` (§4.6): clears `mask`, and if the
    /// thread is now fully runnable, stops its delay timer (if armed),
    /// unlinks it from wherever it was, and re-inserts it at the **tail**
    /// of its priority group in the ready queue. A no-op (idempotent) if
    /// none of `mask` was actually set — see §8 "Idempotent resume".
    ///
    /// Does not itself dequeue from a synchronization object's wait queue:
    /// callers ending a `PEND` wait abnormally (timeout, `unblock`) go
    /// through [`PodCore::end_wait`] instead, which calls
    /// [`super::synch_ops`]'s `forget_sleeper` first.
    pub(crate) fn resume_bits(&mut self, tid: ThreadId, mask: ThreadState, wheel: &mut TimerWheel<PodCore>) {
        let Some(tcb) = self.threads.get_mut(tid) else {
            return;
        };
        if !tcb.state.intersects(mask) {
            return;
        }
        tcb.state.remove(mask);
        if !tcb.state.is_runnable() {
            return;
        }

        let delay_timer = tcb.delay_timer;
        if wheel.is_armed(delay_timer) {
            wheel.stop(delay_timer);
        }
        tcb.state.remove(ThreadState::DELAY);
        tcb.wait_channel = None;

        self.unlink_from_current_queue(tid);

        let cpu = self.threads.get(tid).unwrap().home_cpu;
        let prio = self.threads.get(tid).unwrap().cprio;
        self.ready[cpu].insert_fifo(prio, tid);
        let tcb = self.threads.get_mut(tid).unwrap();
        tcb.state.insert(ThreadState::READY);
        tcb.location = Location::Ready;
        self.flags.insert(PodFlags::SCHED);
    }

    /// Ends a `PEND`(+`DELAY`) wait abnormally — timeout or `unblock` — for
    /// `reason` (`TIMEO` or `BREAK`): dequeues from the wait channel (§4.5
    /// `forget_sleeper`, re-running PIP de-boost if needed) and then
    /// resumes normally. Scenario C: after this, `PEND` and `DELAY` are
    /// both clear and `TIMEO` is set.
    pub(crate) fn end_wait(&mut self, tid: ThreadId, reason: ThreadState, wheel: &mut TimerWheel<PodCore>) {
        let Some(tcb) = self.threads.get_mut(tid) else {
            return;
        };
        tcb.state = tcb.state.clear_reason_bits();
        tcb.state.insert(reason);
        let wchan = tcb.wait_channel;

        if let Some(synch) = wchan {
            self.forget_sleeper(tid, synch);
        }
        self.resume_bits(tid, ThreadState::PEND | ThreadState::DELAY, wheel);
    }
}

impl Pod {
    // -- Thread lifecycle (§4.4) --

    /// `init_thread` (§4.4, §6). `magic` is the caller skin's cookie,
    /// checked nowhere in this core (no skin is registered at this layer)
    /// but carried so a skin can verify it owns the handle it's holding.
    #[allow(clippy::too_many_arguments)]
    pub fn init_thread(
        &mut self,
        name: &str,
        prio: Priority,
        stacksize: usize,
        entry: Option<ThreadEntry>,
        cookie: u64,
        extra_flags: ThreadState,
        magic: u32,
    ) -> PodResult<ThreadId> {
        if prio < self.minpri || prio > self.maxpri {
            return Err(PodError::Inval);
        }
        let tid = self
            .spawn_tcb(name, prio, stacksize, entry, cookie, magic)
            .ok_or(PodError::Nomem)?;
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.state.insert(extra_flags.difference(ThreadState::DORMANT | ThreadState::SUSP));
        }
        klog_debug!("pod: init_thread {:?} prio={}", tid, prio);
        Ok(tid)
    }

    /// `start_thread` (§4.4): clears `DORMANT`, resumes the thread, fires
    /// start hooks. The first context switch into it is an ordinary
    /// `schedule()` pick, not a special case — its architecture register
    /// save area was already primed for `entry`/`cookie` at `init_thread`.
    pub fn start_thread(&mut self, tid: ThreadId) -> PodResult<()> {
        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        if !tcb.state.contains(ThreadState::DORMANT) {
            return Err(PodError::Inval);
        }
        tcb.state.remove(ThreadState::DORMANT);
        tcb.state.insert(ThreadState::STARTED);
        self.run_hooks(HookKind::Start, tid);
        self.core.resume_bits(tid, ThreadState::SUSP, &mut self.timers);
        Ok(())
    }

    /// `restart_thread` (§6): forbidden on `ROOT`/shadow threads (§7 PERM).
    /// Resets priority and signal state to their initial values and
    /// re-enters at the original entry point, same as a fresh `init` +
    /// `start`.
    pub fn restart_thread(&mut self, tid: ThreadId) -> PodResult<()> {
        let tcb = self.threads.get(tid).ok_or(PodError::Inval)?;
        if tcb.state.intersects(ThreadState::ROOT | ThreadState::SHADOW) {
            return Err(PodError::Perm);
        }
        let delay_timer = tcb.delay_timer;
        self.core.unlink_from_current_queue(tid);
        self.timers.stop(delay_timer);
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.cprio = tcb.iprio;
            tcb.bprio = tcb.iprio;
            tcb.claim_clear();
            tcb.wait_channel = None;
            tcb.pending_signals = 0;
            tcb.state = ThreadState::DORMANT | ThreadState::SUSP;
        }
        self.start_thread(tid)
    }

    /// `delete_thread` (§3 Lifecycle, §6): forbidden on `ROOT` (§7 PERM).
    /// Releases owned synchronization objects (undoing any PIP boost they
    /// held), unlinks from every queue, marks `ZOMBIE`, fires delete
    /// hooks. If `tid` is the thread currently running on `cpu`, the TCB
    /// storage itself is reclaimed only after the next `schedule()`
    /// actually switches away from it (§9 "Deferred delete of zombies");
    /// otherwise it is reclaimed immediately.
    pub fn delete_thread(&mut self, tid: ThreadId) -> PodResult<()> {
        let tcb = self.threads.get(tid).ok_or(PodError::Inval)?;
        if tcb.state.contains(ThreadState::ROOT) {
            return Err(PodError::Perm);
        }
        let self_cpu = self.runthread.iter().position(|&t| t == tid);
        let delay_timer = tcb.delay_timer;

        self.release_all_ownerships(tid);
        self.core.unlink_from_current_queue(tid);
        self.timers.stop(delay_timer);
        self.timers.destroy(delay_timer);

        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.state.remove(ThreadState::READY | ThreadState::PEND | ThreadState::SUSP | ThreadState::DELAY);
            tcb.state.insert(ThreadState::ZOMBIE);
        }

        self.run_hooks(HookKind::Delete, tid);
        klog_debug!("pod: delete_thread {:?} self_cpu={:?}", tid, self_cpu);

        match self_cpu {
            Some(cpu) => self.schedule(cpu),
            None => {
                self.threads.cleanup(tid);
            }
        }
        Ok(())
    }

    /// `set_thread_mode` (§6): toggles the subset of state-mask bits a
    /// skin may flip directly rather than through a suspension-point API
    /// (`LOCK`, `RRB`, `FPU`). Blocking bits and reason bits are never
    /// modifiable this way — they only change through `suspend`/`resume`/
    /// `unblock`/`renice`. Returns the mask as it was before the change.
    pub fn set_thread_mode(
        &mut self,
        tid: ThreadId,
        set_mask: ThreadState,
        clear_mask: ThreadState,
    ) -> PodResult<ThreadState> {
        const MODIFIABLE: ThreadState = ThreadState::LOCK.union(ThreadState::RRB).union(ThreadState::FPU);
        if !set_mask.difference(MODIFIABLE).is_empty() || !clear_mask.difference(MODIFIABLE).is_empty() {
            return Err(PodError::Inval);
        }
        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        let old = tcb.state;
        tcb.state.remove(clear_mask);
        tcb.state.insert(set_mask);
        Ok(old)
    }

    // -- Suspension / resumption (§4.6) --

    /// `suspend_thread` (§6, §4.6): forbidden (PERM) as a self-suspend
    /// while the caller holds the scheduler lock (§7). `wchan` is `None`
    /// here — suspension with a wait channel only ever happens through
    /// [`Pod::sleep_on`], which has already linked the thread onto the
    /// object's own wait queue first.
    pub fn suspend_thread(
        &mut self,
        tid: ThreadId,
        mask: ThreadState,
        timeout: u64,
        cpu: usize,
    ) -> PodResult<()> {
        let is_self = self.runthread.get(cpu).copied() == Some(tid);
        if is_self {
            if let Some(tcb) = self.threads.get(tid) {
                if tcb.state.contains(ThreadState::LOCK) {
                    return Err(PodError::Perm);
                }
            }
        }
        self.core.suspend_bits(tid, mask, timeout, None, &mut self.timers)?;
        if is_self {
            self.schedule(cpu);
        }
        Ok(())
    }

    /// `resume_thread` (§6): idempotent if none of `mask` was set (§8).
    pub fn resume_thread(&mut self, tid: ThreadId, mask: ThreadState) -> PodResult<()> {
        if self.threads.get(tid).is_none() {
            return Err(PodError::Inval);
        }
        self.core.resume_bits(tid, mask, &mut self.timers);
        Ok(())
    }

    /// `unblock_thread` (§6, §4.6): ends `PEND`/`DELAY` with `BREAK` set,
    /// leaving `SUSP`/`RELAX`/`DORMANT` untouched. A no-op if the thread is
    /// blocked by neither.
    pub fn unblock_thread(&mut self, tid: ThreadId) -> PodResult<()> {
        let tcb = self.threads.get(tid).ok_or(PodError::Inval)?;
        if !tcb.state.intersects(ThreadState::PEND | ThreadState::DELAY) {
            return Ok(());
        }
        self.core.end_wait(tid, ThreadState::BREAK, &mut self.timers);
        Ok(())
    }

    // -- Priority change (§4.6) --

    /// `renice_thread` (§6, §4.6 "Priority change"). Propagates to a
    /// mated host task if `tid` is a shadow (§4.7).
    pub fn renice_thread(&mut self, tid: ThreadId, newprio: Priority) -> PodResult<()> {
        if newprio < self.minpri || newprio > self.maxpri {
            return Err(PodError::Inval);
        }
        let (is_boosted, cprio) = {
            let tcb = self.threads.get(tid).ok_or(PodError::Inval)?;
            (tcb.state.contains(ThreadState::BOOST), tcb.cprio)
        };
        let should_apply = !is_boosted || self.direction.more_urgent(newprio, cprio);

        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        tcb.bprio = newprio;
        if should_apply {
            tcb.cprio = newprio;
        }

        if should_apply {
            self.core.reposition_after_prio_change(tid);
        }
        crate::shadow::propagate_renice(tid, newprio);
        Ok(())
    }

    // -- Scheduling core (§4.6 "Scheduling") --

    /// `schedule()` (§4.6): the single reschedule entry point for `cpu`.
    pub fn schedule(&mut self, cpu: usize) {
        if self.in_hook_context() {
            return;
        }
        let current = match self.runthread.get(cpu).copied() {
            Some(t) if t.is_valid() => t,
            _ => return,
        };

        if let Some(tcb) = self.threads.get(current) {
            if tcb.state.contains(ThreadState::LOCK) && tcb.state.is_runnable() {
                self.dispatch_signals(current);
                return;
            }
            if tcb.state.contains(ThreadState::KILLED) {
                self.delete_thread(current).ok();
                return;
            }
        }

        self.flags.remove(PodFlags::SCHED);

        let current_stays = self
            .threads
            .get(current)
            .map(|t| {
                t.state.is_runnable()
                    && self
                        .ready[cpu]
                        .head_priority()
                        .map(|hp| !self.direction.more_urgent(hp, t.cprio))
                        .unwrap_or(true)
            })
            .unwrap_or(false);

        let next = if current_stays {
            current
        } else {
            // A more urgent thread is ready (or `current` itself is no
            // longer runnable). If `current` is still runnable, it is being
            // preempted, not blocked: put it back at the front of its
            // priority group (`ROOT` included, since nothing else ever
            // re-queues it) so it stays schedulable once everything more
            // urgent blocks. `is_runnable` already excludes `ZOMBIE` via
            // `BLOCKING`, so an outgoing zombie is correctly left out.
            if self.threads.get(current).is_some_and(|t| t.state.is_runnable()) {
                self.preempt_current(cpu);
            }
            match self.ready[cpu].pop_head() {
                Some((_, tid)) => tid,
                None => super::fatal("schedule: ready queue is empty"),
            }
        };

        if next == current {
            return;
        }

        if let Some(tcb) = self.threads.get_mut(next) {
            tcb.state.remove(ThreadState::READY);
            tcb.location = Location::None;
        }

        let outgoing_zombie = self
            .threads
            .get(current)
            .map(|t| t.state.contains(ThreadState::ZOMBIE))
            .unwrap_or(false);

        self.run_hooks(HookKind::Switch, next);

        if outgoing_zombie {
            self.threads.cleanup(current);
        }

        let next_uses_fpu = self
            .threads
            .get(next)
            .map(|t| t.state.contains(ThreadState::FPU))
            .unwrap_or(false);
        if next_uses_fpu {
            let prior = self.fpu_holder[cpu];
            let prior = if prior.is_valid() { Some(prior) } else { None };
            crate::platform::fpu_switch(prior, next);
            self.fpu_holder[cpu] = next;
        }

        crate::platform::context_switch(current, next);
        self.runthread[cpu] = next;

        let now = self.timers.jiffies();
        if let Some(tcb) = self.threads.get_mut(next) {
            tcb.last_scheduled_jiffy = now;
        }

        self.dispatch_signals(next);
    }

    /// `schedule_runnable(thread, flags)` (§4.6): internal variant used by
    /// synchronization-object code to re-insert a thread LIFO (at the
    /// front of its priority group) or FIFO (at the tail), with an
    /// explicit choice of whether to reschedule immediately (`NOSWITCH`
    /// maps to `do_switch = false`).
    pub(crate) fn schedule_runnable(&mut self, tid: ThreadId, lifo: bool, do_switch: bool, cpu: usize) {
        let Some(tcb) = self.threads.get(tid) else {
            return;
        };
        let prio = tcb.cprio;
        self.core.unlink_from_current_queue(tid);
        if lifo {
            self.ready[cpu].insert_lifo(prio, tid);
        } else {
            self.ready[cpu].insert_fifo(prio, tid);
        }
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.state.remove(ThreadState::PEND | ThreadState::DELAY | ThreadState::SUSP | ThreadState::DORMANT);
            tcb.state.insert(ThreadState::READY);
            tcb.wait_channel = None;
            tcb.location = Location::Ready;
        }
        self.flags.insert(PodFlags::SCHED);
        if do_switch {
            self.schedule(cpu);
        }
    }

    /// `preempt_current` (§4.6): inserts the running thread at the front
    /// of its priority group (LIFO) — used when a more urgent thread has
    /// just become ready and the running thread must yield immediately
    /// without losing its place relative to any peers it was already
    /// ahead of.
    pub fn preempt_current(&mut self, cpu: usize) {
        let Some(tid) = self.runthread.get(cpu).copied().filter(|t| t.is_valid()) else {
            return;
        };
        self.schedule_runnable(tid, true, false, cpu);
    }

    // -- Asynchronous signals (§4.6) --

    /// `dispatch_signals` (§4.6): fires when signals are pending and the
    /// thread is eligible (ASR installed, not `ASDI`). Mode-bit save and
    /// ASR interrupt-mask installation are architecture-specific register
    /// manipulation out of this crate's scope (§1); what's modeled here is
    /// the snapshot/clear/invoke protocol itself.
    pub fn dispatch_signals(&mut self, tid: ThreadId) {
        let Some(tcb) = self.threads.get(tid) else {
            return;
        };
        if tcb.pending_signals == 0 || tcb.asdi {
            return;
        }
        let Some(asr) = tcb.asr else {
            return;
        };
        let sigs = tcb.pending_signals;
        if let Some(tcb) = self.threads.get_mut(tid) {
            tcb.pending_signals = 0;
        }
        asr(sigs);
    }

    // -- Round-robin driver (§4.6, delegates to `pod::rr`) --

    /// `announce_tick(n)` (§4.6): advances the timer wheel by `n` jiffies
    /// (firing expired timers) and then applies round-robin bookkeeping on
    /// every CPU.
    pub fn announce_tick(&mut self, n: u32) {
        self.timers.do_timers(n, &mut self.core);
        for cpu in 0..self.ncpus {
            self.rr_tick(cpu, n);
        }
    }

    // -- Clock (§6) --

    pub fn get_cpu_time(&self, tid: ThreadId) -> PodResult<u64> {
        self.threads.get(tid).map(|t| t.runtime_ticks).ok_or(PodError::Inval)
    }

    pub fn ticks2sec(&self, ticks: u64) -> u64 {
        if self.ticks_per_sec == 0 {
            0
        } else {
            ticks / self.ticks_per_sec
        }
    }

    pub fn set_time(&mut self, ticks: u64) {
        self.wallclock_base = ticks.saturating_sub(self.timers.jiffies());
        self.flags.insert(PodFlags::TMSET);
    }

    pub fn get_time(&self) -> u64 {
        self.wallclock_base + self.timers.jiffies()
    }

    /// `start_timer` (§6, §4.3 "Two hardware modes"): `BUSY` if a timer is
    /// already installed, `NOSYS` if aperiodic mode is requested but the
    /// architecture never registered a one-shot-programmable timer.
    pub fn start_timer(&mut self, tick_ns: u64, periodic: bool) -> PodResult<()> {
        if self.flags.contains(PodFlags::TIMED) {
            return Err(PodError::Busy);
        }
        if !periodic && !crate::platform::aperiodic_supported() {
            return Err(PodError::Nosys);
        }
        self.tick_ns = tick_ns;
        self.ticks_per_sec = if tick_ns == 0 { 0 } else { 1_000_000_000 / tick_ns };
        self.flags.insert(PodFlags::TIMED);
        if periodic {
            self.flags.insert(PodFlags::TMPER);
            crate::platform::program_periodic(tick_ns);
        } else {
            self.flags.remove(PodFlags::TMPER);
            crate::platform::program_one_shot(tick_ns);
        }
        Ok(())
    }

    pub fn stop_timer(&mut self) {
        self.flags.remove(PodFlags::TIMED | PodFlags::TMPER);
    }

    // -- Cyclic (periodic) threads (§6) --

    pub fn set_thread_periodic(&mut self, tid: ThreadId, period_ticks: u64) -> PodResult<()> {
        let tcb = self.threads.get_mut(tid).ok_or(PodError::Inval)?;
        tcb.period_ticks = period_ticks;
        Ok(())
    }

    /// `wait_thread_period` (§6): suspends the caller (a plain counted
    /// delay, no wait channel) until the next period boundary computed
    /// from its last scheduled jiffy.
    pub fn wait_thread_period(&mut self, tid: ThreadId, cpu: usize) -> PodResult<()> {
        let tcb = self.threads.get(tid).ok_or(PodError::Inval)?;
        if tcb.period_ticks == 0 {
            return Err(PodError::Inval);
        }
        let now = self.timers.jiffies();
        let next = if tcb.last_scheduled_jiffy == 0 {
            now + tcb.period_ticks
        } else {
            tcb.last_scheduled_jiffy + tcb.period_ticks
        };
        let delay = next.saturating_sub(now).max(1);
        self.suspend_thread(tid, ThreadState::DELAY, delay, cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::test_support::{new_pod, start_thread};
    use nanopod_abi::INFINITE;

    #[test]
    fn round_trip_suspend_resume_returns_to_ready() {
        let mut pod = new_pod(1, 255);
        let t1 = start_thread(&mut pod, "t1", 10);
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::READY));
        pod.suspend_thread(t1, ThreadState::SUSP, INFINITE, 0).unwrap();
        assert!(!pod.threads.get(t1).unwrap().state.contains(ThreadState::READY));
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::SUSP));
        pod.resume_thread(t1, ThreadState::SUSP).unwrap();
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::READY));
    }

    #[test]
    fn idempotent_resume_on_already_unblocked_thread_is_a_noop() {
        let mut pod = new_pod(1, 255);
        let t1 = start_thread(&mut pod, "t1", 10);
        pod.resume_thread(t1, ThreadState::SUSP).unwrap();
        pod.resume_thread(t1, ThreadState::SUSP).unwrap();
        assert!(pod.threads.get(t1).unwrap().state.contains(ThreadState::READY));
    }

    #[test]
    fn delete_thread_on_root_is_forbidden() {
        let mut pod = new_pod(1, 255);
        let root = pod.root[0];
        assert_eq!(pod.delete_thread(root).unwrap_err(), PodError::Perm);
    }

    #[test]
    fn schedule_switches_to_more_urgent_ready_thread() {
        let mut pod = new_pod(1, 255);
        let low = start_thread(&mut pod, "low", 10);
        pod.runthread[0] = low;
        pod.threads.get_mut(low).unwrap().state.remove(ThreadState::READY);
        pod.ready[0].remove(low);

        let high = start_thread(&mut pod, "high", 50);
        pod.schedule(0);
        assert_eq!(pod.runthread[0], high);
    }

    #[test]
    fn renice_moves_ready_thread_to_new_priority_group_tail() {
        let mut pod = new_pod(1, 255);
        let t1 = start_thread(&mut pod, "t1", 10);
        let t2 = start_thread(&mut pod, "t2", 20);
        pod.renice_thread(t1, 30).unwrap();
        assert_eq!(pod.ready[0].peek_head().map(|(_, t)| t), Some(t1));
        let _ = t2;
    }
}
