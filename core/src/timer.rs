//! Hashed timing wheel (§4.3): fires one-shot and periodic timers.
//!
//! A timer's callback needs to act on whatever owns the timer (resume a
//! thread, run a skin's registered handler) — state this crate doesn't
//! know about at this layer. Rather than threading a `dyn Fn` through a
//! `no_std` wheel, [`TimerWheel`] is generic over a caller-supplied context
//! `X` and callbacks are plain function pointers `fn(TimerId, &mut X, &mut
//! TimerWheel<X>, cookie)`; the wheel passes itself back in so a callback
//! that rearms or destroys its own timer (§4.3 "detected" behavior) can call
//! [`TimerWheel::start`]/[`TimerWheel::destroy`] reentrantly without the
//! wheel needing to know what a "thread" or "pod" is.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use nanopod_abi::{INFINITE, TimerId, WHEELSIZE};
use nanopod_lib::klog_warn;

pub type TimerCallback<X> = fn(TimerId, &mut X, &mut TimerWheel<X>, u64);

struct TimerRecord<X> {
    target: u64,
    period: u64,
    cookie: u64,
    callback: TimerCallback<X>,
    /// Not linked into any wheel slot.
    dequeued: bool,
}

/// A hashed timing wheel over a fixed power-of-two slot array (§3
/// "Timer wheel"). `jiffies` is the wheel's own tick counter; the pod
/// advances it by calling [`TimerWheel::do_timers`] once per tick
/// announcement.
pub struct TimerWheel<X> {
    records: Vec<Option<TimerRecord<X>>>,
    free_list: Vec<u32>,
    slots: Vec<VecDeque<TimerId>>,
    jiffies: u64,
}

impl<X> TimerWheel<X> {
    /// `capacity` bounds how many timers (standalone plus thread-embedded
    /// delay timers) this wheel can host simultaneously.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            slots: (0..WHEELSIZE).map(|_| VecDeque::new()).collect(),
            jiffies: 0,
        }
    }

    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    fn slot_of(target: u64) -> usize {
        (target as usize) & (WHEELSIZE - 1)
    }

    /// Prepares a timer with `DEQUEUED` set (§4.3 `init`). Returns `None`
    /// if the pool is exhausted.
    pub fn init(&mut self, callback: TimerCallback<X>, cookie: u64) -> Option<TimerId> {
        let record = TimerRecord {
            target: 0,
            period: 0,
            cookie,
            callback,
            dequeued: true,
        };
        if let Some(idx) = self.free_list.pop() {
            self.records[idx as usize] = Some(record);
            return Some(TimerId::new(idx));
        }
        let idx = self.records.len() as u32;
        self.records.push(Some(record));
        Some(TimerId::new(idx))
    }

    fn record_mut(&mut self, id: TimerId) -> Option<&mut TimerRecord<X>> {
        self.records.get_mut(id.index())?.as_mut()
    }

    fn unlink_from_slot(&mut self, id: TimerId, target: u64) {
        let slot = &mut self.slots[Self::slot_of(target)];
        if let Some(pos) = slot.iter().position(|&t| t == id) {
            slot.remove(pos);
        }
    }

    /// `start(timer, value, period)` (§4.3): if already armed, re-arm from
    /// scratch. `value == INFINITE` disarms the timer without inserting it.
    pub fn start(&mut self, id: TimerId, value: u64, period: u64) -> bool {
        let Some(rec) = self.records.get(id.index()).and_then(|r| r.as_ref()) else {
            return false;
        };
        if !rec.dequeued {
            let old_target = rec.target;
            self.unlink_from_slot(id, old_target);
        }
        let Some(rec) = self.record_mut(id) else {
            return false;
        };
        rec.period = period;
        if value == INFINITE {
            rec.dequeued = true;
            return true;
        }
        let target = self.jiffies + value;
        rec.target = target;
        rec.dequeued = false;
        self.slots[Self::slot_of(target)].push_front(id);
        true
    }

    /// `stop(timer)` (§4.3): removes it from the wheel if linked.
    pub fn stop(&mut self, id: TimerId) -> bool {
        let Some(rec) = self.records.get(id.index()).and_then(|r| r.as_ref()) else {
            return false;
        };
        if !rec.dequeued {
            let target = rec.target;
            self.unlink_from_slot(id, target);
        }
        if let Some(rec) = self.record_mut(id) {
            rec.dequeued = true;
            true
        } else {
            false
        }
    }

    /// Destroys a timer outright (the "KILLED" outcome in §4.3): the slot
    /// is returned to the free list and the timer is never re-inserted,
    /// even if it was mid-fire when this was called.
    pub fn destroy(&mut self, id: TimerId) {
        if let Some(rec) = self.records.get(id.index()).and_then(|r| r.as_ref()) {
            if !rec.dequeued {
                let target = rec.target;
                self.unlink_from_slot(id, target);
            }
        }
        if id.index() < self.records.len() {
            self.records[id.index()] = None;
            self.free_list.push(id.0);
        }
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.records
            .get(id.index())
            .and_then(|r| r.as_ref())
            .is_some_and(|r| !r.dequeued)
    }

    /// `do_timers(n)` (§4.3): advances the wheel by `n` jiffies, firing
    /// every timer whose target has been reached in each jiffy's slot.
    pub fn do_timers(&mut self, n: u32, ctx: &mut X) {
        if n > WHEELSIZE as u32 {
            klog_warn!(
                "timer: do_timers asked to catch up {} jiffies, more than one full wheel revolution",
                n
            );
        }
        for _ in 0..n {
            self.fire_one_jiffy(ctx);
            self.jiffies += 1;
        }
    }

    fn fire_one_jiffy(&mut self, ctx: &mut X) {
        let slot_idx = Self::slot_of(self.jiffies);
        let due: Vec<TimerId> = {
            let slot = &mut self.slots[slot_idx];
            let mut due = Vec::new();
            let mut keep = VecDeque::new();
            while let Some(id) = slot.pop_front() {
                let target = self.records[id.index()].as_ref().map(|r| r.target);
                match target {
                    Some(t) if t <= self.jiffies => due.push(id),
                    Some(_) => keep.push_back(id),
                    None => {}
                }
            }
            *slot = keep;
            due
        };

        for id in due {
            let Some((callback, cookie, period)) = self
                .records
                .get_mut(id.index())
                .and_then(|r| r.as_mut())
                .map(|r| {
                    r.dequeued = true;
                    (r.callback, r.cookie, r.period)
                })
            else {
                continue;
            };

            callback(id, ctx, self, cookie);

            let still_dequeued_and_periodic = self
                .records
                .get(id.index())
                .and_then(|r| r.as_ref())
                .is_some_and(|r| r.dequeued && period != 0);
            if still_dequeued_and_periodic {
                self.start(id, period, period);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        fires: u32,
    }

    fn bump(_id: TimerId, ctx: &mut Counter, _wheel: &mut TimerWheel<Counter>, _cookie: u64) {
        ctx.fires += 1;
    }

    #[test]
    fn one_shot_fires_exactly_once_at_target() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::with_capacity(4);
        let mut ctx = Counter { fires: 0 };
        let id = wheel.init(bump, 0).unwrap();
        wheel.start(id, 5, 0);
        wheel.do_timers(4, &mut ctx);
        assert_eq!(ctx.fires, 0);
        wheel.do_timers(1, &mut ctx);
        assert_eq!(ctx.fires, 1);
        wheel.do_timers(10, &mut ctx);
        assert_eq!(ctx.fires, 1, "one-shot must not refire");
    }

    #[test]
    fn periodic_timer_rearms_itself() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::with_capacity(4);
        let mut ctx = Counter { fires: 0 };
        let id = wheel.init(bump, 0).unwrap();
        wheel.start(id, 3, 3);
        wheel.do_timers(10, &mut ctx);
        assert_eq!(ctx.fires, 3);
    }

    #[test]
    fn stop_prevents_firing() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::with_capacity(4);
        let mut ctx = Counter { fires: 0 };
        let id = wheel.init(bump, 0).unwrap();
        wheel.start(id, 5, 0);
        wheel.stop(id);
        wheel.do_timers(10, &mut ctx);
        assert_eq!(ctx.fires, 0);
    }

    #[test]
    fn infinite_value_disarms_without_inserting() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::with_capacity(4);
        let mut ctx = Counter { fires: 0 };
        let id = wheel.init(bump, 0).unwrap();
        wheel.start(id, INFINITE, 0);
        assert!(!wheel.is_armed(id));
        wheel.do_timers(1000, &mut ctx);
        assert_eq!(ctx.fires, 0);
    }

    fn self_destroy(id: TimerId, ctx: &mut Counter, wheel: &mut TimerWheel<Counter>, _cookie: u64) {
        ctx.fires += 1;
        wheel.destroy(id);
    }

    #[test]
    fn destroyed_timer_never_reinserted_even_if_periodic() {
        let mut wheel: TimerWheel<Counter> = TimerWheel::with_capacity(4);
        let mut ctx = Counter { fires: 0 };
        let id = wheel.init(self_destroy, 0).unwrap();
        wheel.start(id, 2, 2);
        wheel.do_timers(20, &mut ctx);
        assert_eq!(ctx.fires, 1);
    }

    #[test]
    fn restarting_from_within_callback_is_not_double_rearmed() {
        fn restart_longer(
            id: TimerId,
            ctx: &mut Counter,
            wheel: &mut TimerWheel<Counter>,
            _cookie: u64,
        ) {
            ctx.fires += 1;
            wheel.start(id, 100, 0);
        }
        let mut wheel: TimerWheel<Counter> = TimerWheel::with_capacity(4);
        let mut ctx = Counter { fires: 0 };
        let id = wheel.init(restart_longer, 0).unwrap();
        wheel.start(id, 3, 3);
        wheel.do_timers(5, &mut ctx);
        assert_eq!(ctx.fires, 1);
        wheel.do_timers(90, &mut ctx);
        assert_eq!(ctx.fires, 1, "should only fire at jiffy 103, not also at 6/9");
        wheel.do_timers(10, &mut ctx);
        assert_eq!(ctx.fires, 2);
    }
}
