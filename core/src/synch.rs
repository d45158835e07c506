//! Synchronization object (§4.5): a FIFO-or-priority wait queue with
//! optional priority-inheritance protocol (PIP).
//!
//! This module holds the object's data only — status flags, wait queue,
//! owner, claimed state — the same split `thread.rs`/`timer.rs` use
//! between "pool of data" and "algorithm that needs the whole pod at once".
//! `sleep_on`/`wakeup_one_sleeper`/`wakeup_this_sleeper`/`flush`/
//! `forget_sleeper` all need simultaneous mutable access to the thread
//! pool, the ready queues, and (transitively, for PIP) other
//! synchronization objects, so those live as [`crate::pod::Pod`] methods
//! in `pod.rs`; this module only owns what one object can answer about
//! itself.

use nanopod_abi::{PriorityDirection, SynchId, ThreadId};

use crate::queue::PrioQueue;

/// Wait-queue ordering a synchronization object was created with (§4.5
/// `init`: "stores FIFO/PRIO").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOrder {
    Fifo,
    Prio,
}

/// A synchronization object (§3 "Synchronization object").
pub struct SynchObject {
    pub order: WaitOrder,
    pub pip: bool,
    /// CLAIMED status bit (§3): `true` iff `owner` is non-null and this
    /// object is linked into `owner`'s claim list.
    pub claimed: bool,
    pub owner: Option<ThreadId>,
    /// Priority-ordered (or, in FIFO mode, constant-keyed so arrival order
    /// is preserved) wait queue — see `insert_key` below.
    pub waitq: PrioQueue<ThreadId>,
}

impl SynchObject {
    /// `init(synch, flags)` (§4.5): `direction` and `pip`/`order` come from
    /// the owning pod.
    pub fn new(order: WaitOrder, pip: bool, direction: PriorityDirection) -> Self {
        Self {
            order,
            pip,
            claimed: false,
            owner: None,
            waitq: PrioQueue::new(direction),
        }
    }

    /// The key a sleeper is inserted under: its own priority in `Prio`
    /// mode, or a constant in `Fifo` mode so every sleeper lands in the
    /// same equal-priority run and `PrioQueue::insert_fifo`'s "insert after
    /// equal priority" rule degenerates to plain arrival order.
    pub fn insert_key(&self, sleeper_cprio: nanopod_abi::Priority) -> nanopod_abi::Priority {
        match self.order {
            WaitOrder::Prio => sleeper_cprio,
            WaitOrder::Fifo => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waitq.is_empty()
    }

    pub fn waiter_count(&self) -> usize {
        self.waitq.len()
    }

    pub fn contains_waiter(&self, thread: ThreadId) -> bool {
        self.waitq.contains(thread)
    }
}

enum Slot {
    Occupied(SynchObject),
    Free { next_free: Option<u32> },
}

/// Fixed-capacity pool of [`SynchObject`]s, capacity [`nanopod_abi::MAX_SYNCHS`].
pub struct SynchPool {
    slots: alloc::vec::Vec<Slot>,
    free_head: Option<u32>,
    capacity: usize,
}

impl SynchPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: alloc::vec::Vec::new(),
            free_head: None,
            capacity,
        }
    }

    pub fn insert(&mut self, obj: SynchObject) -> Option<SynchId> {
        if let Some(idx) = self.free_head {
            let slot = &mut self.slots[idx as usize];
            let next_free = match slot {
                Slot::Free { next_free } => *next_free,
                Slot::Occupied(_) => unreachable!(),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied(obj);
            return Some(SynchId::new(idx));
        }
        if self.slots.len() >= self.capacity {
            return None;
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot::Occupied(obj));
        Some(SynchId::new(idx))
    }

    pub fn get(&self, id: SynchId) -> Option<&SynchObject> {
        match self.slots.get(id.index())? {
            Slot::Occupied(s) => Some(s),
            Slot::Free { .. } => None,
        }
    }

    pub fn get_mut(&mut self, id: SynchId) -> Option<&mut SynchObject> {
        match self.slots.get_mut(id.index())? {
            Slot::Occupied(s) => Some(s),
            Slot::Free { .. } => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SynchId, &SynchObject)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied(obj) => Some((SynchId::new(i as u32), obj)),
            Slot::Free { .. } => None,
        })
    }

    pub fn remove(&mut self, id: SynchId) -> Option<SynchObject> {
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
            Slot::Occupied(s) => Some(s),
            Slot::Free { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanopod_abi::PriorityDirection;

    #[test]
    fn fifo_order_ignores_priority_on_insert() {
        let mut s = SynchObject::new(WaitOrder::Fifo, false, PriorityDirection::Up);
        let k1 = s.insert_key(5);
        let k2 = s.insert_key(50);
        assert_eq!(k1, 0);
        assert_eq!(k2, 0);
        s.waitq.insert_fifo(k1, ThreadId::new(1));
        s.waitq.insert_fifo(k2, ThreadId::new(2));
        assert_eq!(s.waitq.pop_head(), Some((0, ThreadId::new(1))));
        assert_eq!(s.waitq.pop_head(), Some((0, ThreadId::new(2))));
    }

    #[test]
    fn prio_order_keys_by_sleeper_priority() {
        let mut s = SynchObject::new(WaitOrder::Prio, true, PriorityDirection::Up);
        s.waitq
            .insert_fifo(s.insert_key(10), ThreadId::new(1));
        s.waitq
            .insert_fifo(s.insert_key(30), ThreadId::new(2));
        assert_eq!(s.waitq.peek_head(), Some((30, ThreadId::new(2))));
    }

    #[test]
    fn pool_insert_remove_round_trip() {
        let mut pool = SynchPool::with_capacity(2);
        let id = pool
            .insert(SynchObject::new(WaitOrder::Fifo, false, PriorityDirection::Up))
            .unwrap();
        assert!(pool.get(id).is_some());
        assert!(pool.remove(id).is_some());
        assert!(pool.get(id).is_none());
    }
}
