//! Prioritized queue (§4.1): an ordered list of holders keyed by integer
//! priority, with a stored direction so the same comparator serves both
//! insertion orders.
//!
//! The spec describes an intrusive doubly linked list with O(1) removal.
//! This core represents the ready queue, wait queues, and claim lists as
//! fixed-capacity pools indexed by `u32` handles (§9 Design Notes), so the
//! natural holder collection is a `Vec` of `(Priority, handle)` pairs kept
//! sorted on insert; removal is O(n) in queue length rather than O(1). Queue
//! lengths are bounded by `MAX_THREADS`/`MAX_SYNCHS`, so this trades a
//! pointer-chasing intrusive list for a cache-friendly flat one without
//! changing any externally observable ordering.

use alloc::vec::Vec;

use nanopod_abi::{Priority, PriorityDirection};

/// An ordered holder list over `H`, sorted by priority in `direction`.
#[derive(Debug)]
pub struct PrioQueue<H> {
    direction: PriorityDirection,
    entries: Vec<(Priority, H)>,
}

impl<H: Copy + PartialEq> PrioQueue<H> {
    pub fn new(direction: PriorityDirection) -> Self {
        Self {
            direction,
            entries: Vec::new(),
        }
    }

    pub fn direction(&self) -> PriorityDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first entry that is not strictly more urgent than `prio`
    /// (i.e. the insertion point before any equal-or-less-urgent run).
    fn skip_strictly_more_urgent(&self, prio: Priority) -> usize {
        let mut idx = 0;
        while idx < self.entries.len() && self.direction.more_urgent(self.entries[idx].0, prio) {
            idx += 1;
        }
        idx
    }

    /// Insert after any existing equal-priority run (FIFO ordering within a
    /// priority group: last-in is last-out among peers).
    pub fn insert_fifo(&mut self, prio: Priority, holder: H) {
        let mut idx = self.skip_strictly_more_urgent(prio);
        while idx < self.entries.len() && self.entries[idx].0 == prio {
            idx += 1;
        }
        self.entries.insert(idx, (prio, holder));
    }

    /// Insert before any existing equal-priority run (LIFO ordering within a
    /// priority group: used by `preempt_current`/`schedule_runnable(LIFO)`).
    pub fn insert_lifo(&mut self, prio: Priority, holder: H) {
        let idx = self.skip_strictly_more_urgent(prio);
        self.entries.insert(idx, (prio, holder));
    }

    pub fn peek_head(&self) -> Option<(Priority, H)> {
        self.entries.first().copied()
    }

    pub fn pop_head(&mut self) -> Option<(Priority, H)> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove the first entry holding `holder`, if present. Returns its
    /// priority.
    pub fn remove(&mut self, holder: H) -> Option<Priority>
    where
        H: PartialEq,
    {
        let pos = self.entries.iter().position(|(_, h)| *h == holder)?;
        Some(self.entries.remove(pos).0)
    }

    pub fn contains(&self, holder: H) -> bool {
        self.entries.iter().any(|(_, h)| *h == holder)
    }

    /// Highest (most urgent) priority currently queued, if any.
    pub fn head_priority(&self) -> Option<Priority> {
        self.entries.first().map(|(p, _)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Priority, H)> + '_ {
        self.entries.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_keeps_insertion_order_within_priority_group() {
        let mut q: PrioQueue<u32> = PrioQueue::new(PriorityDirection::Up);
        q.insert_fifo(10, 1);
        q.insert_fifo(10, 2);
        q.insert_fifo(10, 3);
        assert_eq!(q.pop_head(), Some((10, 1)));
        assert_eq!(q.pop_head(), Some((10, 2)));
        assert_eq!(q.pop_head(), Some((10, 3)));
    }

    #[test]
    fn lifo_reverses_order_within_priority_group() {
        let mut q: PrioQueue<u32> = PrioQueue::new(PriorityDirection::Up);
        q.insert_lifo(10, 1);
        q.insert_lifo(10, 2);
        q.insert_lifo(10, 3);
        assert_eq!(q.pop_head(), Some((10, 3)));
        assert_eq!(q.pop_head(), Some((10, 2)));
        assert_eq!(q.pop_head(), Some((10, 1)));
    }

    #[test]
    fn head_is_most_urgent_regardless_of_insertion_order() {
        let mut q: PrioQueue<u32> = PrioQueue::new(PriorityDirection::Up);
        q.insert_fifo(10, 1);
        q.insert_fifo(30, 2);
        q.insert_fifo(20, 3);
        assert_eq!(q.peek_head(), Some((30, 2)));
    }

    #[test]
    fn down_direction_orders_smaller_first() {
        let mut q: PrioQueue<u32> = PrioQueue::new(PriorityDirection::Down);
        q.insert_fifo(10, 1);
        q.insert_fifo(1, 2);
        q.insert_fifo(5, 3);
        assert_eq!(q.pop_head(), Some((1, 2)));
        assert_eq!(q.pop_head(), Some((5, 3)));
        assert_eq!(q.pop_head(), Some((10, 1)));
    }

    #[test]
    fn remove_drops_the_matching_holder() {
        let mut q: PrioQueue<u32> = PrioQueue::new(PriorityDirection::Up);
        q.insert_fifo(10, 1);
        q.insert_fifo(20, 2);
        assert_eq!(q.remove(1), Some(10));
        assert!(!q.contains(1));
        assert_eq!(q.peek_head(), Some((20, 2)));
    }
}
