//! Hook chains (§4.6, §9): thread-start, thread-switch, thread-delete.
//!
//! "FIFO singly linked lists of function objects; the dispatcher must take
//! a snapshot of the next pointer before each call because callbacks may
//! unlink themselves" (§9 Design Notes). Hooks here are plain `fn` pointers
//! with a cookie rather than boxed closures — matching this crate's own
//! established idiom for crossing the core/skin boundary
//! (`nanopod_lib::irq`/`klog`'s `AtomicPtr`-registered callbacks,
//! `crate::platform`'s `register_*` points): a skin is a distinct
//! compilation unit (possibly reimplementing a legacy C ABI), so a plain
//! function pointer plus an opaque cookie is the shape that crosses that
//! boundary without requiring the skin to hand the core a `'static`
//! closure.

use alloc::vec::Vec;

use nanopod_abi::ThreadId;

use crate::linkpool::{Link, LinkPool};

/// Upper bound on hooks per chain. Skins rarely register more than a
/// handful; bounded the same way the thread/synch pools are.
pub const HOOK_CAPACITY: usize = 16;

pub type HookFn = fn(ThreadId, u64);

/// One FIFO chain of `(callback, cookie)` pairs.
pub struct HookChain {
    pool: LinkPool<(HookFn, u64)>,
}

impl HookChain {
    pub fn new() -> Self {
        Self {
            pool: LinkPool::with_capacity(HOOK_CAPACITY),
        }
    }

    pub fn add(&mut self, f: HookFn, cookie: u64) -> Option<Link> {
        self.pool.insert((f, cookie))
    }

    pub fn remove(&mut self, link: Link) -> bool {
        self.pool.remove(link).is_some()
    }

    /// Dispatches every live hook with `thread`, snapshotting the set of
    /// handles up front so a hook that removes itself (or another hook)
    /// mid-dispatch cannot invalidate the iteration (§9).
    pub fn dispatch(&self, thread: ThreadId) {
        let handles: Vec<Link> = self.pool.iter().map(|(l, _)| l).collect();
        for link in handles {
            if let Some(&(f, cookie)) = self.pool.get(link) {
                f(thread, cookie);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new()
    }
}

use super::{Pod, PodFlags};

impl Pod {
    /// `add_hook` (§6). `which` selects the chain; skins are expected to
    /// know which one they're registering for (start/switch/delete), so
    /// this takes an enum rather than three near-identical methods.
    pub fn add_hook(&mut self, which: HookKind, f: HookFn, cookie: u64) -> Option<Link> {
        match which {
            HookKind::Start => self.start_hooks.add(f, cookie),
            HookKind::Switch => self.switch_hooks.add(f, cookie),
            HookKind::Delete => self.delete_hooks.add(f, cookie),
        }
    }

    pub fn remove_hook(&mut self, which: HookKind, link: Link) -> bool {
        match which {
            HookKind::Start => self.start_hooks.remove(link),
            HookKind::Switch => self.switch_hooks.remove(link),
            HookKind::Delete => self.delete_hooks.remove(link),
        }
    }

    /// Runs a hook chain with `KCOUT` set so `schedule()` no-ops for the
    /// duration (§4.6 "While a hook runs, the KCOUT bit is set on the pod;
    /// reschedule is a no-op").
    pub(crate) fn run_hooks(&mut self, which: HookKind, thread: ThreadId) {
        let was_set = self.flags.contains(PodFlags::KCOUT);
        self.flags.insert(PodFlags::KCOUT);
        match which {
            HookKind::Start => self.core.start_hooks.dispatch(thread),
            HookKind::Switch => self.core.switch_hooks.dispatch(thread),
            HookKind::Delete => self.core.delete_hooks.dispatch(thread),
        }
        if !was_set {
            self.flags.remove(PodFlags::KCOUT);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    Start,
    Switch,
    Delete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::test_support::new_pod;
    use core::sync::atomic::{AtomicU32, Ordering};

    static HOOK_HITS: AtomicU32 = AtomicU32::new(0);

    fn bump_hook(_t: ThreadId, _cookie: u64) {
        HOOK_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn hooks_dispatch_in_fifo_order_and_set_kcout() {
        HOOK_HITS.store(0, Ordering::SeqCst);
        let mut pod = new_pod(1, 99);
        pod.add_hook(HookKind::Start, bump_hook, 0);
        pod.add_hook(HookKind::Start, bump_hook, 0);
        assert!(!pod.in_hook_context());
        pod.run_hooks(HookKind::Start, ThreadId::new(0));
        assert_eq!(HOOK_HITS.load(Ordering::SeqCst), 2);
        assert!(!pod.in_hook_context(), "KCOUT must clear after dispatch");
    }

    #[test]
    fn removed_hook_does_not_fire() {
        HOOK_HITS.store(0, Ordering::SeqCst);
        let mut pod = new_pod(1, 99);
        let link = pod.add_hook(HookKind::Start, bump_hook, 0).unwrap();
        pod.remove_hook(HookKind::Start, link);
        pod.run_hooks(HookKind::Start, ThreadId::new(0));
        assert_eq!(HOOK_HITS.load(Ordering::SeqCst), 0);
    }
}
