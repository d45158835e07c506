//! Abstract error categories (§7).
//!
//! These carry no payload beyond the variant, mirroring the teacher's
//! plain-enum-return style (`TaskStatus`, `TaskExitReason` in the teacher's
//! `abi::task`) rather than reaching for `thiserror`/`anyhow`, which the
//! teacher's `no_std` crates never pull in either.
//!
//! Reason bits (TIMEO/RMID/BREAK) are *not* represented here: they are
//! state-mask bits a caller reads back off the thread it just woke (§6),
//! not a `Result` an API returns.

/// Recoverable precondition/resource failures an API call may return.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodError {
    /// Caller-provided argument failed a precondition (null/invalid handle,
    /// priority out of range, invalid flag bits, wrong magic, illegal
    /// calling context).
    Inval,
    /// An exclusive state is already occupied (pod already active, timer
    /// already started).
    Busy,
    /// Stack or heap allocation failed.
    Nomem,
    /// Requested facility is absent on this architecture (e.g. aperiodic
    /// timer mode unavailable).
    Nosys,
    /// Attempt to perform a forbidden action (delete ROOT, restart a
    /// shadow/ROOT thread, self-suspend while holding the scheduler lock).
    Perm,
}

pub type PodResult<T> = Result<T, PodError>;

/// Heap-specific error granularity (§4.2), distinct from [`PodError`]
/// because the heap is a leaf allocator with its own failure modes that
/// don't map cleanly onto "invalid argument" vs. "out of memory".
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// `pagesize`/extent-size parameters failed validation.
    Param,
    /// Bucket or page exhaustion.
    Nomem,
    /// The freed block's address does not belong to this heap.
    NotInHeap,
    /// The freed block is unaligned or does not sit at a bucket/page start.
    BadBlock,
}

pub type HeapResult<T> = Result<T, HeapError>;
