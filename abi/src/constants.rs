//! Compile-time capacities shared by the core and its skins.
//!
//! Centralizing these here mirrors the teacher's `abi::task::{MAX_TASKS,
//! TASK_STACK_SIZE}` pattern: both `nanopod-core` and any skin crate that
//! links against it need to agree on the same fixed pool sizes without a
//! config file or environment variable (there is none, per §6).

/// Upper bound on live threads in one pod, including ROOT threads.
pub const MAX_THREADS: usize = 64;

/// Upper bound on live synchronization objects in one pod.
pub const MAX_SYNCHS: usize = 64;

/// Upper bound on standalone (non-thread-owned) timers a pod can host.
/// Each thread additionally owns one embedded delay timer outside this pool.
pub const MAX_TIMERS: usize = 128;

/// Timer wheel slot count. Must be a power of two (slot = target & (WHEELSIZE - 1)).
pub const WHEELSIZE: usize = 256;

/// Fixed-size thread name buffer, matching the teacher's `TASK_NAME_MAX_LEN`.
pub const THREAD_NAME_MAX_LEN: usize = 32;

/// Default per-thread stack size when `thread_init` is asked for "zero = default".
pub const DEFAULT_THREAD_STACK_SIZE: usize = 0x4000;

/// Smallest heap bucket, log2(bytes). 2^4 = 16 bytes.
pub const HEAP_MINLOG2: u32 = 4;

/// Largest page size the heap will accept, log2(bytes). 2^16 = 64 KiB pages.
pub const HEAP_MAXLOG2: u32 = 16;

/// Hard cap on a single heap extent's size (§4.2).
pub const HEAP_EXTENT_MAX_SIZE: usize = 16 * 1024 * 1024;

/// Number of trap vectors a thread's per-trap handler table covers (§4.8).
pub const MAX_TRAP_VECTORS: usize = 32;

/// Upper bound on live shadow thread/host-task pairings (§4.7).
pub const MAX_SHADOWS: usize = 32;

/// Depth of the gatekeeper's migration-request ring (§9 Design Notes:
/// "sized to the worst case — one in-flight migration per thread").
pub const GATEKEEPER_RING_CAPACITY: usize = MAX_SHADOWS;

/// Sentinel meaning "no timeout" / "run forever" wherever the spec says `INFINITE`.
pub const INFINITE: u64 = u64::MAX;
