//! nanopod ABI types shared between the scheduling core and its skins.
//!
//! This crate carries **only** the contract a skin observes from the
//! outside: priority comparison, the thread state-mask bits a skin reads
//! back to classify a wakeup reason (§6 of the core specification), the
//! abstract error categories an API may return, and the compile-time
//! capacity constants both `nanopod-core` and any eventual skin crate must
//! agree on. Everything internal to one pod — queues, the heap, the timer
//! wheel, claim-list bookkeeping — lives in `nanopod-core` instead.
//!
//! All types here are plain data: no allocation, no locking, no pointers.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod constants;
pub mod error;
pub mod ids;
pub mod priority;
pub mod state;

pub use constants::*;
pub use error::*;
pub use ids::*;
pub use priority::*;
pub use state::*;
