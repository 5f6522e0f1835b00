//! Fused GRU forward kernel.
//!
//! One launch runs every sequence of the batch to completion, keeping the running state
//! in shared memory between tokens.

mod kernel;
mod launch;

#[allow(unused_imports)]
pub use kernel::*;
#[allow(unused_imports)]
pub use launch::*;
