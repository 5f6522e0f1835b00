//! Fused GRU backward pass.
//!
//! Given dL/d_states, computes gradients w.r.t.:
//! - input, forget_input, reset_input (per-token pre-activations)
//! - weight, forget_weight, reset_weight (recurrent weights, folded over the batch)
//! - input_state

mod kernel;
mod launch;

#[allow(unused_imports)]
pub use kernel::*;
#[allow(unused_imports)]
pub use launch::*;
