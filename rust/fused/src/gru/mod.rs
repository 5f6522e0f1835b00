//! Fused GRU recurrence over a packed batch.
//!
//! The forward launch runs one cube per (batch element, head) and writes the state after
//! every token plus each sequence's final state into a single `states` tensor. The
//! backward launch walks the same sequences in reverse, recomputing the gates from the
//! saved states, and folds the per-sequence weight gradients in a second launch.

mod api;
mod backward;
mod forward;
mod gates;
mod launch;
mod types;

#[cfg(test)]
mod tests;

pub use api::fused_gru_states;
pub use backward::{backward, gru_backward_kernel, launch_gru_backward};
pub use forward::{forward, gru_forward_kernel, launch_gru_forward};
