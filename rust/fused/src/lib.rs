#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(
    clippy::trivially_copy_pass_by_ref,
    reason = "erroneous false positives on #[cube] functions"
)]
#![allow(
    clippy::similar_names,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::too_many_lines,
    clippy::type_complexity
)]
//! GRU Fused Kernels
//!
//! This crate provides the fused GRU recurrence:
//! - `GruKernel` - CubeCL forward and hand-written backward launches over a packed batch
//! - `FusedEngine` - the kernel behind the `RecurrenceEngine` interface
//! - `gru` - validating entry point that dispatches to the fused or reference engine

use gru_kernels::{FusedKernelBackend, GradientClipKernel};

pub mod api;
pub mod engine;
pub mod gru;
pub mod types;

pub use api::{GruInput, GruOutput, gru};
pub use engine::{FusedEngine, select_engine};
pub use gru::fused_gru_states;
pub use types::{GruInputs, GruKernel, GruLaunchConfig, GruOutputs, GruSaved};

/// Backends able to run every kernel the GRU entry point may dispatch to.
pub trait GruBackend:
    FusedKernelBackend<GruKernel> + FusedKernelBackend<GradientClipKernel>
{
}

impl<B> GruBackend for B where
    B: FusedKernelBackend<GruKernel> + FusedKernelBackend<GradientClipKernel>
{
}

/// Compile-time parameters of the fused GRU kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GruCubeConfig {
    /// Units per cube, one per state coordinate of a head.
    pub head_dim: usize,
    /// Clamp the carried state gradient in the backward kernel.
    pub clip: bool,
}

impl GruCubeConfig {
    #[must_use]
    pub fn new(head_dim: usize, gradient_clipping: Option<f32>) -> Self {
        Self {
            head_dim,
            clip: gradient_clipping.is_some(),
        }
    }
}
