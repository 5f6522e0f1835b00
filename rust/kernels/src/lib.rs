#![warn(clippy::pedantic)]
#![allow(
    clippy::trivially_copy_pass_by_ref,
    reason = "erroneous false positives on #[cube] functions"
)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::cast_possible_truncation,
    clippy::type_complexity
)]

//! GRU Kernels
//!
//! Plumbing shared by every fused kernel in the workspace:
//! - [`FusedKernel`] / [`FusedKernelBackend`] - a forward/backward launch pair
//!   that burn's autodiff and fusion backends can carry through their graphs
//! - [`tensor_bundle!`] - named groups of tensors that convert between tensor types
//! - [`GradientClipKernel`] - identity in the forward pass, clamps the gradient in backward

/// Launch a CubeCL kernel with bounds checking in debug builds,
/// unchecked in release builds. Must be called inside `unsafe`.
#[macro_export]
macro_rules! cube_launch {
    ($kernel:ident :: < $($ty:ty),+ > ( $($args:expr),* $(,)? )) => {{
        #[cfg(debug_assertions)]
        { $kernel::launch::< $($ty),+ >( $($args),* ).unwrap() }
        #[cfg(not(debug_assertions))]
        { $kernel::launch_unchecked::< $($ty),+ >( $($args),* ).unwrap() }
    }};
}

pub mod bundle;
pub mod clip;
pub mod impls;
pub mod kernel;
pub mod util;

pub use bundle::TensorBundle;
pub use clip::{GradientClipKernel, clip_gradient};
pub use kernel::{FusedKernel, FusedKernelBackend};
