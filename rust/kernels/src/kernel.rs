//! The forward/backward contract of a fused kernel.
//!
//! A [`FusedKernel`] is opaque to burn: its inputs are unwrapped down to `CubeTensor`s,
//! the CubeCL launches run, and the results are wrapped back up. The `impls` module
//! provides [`FusedKernelBackend`] for the raw cube backend, for `Autodiff<B>` (which
//! records [`FusedKernel::backward_launch`] as the gradient of the forward launch) and
//! for `Fusion<B>` (which drains pending fused ops before the launch).
//!
//! Autodiff calls the backward launch once per output that reaches the loss, with a
//! zero gradient for the other outputs, and sums the resulting input gradients. Backward
//! launches must therefore be linear in `grad_outputs`.

use std::fmt::Debug;

use burn::tensor::{backend::Backend, ops::FloatTensor};
use burn_cubecl::{CubeRuntime, FloatElement, tensor::CubeTensor};

use crate::bundle::TensorBundle;

/// A CubeCL forward launch paired with its hand-written backward launch.
pub trait FusedKernel: 'static + Send + Debug + Clone {
    /// Short name used in launch logs.
    const NAME: &'static str;

    type Inputs<T: Debug + Clone + Send>: TensorBundle<T>;
    type Outputs<T: Debug + Clone + Send>: TensorBundle<T>;
    /// Tensors kept from the forward launch for the backward launch.
    type SavedState<T: Debug + Clone + Send>: TensorBundle<T>;
    /// Host-side launch parameters, cloned into the autodiff graph.
    type Config: Debug + Clone + Send;

    fn forward_launch<R: CubeRuntime, F: FloatElement>(
        inputs: Self::Inputs<CubeTensor<R>>,
        config: Self::Config,
    ) -> (
        Self::Outputs<CubeTensor<R>>,
        Self::SavedState<CubeTensor<R>>,
    );

    /// Gradients for every input, given the upstream gradients of every output.
    fn backward_launch<R: CubeRuntime, F: FloatElement>(
        saved: Self::SavedState<CubeTensor<R>>,
        grad_outputs: Self::Outputs<CubeTensor<R>>,
        config: Self::Config,
    ) -> Self::Inputs<CubeTensor<R>>;
}

/// A backend able to run kernel `K` on its own float tensor primitive.
pub trait FusedKernelBackend<K: FusedKernel>: Backend {
    /// Most units a single cube may hold on `device`.
    fn max_units_per_cube(device: &Self::Device) -> u32;

    fn forward(
        inputs: K::Inputs<FloatTensor<Self>>,
        config: K::Config,
    ) -> (
        K::Outputs<FloatTensor<Self>>,
        K::SavedState<FloatTensor<Self>>,
    );

    fn backward(
        saved: K::SavedState<FloatTensor<Self>>,
        grad_outputs: K::Outputs<FloatTensor<Self>>,
        config: K::Config,
    ) -> K::Inputs<FloatTensor<Self>>;
}
