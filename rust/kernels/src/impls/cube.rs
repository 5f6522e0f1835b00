use burn::tensor::ops::FloatTensor;
use burn_cubecl::{BoolElement, CubeBackend, CubeRuntime, FloatElement, IntElement};

use crate::kernel::{FusedKernel, FusedKernelBackend};

/// The raw cube backend: the float primitive is the `CubeTensor` the launches take.
impl<K, R, F, I, BT> FusedKernelBackend<K> for CubeBackend<R, F, I, BT>
where
    K: FusedKernel,
    R: CubeRuntime,
    F: FloatElement,
    I: IntElement,
    BT: BoolElement,
{
    fn max_units_per_cube(device: &Self::Device) -> u32 {
        R::client(device).properties().hardware.max_units_per_cube
    }

    fn forward(
        inputs: K::Inputs<FloatTensor<Self>>,
        config: K::Config,
    ) -> (
        K::Outputs<FloatTensor<Self>>,
        K::SavedState<FloatTensor<Self>>,
    ) {
        tracing::trace!(kernel = K::NAME, "forward launch");
        K::forward_launch::<R, F>(inputs, config)
    }

    fn backward(
        saved: K::SavedState<FloatTensor<Self>>,
        grad_outputs: K::Outputs<FloatTensor<Self>>,
        config: K::Config,
    ) -> K::Inputs<FloatTensor<Self>> {
        tracing::trace!(kernel = K::NAME, "backward launch");
        K::backward_launch::<R, F>(saved, grad_outputs, config)
    }
}
