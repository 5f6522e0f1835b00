use std::fmt::Debug;

use burn_cubecl::{CubeRuntime, FloatElement, kernel::into_contiguous, tensor::CubeTensor};
use gru_kernels::{TensorBundle, kernel::FusedKernel};

use super::{backward::backward, forward::forward};
use crate::types::{GruInputs, GruKernel, GruLaunchConfig, GruOutputs, GruSaved};

impl FusedKernel for GruKernel {
    const NAME: &'static str = "gru";

    type Inputs<T: Debug + Clone + Send> = GruInputs<T>;
    type Outputs<T: Debug + Clone + Send> = GruOutputs<T>;
    type SavedState<T: Debug + Clone + Send> = GruSaved<T>;
    type Config = GruLaunchConfig;

    fn forward_launch<R: CubeRuntime, F: FloatElement>(
        inputs: GruInputs<CubeTensor<R>>,
        config: GruLaunchConfig,
    ) -> (GruOutputs<CubeTensor<R>>, GruSaved<CubeTensor<R>>) {
        let inputs = inputs.map(into_contiguous);
        let outputs = forward::<R, F>(&inputs, &config);
        let saved = GruSaved::new(inputs, outputs.states.clone());
        (outputs, saved)
    }

    fn backward_launch<R: CubeRuntime, F: FloatElement>(
        saved: GruSaved<CubeTensor<R>>,
        grad_outputs: GruOutputs<CubeTensor<R>>,
        config: GruLaunchConfig,
    ) -> GruInputs<CubeTensor<R>> {
        backward::<R, F>(saved, grad_outputs, &config)
    }
}
