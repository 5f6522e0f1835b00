//! Gradient clipping as a fused kernel.
//!
//! The forward launch is the identity. The backward launch clamps the upstream gradient
//! to `[-limit, limit]`, so wrapping a tensor in [`clip_gradient`] bounds whatever
//! gradient flows back into it without touching the values flowing forward.

use std::fmt::Debug;

use burn::tensor::{Tensor as BurnTensor, TensorPrimitive};
use burn_cubecl::{CubeRuntime, FloatElement, kernel::into_contiguous, tensor::CubeTensor};
use cubecl::prelude::*;

use crate::{
    bundle::tensor_bundle,
    kernel::{FusedKernel, FusedKernelBackend},
    util::empty_like,
};

tensor_bundle! {
    pub struct ClipInput { input }
}

tensor_bundle! {
    pub struct ClipOutput { output }
}

#[derive(Debug, Clone, Copy)]
pub struct GradientClipKernel;

#[cube(launch, launch_unchecked)]
fn clamp_gradient_kernel<F: Float>(
    grad_output: &Tensor<F>,
    grad_input: &mut Tensor<F>,
    limit: f32,
) {
    let idx = ABSOLUTE_POS;

    if idx < grad_output.len() {
        let c = F::cast_from(limit);
        grad_input[idx] = F::max(F::min(grad_output[idx], c), F::new(0.0) - c);
    }
}

fn launch_clamp_gradient<R: CubeRuntime, F: FloatElement>(
    grad_output: &CubeTensor<R>,
    grad_input: &CubeTensor<R>,
    limit: f32,
) {
    let client = &grad_output.client;
    let num_elements: usize = grad_output.shape.iter().product();
    let cube_dim = CubeDim::new(client, num_elements);
    let cube_count = (num_elements as u32).div_ceil(cube_dim.num_elems());

    tracing::trace!(num_elements, cube_count, limit, "clamp gradient launch");

    let grad_output = grad_output.as_handle_ref();
    let grad_input = grad_input.as_handle_ref();

    unsafe {
        cube_launch!(clamp_gradient_kernel::<F, R>(
            client,
            CubeCount::Static(cube_count, 1, 1),
            cube_dim,
            TensorArg::from_raw_parts::<F>(
                grad_output.handle,
                grad_output.strides,
                grad_output.shape,
                1,
            ),
            TensorArg::from_raw_parts::<F>(
                grad_input.handle,
                grad_input.strides,
                grad_input.shape,
                1,
            ),
            ScalarArg::new(limit),
        ));
    }
}

impl FusedKernel for GradientClipKernel {
    const NAME: &'static str = "gradient_clip";

    type Inputs<T: Debug + Clone + Send> = ClipInput<T>;
    type Outputs<T: Debug + Clone + Send> = ClipOutput<T>;
    type SavedState<T: Debug + Clone + Send> = ClipInput<T>;
    /// Clip limit, strictly positive.
    type Config = f32;

    fn forward_launch<R: CubeRuntime, F: FloatElement>(
        inputs: ClipInput<CubeTensor<R>>,
        _limit: f32,
    ) -> (ClipOutput<CubeTensor<R>>, ClipInput<CubeTensor<R>>) {
        let input = inputs.input;
        (
            ClipOutput {
                output: input.clone(),
            },
            ClipInput { input },
        )
    }

    fn backward_launch<R: CubeRuntime, F: FloatElement>(
        _saved: ClipInput<CubeTensor<R>>,
        grad_outputs: ClipOutput<CubeTensor<R>>,
        limit: f32,
    ) -> ClipInput<CubeTensor<R>> {
        let grad_output = into_contiguous(grad_outputs.output);
        let grad_input = empty_like::<R, F>(&grad_output, grad_output.shape.clone());

        launch_clamp_gradient::<R, F>(&grad_output, &grad_input, limit);

        ClipInput { input: grad_input }
    }
}

/// Identity on `tensor`; gradients flowing back through it are clamped to `[-limit, limit]`.
pub fn clip_gradient<B: FusedKernelBackend<GradientClipKernel>, const D: usize>(
    tensor: BurnTensor<B, D>,
    limit: f32,
) -> BurnTensor<B, D> {
    let inputs = ClipInput {
        input: tensor.into_primitive().tensor(),
    };
    let (outputs, _saved) = B::forward(inputs, limit);
    BurnTensor::from_primitive(TensorPrimitive::Float(outputs.output))
}
