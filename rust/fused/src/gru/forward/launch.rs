use burn_cubecl::{CubeRuntime, FloatElement, tensor::CubeTensor};
use cubecl::{prelude::*, server::Handle};
use gru_kernels::{
    cube_launch,
    util::{empty_like, upload_u32},
};

use super::kernel::gru_forward_kernel;
use crate::{
    GruCubeConfig,
    gru::types::RecurrenceTensorsLaunch,
    types::{GruInputs, GruLaunchConfig, GruOutputs},
};

/// Launch configuration for the fused GRU forward kernel.
pub fn launch_gru_forward<R: Runtime, F: Float + CubeElement>(
    client: &ComputeClient<R>,
    input: TensorHandleRef<R>,
    weight: TensorHandleRef<R>,
    forget_input: TensorHandleRef<R>,
    forget_weight: TensorHandleRef<R>,
    reset_input: TensorHandleRef<R>,
    reset_weight: TensorHandleRef<R>,
    input_state: TensorHandleRef<R>,
    states: TensorHandleRef<R>,
    cu_seqlens: &Handle,
    batch_size: usize,
    config: GruCubeConfig,
) {
    let num_heads = input.shape[1] as u32;

    // Each cube handles one (batch, head) pair, one unit per state coordinate
    let cube_count = CubeCount::Static(batch_size as u32, num_heads, 1);
    let cube_dim = CubeDim::new_1d(config.head_dim as u32);

    tracing::trace!(
        batch_size,
        num_heads,
        head_dim = config.head_dim,
        "gru forward launch"
    );

    unsafe {
        cube_launch!(gru_forward_kernel::<F, R>(
            client,
            cube_count,
            cube_dim,
            RecurrenceTensorsLaunch::new(
                TensorArg::from_raw_parts::<F>(input.handle, input.strides, input.shape, 1),
                TensorArg::from_raw_parts::<F>(weight.handle, weight.strides, weight.shape, 1),
                TensorArg::from_raw_parts::<F>(
                    forget_input.handle,
                    forget_input.strides,
                    forget_input.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    forget_weight.handle,
                    forget_weight.strides,
                    forget_weight.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    reset_input.handle,
                    reset_input.strides,
                    reset_input.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    reset_weight.handle,
                    reset_weight.strides,
                    reset_weight.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    input_state.handle,
                    input_state.strides,
                    input_state.shape,
                    1
                ),
            ),
            TensorArg::from_raw_parts::<F>(states.handle, states.strides, states.shape, 1),
            ArrayArg::from_raw_parts::<u32>(cu_seqlens, batch_size + 1, 1),
            config,
        ));
    }
}

/// Runs the forward kernel on contiguous inputs.
pub fn forward<R: CubeRuntime, F: FloatElement>(
    inputs: &GruInputs<CubeTensor<R>>,
    config: &GruLaunchConfig,
) -> GruOutputs<CubeTensor<R>> {
    let [total_tokens, num_heads, head_dim] = inputs.input.shape.dims();
    let batch_size = config.batch_size();

    let states = empty_like::<R, F>(
        &inputs.input,
        [total_tokens + batch_size, num_heads, head_dim],
    );

    if batch_size > 0 {
        let cu_seqlens = upload_u32(&inputs.input, &config.offsets);
        launch_gru_forward::<R, F>(
            &inputs.input.client,
            inputs.input.as_handle_ref(),
            inputs.weight.as_handle_ref(),
            inputs.forget_input.as_handle_ref(),
            inputs.forget_weight.as_handle_ref(),
            inputs.reset_input.as_handle_ref(),
            inputs.reset_weight.as_handle_ref(),
            inputs.input_state.as_handle_ref(),
            states.as_handle_ref(),
            &cu_seqlens,
            batch_size,
            GruCubeConfig::new(head_dim, None),
        );
    }

    GruOutputs { states }
}
