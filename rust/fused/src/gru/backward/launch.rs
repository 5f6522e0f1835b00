use burn_backend::Element;
use burn_cubecl::{CubeRuntime, FloatElement, kernel::into_contiguous, tensor::CubeTensor};
use cubecl::{prelude::*, server::Handle};
use gru_kernels::{
    TensorBundle, cube_launch,
    util::{empty_like, upload_u32, zeros_like_dtype},
};

use super::kernel::{fold_partials_kernel, gru_backward_kernel};
use crate::{
    GruCubeConfig,
    gru::types::{RecurrenceGradsLaunch, RecurrenceTensorsLaunch},
    types::{GruInputs, GruLaunchConfig, GruOutputs, GruSaved},
};

/// Launch the fused GRU backward kernel.
pub fn launch_gru_backward<R: Runtime, F: Float + CubeElement>(
    client: &ComputeClient<R>,
    input: TensorHandleRef<R>,
    weight: TensorHandleRef<R>,
    forget_input: TensorHandleRef<R>,
    forget_weight: TensorHandleRef<R>,
    reset_input: TensorHandleRef<R>,
    reset_weight: TensorHandleRef<R>,
    input_state: TensorHandleRef<R>,
    states: TensorHandleRef<R>,
    grad_states: TensorHandleRef<R>,
    grad_input: TensorHandleRef<R>,
    grad_forget_input: TensorHandleRef<R>,
    grad_reset_input: TensorHandleRef<R>,
    grad_input_state: TensorHandleRef<R>,
    // Per-sequence partials (f32, zero-initialized)
    partial_weight: TensorHandleRef<R>,
    partial_forget_weight: TensorHandleRef<R>,
    partial_reset_weight: TensorHandleRef<R>,
    cu_seqlens: &Handle,
    batch_size: usize,
    limit: f32,
    config: GruCubeConfig,
) {
    let num_heads = input.shape[1] as u32;

    let cube_count = CubeCount::Static(batch_size as u32, num_heads, 1);
    let cube_dim = CubeDim::new_1d(config.head_dim as u32);

    tracing::trace!(
        batch_size,
        num_heads,
        head_dim = config.head_dim,
        clip = config.clip,
        "gru backward launch"
    );

    unsafe {
        cube_launch!(gru_backward_kernel::<F, R>(
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
            TensorArg::from_raw_parts::<F>(
                grad_states.handle,
                grad_states.strides,
                grad_states.shape,
                1
            ),
            RecurrenceGradsLaunch::new(
                TensorArg::from_raw_parts::<F>(
                    grad_input.handle,
                    grad_input.strides,
                    grad_input.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    grad_forget_input.handle,
                    grad_forget_input.strides,
                    grad_forget_input.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    grad_reset_input.handle,
                    grad_reset_input.strides,
                    grad_reset_input.shape,
                    1
                ),
                TensorArg::from_raw_parts::<F>(
                    grad_input_state.handle,
                    grad_input_state.strides,
                    grad_input_state.shape,
                    1
                ),
                TensorArg::from_raw_parts::<f32>(
                    partial_weight.handle,
                    partial_weight.strides,
                    partial_weight.shape,
                    1
                ),
                TensorArg::from_raw_parts::<f32>(
                    partial_forget_weight.handle,
                    partial_forget_weight.strides,
                    partial_forget_weight.shape,
                    1
                ),
                TensorArg::from_raw_parts::<f32>(
                    partial_reset_weight.handle,
                    partial_reset_weight.strides,
                    partial_reset_weight.shape,
                    1
                ),
            ),
            ArrayArg::from_raw_parts::<u32>(cu_seqlens, batch_size + 1, 1),
            ScalarArg::new(limit),
            config,
        ));
    }
}

/// Sum `[batch_size, num_heads, head_dim, head_dim]` partials into a weight gradient of element type `F`.
fn fold_partials<R: CubeRuntime, F: FloatElement>(
    partials: &CubeTensor<R>,
    template: &CubeTensor<R>,
    batch_size: usize,
) -> CubeTensor<R> {
    let output = empty_like::<R, F>(template, template.shape.clone());

    let client = &template.client;
    let num_elements: usize = template.shape.iter().product();
    let cube_dim = CubeDim::new(client, num_elements);
    let cube_count = (num_elements as u32).div_ceil(cube_dim.num_elems());

    let partials = partials.as_handle_ref();
    let out = output.as_handle_ref();

    unsafe {
        cube_launch!(fold_partials_kernel::<F, R>(
            client,
            CubeCount::Static(cube_count, 1, 1),
            cube_dim,
            TensorArg::from_raw_parts::<f32>(
                partials.handle,
                partials.strides,
                partials.shape,
                1
            ),
            TensorArg::from_raw_parts::<F>(out.handle, out.strides, out.shape, 1),
            ScalarArg::new(batch_size as u32),
        ));
    }

    output
}

pub fn backward<R: CubeRuntime, F: FloatElement>(
    saved: GruSaved<CubeTensor<R>>,
    grad_outputs: GruOutputs<CubeTensor<R>>,
    config: &GruLaunchConfig,
) -> GruInputs<CubeTensor<R>> {
    let saved = saved.map(into_contiguous);
    let grad_states = into_contiguous(grad_outputs.states);

    let [_total_tokens, num_heads, head_dim] = saved.input.shape.dims();
    let batch_size = config.batch_size();
    let t = &saved.input; // template for empty_like

    let grad_input = empty_like::<R, F>(t, saved.input.shape.clone());
    let grad_forget_input = empty_like::<R, F>(t, saved.forget_input.shape.clone());
    let grad_reset_input = empty_like::<R, F>(t, saved.reset_input.shape.clone());
    let grad_input_state = empty_like::<R, F>(t, saved.input_state.shape.clone());

    if batch_size == 0 {
        // Empty batch: every token tensor is empty and nothing reaches the weights.
        return GruInputs {
            input: grad_input,
            weight: zeros_like_dtype(t, saved.weight.shape.clone(), F::dtype()),
            forget_input: grad_forget_input,
            forget_weight: zeros_like_dtype(t, saved.forget_weight.shape.clone(), F::dtype()),
            reset_input: grad_reset_input,
            reset_weight: zeros_like_dtype(t, saved.reset_weight.shape.clone(), F::dtype()),
            input_state: grad_input_state,
        };
    }

    // Every (batch, head) cube accumulates into its own slice; the fold sums them in
    // batch order.
    let partial_shape = [batch_size, num_heads, head_dim, head_dim];
    let partial_weight = zeros_like_dtype(t, partial_shape, f32::dtype());
    let partial_forget_weight = zeros_like_dtype(t, partial_shape, f32::dtype());
    let partial_reset_weight = zeros_like_dtype(t, partial_shape, f32::dtype());

    let cu_seqlens = upload_u32(t, &config.offsets);
    launch_gru_backward::<R, F>(
        &t.client,
        saved.input.as_handle_ref(),
        saved.weight.as_handle_ref(),
        saved.forget_input.as_handle_ref(),
        saved.forget_weight.as_handle_ref(),
        saved.reset_input.as_handle_ref(),
        saved.reset_weight.as_handle_ref(),
        saved.input_state.as_handle_ref(),
        saved.states.as_handle_ref(),
        grad_states.as_handle_ref(),
        grad_input.as_handle_ref(),
        grad_forget_input.as_handle_ref(),
        grad_reset_input.as_handle_ref(),
        grad_input_state.as_handle_ref(),
        partial_weight.as_handle_ref(),
        partial_forget_weight.as_handle_ref(),
        partial_reset_weight.as_handle_ref(),
        &cu_seqlens,
        batch_size,
        config.gradient_clipping.unwrap_or(f32::INFINITY),
        GruCubeConfig::new(head_dim, config.gradient_clipping),
    );

    GruInputs {
        input: grad_input,
        weight: fold_partials::<R, F>(&partial_weight, &saved.weight, batch_size),
        forget_input: grad_forget_input,
        forget_weight: fold_partials::<R, F>(
            &partial_forget_weight,
            &saved.forget_weight,
            batch_size,
        ),
        reset_input: grad_reset_input,
        reset_weight: fold_partials::<R, F>(&partial_reset_weight, &saved.reset_weight, batch_size),
        input_state: grad_input_state,
    }
}
