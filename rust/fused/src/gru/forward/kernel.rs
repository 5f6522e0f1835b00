//! Fused GRU forward kernel.

use cubecl::prelude::*;

use crate::{
    GruCubeConfig,
    gru::{
        gates::{blend, sigmoid, tanh},
        types::RecurrenceTensors,
    },
};

/// Runs the recurrence over every sequence of a packed batch.
///
/// Each CUBE handles one (batch, head) pair and walks that sequence's tokens in order.
/// Thread layout within cube: 1D grid of head_dim units
/// - UNIT_POS_X: state coordinate `i` (0..head_dim)
///
/// Shared memory layout (f32):
/// - h: [head_dim] - state before the current token
/// - q: [head_dim] - reset-gated state `r * h`
///
/// Inputs:
/// - input, forget_input, reset_input: [total_tokens, num_heads, head_dim]
/// - weight, forget_weight, reset_weight: [num_heads, head_dim, head_dim], read as `W[j, i]`
/// - input_state: [batch_size, num_heads, head_dim]
/// - cu_seqlens: [batch_size + 1]
///
/// Output:
/// - states: [total_tokens + batch_size, num_heads, head_dim]; row `t` is the state after
///   token `t`, row `total_tokens + b` the final state of sequence `b`.
#[cube(launch, launch_unchecked)]
pub fn gru_forward_kernel<F: Float>(
    inputs: &RecurrenceTensors<F>,
    states: &mut Tensor<F>,
    cu_seqlens: &Array<u32>,
    #[comptime] config: GruCubeConfig,
) {
    let batch_idx = CUBE_POS_X as usize;
    let head_idx = CUBE_POS_Y as usize;
    let batch_size = CUBE_COUNT_X as usize;
    let num_heads = CUBE_COUNT_Y as usize;
    let head_dim = config.head_dim;

    let i = UNIT_POS_X as usize;

    let mut h_shared = SharedMemory::<f32>::new(head_dim);
    let mut q_shared = SharedMemory::<f32>::new(head_dim);

    let start = cu_seqlens[batch_idx] as usize;
    let end = cu_seqlens[batch_idx + 1] as usize;
    let total_tokens = cu_seqlens[batch_size] as usize;

    let state_idx = (batch_idx * num_heads + head_idx) * head_dim + i;
    let w_base = head_idx * head_dim * head_dim;

    let mut h = f32::cast_from(inputs.input_state[state_idx]);
    h_shared[i] = h;
    sync_cube();

    for t in start..end {
        let tok_idx = (t * num_heads + head_idx) * head_dim + i;

        // z and r only need the previous state
        let mut f_acc = f32::cast_from(inputs.forget_input[tok_idx]);
        let mut r_acc = f32::cast_from(inputs.reset_input[tok_idx]);
        for j in 0..head_dim {
            let h_j = h_shared[j];
            let w_idx = w_base + j * head_dim + i;
            f_acc += h_j * f32::cast_from(inputs.forget_weight[w_idx]);
            r_acc += h_j * f32::cast_from(inputs.reset_weight[w_idx]);
        }
        let z = sigmoid::<f32>(f_acc);
        let r = sigmoid::<f32>(r_acc);

        q_shared[i] = r * h;
        sync_cube();

        let mut n_acc = f32::cast_from(inputs.input[tok_idx]);
        for j in 0..head_dim {
            n_acc += q_shared[j] * f32::cast_from(inputs.weight[w_base + j * head_dim + i]);
        }
        let n = tanh::<f32>(n_acc);

        h = blend::<f32>(z, h, n);
        states[tok_idx] = F::cast_from(h);

        // Every read of h_shared happened before the barrier above.
        h_shared[i] = h;
        sync_cube();
    }

    let final_idx = ((total_tokens + batch_idx) * num_heads + head_idx) * head_dim + i;
    states[final_idx] = F::cast_from(h);
}
