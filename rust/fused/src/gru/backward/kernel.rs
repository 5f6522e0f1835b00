use cubecl::prelude::*;

use crate::{
    GruCubeConfig,
    gru::{
        gates::{clamp_abs, one_minus, sigmoid, sigmoid_bwd, tanh, tanh_bwd},
        types::{RecurrenceGrads, RecurrenceTensors},
    },
};

/// Fused GRU backward kernel.
///
/// Each CUBE handles one (batch, head) pair and walks that sequence's tokens in reverse,
/// recomputing the gates of every step from the saved states.
/// Thread layout within cube: 1D grid of head_dim units, unit `i` owns state coordinate `i`.
///
/// Shared memory layout (f32, [head_dim] each):
/// - h: state before the current token
/// - q: reset-gated state `r * h`
/// - dn, df, dr: gradients of the candidate, update and reset pre-activations
///
/// The carried state gradient is clamped to `[-limit, limit]` after every step when
/// `config.clip` is set. Weight gradients are written as per-sequence partials into
/// `grads.weight`, `grads.forget_weight` and `grads.reset_weight`; unit `i` only touches
/// column `i` of its own `(batch, head)` slice.
#[cube(launch, launch_unchecked)]
pub fn gru_backward_kernel<F: Float>(
    inputs: &RecurrenceTensors<F>,
    states: &Tensor<F>,
    grad_states: &Tensor<F>,
    grads: &mut RecurrenceGrads<F>,
    cu_seqlens: &Array<u32>,
    limit: f32,
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
    let mut dn_shared = SharedMemory::<f32>::new(head_dim);
    let mut df_shared = SharedMemory::<f32>::new(head_dim);
    let mut dr_shared = SharedMemory::<f32>::new(head_dim);

    let start = cu_seqlens[batch_idx] as usize;
    let end = cu_seqlens[batch_idx + 1] as usize;
    let total_tokens = cu_seqlens[batch_size] as usize;

    let state_idx = (batch_idx * num_heads + head_idx) * head_dim + i;
    let w_base = head_idx * head_dim * head_dim;
    let partial_base = (batch_idx * num_heads + head_idx) * head_dim * head_dim;

    // The final state is the state after the last token, so its gradient joins the carry.
    let final_idx = ((total_tokens + batch_idx) * num_heads + head_idx) * head_dim + i;
    let mut carry = f32::cast_from(grad_states[final_idx]);

    for k in 0..end - start {
        let t = end - 1 - k;
        let tok_idx = (t * num_heads + head_idx) * head_dim + i;

        let mut h_prev = f32::new(0.0);
        if t == start {
            h_prev = f32::cast_from(inputs.input_state[state_idx]);
        } else {
            h_prev = f32::cast_from(states[tok_idx - num_heads * head_dim]);
        }
        h_shared[i] = h_prev;
        sync_cube();

        // Recompute the gates of step t
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

        q_shared[i] = r * h_prev;
        sync_cube();

        let mut n_acc = f32::cast_from(inputs.input[tok_idx]);
        for j in 0..head_dim {
            n_acc += q_shared[j] * f32::cast_from(inputs.weight[w_base + j * head_dim + i]);
        }
        let n = tanh::<f32>(n_acc);

        // h = z * h_prev + (1 - z) * n
        let dh = f32::cast_from(grad_states[tok_idx]) + carry;
        let df = dh * (h_prev - n) * sigmoid_bwd::<f32>(z);
        let dn = dh * one_minus::<f32>(z) * tanh_bwd::<f32>(n);

        grads.input[tok_idx] = F::cast_from(dn);
        grads.forget_input[tok_idx] = F::cast_from(df);

        dn_shared[i] = dn;
        df_shared[i] = df;
        sync_cube();

        // Pre-activations are row vectors times W, so the backward reads row i of each weight
        let mut dq = f32::new(0.0);
        let mut dh_prev = dh * z;
        for j in 0..head_dim {
            let w_idx = w_base + i * head_dim + j;
            dq += dn_shared[j] * f32::cast_from(inputs.weight[w_idx]);
            dh_prev += df_shared[j] * f32::cast_from(inputs.forget_weight[w_idx]);
        }
        let dr = dq * h_prev * sigmoid_bwd::<f32>(r);
        dh_prev += dq * r;

        grads.reset_input[tok_idx] = F::cast_from(dr);

        dr_shared[i] = dr;
        sync_cube();

        for j in 0..head_dim {
            dh_prev += dr_shared[j] * f32::cast_from(inputs.reset_weight[w_base + i * head_dim + j]);
        }

        for j in 0..head_dim {
            let p_idx = partial_base + j * head_dim + i;
            grads.weight[p_idx] += q_shared[j] * dn;
            grads.forget_weight[p_idx] += h_shared[j] * df;
            grads.reset_weight[p_idx] += h_shared[j] * dr;
        }

        if config.clip {
            carry = clamp_abs::<f32>(dh_prev, limit);
        } else {
            carry = dh_prev;
        }

        // Shared buffers are overwritten by the next step
        sync_cube();
    }

    grads.input_state[state_idx] = F::cast_from(carry);
}

/// Sums the per-sequence weight partials `[batch_size, N]` into `[N]`.
///
/// One unit per output element, batch order fixed so the result is deterministic.
#[cube(launch, launch_unchecked)]
pub fn fold_partials_kernel<F: Float>(
    partials: &Tensor<f32>,
    output: &mut Tensor<F>,
    batch_size: u32,
) {
    let idx = ABSOLUTE_POS;
    let size = output.len();

    if idx < size {
        let mut sum = f32::new(0.0);
        for b in 0..batch_size as usize {
            sum += partials[b * size + idx];
        }
        output[idx] = F::cast_from(sum);
    }
}
