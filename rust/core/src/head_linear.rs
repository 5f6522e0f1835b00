//! Per-head square transforms of a multi-head state.

use burn::{prelude::Backend, tensor::Tensor};

use crate::error::{GruError, Result};

/// Width of one head. Rejects `num_heads == 0` and sizes that do not split evenly.
pub fn head_dim(state_size: usize, num_heads: usize) -> Result<usize> {
    if num_heads == 0 || state_size % num_heads != 0 {
        return Err(GruError::IndivisibleHeads {
            state_size,
            num_heads,
        });
    }
    Ok(state_size / num_heads)
}

/// `out[b, n, i] = sum_j state[b, n, j] * weight[n, j, i]`.
///
/// - `state`: `[batch, num_heads, head_dim]`
/// - `weight`: `[num_heads, head_dim, head_dim]`
///
/// Heads never mix: head `n` of the output only reads head `n` of the state.
pub fn head_linear<B: Backend>(state: Tensor<B, 3>, weight: Tensor<B, 3>) -> Tensor<B, 3> {
    // [N, B, H] @ [N, H, H] -> [N, B, H]
    state.swap_dims(0, 1).matmul(weight).swap_dims(0, 1)
}
