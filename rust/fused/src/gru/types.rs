use cubecl::prelude::*;

/// Forward inputs grouped into a struct, flat token layout.
#[derive(CubeType, CubeLaunch)]
pub struct RecurrenceTensors<F: Float> {
    /// `[total_tokens, num_heads, head_dim]`
    pub input: Tensor<F>,
    /// `[num_heads, head_dim, head_dim]`
    pub weight: Tensor<F>,
    pub forget_input: Tensor<F>,
    pub forget_weight: Tensor<F>,
    pub reset_input: Tensor<F>,
    pub reset_weight: Tensor<F>,
    /// `[batch_size, num_heads, head_dim]`
    pub input_state: Tensor<F>,
}

/// Gradient output tensors grouped into a struct.
#[derive(CubeType, CubeLaunch)]
pub struct RecurrenceGrads<F: Float> {
    pub input: Tensor<F>,
    pub forget_input: Tensor<F>,
    pub reset_input: Tensor<F>,
    pub input_state: Tensor<F>,
    /// Per-sequence weight gradients, `[batch_size, num_heads, head_dim, head_dim]`.
    /// Always f32 and zero-initialised; each cube owns one `(batch, head)` slice.
    pub weight: Tensor<f32>,
    pub forget_weight: Tensor<f32>,
    pub reset_weight: Tensor<f32>,
}
