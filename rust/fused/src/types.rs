use gru_kernels::tensor_bundle;

tensor_bundle! {
    /// Input tensors for the fused GRU kernel, in the flat token layout.
    pub struct GruInputs {
        input, weight, forget_input, forget_weight, reset_input, reset_weight, input_state
    }
}

tensor_bundle! {
    /// Output of the fused GRU kernel.
    ///
    /// `states` is `[total_tokens + batch_size, num_heads, head_dim]`: the state after
    /// every token, followed by the final state of every sequence. Keeping both in one
    /// tensor hands the backward launch the complete state gradient at once, which the
    /// gradient clamp needs.
    pub struct GruOutputs { states }
}

tensor_bundle! {
    /// Saved state for the fused GRU backward pass: the inputs plus the forward states,
    /// from which every gate is recomputed.
    pub struct GruSaved {
        input, weight, forget_input, forget_weight, reset_input, reset_weight, input_state,
        states
    }
}

impl<T: std::fmt::Debug + Clone + Send> GruSaved<T> {
    pub(crate) fn new(inputs: GruInputs<T>, states: T) -> Self {
        Self {
            input: inputs.input,
            weight: inputs.weight,
            forget_input: inputs.forget_input,
            forget_weight: inputs.forget_weight,
            reset_input: inputs.reset_input,
            reset_weight: inputs.reset_weight,
            input_state: inputs.input_state,
            states,
        }
    }
}

/// Marker type for the fused GRU kernel.
#[derive(Debug, Clone, Copy)]
pub struct GruKernel;

/// Host-side launch parameters of [`GruKernel`].
#[derive(Debug, Clone, PartialEq)]
pub struct GruLaunchConfig {
    /// `cu_seqlens` as uploaded to the device.
    pub offsets: Vec<u32>,
    pub max_seqlen: usize,
    pub gradient_clipping: Option<f32>,
}

impl GruLaunchConfig {
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}
