use burn::tensor::{Tensor, TensorPrimitive};
use gru_core::RecurrenceInputs;
use gru_kernels::FusedKernelBackend;

use crate::types::{GruInputs, GruKernel, GruLaunchConfig};

/// Runs [`GruKernel`] and returns its `[total_tokens + batch_size, num_heads, head_dim]`
/// states: the state after every token, then the final state of every sequence.
pub fn fused_gru_states<B: FusedKernelBackend<GruKernel>>(
    inputs: RecurrenceInputs<B>,
    config: GruLaunchConfig,
) -> Tensor<B, 3> {
    let inputs = GruInputs {
        input: inputs.input.into_primitive().tensor(),
        weight: inputs.weight.into_primitive().tensor(),
        forget_input: inputs.forget_input.into_primitive().tensor(),
        forget_weight: inputs.forget_weight.into_primitive().tensor(),
        reset_input: inputs.reset_input.into_primitive().tensor(),
        reset_weight: inputs.reset_weight.into_primitive().tensor(),
        input_state: inputs.input_state.into_primitive().tensor(),
    };

    let (outputs, _saved) = <B as FusedKernelBackend<GruKernel>>::forward(inputs, config);

    Tensor::from_primitive(TensorPrimitive::Float(outputs.states))
}
