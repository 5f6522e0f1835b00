use burn::tensor::Tensor;
use gru_config::KernelBackend;
use gru_core::{
    PackedBatch, RecurrenceEngine, RecurrenceInputs, RecurrenceOutput, ReferenceEngine, Result,
    check_units_per_cube,
};
use gru_kernels::FusedKernelBackend;

use crate::{
    GruBackend,
    gru::fused_gru_states,
    types::{GruKernel, GruLaunchConfig},
};

/// The recurrence as one fused CubeCL launch per direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusedEngine;

impl<B: FusedKernelBackend<GruKernel>> RecurrenceEngine<B> for FusedEngine {
    fn name(&self) -> &'static str {
        "fused"
    }

    fn run(
        &self,
        inputs: RecurrenceInputs<B>,
        batch: &PackedBatch,
        gradient_clipping: Option<f32>,
    ) -> Result<RecurrenceOutput<B>> {
        let dims = inputs.validate(batch)?;
        let batch_size = batch.batch_size();

        tracing::debug!(
            batch_size,
            total_tokens = dims.total_tokens,
            num_heads = dims.num_heads,
            head_dim = dims.head_dim,
            max_seqlen = batch.max_seqlen(),
            "fused recurrence"
        );

        // No tokens at all: the state passes through and the (empty) output is the input.
        if dims.total_tokens == 0 {
            return Ok(RecurrenceOutput {
                output: inputs.input,
                output_state: inputs.input_state,
            });
        }

        // One unit per state coordinate; wider heads cannot launch on this device.
        let max_units = B::max_units_per_cube(&inputs.input.device());
        check_units_per_cube(dims.head_dim, max_units)?;

        let config = GruLaunchConfig {
            offsets: batch.offsets_u32()?,
            max_seqlen: batch.max_seqlen(),
            gradient_clipping,
        };

        let states: Tensor<B, 3> = fused_gru_states(inputs, config);
        let total_tokens = dims.total_tokens;

        Ok(RecurrenceOutput {
            output: states.clone().slice([0..total_tokens]),
            output_state: states.slice([total_tokens..total_tokens + batch_size]),
        })
    }
}

/// The engine implementing `backend`.
#[must_use]
pub fn select_engine<B: GruBackend>(backend: KernelBackend) -> &'static dyn RecurrenceEngine<B> {
    match backend {
        KernelBackend::Fused => &FusedEngine,
        KernelBackend::Reference => &ReferenceEngine,
    }
}
