//! The public GRU entry point.
//!
//! [`gru`] takes the sequence tensors either dense, `[batch, seq_len, num_heads, head_dim]`,
//! or packed, `[total_tokens, num_heads, head_dim]` with `cu_seqlens`, flattens them to the
//! token layout both engines share, and restores the caller's rank on the way out.

use burn::tensor::{Tensor, backend::Backend};
use gru_config::KernelBackend;
use gru_core::{
    GruError, PackedBatch, RecurrenceEngine, RecurrenceInputs, Result, check_gradient_clipping,
};

use crate::{GruBackend, engine::select_engine};

/// Arguments of a [`gru`] call. `D` is 4 for dense batches and 3 for packed ones.
#[derive(Debug, Clone)]
pub struct GruInput<B: Backend, const D: usize> {
    pub input: Tensor<B, D>,
    /// `[num_heads, head_dim, head_dim]`
    pub weight: Tensor<B, 3>,
    pub forget_input: Tensor<B, D>,
    pub forget_weight: Tensor<B, 3>,
    pub reset_input: Tensor<B, D>,
    pub reset_weight: Tensor<B, 3>,
    /// `[batch_size, num_heads, head_dim]`, zeros when absent.
    pub input_state: Option<Tensor<B, 3>>,
}

#[derive(Debug, Clone)]
pub struct GruOutput<B: Backend, const D: usize> {
    /// Same shape as the input sequence tensors.
    pub output: Tensor<B, D>,
    /// `[batch_size, num_heads, head_dim]`
    pub output_state: Tensor<B, 3>,
}

/// Runs the GRU recurrence with the selected engine.
///
/// Dense calls (`D == 4`) must not pass `cu_seqlens`; packed calls (`D == 3`) must.
/// `max_seqlen`, when given, must equal the longest sequence.
pub fn gru<B: GruBackend, const D: usize>(
    inputs: GruInput<B, D>,
    cu_seqlens: Option<&[usize]>,
    max_seqlen: Option<usize>,
    gradient_clipping: Option<f32>,
    backend: KernelBackend,
) -> Result<GruOutput<B, D>> {
    let gradient_clipping = check_gradient_clipping(gradient_clipping)?;

    let shape = inputs.input.dims();
    let batch = match D {
        4 => PackedBatch::new(shape[0], Some(shape[1]), cu_seqlens, max_seqlen)?,
        3 => PackedBatch::new(0, None, cu_seqlens, max_seqlen)?,
        _ => {
            return Err(GruError::UnsupportedRank {
                name: "input",
                expected: "3 (packed) or 4 (dense)".to_string(),
                actual: D,
            });
        }
    };

    GruError::check_shape("forget_input", &inputs.forget_input.dims(), &shape)?;
    GruError::check_shape("reset_input", &inputs.reset_input.dims(), &shape)?;

    let num_heads = shape[D - 2];
    let head_dim = shape[D - 1];
    let total_tokens = batch.total_tokens();
    let flat = [shape[..D - 2].iter().product::<usize>(), num_heads, head_dim];

    let input_state = match inputs.input_state {
        Some(state) => state,
        None => Tensor::zeros(
            [batch.batch_size(), num_heads, head_dim],
            &inputs.input.device(),
        ),
    };

    let flat_inputs = RecurrenceInputs {
        input: inputs.input.reshape(flat),
        weight: inputs.weight,
        forget_input: inputs.forget_input.reshape(flat),
        forget_weight: inputs.forget_weight,
        reset_input: inputs.reset_input.reshape(flat),
        reset_weight: inputs.reset_weight,
        input_state,
    };

    let engine = select_engine::<B>(backend);

    tracing::debug!(
        engine = engine.name(),
        batch_size = batch.batch_size(),
        total_tokens,
        num_heads,
        head_dim,
        packed = D == 3,
        "gru"
    );

    let result = engine.run(flat_inputs, &batch, gradient_clipping)?;

    Ok(GruOutput {
        output: result.output.reshape(shape),
        output_state: result.output_state,
    })
}

#[cfg(test)]
mod tests {
    use burn::tensor::Tensor;
    use gru_core::{ErrorKind, GpuBackend, GruError, KernelBackend};
    use test_case::test_case;

    use super::{GruInput, gru};

    fn zeros<const D: usize>(shape: [usize; D]) -> Tensor<GpuBackend, D> {
        Tensor::zeros(shape, &Default::default())
    }

    fn inputs<const D: usize>(
        shape: [usize; D],
        num_heads: usize,
        head_dim: usize,
    ) -> GruInput<GpuBackend, D> {
        let square = [num_heads, head_dim, head_dim];
        GruInput {
            input: zeros(shape),
            weight: zeros(square),
            forget_input: zeros(shape),
            forget_weight: zeros(square),
            reset_input: zeros(shape),
            reset_weight: zeros(square),
            input_state: None,
        }
    }

    #[test_case(KernelBackend::Fused ; "fused")]
    #[test_case(KernelBackend::Reference ; "reference")]
    fn dense_call_keeps_rank(backend: KernelBackend) {
        let result = gru(inputs([2, 3, 2, 4], 2, 4), None, None, None, backend).unwrap();
        assert_eq!(result.output.dims(), [2, 3, 2, 4]);
        assert_eq!(result.output_state.dims(), [2, 2, 4]);
    }

    #[test_case(KernelBackend::Fused ; "fused")]
    #[test_case(KernelBackend::Reference ; "reference")]
    fn packed_call_keeps_rank(backend: KernelBackend) {
        let result = gru(
            inputs([9, 2, 4], 2, 4),
            Some(&[0, 4, 4, 9]),
            Some(5),
            None,
            backend,
        )
        .unwrap();
        assert_eq!(result.output.dims(), [9, 2, 4]);
        assert_eq!(result.output_state.dims(), [3, 2, 4]);
    }

    #[test]
    fn dense_with_offsets_is_ambiguous() {
        let err = gru(
            inputs([2, 3, 2, 4], 2, 4),
            Some(&[0, 3, 6]),
            None,
            None,
            KernelBackend::Reference,
        )
        .unwrap_err();
        assert_eq!(err, GruError::AmbiguousLayout);
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn packed_without_offsets_is_missing_layout() {
        let err = gru(inputs([6, 2, 4], 2, 4), None, None, None, KernelBackend::Fused)
            .unwrap_err();
        assert_eq!(err, GruError::MissingLayout);
    }

    #[test]
    fn token_count_must_match_offsets() {
        let err = gru(
            inputs([6, 2, 4], 2, 4),
            Some(&[0, 3, 5]),
            None,
            None,
            KernelBackend::Fused,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GruError::TokenCountMismatch {
                expected: 5,
                actual: 6
            }
        );
    }

    #[test]
    fn decreasing_offsets_are_a_value_error() {
        let err = gru(
            inputs([6, 2, 4], 2, 4),
            Some(&[0, 4, 3, 6]),
            None,
            None,
            KernelBackend::Fused,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
    }

    #[test]
    fn mismatched_gate_input_is_rejected() {
        let mut args = inputs([2, 3, 2, 4], 2, 4);
        args.reset_input = zeros([2, 4, 2, 4]);
        let err = gru(args, None, None, None, KernelBackend::Reference).unwrap_err();
        assert!(matches!(
            err,
            GruError::ShapeMismatch {
                name: "reset_input",
                ..
            }
        ));
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-1.0 ; "negative")]
    #[test_case(f32::NAN ; "nan")]
    fn invalid_clip_is_rejected(limit: f32) {
        let err = gru(
            inputs([1, 2, 2, 4], 2, 4),
            None,
            None,
            Some(limit),
            KernelBackend::Fused,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
    }

    #[test]
    fn unsupported_rank_is_rejected() {
        let err = gru(inputs([4, 8], 2, 4), None, None, None, KernelBackend::Fused).unwrap_err();
        assert!(matches!(err, GruError::UnsupportedRank { actual: 2, .. }));
    }
}
