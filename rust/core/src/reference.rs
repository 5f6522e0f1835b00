//! Recurrence built from elementary tensor ops.
//!
//! Gradients come from burn's autodiff; nothing here is hand-differentiated apart from
//! the optional gradient clip, which is a [`GradientClipKernel`] around `h_{t-1}`.

use burn::tensor::{Bool, Int, Tensor, TensorData, activation::sigmoid};
use gru_kernels::{FusedKernelBackend, GradientClipKernel, clip_gradient};

use crate::{
    engine::{RecurrenceEngine, RecurrenceInputs, RecurrenceOutput},
    error::Result,
    head_linear::head_linear,
    packed::PackedBatch,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEngine;

/// Weights of one call, cloned into every step.
struct Weights<B: FusedKernelBackend<GradientClipKernel>> {
    weight: Tensor<B, 3>,
    forget_weight: Tensor<B, 3>,
    reset_weight: Tensor<B, 3>,
    gradient_clipping: Option<f32>,
}

impl<B: FusedKernelBackend<GradientClipKernel>> Weights<B> {
    /// One GRU update for a `[batch, heads, head_dim]` slab of tokens.
    fn step(
        &self,
        h_prev: Tensor<B, 3>,
        input: Tensor<B, 3>,
        forget_input: Tensor<B, 3>,
        reset_input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let h_prev = match self.gradient_clipping {
            Some(limit) => clip_gradient(h_prev, limit),
            None => h_prev,
        };

        let z = sigmoid(forget_input + head_linear(h_prev.clone(), self.forget_weight.clone()));
        let r = sigmoid(reset_input + head_linear(h_prev.clone(), self.reset_weight.clone()));
        let n = (input + head_linear(r * h_prev.clone(), self.weight.clone())).tanh();

        z.clone() * h_prev + (z.neg() + 1.0) * n
    }
}

impl ReferenceEngine {
    /// Every sequence has `len` tokens: step through a `[B, len, N, H]` view.
    fn run_uniform<B: FusedKernelBackend<GradientClipKernel>>(
        weights: &Weights<B>,
        inputs: RecurrenceInputs<B>,
        batch_size: usize,
        len: usize,
    ) -> RecurrenceOutput<B> {
        let [total_tokens, num_heads, head_dim] = inputs.input.dims();
        let view = [batch_size, len, num_heads, head_dim];
        let input = inputs.input.reshape(view);
        let forget_input = inputs.forget_input.reshape(view);
        let reset_input = inputs.reset_input.reshape(view);

        let token = |t: &Tensor<B, 4>, s: usize| -> Tensor<B, 3> {
            t.clone()
                .slice([0..batch_size, s..s + 1])
                .reshape([batch_size, num_heads, head_dim])
        };

        let mut h = inputs.input_state;
        let mut steps = Vec::with_capacity(len);
        for s in 0..len {
            h = weights.step(
                h,
                token(&input, s),
                token(&forget_input, s),
                token(&reset_input, s),
            );
            steps.push(h.clone());
        }

        RecurrenceOutput {
            output: Tensor::stack::<4>(steps, 1).reshape([total_tokens, num_heads, head_dim]),
            output_state: h,
        }
    }

    /// Ragged batch: gather one token per sequence per step, freeze sequences that have
    /// run out of tokens, then scatter the steps back into token order.
    fn run_ragged<B: FusedKernelBackend<GradientClipKernel>>(
        weights: &Weights<B>,
        inputs: RecurrenceInputs<B>,
        batch: &PackedBatch,
    ) -> RecurrenceOutput<B> {
        let [total_tokens, num_heads, head_dim] = inputs.input.dims();
        let batch_size = batch.batch_size();
        let device = inputs.input.device();

        let mut h = inputs.input_state;
        let mut steps = Vec::with_capacity(batch.max_seqlen());
        for s in 0..batch.max_seqlen() {
            // Finished sequences read token 0; the mask below discards the result.
            let (tokens, active): (Vec<i64>, Vec<bool>) = (0..batch_size)
                .map(|b| match batch.token_index(b, s) {
                    Some(token) => (token as i64, true),
                    None => (0, false),
                })
                .unzip();

            let tokens =
                Tensor::<B, 1, Int>::from_data(TensorData::new(tokens, [batch_size]), &device);
            let active = Tensor::<B, 1, Bool>::from_data(
                TensorData::new(active, [batch_size]),
                &device,
            )
            .reshape([batch_size, 1, 1])
            .expand([batch_size, num_heads, head_dim]);

            let h_new = weights.step(
                h.clone(),
                inputs.input.clone().select(0, tokens.clone()),
                inputs.forget_input.clone().select(0, tokens.clone()),
                inputs.reset_input.clone().select(0, tokens),
            );
            h = h.mask_where(active, h_new);
            steps.push(h.clone());
        }

        // Step s of sequence b sits at row s * batch_size + b of the stacked steps.
        let rows: Vec<i64> = (0..total_tokens)
            .filter_map(|token| batch.locate(token))
            .map(|(b, local)| (local * batch_size + b) as i64)
            .collect();
        let rows = Tensor::<B, 1, Int>::from_data(TensorData::new(rows, [total_tokens]), &device);

        let stacked = Tensor::stack::<4>(steps, 0).reshape([
            batch.max_seqlen() * batch_size,
            num_heads,
            head_dim,
        ]);

        RecurrenceOutput {
            output: stacked.select(0, rows),
            output_state: h,
        }
    }
}

impl<B: FusedKernelBackend<GradientClipKernel>> RecurrenceEngine<B> for ReferenceEngine {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn run(
        &self,
        inputs: RecurrenceInputs<B>,
        batch: &PackedBatch,
        gradient_clipping: Option<f32>,
    ) -> Result<RecurrenceOutput<B>> {
        let dims = inputs.validate(batch)?;
        let uniform = batch.uniform_length();

        tracing::debug!(
            batch_size = batch.batch_size(),
            total_tokens = dims.total_tokens,
            num_heads = dims.num_heads,
            head_dim = dims.head_dim,
            uniform = uniform.is_some(),
            "reference recurrence"
        );

        // No tokens at all: the state passes through and the (empty) output is the input.
        if dims.total_tokens == 0 {
            return Ok(RecurrenceOutput {
                output: inputs.input,
                output_state: inputs.input_state,
            });
        }

        let weights = Weights {
            weight: inputs.weight.clone(),
            forget_weight: inputs.forget_weight.clone(),
            reset_weight: inputs.reset_weight.clone(),
            gradient_clipping,
        };

        Ok(match uniform {
            Some(len) => Self::run_uniform(&weights, inputs, batch.batch_size(), len),
            None => Self::run_ragged(&weights, inputs, batch),
        })
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, TensorData};

    use gru_config::DType;

    use super::*;
    use crate::{
        GpuAutodiffBackend, GpuBackend, compiled_dtype,
        error::{ErrorKind, GruError},
        test_utils::{GruTestInputs, assert_data_close, to_vec},
        validation::run_engine,
    };

    /// Scalar GRU for a single head of width 1 with every weight equal to `w`.
    fn scalar_gru(xs: &[(f32, f32, f32)], w: f32, mut h: f32) -> Vec<f32> {
        let sigmoid = |v: f32| 1.0 / (1.0 + (-v).exp());
        xs.iter()
            .map(|&(x, xf, xr)| {
                let z = sigmoid(xf + w * h);
                let r = sigmoid(xr + w * h);
                let n = (x + w * r * h).tanh();
                h = z * h + (1.0 - z) * n;
                h
            })
            .collect()
    }

    #[test]
    fn test_matches_scalar_recurrence() {
        let device = Default::default();
        let xs = [(0.5f32, -0.2f32, 0.1f32), (-0.3, 0.4, 0.2), (0.9, 0.0, -0.7)];
        let tokens = |f: fn(&(f32, f32, f32)) -> f32| {
            Tensor::<GpuBackend, 3>::from_data(
                TensorData::new(xs.iter().map(f).collect::<Vec<_>>(), [3, 1, 1]),
                &device,
            )
        };
        let w = Tensor::<GpuBackend, 3>::full([1, 1, 1], 0.3, &device);
        let inputs = RecurrenceInputs {
            input: tokens(|t| t.0),
            weight: w.clone(),
            forget_input: tokens(|t| t.1),
            forget_weight: w.clone(),
            reset_input: tokens(|t| t.2),
            reset_weight: w,
            input_state: Tensor::full([1, 1, 1], 0.25, &device),
        };

        let out = ReferenceEngine
            .run(inputs, &PackedBatch::dense(1, 3), None)
            .unwrap();
        let expected = scalar_gru(&xs, 0.3, 0.25);

        assert_data_close(&to_vec(out.output), &expected, 0.0, 1e-5, "output");
        assert_data_close(&to_vec(out.output_state), &expected[2..], 0.0, 1e-5, "state");
    }

    /// Bounds on a packed run against the per-sequence runs, per-token tensors then weight
    /// gradients. The runs differ only in summation order.
    fn split_tolerances() -> (f32, f32) {
        match compiled_dtype() {
            DType::F32 => (1e-6, 1.5e-7),
            DType::F16 => (1e-3, 1.5e-3),
            DType::BF16 => (8e-3, 6e-3),
        }
    }

    #[test]
    fn test_packed_equals_dense_per_sequence() {
        let device = Default::default();
        let batch = PackedBatch::packed(vec![0, 3, 8, 10], None).unwrap();
        let data = GruTestInputs::random(&batch, 2, 4, true, 7);
        let (token_atol, weight_atol) = split_tolerances();

        let packed =
            run_engine::<GpuAutodiffBackend>(&ReferenceEngine, &data, &batch, None, &device)
                .unwrap();

        let per_token = 2 * 4;
        let mut weight = vec![0.0f32; packed.weight.len()];
        let mut forget_weight = vec![0.0f32; packed.forget_weight.len()];
        let mut reset_weight = vec![0.0f32; packed.reset_weight.len()];

        for b in 0..batch.batch_size() {
            let len = batch.sequence_length(b);
            let single = run_engine::<GpuAutodiffBackend>(
                &ReferenceEngine,
                &data.sequence(&batch, b),
                &PackedBatch::dense(1, len),
                None,
                &device,
            )
            .unwrap();

            let offset = batch.cu_seqlens()[b] * per_token;
            let tokens = offset..offset + len * per_token;
            let state = b * per_token..(b + 1) * per_token;
            let check = |packed: &[f32], single: &[f32], name: &str| {
                let name = format!("sequence {b} {name}");
                assert_data_close(packed, single, 0.0, token_atol, &name);
            };

            check(&packed.output[tokens.clone()], &single.output, "output");
            check(
                &packed.output_state[state.clone()],
                &single.output_state,
                "output_state",
            );
            check(&packed.input[tokens.clone()], &single.input, "input.grad");
            check(
                &packed.forget_input[tokens.clone()],
                &single.forget_input,
                "forget_input.grad",
            );
            check(&packed.reset_input[tokens], &single.reset_input, "reset_input.grad");
            check(&packed.input_state[state], &single.input_state, "input_state.grad");

            for (sum, g) in [
                (&mut weight, &single.weight),
                (&mut forget_weight, &single.forget_weight),
                (&mut reset_weight, &single.reset_weight),
            ] {
                sum.iter_mut().zip(g).for_each(|(s, g)| *s += g);
            }
        }

        for (packed, summed, name) in [
            (&packed.weight, &weight, "weight.grad"),
            (&packed.forget_weight, &forget_weight, "forget_weight.grad"),
            (&packed.reset_weight, &reset_weight, "reset_weight.grad"),
        ] {
            assert_data_close(packed, summed, 0.0, weight_atol, name);
        }
    }

    #[test]
    fn test_zero_length_sequence_keeps_state() {
        let device = Default::default();
        let batch = PackedBatch::packed(vec![0, 4, 4, 6], None).unwrap();
        let data = GruTestInputs::random(&batch, 2, 2, true, 3);

        let out = ReferenceEngine
            .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
            .unwrap();
        assert_eq!(out.output.dims(), [6, 2, 2]);

        let state = to_vec(out.output_state);
        assert_data_close(&state[4..8], &data.input_state[4..8], 0.0, 0.0, "empty sequence state");
    }

    #[test]
    fn test_output_state_is_last_valid_token() {
        let device = Default::default();
        let batch = PackedBatch::packed(vec![0, 2, 7], None).unwrap();
        let data = GruTestInputs::random(&batch, 1, 4, false, 11);

        let out = ReferenceEngine
            .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
            .unwrap();
        let output = to_vec(out.output);
        let state = to_vec(out.output_state);

        assert_data_close(&state[0..4], &output[4..8], 0.0, 0.0, "sequence 0");
        assert_data_close(&state[4..8], &output[24..28], 0.0, 0.0, "sequence 1");
    }

    #[test]
    fn test_token_count_mismatch() {
        let device = Default::default();
        let data = GruTestInputs::random(&PackedBatch::dense(2, 3), 1, 2, false, 0);
        let err = ReferenceEngine
            .run(
                data.to_inputs::<GpuBackend>(&device),
                &PackedBatch::packed(vec![0, 3, 5], None).unwrap(),
                None,
            )
            .unwrap_err();
        assert_eq!(err, GruError::TokenCountMismatch { expected: 5, actual: 6 });
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_packed_gradients_stay_inside_sequences() {
        let device = Default::default();
        let batch = PackedBatch::packed(vec![0, 3, 5], None).unwrap();
        let data = GruTestInputs::random(&batch, 1, 2, false, 5);
        let inputs = data.to_inputs::<GpuAutodiffBackend>(&device);
        let input = inputs.input.clone().require_grad();

        let out = ReferenceEngine
            .run(
                RecurrenceInputs {
                    input: input.clone(),
                    ..inputs
                },
                &batch,
                None,
            )
            .unwrap();

        // Loss on the first sequence's tokens only.
        let loss = out.output.slice([0..3]).sum();
        let grads = loss.backward();
        let grad = to_vec(input.grad(&grads).unwrap());

        assert!(grad[..6].iter().any(|g| *g != 0.0));
        assert_data_close(&grad[6..], &[0.0; 4], 0.0, 0.0, "second sequence");
    }

    #[test]
    fn test_gradient_clipping_bounds_state_gradient() {
        let device = Default::default();
        let batch = PackedBatch::dense(2, 6);
        let data = GruTestInputs::random(&batch, 2, 4, true, 9);
        let inputs = data.to_inputs::<GpuAutodiffBackend>(&device);
        let input_state = inputs.input_state.clone().require_grad();
        let limit = 1e-4;

        let out = ReferenceEngine
            .run(
                RecurrenceInputs {
                    input_state: input_state.clone(),
                    ..inputs
                },
                &batch,
                Some(limit),
            )
            .unwrap();

        let upstream = Tensor::random(out.output.shape(), Distribution::Default, &device);
        let grads = (out.output * upstream).sum().backward();
        let grad = to_vec(input_state.grad(&grads).unwrap());

        assert!(grad.iter().all(|g| g.abs() <= limit * 1.001));
        assert!(grad.iter().any(|g| *g != 0.0));
    }
}
