//! Shared test utilities for the GRU crates.

use burn::tensor::{Distribution, Tensor, TensorData};
use burn_backend::Backend;

use crate::{GpuBackend, engine::RecurrenceInputs, packed::PackedBatch};

/// Standard deviation of generated test inputs and weights.
pub const INPUT_STD: f64 = 0.01;

/// Assert two f32 slices are close within relative and absolute tolerance.
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_data_close(a: &[f32], b: &[f32], rtol: f32, atol: f32, name: &str) {
    assert_eq!(
        a.len(),
        b.len(),
        "{name}: Data sizes don't match: {} vs {}",
        a.len(),
        b.len()
    );

    let mut max_diff = 0.0f32;
    let mut max_idx = 0;
    let mut max_av = 0.0f32;
    let mut max_bv = 0.0f32;

    for (i, (&av, &bv)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (av - bv).abs();
        if diff > max_diff {
            max_diff = diff;
            max_idx = i;
            max_av = av;
            max_bv = bv;
        }
    }

    let tolerance = atol + rtol * max_bv.abs();
    eprintln!(
        "{name}: max_diff={max_diff:.3e} tol={tolerance:.3e} at idx {max_idx}: tested={max_av:.6} ref={max_bv:.6}",
    );
    assert!(
        max_diff <= tolerance,
        "{name}: max_diff={max_diff:.3e} exceeds tolerance={tolerance:.3e} at idx {max_idx}: tested={max_av:.6} ref={max_bv:.6}",
    );
}

/// Largest absolute elementwise difference.
#[must_use]
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f32::max)
}

/// Tensor contents as f32, whatever the backend element type.
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().convert::<f32>().to_vec().unwrap()
}

/// Host copy of one recurrence call in the flat token layout, so the same data can be
/// uploaded to several backends.
#[derive(Debug, Clone)]
pub struct GruTestInputs {
    pub num_heads: usize,
    pub head_dim: usize,
    pub total_tokens: usize,
    pub batch_size: usize,
    pub input: Vec<f32>,
    pub forget_input: Vec<f32>,
    pub reset_input: Vec<f32>,
    pub weight: Vec<f32>,
    pub forget_weight: Vec<f32>,
    pub reset_weight: Vec<f32>,
    /// All zeros unless generated with an input state.
    pub input_state: Vec<f32>,
}

impl GruTestInputs {
    /// Normal(0, [`INPUT_STD`]) data for `batch`, deterministic for a given seed.
    #[must_use]
    pub fn random(
        batch: &PackedBatch,
        num_heads: usize,
        head_dim: usize,
        with_input_state: bool,
        seed: u64,
    ) -> Self {
        let device = <GpuBackend as Backend>::Device::default();
        <GpuBackend as Backend>::seed(&device, seed);

        let random = |shape: [usize; 3]| -> Vec<f32> {
            if shape.contains(&0) {
                return Vec::new();
            }
            to_vec(Tensor::<GpuBackend, 3>::random(
                shape,
                Distribution::Normal(0.0, INPUT_STD),
                &device,
            ))
        };

        let total_tokens = batch.total_tokens();
        let batch_size = batch.batch_size();
        let sequence = [total_tokens, num_heads, head_dim];
        let square = [num_heads, head_dim, head_dim];
        let state = [batch_size, num_heads, head_dim];

        Self {
            num_heads,
            head_dim,
            total_tokens,
            batch_size,
            input: random(sequence),
            forget_input: random(sequence),
            reset_input: random(sequence),
            weight: random(square),
            forget_weight: random(square),
            reset_weight: random(square),
            input_state: if with_input_state {
                random(state)
            } else {
                vec![0.0; state.iter().product()]
            },
        }
    }

    /// The tokens and input state of sequence `b` alone, as a batch of one.
    #[must_use]
    pub fn sequence(&self, batch: &PackedBatch, b: usize) -> Self {
        let per_token = self.num_heads * self.head_dim;
        let start = batch.cu_seqlens()[b] * per_token;
        let end = batch.cu_seqlens()[b + 1] * per_token;
        Self {
            total_tokens: batch.sequence_length(b),
            batch_size: 1,
            input: self.input[start..end].to_vec(),
            forget_input: self.forget_input[start..end].to_vec(),
            reset_input: self.reset_input[start..end].to_vec(),
            input_state: self.input_state[b * per_token..(b + 1) * per_token].to_vec(),
            ..self.clone()
        }
    }

    /// Upload to `B` as untracked tensors.
    pub fn to_inputs<B: Backend>(&self, device: &B::Device) -> RecurrenceInputs<B> {
        let sequence = [self.total_tokens, self.num_heads, self.head_dim];
        let square = [self.num_heads, self.head_dim, self.head_dim];
        let state = [self.batch_size, self.num_heads, self.head_dim];
        let upload = |data: &[f32], shape: [usize; 3]| {
            Tensor::<B, 3>::from_data(TensorData::new(data.to_vec(), shape), device)
        };

        RecurrenceInputs {
            input: upload(&self.input, sequence),
            weight: upload(&self.weight, square),
            forget_input: upload(&self.forget_input, sequence),
            forget_weight: upload(&self.forget_weight, square),
            reset_input: upload(&self.reset_input, sequence),
            reset_weight: upload(&self.reset_weight, square),
            input_state: upload(&self.input_state, state),
        }
    }
}
