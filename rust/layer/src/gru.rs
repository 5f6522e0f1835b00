//! Multi-head GRU layer.

use burn::{
    module::{Ignored, Module, Param},
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
};
use gru_config::KernelBackend;
use gru_core::{GruError, Result, check_gradient_clipping, head_dim};
use gru_fused::{GruBackend, GruInput, gru};

#[derive(Config, Debug)]
pub struct GruConfig {
    pub input_size: usize,
    pub state_size: usize,
    pub output_size: usize,
    pub num_heads: usize,
    #[config(default = false)]
    pub add_bias: bool,
    /// Bound on the state gradient passed from each step to the previous one.
    pub gradient_clipping: Option<f32>,
    #[config(default = "Initializer::Normal{mean:0.0, std:0.02}")]
    pub initializer: Initializer,
}

#[derive(Module, Debug)]
pub struct Gru<B: Backend> {
    /// `input_size -> 3 * state_size`: the candidate, forget and reset streams, in that order.
    pub input_projection: Linear<B>,
    /// `[num_heads, head_dim, head_dim]`
    pub state_weight: Param<Tensor<B, 3>>,
    pub forget_weight: Param<Tensor<B, 3>>,
    pub reset_weight: Param<Tensor<B, 3>>,
    pub output_projection: Linear<B>,
    pub num_heads: usize,
    pub head_dim: usize,
    pub gradient_clipping: Ignored<Option<f32>>,
}

impl GruConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Gru<B>> {
        let head_dim = head_dim(self.state_size, self.num_heads)?;
        let gradient_clipping = check_gradient_clipping(self.gradient_clipping)?;

        let linear = |in_size, out_size| {
            LinearConfig::new(in_size, out_size)
                .with_bias(self.add_bias)
                .with_initializer(self.initializer.clone())
                .init(device)
        };

        let square = || {
            self.initializer.init_with(
                [self.num_heads, head_dim, head_dim],
                Some(head_dim),
                Some(head_dim),
                device,
            )
        };

        Ok(Gru {
            input_projection: linear(self.input_size, 3 * self.state_size),
            state_weight: square(),
            forget_weight: square(),
            reset_weight: square(),
            output_projection: linear(self.state_size, self.output_size),
            num_heads: self.num_heads,
            head_dim,
            gradient_clipping: Ignored(gradient_clipping),
        })
    }
}

impl<B: GruBackend> Gru<B> {
    fn state_size(&self) -> usize {
        self.num_heads * self.head_dim
    }

    /// Parameters:
    /// - `input`: `[batch_size, seq_len, input_size]` (dense) or `[total_tokens, input_size]`
    ///   (packed, with `cu_seqlens`)
    /// - `input_state`: `[batch_size, state_size]`, zeros when absent
    /// - `use_kernel`: run the fused kernel rather than the reference engine
    ///
    /// Returns the output, shaped like `input` with its last dim replaced by `output_size`,
    /// and the final state `[batch_size, state_size]`.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
        input_state: Option<Tensor<B, 2>>,
        cu_seqlens: Option<&[usize]>,
        max_seqlen: Option<usize>,
        use_kernel: bool,
    ) -> Result<(Tensor<B, D>, Tensor<B, 2>)> {
        if D != 2 && D != 3 {
            return Err(GruError::UnsupportedRank {
                name: "input",
                expected: "2 (packed) or 3 (dense)".to_string(),
                actual: D,
            });
        }

        let shape = input.dims();
        let state_size = self.state_size();

        let input_state = match input_state {
            Some(state) => {
                let [batch_size, size] = state.dims();
                GruError::check_shape("input_state", &[batch_size, size], &[batch_size, state_size])?;
                Some(state.reshape([batch_size, self.num_heads, self.head_dim]))
            }
            None => None,
        };

        let tokens = shape[..D - 1].iter().product::<usize>();
        let projected = self
            .input_projection
            .forward(input)
            .reshape([tokens, 3 * state_size]);
        let streams = [0, 1, 2].map(|k| projected.clone().narrow(1, k * state_size, state_size));

        let backend = KernelBackend::from(use_kernel);
        let (output, output_state) = if D == 3 {
            self.recurrence(
                streams,
                [shape[0], shape[1], self.num_heads, self.head_dim],
                input_state,
                cu_seqlens,
                max_seqlen,
                backend,
            )?
        } else {
            self.recurrence(
                streams,
                [shape[0], self.num_heads, self.head_dim],
                input_state,
                cu_seqlens,
                max_seqlen,
                backend,
            )?
        };

        let [_, output_size] = self.output_projection.weight.dims();
        let mut output_shape = shape;
        output_shape[D - 1] = output_size;
        let output = self.output_projection.forward(output).reshape(output_shape);

        let [batch_size, _, _] = output_state.dims();
        Ok((output, output_state.reshape([batch_size, state_size])))
    }

    /// Runs the recurrence on the three `[tokens, state_size]` streams viewed as `shape`,
    /// returning the output back in `[tokens, state_size]`.
    fn recurrence<const E: usize>(
        &self,
        streams: [Tensor<B, 2>; 3],
        shape: [usize; E],
        input_state: Option<Tensor<B, 3>>,
        cu_seqlens: Option<&[usize]>,
        max_seqlen: Option<usize>,
        backend: KernelBackend,
    ) -> Result<(Tensor<B, 2>, Tensor<B, 3>)> {
        let tokens = shape[..E - 2].iter().product::<usize>();
        let [input, forget_input, reset_input] = streams.map(|stream| stream.reshape(shape));

        let result = gru(
            GruInput {
                input,
                weight: self.state_weight.val(),
                forget_input,
                forget_weight: self.forget_weight.val(),
                reset_input,
                reset_weight: self.reset_weight.val(),
                input_state,
            },
            cu_seqlens,
            max_seqlen,
            self.gradient_clipping.0,
            backend,
        )?;

        Ok((
            result.output.reshape([tokens, self.state_size()]),
            result.output_state,
        ))
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::Distribution;
    use gru_core::{
        ErrorKind, GpuAutodiffBackend, GpuBackend, GruError, ToleranceTable, compiled_dtype,
        test_utils::{assert_data_close, to_vec},
    };
    use test_case::test_case;

    use super::*;

    const INPUT_SIZE: usize = 7;
    const STATE_SIZE: usize = 16;
    const OUTPUT_SIZE: usize = 9;
    const NUM_HEADS: usize = 4;

    fn layer<B: Backend>(device: &B::Device) -> Gru<B> {
        GruConfig::new(INPUT_SIZE, STATE_SIZE, OUTPUT_SIZE, NUM_HEADS)
            .init(device)
            .unwrap()
    }

    #[test_case(true ; "kernel")]
    #[test_case(false ; "reference")]
    fn test_dense_shapes(use_kernel: bool) {
        let device = Default::default();
        let gru = layer::<GpuBackend>(&device);
        let input = Tensor::random([2, 5, INPUT_SIZE], Distribution::Default, &device);
        let input_state = Tensor::random([2, STATE_SIZE], Distribution::Default, &device);

        let (output, output_state) = gru
            .forward(input, Some(input_state), None, None, use_kernel)
            .unwrap();

        assert_eq!(output.dims(), [2, 5, OUTPUT_SIZE]);
        assert_eq!(output_state.dims(), [2, STATE_SIZE]);
    }

    #[test_case(true ; "kernel")]
    #[test_case(false ; "reference")]
    fn test_packed_shapes(use_kernel: bool) {
        let device = Default::default();
        let gru = layer::<GpuBackend>(&device);
        let input = Tensor::random([8, INPUT_SIZE], Distribution::Default, &device);

        let (output, output_state) = gru
            .forward(input, None, Some(&[0, 3, 3, 8]), Some(5), use_kernel)
            .unwrap();

        assert_eq!(output.dims(), [8, OUTPUT_SIZE]);
        assert_eq!(output_state.dims(), [3, STATE_SIZE]);
    }

    #[test]
    fn test_kernel_matches_reference() {
        let device = Default::default();
        let gru = layer::<GpuBackend>(&device);
        let input = Tensor::<GpuBackend, 2>::random([12, INPUT_SIZE], Distribution::Default, &device);
        let input_state = Tensor::random([3, STATE_SIZE], Distribution::Default, &device);
        let cu_seqlens = [0, 2, 9, 12];

        let run = |use_kernel| {
            gru.forward(
                input.clone(),
                Some(input_state.clone()),
                Some(&cu_seqlens),
                None,
                use_kernel,
            )
            .unwrap()
        };
        let (kernel_output, kernel_state) = run(true);
        let (reference_output, reference_state) = run(false);

        let tol = ToleranceTable::for_dtype(compiled_dtype()).output;
        assert_data_close(
            &to_vec(kernel_output),
            &to_vec(reference_output),
            tol.rtol,
            tol.atol,
            "output",
        );
        assert_data_close(
            &to_vec(kernel_state),
            &to_vec(reference_state),
            tol.rtol,
            tol.atol,
            "output_state",
        );
    }

    #[test]
    fn test_backward_reaches_every_parameter() {
        let device = Default::default();
        let gru = layer::<GpuAutodiffBackend>(&device);
        let input = Tensor::<GpuAutodiffBackend, 3>::random([2, 4, INPUT_SIZE], Distribution::Default, &device);

        let (output, _) = gru.forward(input, None, None, None, true).unwrap();
        let grads = output.sum().backward();

        assert!(gru.input_projection.weight.val().grad(&grads).is_some());
        assert!(gru.state_weight.val().grad(&grads).is_some());
        assert!(gru.forget_weight.val().grad(&grads).is_some());
        assert!(gru.reset_weight.val().grad(&grads).is_some());
        assert!(gru.output_projection.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn test_indivisible_heads() {
        let err = GruConfig::new(INPUT_SIZE, 10, OUTPUT_SIZE, 4)
            .init::<GpuBackend>(&Default::default())
            .unwrap_err();
        assert_eq!(
            err,
            GruError::IndivisibleHeads {
                state_size: 10,
                num_heads: 4
            }
        );
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_input_state_size_mismatch() {
        let device = Default::default();
        let gru = layer::<GpuBackend>(&device);
        let input = Tensor::<GpuBackend, 3>::random([2, 3, INPUT_SIZE], Distribution::Default, &device);
        let input_state = Tensor::zeros([2, STATE_SIZE + 1], &device);

        let err = gru
            .forward(input, Some(input_state), None, None, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_bias_and_clipping_config() {
        let config = GruConfig::new(INPUT_SIZE, STATE_SIZE, OUTPUT_SIZE, NUM_HEADS)
            .with_add_bias(true)
            .with_gradient_clipping(Some(1.0));
        let gru = config.init::<GpuBackend>(&Default::default()).unwrap();
        assert!(gru.input_projection.bias.is_some());
        assert_eq!(gru.gradient_clipping.0, Some(1.0));

        let err = config
            .with_gradient_clipping(Some(-1.0))
            .init::<GpuBackend>(&Default::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
    }
}
