//! The recurrence contract shared by every execution strategy.
//!
//! For each sequence `b` and each of its tokens `t` in order, starting from
//! `h = input_state[b]`:
//!
//! ```text
//! z = sigmoid(forget_input[t] + h @ forget_weight)
//! r = sigmoid(reset_input[t]  + h @ reset_weight)
//! n = tanh(input[t] + (r * h) @ weight)
//! h = z * h + (1 - z) * n
//! output[t] = h
//! ```
//!
//! and `output_state[b]` is the final `h`. Every product is per head, see
//! [`head_linear`](crate::head_linear::head_linear).

use burn::{prelude::Backend, tensor::Tensor};

use crate::{
    error::{GruError, Result},
    packed::PackedBatch,
};

/// Arguments of one recurrence call in the flat token layout.
#[derive(Debug, Clone)]
pub struct RecurrenceInputs<B: Backend> {
    /// `[total_tokens, num_heads, head_dim]`
    pub input: Tensor<B, 3>,
    /// `[num_heads, head_dim, head_dim]`
    pub weight: Tensor<B, 3>,
    pub forget_input: Tensor<B, 3>,
    pub forget_weight: Tensor<B, 3>,
    pub reset_input: Tensor<B, 3>,
    pub reset_weight: Tensor<B, 3>,
    /// `[batch_size, num_heads, head_dim]`
    pub input_state: Tensor<B, 3>,
}

#[derive(Debug, Clone)]
pub struct RecurrenceOutput<B: Backend> {
    /// `[total_tokens, num_heads, head_dim]`, the state after every token.
    pub output: Tensor<B, 3>,
    /// `[batch_size, num_heads, head_dim]`, the state after each sequence's last token.
    pub output_state: Tensor<B, 3>,
}

/// Sizes shared by all tensors of a validated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceDims {
    pub total_tokens: usize,
    pub num_heads: usize,
    pub head_dim: usize,
}

impl<B: Backend> RecurrenceInputs<B> {
    /// Checks every tensor against `input` and the batch descriptor.
    pub fn validate(&self, batch: &PackedBatch) -> Result<RecurrenceDims> {
        let [total_tokens, num_heads, head_dim] = self.input.dims();
        batch.check_total_tokens(total_tokens)?;

        let sequence = [total_tokens, num_heads, head_dim];
        let square = [num_heads, head_dim, head_dim];
        GruError::check_shape("forget_input", &self.forget_input.dims(), &sequence)?;
        GruError::check_shape("reset_input", &self.reset_input.dims(), &sequence)?;
        GruError::check_shape("weight", &self.weight.dims(), &square)?;
        GruError::check_shape("forget_weight", &self.forget_weight.dims(), &square)?;
        GruError::check_shape("reset_weight", &self.reset_weight.dims(), &square)?;
        GruError::check_shape(
            "input_state",
            &self.input_state.dims(),
            &[batch.batch_size(), num_heads, head_dim],
        )?;

        Ok(RecurrenceDims {
            total_tokens,
            num_heads,
            head_dim,
        })
    }

    /// Marks every tensor as requiring a gradient. A no-op outside autodiff backends.
    #[must_use]
    pub fn require_grad(self) -> Self {
        Self {
            input: self.input.require_grad(),
            weight: self.weight.require_grad(),
            forget_input: self.forget_input.require_grad(),
            forget_weight: self.forget_weight.require_grad(),
            reset_input: self.reset_input.require_grad(),
            reset_weight: self.reset_weight.require_grad(),
            input_state: self.input_state.require_grad(),
        }
    }
}

/// An execution strategy for the recurrence.
///
/// Implementations must agree with the formulas in the module docs up to floating-point
/// summation order, and must produce gradients for every tracked input through autodiff.
pub trait RecurrenceEngine<B: Backend> {
    fn name(&self) -> &'static str;

    /// `gradient_clipping` bounds the gradient passed from each step to the previous state;
    /// the forward values are unaffected.
    fn run(
        &self,
        inputs: RecurrenceInputs<B>,
        batch: &PackedBatch,
        gradient_clipping: Option<f32>,
    ) -> Result<RecurrenceOutput<B>>;
}
