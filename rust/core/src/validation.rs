//! Running an engine forward and backward on host data, and comparing two such runs.
//!
//! The loss is `output.sum() + output_state.sum()`, so every input receives a gradient
//! through both the per-token states and the final states.

use burn::tensor::{Tensor, backend::AutodiffBackend};
use serde::Serialize;

use crate::{
    engine::{RecurrenceEngine, RecurrenceInputs},
    error::Result,
    packed::PackedBatch,
    test_utils::{GruTestInputs, max_abs_diff, to_vec},
    tolerance::{Tolerance, ToleranceTable},
};

/// Forward values and input gradients of one engine run, copied to the host.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    pub output: Vec<f32>,
    pub output_state: Vec<f32>,
    pub input: Vec<f32>,
    pub weight: Vec<f32>,
    pub forget_input: Vec<f32>,
    pub forget_weight: Vec<f32>,
    pub reset_input: Vec<f32>,
    pub reset_weight: Vec<f32>,
    pub input_state: Vec<f32>,
}

/// Uploads `data`, marks every input as requiring a gradient, and runs `engine`.
pub fn run_engine<B: AutodiffBackend>(
    engine: &dyn RecurrenceEngine<B>,
    data: &GruTestInputs,
    batch: &PackedBatch,
    gradient_clipping: Option<f32>,
    device: &B::Device,
) -> Result<EngineRun> {
    let inputs = data.to_inputs::<B>(device).require_grad();
    let tracked = inputs.clone();

    let out = engine.run(inputs, batch, gradient_clipping)?;
    let output = to_vec(out.output.clone());
    let output_state = to_vec(out.output_state.clone());

    let grads = (out.output.sum() + out.output_state.sum()).backward();
    let grad = |tensor: &Tensor<B, 3>| tensor.grad(&grads).map(to_vec).unwrap_or_default();

    Ok(EngineRun {
        output,
        output_state,
        input: grad(&tracked.input),
        weight: grad(&tracked.weight),
        forget_input: grad(&tracked.forget_input),
        forget_weight: grad(&tracked.forget_weight),
        reset_input: grad(&tracked.reset_input),
        reset_weight: grad(&tracked.reset_weight),
        input_state: grad(&tracked.input_state),
    })
}

/// One compared tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub name: &'static str,
    pub max_abs_diff: f32,
    pub tolerance: Tolerance,
    pub passed: bool,
}

impl Comparison {
    fn new(name: &'static str, tested: &[f32], reference: &[f32], tolerance: Tolerance) -> Self {
        let passed = tested.len() == reference.len()
            && tested
                .iter()
                .zip(reference)
                .all(|(&t, &r)| tolerance.allows(t, r));
        Self {
            name,
            max_abs_diff: max_abs_diff(tested, reference),
            tolerance,
            passed,
        }
    }
}

/// Compares every forward value and gradient of `tested` against `reference`.
#[must_use]
pub fn compare(tested: &EngineRun, reference: &EngineRun, table: &ToleranceTable) -> Vec<Comparison> {
    vec![
        Comparison::new("output", &tested.output, &reference.output, table.output),
        Comparison::new(
            "output_state",
            &tested.output_state,
            &reference.output_state,
            table.output_state(),
        ),
        Comparison::new("input.grad", &tested.input, &reference.input, table.input),
        Comparison::new("weight.grad", &tested.weight, &reference.weight, table.weight),
        Comparison::new(
            "forget_input.grad",
            &tested.forget_input,
            &reference.forget_input,
            table.forget_input,
        ),
        Comparison::new(
            "forget_weight.grad",
            &tested.forget_weight,
            &reference.forget_weight,
            table.forget_weight,
        ),
        Comparison::new(
            "reset_input.grad",
            &tested.reset_input,
            &reference.reset_input,
            table.reset_input,
        ),
        Comparison::new(
            "reset_weight.grad",
            &tested.reset_weight,
            &reference.reset_weight,
            table.reset_weight,
        ),
        Comparison::new(
            "input_state.grad",
            &tested.input_state,
            &reference.input_state,
            table.input_state(),
        ),
    ]
}
