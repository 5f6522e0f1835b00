//! Fused kernel against the reference engine.

use burn::tensor::{Distribution, Tensor};
use gru_core::{
    GpuAutodiffBackend, GpuBackend, PackedBatch, RecurrenceEngine, RecurrenceInputs,
    ReferenceEngine, ToleranceTable, check_units_per_cube, compare, compiled_dtype,
    run_engine,
    test_utils::{GruTestInputs, assert_data_close, to_vec},
};
use gru_kernels::FusedKernelBackend;
use test_case::test_case;

use crate::{FusedEngine, GruKernel};

fn tolerances(batch: &PackedBatch) -> ToleranceTable {
    ToleranceTable::for_batch(compiled_dtype(), batch)
}

/// Runs both engines forward and backward and asserts every compared tensor is in bounds.
fn assert_engines_agree(
    batch: &PackedBatch,
    num_heads: usize,
    head_dim: usize,
    with_input_state: bool,
    gradient_clipping: Option<f32>,
    seed: u64,
) {
    let device = Default::default();
    let data = GruTestInputs::random(batch, num_heads, head_dim, with_input_state, seed);

    let fused = run_engine::<GpuAutodiffBackend>(
        &FusedEngine,
        &data,
        batch,
        gradient_clipping,
        &device,
    )
    .unwrap();
    let reference = run_engine::<GpuAutodiffBackend>(
        &ReferenceEngine,
        &data,
        batch,
        gradient_clipping,
        &device,
    )
    .unwrap();

    for c in compare(&fused, &reference, &tolerances(batch)) {
        eprintln!(
            "{}: max_diff={:.3e} atol={:.1e} rtol={:.1e}",
            c.name, c.max_abs_diff, c.tolerance.atol, c.tolerance.rtol
        );
        assert!(c.passed, "{} out of tolerance: {c:?}", c.name);
    }
}

// =============================================================================
// Forward
// =============================================================================

#[test_case(2, 5, 2, 8 ; "batch2_seq5_heads2_dim8")]
#[test_case(1, 16, 1, 32 ; "batch1_seq16_heads1_dim32")]
#[test_case(3, 4, 4, 16 ; "batch3_seq4_heads4_dim16")]
#[test_case(2, 8, 256, 1 ; "batch2_seq8_heads256_dim1")]
fn test_fused_forward_vs_reference(batch_size: usize, seq_len: usize, heads: usize, dim: usize) {
    let device = Default::default();
    let batch = PackedBatch::dense(batch_size, seq_len);
    let data = GruTestInputs::random(&batch, heads, dim, true, 42);

    let fused = FusedEngine
        .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
        .unwrap();
    let reference = ReferenceEngine
        .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
        .unwrap();

    let tol = tolerances(&batch);
    assert_data_close(
        &to_vec(fused.output),
        &to_vec(reference.output),
        tol.output.rtol,
        tol.output.atol,
        "output",
    );
    assert_data_close(
        &to_vec(fused.output_state),
        &to_vec(reference.output_state),
        tol.output.rtol,
        tol.output.atol,
        "output_state",
    );
}

#[test]
fn test_fused_packed_equals_dense_per_sequence() {
    let device = Default::default();
    let batch = PackedBatch::packed(vec![0, 7, 19, 27, 93], Some(66)).unwrap();
    let data = GruTestInputs::random(&batch, 4, 16, true, 1);

    let packed = FusedEngine
        .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
        .unwrap();
    let packed_output = to_vec(packed.output);
    let packed_state = to_vec(packed.output_state);

    let per_token = 4 * 16;
    for b in 0..batch.batch_size() {
        let len = batch.sequence_length(b);
        let dense = ReferenceEngine
            .run(
                data.sequence(&batch, b).to_inputs::<GpuBackend>(&device),
                &PackedBatch::dense(1, len),
                None,
            )
            .unwrap();

        let start = batch.cu_seqlens()[b] * per_token;
        assert_data_close(
            &packed_output[start..start + len * per_token],
            &to_vec(dense.output),
            0.0,
            tolerances(&batch).output.atol,
            &format!("sequence {b} output"),
        );
        assert_data_close(
            &packed_state[b * per_token..(b + 1) * per_token],
            &to_vec(dense.output_state),
            0.0,
            tolerances(&batch).output.atol,
            &format!("sequence {b} state"),
        );
    }
}

#[test]
fn test_fused_zero_length_sequence_keeps_state() {
    let device = Default::default();
    let batch = PackedBatch::packed(vec![0, 3, 3, 5], None).unwrap();
    let data = GruTestInputs::random(&batch, 2, 4, true, 3);

    let out = FusedEngine
        .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
        .unwrap();
    assert_eq!(out.output.dims(), [5, 2, 4]);

    let state = to_vec(out.output_state);
    assert_data_close(
        &state[8..16],
        &data.input_state[8..16],
        0.0,
        0.0,
        "empty sequence state",
    );
}

#[test]
fn test_fused_output_state_is_last_valid_token() {
    let device = Default::default();
    let batch = PackedBatch::packed(vec![0, 2, 7], None).unwrap();
    let data = GruTestInputs::random(&batch, 1, 8, false, 11);

    let out = FusedEngine
        .run(data.to_inputs::<GpuBackend>(&device), &batch, None)
        .unwrap();
    let output = to_vec(out.output);
    let state = to_vec(out.output_state);

    assert_data_close(&state[0..8], &output[8..16], 0.0, 0.0, "sequence 0");
    assert_data_close(&state[8..16], &output[48..56], 0.0, 0.0, "sequence 1");
}

#[test]
fn test_device_unit_limit_through_autodiff() {
    let device = Default::default();
    let raw = <GpuBackend as FusedKernelBackend<GruKernel>>::max_units_per_cube(&device);
    let tracked =
        <GpuAutodiffBackend as FusedKernelBackend<GruKernel>>::max_units_per_cube(&device);

    assert_eq!(raw, tracked);
    assert!(check_units_per_cube(64, raw).is_ok());
}

// =============================================================================
// Backward
// =============================================================================

#[test_case(2, 6, 2, 8 ; "batch2_seq6_heads2_dim8")]
#[test_case(3, 4, 4, 16 ; "batch3_seq4_heads4_dim16")]
#[test_case(2, 6, 256, 1 ; "batch2_seq6_heads256_dim1")]
fn test_fused_backward_vs_reference(batch_size: usize, seq_len: usize, heads: usize, dim: usize) {
    assert_engines_agree(
        &PackedBatch::dense(batch_size, seq_len),
        heads,
        dim,
        true,
        None,
        5,
    );
}

#[test_case(false ; "zero_state")]
#[test_case(true ; "input_state")]
fn test_fused_varlen_vs_reference(with_input_state: bool) {
    let batch = PackedBatch::packed(vec![0, 7, 19, 27, 93], Some(66)).unwrap();
    assert_engines_agree(&batch, 4, 64, with_input_state, None, 17);
}

#[test]
fn test_fused_varlen_with_empty_sequence() {
    let batch = PackedBatch::packed(vec![0, 5, 5, 9, 9], None).unwrap();
    assert_engines_agree(&batch, 2, 8, true, None, 23);
}

#[test]
fn test_fused_gradient_clipping_vs_reference() {
    let batch = PackedBatch::packed(vec![0, 4, 10], None).unwrap();
    assert_engines_agree(&batch, 2, 8, true, Some(5e-3), 29);
}

#[test]
fn test_fused_gradient_clipping_bounds_state_gradient() {
    let device = Default::default();
    let batch = PackedBatch::dense(2, 6);
    let data = GruTestInputs::random(&batch, 2, 8, true, 9);
    let inputs = data.to_inputs::<GpuAutodiffBackend>(&device);
    let input_state = inputs.input_state.clone().require_grad();
    let limit = 1e-4;

    let out = FusedEngine
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

#[test]
fn test_fused_partial_gradients() {
    let device = Default::default();
    let batch = PackedBatch::packed(vec![0, 3, 8], None).unwrap();
    let data = GruTestInputs::random(&batch, 2, 8, true, 31);
    let inputs = data.to_inputs::<GpuAutodiffBackend>(&device);

    // Only the input and the forget weight are tracked.
    let input = inputs.input.clone().require_grad();
    let forget_weight = inputs.forget_weight.clone().require_grad();
    let tracked = RecurrenceInputs {
        input: input.clone(),
        forget_weight: forget_weight.clone(),
        ..inputs
    };

    let out = FusedEngine.run(tracked.clone(), &batch, None).unwrap();
    let grads = out.output.sum().backward();

    assert!(input.grad(&grads).is_some());
    assert!(forget_weight.grad(&grads).is_some());
    assert!(tracked.weight.grad(&grads).is_none());
    assert!(tracked.reset_input.grad(&grads).is_none());
    assert!(tracked.input_state.grad(&grads).is_none());
}

/// State size 256 over 4 heads, 1024 steps per sequence.
#[test]
#[ignore = "long-running; run with --ignored"]
fn test_fused_long_sequence_vs_reference() {
    assert_engines_agree(&PackedBatch::dense(4, 1024), 4, 64, false, None, 0);
}
