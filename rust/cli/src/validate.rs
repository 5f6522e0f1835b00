//! One fused-vs-reference validation case.

use burn::tensor::backend::AutodiffBackend;
use gru_config::{CaseConfig, DType};
use gru_core::{
    Comparison, GpuAutodiffBackend, PackedBatch, ReferenceEngine, ToleranceTable,
    check_gradient_clipping, compare, head_dim, run_engine, test_utils::GruTestInputs,
};
use gru_fused::{FusedEngine, GruBackend};
use half::{bf16, f16};
use serde::Serialize;

use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub label: String,
    pub case: CaseConfig,
    pub batch_size: usize,
    pub total_tokens: usize,
    pub comparisons: Vec<Comparison>,
    pub passed: bool,
}

impl CaseReport {
    pub fn failures(&self) -> impl Iterator<Item = &Comparison> {
        self.comparisons.iter().filter(|c| !c.passed)
    }
}

/// Batch layout of `case`.
pub fn case_batch(case: &CaseConfig) -> Result<PackedBatch> {
    Ok(PackedBatch::new(
        case.batch_size,
        case.sequence_length,
        case.cu_seqlens.as_deref(),
        None,
    )?)
}

/// Seeded host data of `case`.
pub fn case_inputs(case: &CaseConfig, batch: &PackedBatch) -> Result<GruTestInputs> {
    let head_dim = head_dim(case.state_size, case.num_heads)?;
    Ok(GruTestInputs::random(
        batch,
        case.num_heads,
        head_dim,
        case.input_state,
        case.seed,
    ))
}

/// Runs `case` forward and backward on both engines with the case's element type.
pub fn run_case(case: &CaseConfig) -> Result<CaseReport> {
    match case.dtype {
        DType::F32 => run_case_on::<GpuAutodiffBackend<f32>>(case),
        DType::F16 => run_case_on::<GpuAutodiffBackend<f16>>(case),
        DType::BF16 => run_case_on::<GpuAutodiffBackend<bf16>>(case),
    }
}

fn run_case_on<B: AutodiffBackend + GruBackend>(case: &CaseConfig) -> Result<CaseReport> {
    let batch = case_batch(case)?;
    let data = case_inputs(case, &batch)?;
    let gradient_clipping = check_gradient_clipping(case.gradient_clipping)?;
    let device = Default::default();
    let label = case.label();

    tracing::info!(case = %label, "validating");

    let fused = run_engine::<B>(&FusedEngine, &data, &batch, gradient_clipping, &device)?;
    let reference = run_engine::<B>(&ReferenceEngine, &data, &batch, gradient_clipping, &device)?;

    let table = ToleranceTable::for_batch(case.dtype, &batch);
    let comparisons = compare(&fused, &reference, &table);
    let passed = comparisons.iter().all(|c| c.passed);

    Ok(CaseReport {
        label,
        case: case.clone(),
        batch_size: batch.batch_size(),
        total_tokens: batch.total_tokens(),
        comparisons,
        passed,
    })
}

pub fn print_report(report: &CaseReport) {
    println!(
        "{} [{}]",
        report.label,
        if report.passed { "PASS" } else { "FAIL" }
    );
    println!(
        "  batch_size: {}, total_tokens: {}",
        report.batch_size, report.total_tokens
    );
    for c in &report.comparisons {
        println!(
            "  {:<20} max_diff={:.3e}  atol={:.1e} rtol={:.1e}  {}",
            c.name,
            c.max_abs_diff,
            c.tolerance.atol,
            c.tolerance.rtol,
            if c.passed { "ok" } else { "FAIL" }
        );
    }
}

#[cfg(test)]
mod tests {
    use gru_core::{ErrorKind, GruError};
    use test_case::test_case;

    use super::*;
    use crate::CliError;

    #[test_case(CaseConfig::dense(2, 5) ; "dense")]
    #[test_case(CaseConfig::packed(vec![0, 3, 3, 10]).with_input_state(true) ; "packed")]
    #[test_case(CaseConfig::packed(vec![0, 4, 9]).with_gradient_clipping(Some(1e-2)) ; "clipped")]
    fn test_case_passes(case: CaseConfig) {
        let report = run_case(&case.with_state(16, 2)).unwrap();
        assert_eq!(report.comparisons.len(), 9);
        assert!(
            report.passed,
            "{:?}",
            report.failures().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_report_sizes() {
        let case = CaseConfig::packed(vec![0, 3, 3, 10]).with_state(16, 2);
        let report = run_case(&case).unwrap();
        assert_eq!(report.batch_size, 3);
        assert_eq!(report.total_tokens, 10);
        assert_eq!(report.label, case.label());
    }

    #[test]
    fn test_missing_layout() {
        let err = run_case(&CaseConfig::default()).unwrap_err();
        assert!(matches!(err, CliError::Gru(GruError::MissingLayout)));
    }

    #[test]
    fn test_indivisible_heads() {
        let case = CaseConfig::dense(1, 4).with_state(10, 4);
        match run_case(&case).unwrap_err() {
            CliError::Gru(err) => assert_eq!(err.kind(), ErrorKind::Shape),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_clip() {
        let case = CaseConfig::dense(1, 4)
            .with_state(8, 2)
            .with_gradient_clipping(Some(0.0));
        match run_case(&case).unwrap_err() {
            CliError::Gru(err) => assert_eq!(err.kind(), ErrorKind::Value),
            other => panic!("unexpected error: {other}"),
        }
    }
}
