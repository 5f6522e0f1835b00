//! Agreement bounds between the fused and reference engines.
//!
//! The engines differ only in summation order and in the precision of intermediates
//! (the fused kernel computes in f32 regardless of the element type), so the bounds
//! depend on the element type and loosen for half-precision formats. Ragged batches get
//! their own, mostly tighter, table: their sequences are short, so less error accumulates
//! along the recurrence.

use gru_config::DType;
use serde::Serialize;

use crate::packed::PackedBatch;

/// `|tested - reference| <= atol + rtol * |reference|`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tolerance {
    pub rtol: f32,
    pub atol: f32,
}

impl Tolerance {
    #[must_use]
    pub const fn abs(atol: f32) -> Self {
        Self { rtol: 0.0, atol }
    }

    #[must_use]
    pub fn allows(&self, tested: f32, reference: f32) -> bool {
        (tested - reference).abs() <= self.atol + self.rtol * reference.abs()
    }
}

/// Bounds for every compared tensor of one element type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToleranceTable {
    pub output: Tolerance,
    pub input: Tolerance,
    pub forget_input: Tolerance,
    pub reset_input: Tolerance,
    pub weight: Tolerance,
    pub forget_weight: Tolerance,
    pub reset_weight: Tolerance,
}

impl ToleranceTable {
    #[must_use]
    pub const fn for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::F32 => Self {
                output: Tolerance::abs(4e-6),
                input: Tolerance::abs(1.3e-4),
                forget_input: Tolerance::abs(2.5e-6),
                reset_input: Tolerance::abs(1.3e-6),
                weight: Tolerance {
                    rtol: 1e-3,
                    atol: 1e-3,
                },
                forget_weight: Tolerance::abs(6.3e-5),
                reset_weight: Tolerance::abs(1.41e-5),
            },
            DType::F16 => Self {
                output: Tolerance::abs(6.5e-5),
                input: Tolerance::abs(3e-3),
                forget_input: Tolerance::abs(5.4e-5),
                reset_input: Tolerance::abs(2e-6),
                weight: Tolerance::abs(1.3e-2),
                forget_weight: Tolerance::abs(1e-3),
                reset_weight: Tolerance::abs(8.4e-5),
            },
            DType::BF16 => Self {
                output: Tolerance::abs(2e-4),
                input: Tolerance::abs(1.6e-2),
                forget_input: Tolerance::abs(4e-4),
                reset_input: Tolerance::abs(1.2e-5),
                weight: Tolerance::abs(7.5e-2),
                forget_weight: Tolerance::abs(1.6e-2),
                reset_weight: Tolerance::abs(2.8e-3),
            },
        }
    }

    /// Bounds for a ragged batch of variable-length sequences.
    #[must_use]
    pub const fn varlen_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::F32 => Self {
                output: Tolerance::abs(3e-6),
                input: Tolerance::abs(1.3e-4),
                forget_input: Tolerance::abs(2e-6),
                reset_input: Tolerance::abs(1.1e-6),
                weight: Tolerance::abs(1.6e-4),
                forget_weight: Tolerance::abs(2.7e-6),
                reset_weight: Tolerance::abs(2.3e-6),
            },
            DType::F16 => Self {
                output: Tolerance::abs(6.5e-5),
                input: Tolerance::abs(3e-3),
                forget_input: Tolerance::abs(3.1e-5),
                reset_input: Tolerance::abs(1.5e-5),
                weight: Tolerance::abs(3.7e-4),
                forget_weight: Tolerance::abs(3.9e-6),
                reset_weight: Tolerance::abs(3.9e-6),
            },
            DType::BF16 => Self {
                output: Tolerance::abs(1.5e-4),
                input: Tolerance::abs(8e-3),
                forget_input: Tolerance::abs(2e-4),
                reset_input: Tolerance::abs(1.6e-5),
                weight: Tolerance::abs(2.5e-3),
                forget_weight: Tolerance::abs(3.1e-5),
                reset_weight: Tolerance::abs(2.8e-3),
            },
        }
    }

    /// [`Self::varlen_for_dtype`] for ragged batches, [`Self::for_dtype`] otherwise.
    #[must_use]
    pub fn for_batch(dtype: DType, batch: &PackedBatch) -> Self {
        if batch.is_uniform() {
            Self::for_dtype(dtype)
        } else {
            Self::varlen_for_dtype(dtype)
        }
    }

    /// Output state is a subset of the output and shares its bound.
    #[must_use]
    pub const fn output_state(&self) -> Tolerance {
        self.output
    }

    /// The input state gradient is the carried state gradient after the first token,
    /// the same quantity the input gradient is built from.
    #[must_use]
    pub const fn input_state(&self) -> Tolerance {
        self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerances_loosen_with_precision() {
        let f32_table = ToleranceTable::for_dtype(DType::F32);
        let f16_table = ToleranceTable::for_dtype(DType::F16);
        let bf16_table = ToleranceTable::for_dtype(DType::BF16);
        assert!(f32_table.output.atol < f16_table.output.atol);
        assert!(f16_table.output.atol < bf16_table.output.atol);
        assert!(f16_table.weight.atol < bf16_table.weight.atol);
    }

    #[test]
    fn test_ragged_batches_use_varlen_table() {
        let ragged = PackedBatch::packed(vec![0, 7, 19, 27, 93], None).unwrap();
        let uniform = PackedBatch::packed(vec![0, 5, 10], None).unwrap();

        assert_eq!(
            ToleranceTable::for_batch(DType::F32, &ragged),
            ToleranceTable::varlen_for_dtype(DType::F32)
        );
        assert_eq!(
            ToleranceTable::for_batch(DType::BF16, &uniform),
            ToleranceTable::for_dtype(DType::BF16)
        );

        let varlen = ToleranceTable::varlen_for_dtype(DType::F32);
        assert!(varlen.weight.atol < ToleranceTable::for_dtype(DType::F32).weight.atol);
        assert_eq!(varlen.weight.rtol, 0.0);
    }

    #[test]
    fn test_allows() {
        let tol = Tolerance {
            rtol: 0.1,
            atol: 0.01,
        };
        assert!(tol.allows(1.1, 1.0));
        assert!(!tol.allows(1.2, 1.0));
        assert!(Tolerance::abs(0.0).allows(0.5, 0.5));
    }
}
