//! Errors raised while validating GRU calls.

use thiserror::Error;

pub type Result<T, E = GruError> = std::result::Result<T, E>;

/// Broad class of a [`GruError`]: a tensor had the wrong shape, or a value was invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Shape,
    Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GruError {
    #[error("state_size {state_size} is not divisible by num_heads {num_heads}")]
    IndivisibleHeads { state_size: usize, num_heads: usize },

    #[error("sequence tensors hold {actual} tokens but cu_seqlens ends at {expected}")]
    TokenCountMismatch { expected: usize, actual: usize },

    #[error("both sequence_length and cu_seqlens were given")]
    AmbiguousLayout,

    #[error("neither sequence_length nor cu_seqlens was given")]
    MissingLayout,

    #[error("{name} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{name} must have rank {expected}, got rank {actual}")]
    UnsupportedRank {
        name: &'static str,
        expected: String,
        actual: usize,
    },

    #[error("cu_seqlens is empty")]
    EmptyOffsets,

    #[error("cu_seqlens must start at 0, starts at {first}")]
    OffsetsNotZeroBased { first: usize },

    #[error("cu_seqlens decreases at index {index} ({previous} -> {current})")]
    OffsetsDecreasing {
        index: usize,
        previous: usize,
        current: usize,
    },

    #[error("max_seqlen is {given} but the longest sequence has {actual} tokens")]
    MaxSeqlenMismatch { given: usize, actual: usize },

    #[error("offset {offset} does not fit in a u32")]
    OffsetOverflow { offset: usize },

    #[error("gradient_clipping must be finite and positive, got {limit}")]
    InvalidGradientClipping { limit: f32 },

    #[error("head_dim {head_dim} exceeds the {max_units} units a cube holds on this device")]
    HeadDimExceedsCube { head_dim: usize, max_units: u32 },
}

impl GruError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndivisibleHeads { .. }
            | Self::TokenCountMismatch { .. }
            | Self::AmbiguousLayout
            | Self::MissingLayout
            | Self::ShapeMismatch { .. }
            | Self::UnsupportedRank { .. }
            | Self::HeadDimExceedsCube { .. } => ErrorKind::Shape,
            Self::EmptyOffsets
            | Self::OffsetsNotZeroBased { .. }
            | Self::OffsetsDecreasing { .. }
            | Self::MaxSeqlenMismatch { .. }
            | Self::OffsetOverflow { .. }
            | Self::InvalidGradientClipping { .. } => ErrorKind::Value,
        }
    }

    /// Fails with [`GruError::ShapeMismatch`] unless `actual == expected`.
    pub fn check_shape(name: &'static str, actual: &[usize], expected: &[usize]) -> Result<()> {
        if actual == expected {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                name,
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            })
        }
    }
}

/// Validates an optional gradient clip limit.
pub fn check_gradient_clipping(limit: Option<f32>) -> Result<Option<f32>> {
    match limit {
        Some(limit) if !limit.is_finite() || limit <= 0.0 => {
            Err(GruError::InvalidGradientClipping { limit })
        }
        other => Ok(other),
    }
}

/// Fails unless one cube of `max_units` units can give every state coordinate of a head
/// its own unit.
pub fn check_units_per_cube(head_dim: usize, max_units: u32) -> Result<()> {
    if head_dim <= max_units as usize {
        Ok(())
    } else {
        Err(GruError::HeadDimExceedsCube {
            head_dim,
            max_units,
        })
    }
}
