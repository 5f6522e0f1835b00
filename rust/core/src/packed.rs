//! Dense and packed (variable-length) batch layouts.
//!
//! Every layout is reduced to cumulative offsets over a flat token axis: sequence `b`
//! owns the tokens `cu_seqlens[b]..cu_seqlens[b + 1]`. A dense `[B, S]` batch is the
//! special case `[0, S, 2S, ..., B*S]`.

use crate::error::{GruError, Result};

/// Validated sequence boundaries of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBatch {
    cu_seqlens: Vec<usize>,
    max_seqlen: usize,
}

impl PackedBatch {
    /// Builds a descriptor from exactly one of `sequence_length` (dense) or `cu_seqlens`
    /// (packed). `max_seqlen`, when given, must match the longest sequence.
    pub fn new(
        batch_size: usize,
        sequence_length: Option<usize>,
        cu_seqlens: Option<&[usize]>,
        max_seqlen: Option<usize>,
    ) -> Result<Self> {
        let batch = match (sequence_length, cu_seqlens) {
            (Some(_), Some(_)) => return Err(GruError::AmbiguousLayout),
            (None, None) => return Err(GruError::MissingLayout),
            (Some(len), None) => Self::dense(batch_size, len),
            (None, Some(cu)) => Self::packed(cu.to_vec(), None)?,
        };
        match max_seqlen {
            Some(given) if given != batch.max_seqlen => Err(GruError::MaxSeqlenMismatch {
                given,
                actual: batch.max_seqlen,
            }),
            _ => Ok(batch),
        }
    }

    /// `batch_size` sequences of `sequence_length` tokens each.
    #[must_use]
    pub fn dense(batch_size: usize, sequence_length: usize) -> Self {
        Self {
            cu_seqlens: (0..=batch_size).map(|b| b * sequence_length).collect(),
            max_seqlen: if batch_size == 0 { 0 } else { sequence_length },
        }
    }

    /// Ragged batch from cumulative offsets. Offsets must start at 0 and never decrease.
    pub fn packed(cu_seqlens: Vec<usize>, max_seqlen: Option<usize>) -> Result<Self> {
        let first = *cu_seqlens.first().ok_or(GruError::EmptyOffsets)?;
        if first != 0 {
            return Err(GruError::OffsetsNotZeroBased { first });
        }
        if let Some(index) = cu_seqlens.windows(2).position(|w| w[1] < w[0]) {
            return Err(GruError::OffsetsDecreasing {
                index: index + 1,
                previous: cu_seqlens[index],
                current: cu_seqlens[index + 1],
            });
        }

        let actual = cu_seqlens
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0);
        if let Some(given) = max_seqlen
            && given != actual
        {
            return Err(GruError::MaxSeqlenMismatch { given, actual });
        }

        Ok(Self {
            cu_seqlens,
            max_seqlen: actual,
        })
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.cu_seqlens.len() - 1
    }

    #[must_use]
    pub fn total_tokens(&self) -> usize {
        self.cu_seqlens[self.cu_seqlens.len() - 1]
    }

    #[must_use]
    pub fn max_seqlen(&self) -> usize {
        self.max_seqlen
    }

    #[must_use]
    pub fn cu_seqlens(&self) -> &[usize] {
        &self.cu_seqlens
    }

    /// Length of sequence `batch`.
    #[must_use]
    pub fn sequence_length(&self, batch: usize) -> usize {
        self.cu_seqlens[batch + 1] - self.cu_seqlens[batch]
    }

    pub fn lengths(&self) -> impl ExactSizeIterator<Item = usize> + '_ {
        self.cu_seqlens.windows(2).map(|w| w[1] - w[0])
    }

    /// The common length when every sequence has the same number of tokens.
    #[must_use]
    pub fn uniform_length(&self) -> Option<usize> {
        let mut lengths = self.lengths();
        let first = lengths.next().unwrap_or(0);
        lengths.all(|l| l == first).then_some(first)
    }

    #[must_use]
    pub fn is_uniform(&self) -> bool {
        self.uniform_length().is_some()
    }

    /// Owning sequence and local position of a global token. Zero-length sequences
    /// own no tokens and are skipped.
    #[must_use]
    pub fn locate(&self, token: usize) -> Option<(usize, usize)> {
        if token >= self.total_tokens() {
            return None;
        }
        let batch = self.cu_seqlens.partition_point(|&o| o <= token) - 1;
        Some((batch, token - self.cu_seqlens[batch]))
    }

    /// Global token of position `local` in sequence `batch`.
    #[must_use]
    pub fn token_index(&self, batch: usize, local: usize) -> Option<usize> {
        (batch < self.batch_size() && local < self.sequence_length(batch))
            .then(|| self.cu_seqlens[batch] + local)
    }

    /// Fails unless a sequence tensor with `tokens` rows matches these offsets.
    pub fn check_total_tokens(&self, tokens: usize) -> Result<()> {
        if tokens == self.total_tokens() {
            Ok(())
        } else {
            Err(GruError::TokenCountMismatch {
                expected: self.total_tokens(),
                actual: tokens,
            })
        }
    }

    /// Offsets as `u32` for upload to a device.
    pub fn offsets_u32(&self) -> Result<Vec<u32>> {
        self.cu_seqlens
            .iter()
            .map(|&offset| u32::try_from(offset).map_err(|_| GruError::OffsetOverflow { offset }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_dense_offsets() {
        let batch = PackedBatch::dense(3, 4);
        assert_eq!(batch.cu_seqlens(), &[0, 4, 8, 12]);
        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.total_tokens(), 12);
        assert_eq!(batch.max_seqlen(), 4);
        assert_eq!(batch.uniform_length(), Some(4));
    }

    #[test]
    fn test_packed_lengths() {
        let batch = PackedBatch::packed(vec![0, 7, 19, 27, 93], Some(66)).unwrap();
        assert_eq!(batch.lengths().collect::<Vec<_>>(), vec![7, 12, 8, 66]);
        assert_eq!(batch.total_tokens(), 93);
        assert!(!batch.is_uniform());
        assert_eq!(batch.offsets_u32().unwrap(), vec![0, 7, 19, 27, 93]);
    }

    #[test_case(0, Some((0, 0)) ; "first token")]
    #[test_case(6, Some((0, 6)) ; "end of first sequence")]
    #[test_case(7, Some((2, 0)) ; "skips empty sequence")]
    #[test_case(9, Some((2, 2)) ; "last token")]
    #[test_case(10, None ; "out of range")]
    fn test_locate(token: usize, expected: Option<(usize, usize)>) {
        let batch = PackedBatch::packed(vec![0, 7, 7, 10], None).unwrap();
        assert_eq!(batch.locate(token), expected);
        if let Some((b, local)) = expected {
            assert_eq!(batch.token_index(b, local), Some(token));
        }
    }

    #[test]
    fn test_token_index_rejects_empty_sequence() {
        let batch = PackedBatch::packed(vec![0, 7, 7, 10], None).unwrap();
        assert_eq!(batch.token_index(1, 0), None);
        assert_eq!(batch.token_index(3, 0), None);
    }

    #[test]
    fn test_new_layout_errors() {
        let both = PackedBatch::new(2, Some(4), Some(&[0, 4, 8]), None).unwrap_err();
        assert_eq!(both, GruError::AmbiguousLayout);
        assert_eq!(both.kind(), ErrorKind::Shape);

        let neither = PackedBatch::new(2, None, None, None).unwrap_err();
        assert_eq!(neither, GruError::MissingLayout);
        assert_eq!(neither.kind(), ErrorKind::Shape);

        let dense = PackedBatch::new(2, Some(4), None, Some(4)).unwrap();
        assert_eq!(dense, PackedBatch::dense(2, 4));
    }

    #[test_case(vec![] ; "empty")]
    #[test_case(vec![1, 4, 8] ; "not zero based")]
    #[test_case(vec![0, 4, 3] ; "decreasing")]
    fn test_invalid_offsets_are_value_errors(cu_seqlens: Vec<usize>) {
        let err = PackedBatch::packed(cu_seqlens, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Value);
    }

    #[test]
    fn test_decreasing_reports_index() {
        let err = PackedBatch::packed(vec![0, 4, 3, 9], None).unwrap_err();
        assert_eq!(
            err,
            GruError::OffsetsDecreasing {
                index: 2,
                previous: 4,
                current: 3
            }
        );
    }

    #[test]
    fn test_max_seqlen_mismatch() {
        let err = PackedBatch::packed(vec![0, 3, 8], Some(3)).unwrap_err();
        assert_eq!(err, GruError::MaxSeqlenMismatch { given: 3, actual: 5 });
        assert_eq!(err.kind(), ErrorKind::Value);
    }

    #[test]
    fn test_check_total_tokens() {
        let batch = PackedBatch::packed(vec![0, 3, 8], None).unwrap();
        assert!(batch.check_total_tokens(8).is_ok());
        let err = batch.check_total_tokens(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_zero_length_and_empty_batches() {
        let batch = PackedBatch::packed(vec![0, 0, 0], None).unwrap();
        assert_eq!(batch.max_seqlen(), 0);
        assert_eq!(batch.total_tokens(), 0);
        assert_eq!(batch.uniform_length(), Some(0));
        assert_eq!(batch.locate(0), None);

        let empty = PackedBatch::packed(vec![0], None).unwrap();
        assert_eq!(empty.batch_size(), 0);
        assert_eq!(PackedBatch::dense(0, 5).max_seqlen(), 0);
    }
}
