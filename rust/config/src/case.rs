//! A single fused-vs-reference validation case.

use serde::{Deserialize, Serialize};

use crate::DType;

/// Shape and options of one GRU validation run.
///
/// Exactly one of `sequence_length` (dense batch) and `cu_seqlens` (packed batch) is
/// expected; the descriptor built from it rejects anything else.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct CaseConfig {
    /// Label used in reports.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub name: Option<String>,
    /// Batch size of a dense case. Ignored when `cu_seqlens` is given.
    #[serde(default = "default_batch_size")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "4"))]
    pub batch_size: usize,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub sequence_length: Option<usize>,
    /// Cumulative sequence offsets, e.g. `0,7,19,27,93`.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, value_delimiter = ','))]
    pub cu_seqlens: Option<Vec<usize>>,
    #[serde(default = "default_state_size")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "256"))]
    pub state_size: usize,
    #[serde(default = "default_num_heads")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "4"))]
    pub num_heads: usize,
    /// Start from a random initial state instead of zeros.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub input_state: bool,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long))]
    pub gradient_clipping: Option<f32>,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "f32"))]
    pub dtype: DType,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "0"))]
    pub seed: u64,
}

fn default_batch_size() -> usize {
    4
}
fn default_state_size() -> usize {
    256
}
fn default_num_heads() -> usize {
    4
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            name: None,
            batch_size: default_batch_size(),
            sequence_length: None,
            cu_seqlens: None,
            state_size: default_state_size(),
            num_heads: default_num_heads(),
            input_state: false,
            gradient_clipping: None,
            dtype: DType::default(),
            seed: 0,
        }
    }
}

impl CaseConfig {
    #[must_use]
    pub fn dense(batch_size: usize, sequence_length: usize) -> Self {
        Self {
            batch_size,
            sequence_length: Some(sequence_length),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn packed(cu_seqlens: Vec<usize>) -> Self {
        Self {
            batch_size: cu_seqlens.len().saturating_sub(1),
            cu_seqlens: Some(cu_seqlens),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_state(mut self, state_size: usize, num_heads: usize) -> Self {
        self.state_size = state_size;
        self.num_heads = num_heads;
        self
    }

    #[must_use]
    pub fn with_input_state(mut self, input_state: bool) -> Self {
        self.input_state = input_state;
        self
    }

    #[must_use]
    pub fn with_gradient_clipping(mut self, limit: Option<f32>) -> Self {
        self.gradient_clipping = limit;
        self
    }

    #[must_use]
    pub fn is_packed(&self) -> bool {
        self.cu_seqlens.is_some()
    }

    /// Short human-readable description, the name when one is set.
    #[must_use]
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let layout = match (&self.cu_seqlens, self.sequence_length) {
            (Some(cu), _) => format!("cu_seqlens={cu:?}"),
            (None, Some(len)) => format!("b{}xs{len}", self.batch_size),
            (None, None) => format!("b{}", self.batch_size),
        };
        let state = if self.input_state { "+state" } else { "" };
        let clip = self
            .gradient_clipping
            .map(|c| format!(" clip={c}"))
            .unwrap_or_default();
        format!(
            "{layout} d{}h{}{state} {}{clip}",
            self.state_size, self.num_heads, self.dtype
        )
    }
}
