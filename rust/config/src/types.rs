//! Backend and element type selection.

use serde::{Deserialize, Serialize};

/// Which recurrence engine runs a GRU call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum KernelBackend {
    /// Single-pass CubeCL kernel, one cube per (batch element, head).
    #[default]
    #[cfg_attr(feature = "clap", value(alias = "kernel", alias = "cute"))]
    #[serde(alias = "kernel", alias = "cute")]
    Fused,
    /// Composition of elementary tensor ops. The correctness oracle.
    #[cfg_attr(feature = "clap", value(alias = "torch", alias = "interpreted"))]
    #[serde(alias = "torch", alias = "interpreted")]
    Reference,
}

impl KernelBackend {
    pub const ALL: [Self; 2] = [Self::Fused, Self::Reference];

    #[must_use]
    pub fn is_fused(self) -> bool {
        matches!(self, Self::Fused)
    }
}

impl From<bool> for KernelBackend {
    /// `use_kernel` flag of the module wrapper.
    fn from(use_kernel: bool) -> Self {
        if use_kernel {
            Self::Fused
        } else {
            Self::Reference
        }
    }
}

impl std::fmt::Display for KernelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fused => write!(f, "fused"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

impl std::str::FromStr for KernelBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fused" | "kernel" | "cute" => Ok(Self::Fused),
            "reference" | "torch" | "interpreted" => Ok(Self::Reference),
            _ => Err(format!(
                "unknown kernel backend '{s}'. Use: fused, reference"
            )),
        }
    }
}

/// Data type selection.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    F16,
    BF16,
}

impl DType {
    pub const ALL: [Self; 3] = [Self::F32, Self::F16, Self::BF16];
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::F16 => write!(f, "f16"),
            Self::BF16 => write!(f, "bf16"),
        }
    }
}

impl std::str::FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::F32),
            "f16" | "float16" | "half" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::BF16),
            _ => Err(format!("unknown dtype '{s}'. Use: f32, f16, bf16")),
        }
    }
}
