#![warn(clippy::pedantic)]
#![allow(
    clippy::similar_names,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::default_trait_access,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::too_many_lines,
    clippy::type_complexity
)]

//! Validation and benchmarking front end for the fused GRU.
//!
//! - [`run_case`] runs one [`CaseConfig`] on the fused and reference engines and compares
//!   forward values and gradients
//! - [`load_sweep`] / [`parse_sweep`] read TOML sweep files of cases

pub mod error;
pub mod sweep;
pub mod validate;

pub use error::{CliError, Result};
pub use gru_config::{CaseConfig, DType, KernelBackend};
pub use gru_fused::{FusedEngine, GruBackend, select_engine};
pub use gru_layer::{Gru, GruConfig};
pub use sweep::{load_sweep, parse_sweep};
pub use validate::{CaseReport, case_batch, case_inputs, print_report, run_case};

#[cfg(not(any(feature = "cuda", feature = "rocm", feature = "wgpu", feature = "cpu")))]
compile_error!(
    "At least one backend must be enabled, please run with `--features cuda/rocm/wgpu/cpu`"
);
