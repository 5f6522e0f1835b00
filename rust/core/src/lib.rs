#![warn(clippy::pedantic)]
#![allow(
    clippy::similar_names,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::default_trait_access,
    //
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    //
    clippy::too_many_lines,
    clippy::type_complexity,
)]

//! GRU Core
//!
//! This crate provides:
//! - `PackedBatch` - dense and variable-length batch layouts over a flat token axis
//! - `head_linear` - per-head square transforms of a multi-head state
//! - `RecurrenceEngine` trait - interface for GRU execution strategies
//! - `ReferenceEngine` - the recurrence built from elementary tensor ops
//! - `GruError` - shape and value errors of GRU calls
//! - `run_engine` / `compare` - forward and backward agreement checks between engines

pub mod config;
pub mod engine;
pub mod error;
pub mod head_linear;
pub mod packed;
pub mod reference;
pub mod test_utils;
pub mod tolerance;
pub mod validation;

pub use config::{GpuAutodiffBackend, GpuBackend, compiled_dtype};
pub use engine::{RecurrenceDims, RecurrenceEngine, RecurrenceInputs, RecurrenceOutput};
pub use error::{
    ErrorKind, GruError, Result, check_gradient_clipping, check_units_per_cube,
};
pub use gru_config::{CaseConfig, DType, KernelBackend};
pub use head_linear::{head_dim, head_linear};
pub use packed::PackedBatch;
pub use reference::ReferenceEngine;
pub use tolerance::{Tolerance, ToleranceTable};
pub use validation::{Comparison, EngineRun, compare, run_engine};
