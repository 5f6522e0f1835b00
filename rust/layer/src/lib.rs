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
    clippy::too_many_lines,
    clippy::type_complexity
)]

//! GRU Layer
//!
//! This crate provides:
//! - `Gru` - a multi-head GRU layer: input projection, recurrence, output projection
//! - `GruConfig` - its burn `Config`

pub mod gru;

pub use gru::{Gru, GruConfig};
