//! Configuration types shared between GRU crates.

mod case;
mod types;

pub use case::*;
pub use types::*;
