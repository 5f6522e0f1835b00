//! [`FusedKernelBackend`](crate::FusedKernelBackend) for the backends a kernel can meet:
//! the raw cube backend, autodiff on top of it, and fusion on top of it.

mod autodiff;
mod cube;
mod fusion;

pub use fusion::HasClient;
