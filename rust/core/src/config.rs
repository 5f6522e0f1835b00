//! Backend and element type selected by cargo features.
//!
//! With several backend features enabled the first of rocm, cuda, wgpu, cpu wins, so the
//! default `cpu` feature can stay on when a GPU backend is requested. Likewise bf16 wins
//! over f16, and both win over the default f32.

#[cfg(feature = "rocm")]
pub type GpuBackend<F = DType> = burn::backend::Rocm<F>;

#[cfg(all(feature = "cuda", not(feature = "rocm")))]
pub type GpuBackend<F = DType> = burn::backend::Cuda<F>;

#[cfg(all(feature = "wgpu", not(any(feature = "rocm", feature = "cuda"))))]
pub type GpuBackend<F = DType> = burn::backend::Wgpu<F>;

#[cfg(all(
    feature = "cpu",
    not(any(feature = "rocm", feature = "cuda", feature = "wgpu"))
))]
pub type GpuBackend<F = DType> = burn::backend::Cpu<F>;

#[cfg(not(any(feature = "rocm", feature = "cuda", feature = "wgpu", feature = "cpu")))]
pub type GpuBackend<F = DType> =
    compile_error!("One of the features 'rocm', 'cuda', 'wgpu' or 'cpu' must be enabled");

#[cfg(feature = "bf16")]
pub type DType = half::bf16;

#[cfg(all(feature = "f16", not(feature = "bf16")))]
pub type DType = half::f16;

#[cfg(all(feature = "f32", not(any(feature = "f16", feature = "bf16"))))]
pub type DType = f32;

#[cfg(not(any(feature = "bf16", feature = "f16", feature = "f32")))]
pub type DType = compile_error!("One of the features 'bf16', 'f16' or 'f32' must be enabled");

pub type GpuAutodiffBackend<F = DType> = burn::backend::Autodiff<GpuBackend<F>>;

/// The [`gru_config::DType`] matching the compiled-in element type.
#[must_use]
pub const fn compiled_dtype() -> gru_config::DType {
    if cfg!(feature = "bf16") {
        gru_config::DType::BF16
    } else if cfg!(feature = "f16") {
        gru_config::DType::F16
    } else {
        gru_config::DType::F32
    }
}
