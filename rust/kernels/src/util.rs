//! Allocation helpers for kernel launchers.

use burn::tensor::DType;
use burn_backend::Shape;
use burn_cubecl::{
    CubeRuntime, FloatElement,
    ops::numeric::{empty_device, zeros_client},
    tensor::CubeTensor,
};
use cubecl::{prelude::*, server::Handle};

/// Uninitialised tensor of element type `F` on the template's client and device.
pub fn empty_like<R: CubeRuntime, F: FloatElement>(
    template: &CubeTensor<R>,
    shape: impl Into<Shape>,
) -> CubeTensor<R> {
    empty_device::<R, F>(
        template.client.clone(),
        template.device.clone(),
        shape.into(),
    )
}

/// Zero-filled tensor of an explicit dtype, used for atomic accumulators and scratch.
pub fn zeros_like_dtype<R: CubeRuntime>(
    template: &CubeTensor<R>,
    shape: impl Into<Shape>,
    dtype: DType,
) -> CubeTensor<R> {
    zeros_client::<R>(
        template.client.clone(),
        template.device.clone(),
        shape.into(),
        dtype,
    )
}

/// Upload a host `u32` slice (sequence offsets, index tables) next to the template.
pub fn upload_u32<R: CubeRuntime>(template: &CubeTensor<R>, data: &[u32]) -> Handle {
    template.client.create_from_slice(u32::as_bytes(data))
}
