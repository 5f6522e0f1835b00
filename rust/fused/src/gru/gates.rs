//! Scalar gate math shared by the forward and backward kernels.
//!
//! The kernels call these with `A = f32` whatever the tensor element type.

use cubecl::prelude::*;

#[cube]
pub fn sigmoid<A: Float>(x: A) -> A {
    A::new(1.0) / (A::new(1.0) + A::exp(A::new(0.0) - x))
}

#[cube]
pub fn tanh<A: Float>(x: A) -> A {
    A::tanh(x)
}

/// `z * h + (1 - z) * n`
#[cube]
pub fn blend<A: Float>(z: A, h: A, n: A) -> A {
    z * h + (A::new(1.0) - z) * n
}

/// `x * (1 - x)`, the derivative of the sigmoid in terms of its output.
#[cube]
pub fn sigmoid_bwd<A: Float>(x: A) -> A {
    x * (A::new(1.0) - x)
}

/// `1 - x^2`, the derivative of tanh in terms of its output.
#[cube]
pub fn tanh_bwd<A: Float>(x: A) -> A {
    A::new(1.0) - x * x
}

#[cube]
pub fn one_minus<A: Float>(x: A) -> A {
    A::new(1.0) - x
}

/// Clamp to `[-limit, limit]`.
#[cube]
pub fn clamp_abs<A: Float>(x: A, limit: A) -> A {
    A::max(A::min(x, limit), A::new(0.0) - limit)
}
