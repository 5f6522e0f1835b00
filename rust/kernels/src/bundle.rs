//! Named groups of tensors that survive a change of tensor type.
//!
//! A fused kernel sees its arguments three ways: as `FloatTensor<Autodiff<B>>` while the
//! graph is being recorded, as `FloatTensor<Fusion<B>>` when fusion is enabled, and as raw
//! `CubeTensor`s at launch time. [`TensorBundle`] lets one struct definition serve all of
//! them:
//!
//! ```ignore
//! tensor_bundle! {
//!     pub struct GruOutputs { states }
//! }
//!
//! let launch: GruOutputs<CubeTensor<R>> = ...;
//! let tracked: GruOutputs<FloatTensor<Autodiff<B>>> = ...;
//! let inner = tracked.map(|t| t.primitive);
//! ```
//!
//! `Array` fixes the tensor count at the type level so the autodiff glue can route one
//! gradient per field without const generics on [`FusedKernel`](crate::FusedKernel).
//! `Mapped<U>` and `ArrayMapped<U>` are always `Self<U>` and `[U; N]`; they are associated
//! types only because the bound `for<T> TensorBundle<T>` cannot be written.

use std::fmt::Debug;

/// A fixed-size, ordered group of tensors of type `T`.
pub trait TensorBundle<T: Debug + Clone + Send>: Sized + Clone + Send + Debug {
    /// `[T; N]` for an `N`-field bundle.
    type Array;
    /// The same bundle holding `U` instead of `T`.
    type Mapped<U: Debug + Clone + Send>: TensorBundle<U, Array = Self::ArrayMapped<U>>;
    /// `[U; N]`.
    type ArrayMapped<U>;

    fn map<U: Debug + Clone + Send>(self, f: impl FnMut(T) -> U) -> Self::Mapped<U>;
    fn into_array(self) -> Self::Array;
    fn from_array(arr: Self::Array) -> Self;
}

/// Paths used by [`tensor_bundle!`] expansions, so invoking crates need no direct
/// `burn-fusion` dependency.
#[doc(hidden)]
pub mod __private {
    pub use burn::tensor::ops::FloatTensor;
    pub use burn_fusion::{Fusion, FusionBackend, client::GlobalFusionClient};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __one_per_field {
    ($_t:tt) => {
        1usize
    };
}

/// Declares a bundle struct and implements [`TensorBundle`] for it.
///
/// Fields are public and kept in declaration order; that order is the order of
/// `into_array` / `from_array`. The first field also provides the fusion client.
///
/// ```ignore
/// tensor_bundle! {
///     /// Per-token gate inputs.
///     pub struct Gates { input, forget_input, reset_input }
/// }
/// ```
#[macro_export]
macro_rules! tensor_bundle {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident { $first:ident $(, $field:ident)* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name<T> {
            pub $first: T,
            $(pub $field: T,)*
        }

        impl<T: std::fmt::Debug + Clone + Send> $crate::TensorBundle<T> for $name<T> {
            type Array = [T; 1usize $(+ $crate::__one_per_field!($field))*];
            type Mapped<U: std::fmt::Debug + Clone + Send> = $name<U>;
            type ArrayMapped<U> = [U; 1usize $(+ $crate::__one_per_field!($field))*];

            fn map<U: std::fmt::Debug + Clone + Send>(self, mut f: impl FnMut(T) -> U) -> $name<U> {
                $name {
                    $first: f(self.$first),
                    $($field: f(self.$field),)*
                }
            }

            fn into_array(self) -> Self::Array {
                [self.$first $(, self.$field)*]
            }

            fn from_array(arr: Self::Array) -> Self {
                let [$first $(, $field)*] = arr;
                $name { $first $(, $field)* }
            }
        }

        impl<B: $crate::bundle::__private::FusionBackend>
            $crate::impls::HasClient<B>
            for $name<$crate::bundle::__private::FloatTensor<$crate::bundle::__private::Fusion<B>>>
        {
            fn client(
                &self,
            ) -> &$crate::bundle::__private::GlobalFusionClient<B::FusionRuntime> {
                &self.$first.client
            }
        }
    };
}

pub use crate::tensor_bundle;
