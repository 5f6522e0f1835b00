use burn::{
    backend::ir::{InitOperationIr, OperationIr},
    tensor::ops::FloatTensor,
};
use burn_backend::TensorMetadata;
use burn_fusion::{
    Fusion, FusionBackend, NoOp, client::GlobalFusionClient, stream::OperationStreams,
};

use crate::{
    TensorBundle,
    kernel::{FusedKernel, FusedKernelBackend},
};

/// Flush pending fused ops that produce `tensor` and take the inner primitive.
fn resolve<B: FusionBackend>(tensor: FloatTensor<Fusion<B>>) -> FloatTensor<B> {
    tensor.client.clone().resolve_tensor_float::<B>(tensor)
}

/// Hand an inner primitive back to the fusion client as a freshly initialised tensor.
fn register<B: FusionBackend>(
    tensor: FloatTensor<B>,
    client: &GlobalFusionClient<B::FusionRuntime>,
) -> FloatTensor<Fusion<B>> {
    let shape = tensor.shape();
    let dtype = tensor.dtype();
    let handle = B::float_tensor_handle(tensor);
    let desc = InitOperationIr::create(shape, dtype, || client.register_tensor_handle(handle));

    let mut registered = client.register(
        OperationStreams::default(),
        OperationIr::Init(desc),
        NoOp::<B>::new(),
    );

    match (registered.pop(), registered.is_empty()) {
        (Some(tensor), true) => tensor,
        _ => unreachable!("an init operation registers exactly one tensor"),
    }
}

/// The fusion client of a bundle, taken from its first field.
/// Generic over `B` so the backend can be inferred at the call site.
pub trait HasClient<B: FusionBackend> {
    fn client(&self) -> &GlobalFusionClient<B::FusionRuntime>;
}

impl<K, B> FusedKernelBackend<K> for Fusion<B>
where
    K: FusedKernel,
    B: FusedKernelBackend<K> + FusionBackend,
    K::Inputs<FloatTensor<Self>>: HasClient<B>,
    K::SavedState<FloatTensor<Self>>: HasClient<B>,
    <K::Inputs<FloatTensor<Self>> as TensorBundle<FloatTensor<Self>>>::Mapped<FloatTensor<B>>:
        Into<K::Inputs<FloatTensor<B>>>,
    <K::Inputs<FloatTensor<B>> as TensorBundle<FloatTensor<B>>>::Mapped<FloatTensor<Self>>:
        Into<K::Inputs<FloatTensor<Self>>>,
    <K::Outputs<FloatTensor<Self>> as TensorBundle<FloatTensor<Self>>>::Mapped<FloatTensor<B>>:
        Into<K::Outputs<FloatTensor<B>>>,
    <K::Outputs<FloatTensor<B>> as TensorBundle<FloatTensor<B>>>::Mapped<FloatTensor<Self>>:
        Into<K::Outputs<FloatTensor<Self>>>,
    <K::SavedState<FloatTensor<Self>> as TensorBundle<FloatTensor<Self>>>::Mapped<FloatTensor<B>>:
        Into<K::SavedState<FloatTensor<B>>>,
    <K::SavedState<FloatTensor<B>> as TensorBundle<FloatTensor<B>>>::Mapped<FloatTensor<Self>>:
        Into<K::SavedState<FloatTensor<Self>>>,
{
    fn max_units_per_cube(device: &Self::Device) -> u32 {
        B::max_units_per_cube(device)
    }

    fn forward(
        inputs: K::Inputs<FloatTensor<Self>>,
        config: K::Config,
    ) -> (
        K::Outputs<FloatTensor<Self>>,
        K::SavedState<FloatTensor<Self>>,
    ) {
        tracing::trace!(kernel = K::NAME, "fusion forward");
        let client = inputs.client().clone();
        let (outputs, saved) = B::forward(inputs.map(resolve::<B>).into(), config);
        (
            outputs.map(|t| register::<B>(t, &client)).into(),
            saved.map(|t| register::<B>(t, &client)).into(),
        )
    }

    fn backward(
        saved: K::SavedState<FloatTensor<Self>>,
        grad_outputs: K::Outputs<FloatTensor<Self>>,
        config: K::Config,
    ) -> K::Inputs<FloatTensor<Self>> {
        tracing::trace!(kernel = K::NAME, "fusion backward");
        let client = saved.client().clone();
        let grads = B::backward(
            saved.map(resolve::<B>).into(),
            grad_outputs.map(resolve::<B>).into(),
            config,
        );
        grads.map(|t| register::<B>(t, &client)).into()
    }
}
