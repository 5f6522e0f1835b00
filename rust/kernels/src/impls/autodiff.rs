use std::marker::PhantomData;

use burn::{
    backend::autodiff::{
        Autodiff,
        checkpoint::{base::Checkpointer, strategy::CheckpointStrategy},
        grads::Gradients,
        ops::{Backward, Ops, OpsKind},
    },
    tensor::{FloatDType, ops::FloatTensor},
};
use burn_backend::{Shape, TensorMetadata};

use crate::{
    TensorBundle,
    kernel::{FusedKernel, FusedKernelBackend},
};

/// Parentless backward step. Preparing it always yields `UnTracked`, which turns an inner
/// primitive into an autodiff tensor without a copy.
#[derive(Debug)]
struct Untracked;

impl<B: burn_backend::Backend> Backward<B, 0> for Untracked {
    type State = ();

    fn backward(self, _ops: Ops<(), 0>, _grads: &mut Gradients, _checkpointer: &mut Checkpointer) {
    }
}

/// Gradient of one kernel output with respect to all `N` kernel inputs.
///
/// Every output gets its own node; when several outputs reach the loss the backward
/// launch runs once per output and the input gradients accumulate in `Gradients`.
#[derive(Debug)]
struct OutputBackward<K, const N: usize, const M: usize, const S: usize> {
    output_idx: usize,
    _kernel: PhantomData<K>,
}

impl<K, const N: usize, const M: usize, const S: usize, B> Backward<B, N>
    for OutputBackward<K, N, M, S>
where
    K: FusedKernel,
    B: FusedKernelBackend<K>,
    B::FloatTensorPrimitive: Send,
    K::SavedState<B::FloatTensorPrimitive>:
        TensorBundle<B::FloatTensorPrimitive, Array = [B::FloatTensorPrimitive; S]>,
    K::Outputs<B::FloatTensorPrimitive>:
        TensorBundle<B::FloatTensorPrimitive, Array = [B::FloatTensorPrimitive; M]>,
    K::Inputs<B::FloatTensorPrimitive>:
        TensorBundle<B::FloatTensorPrimitive, Array = [B::FloatTensorPrimitive; N]>,
{
    type State = (
        K::SavedState<B::FloatTensorPrimitive>,
        [(Vec<usize>, FloatDType); M],
        K::Config,
    );

    fn backward(
        self,
        ops: Ops<Self::State, N>,
        grads: &mut Gradients,
        _checkpointer: &mut Checkpointer,
    ) {
        tracing::trace!(kernel = K::NAME, output = self.output_idx, "autodiff backward");
        let grad = grads.consume::<B>(&ops.node);
        let (saved, output_meta, config) = ops.state;

        let saved = saved.into_array();
        let device = B::float_device(&saved[0]);

        // Only this output carries an upstream gradient; the others contribute nothing.
        let grad_outputs: [B::FloatTensorPrimitive; M] = std::array::from_fn(|i| {
            if i == self.output_idx {
                grad.clone()
            } else {
                let (dims, dtype) = &output_meta[i];
                B::float_zeros(Shape::from(dims.clone()), &device, *dtype)
            }
        });

        let grad_inputs = B::backward(
            K::SavedState::from_array(saved),
            K::Outputs::from_array(grad_outputs),
            config,
        );

        // Parents that do not require a gradient are `None` and get nothing.
        for (grad, parent) in grad_inputs.into_array().into_iter().zip(ops.parents.iter()) {
            if let Some(parent) = parent {
                grads.register::<B>(parent.id, grad);
            }
        }
    }
}

impl<K, B, C, const N: usize, const M: usize, const S: usize> FusedKernelBackend<K>
    for Autodiff<B, C>
where
    K: FusedKernel,
    B: FusedKernelBackend<K>,
    C: CheckpointStrategy,
    B::FloatTensorPrimitive: Clone,
    K::Inputs<B::FloatTensorPrimitive>:
        TensorBundle<B::FloatTensorPrimitive, Array = [B::FloatTensorPrimitive; N]>,
    K::Outputs<B::FloatTensorPrimitive>:
        TensorBundle<B::FloatTensorPrimitive, Array = [B::FloatTensorPrimitive; M]>,
    K::SavedState<B::FloatTensorPrimitive>:
        TensorBundle<B::FloatTensorPrimitive, Array = [B::FloatTensorPrimitive; S]>,
    K::Inputs<FloatTensor<Self>>: TensorBundle<FloatTensor<Self>, Array = [FloatTensor<Self>; N]>,
    K::Outputs<FloatTensor<Self>>: TensorBundle<FloatTensor<Self>, Array = [FloatTensor<Self>; M]>,
    K::SavedState<FloatTensor<Self>>:
        TensorBundle<FloatTensor<Self>, Array = [FloatTensor<Self>; S]>,
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
        let inputs = inputs.into_array();
        let parents: [_; N] = inputs.each_ref().map(|t| t.node.clone());
        let primitives: [_; N] = inputs.map(|t| t.primitive);

        let (outputs, saved) = B::forward(K::Inputs::from_array(primitives), config.clone());
        let outputs: [_; M] = outputs.into_array();
        let saved: [_; S] = saved.into_array();

        let output_meta: [_; M] = std::array::from_fn(|i| {
            (
                outputs[i].shape().dims.clone(),
                outputs[i].dtype().into(),
            )
        });
        let saved_for_backward = K::SavedState::from_array(saved.clone());

        let tracked: [FloatTensor<Self>; M] = std::array::from_fn(|idx| {
            let step = OutputBackward::<K, N, M, S> {
                output_idx: idx,
                _kernel: PhantomData,
            };

            match step.prepare::<C>(parents.clone()).compute_bound().stateful() {
                OpsKind::Tracked(prep) => prep.finish(
                    (
                        saved_for_backward.clone(),
                        output_meta.clone(),
                        config.clone(),
                    ),
                    outputs[idx].clone(),
                ),
                OpsKind::UnTracked(prep) => prep.finish(outputs[idx].clone()),
            }
        });

        let saved: [FloatTensor<Self>; S] = saved.map(|primitive| {
            match Untracked.prepare::<C>([]).compute_bound().stateful() {
                OpsKind::UnTracked(prep) => prep.finish(primitive),
                OpsKind::Tracked(_) => unreachable!("a parentless step is never tracked"),
            }
        });

        (
            K::Outputs::from_array(tracked),
            K::SavedState::from_array(saved),
        )
    }

    fn backward(
        _saved: K::SavedState<FloatTensor<Self>>,
        _grad_outputs: K::Outputs<FloatTensor<Self>>,
        _config: K::Config,
    ) -> K::Inputs<FloatTensor<Self>> {
        panic!("second-order gradients through fused kernels are not supported")
    }
}

impl<K, const N: usize, const M: usize, const S: usize> Clone for OutputBackward<K, N, M, S> {
    fn clone(&self) -> Self {
        Self {
            output_idx: self.output_idx,
            _kernel: PhantomData,
        }
    }
}
