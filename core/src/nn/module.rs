use crate::tensor::{Tensor, TensorElem};
use std::fmt::Debug;

/// A Module trait for Neural Network layers.
///
/// Layers are `Debug + Send + Sync` so they can be inspected and shared across the `rayon`
/// workers the tensor kernels run on.
///
/// A fresh layer is in training mode. Only layers whose forward pass depends on the mode
/// (e.g. [`crate::nn::RRelu`]) need to override [`Module::train`] and [`Module::eval`].
pub trait Module<T: TensorElem>: Debug + Send + Sync {
    /// Trainable parameters owned by the layer.
    fn parameters(&self) -> Vec<&Tensor<T, 1>> {
        Vec::new()
    }

    /// Mutable access to the trainable parameters, in the order of [`Module::parameters`].
    fn parameters_mut(&mut self) -> Vec<&mut Tensor<T, 1>> {
        Vec::new()
    }

    fn train(&mut self) {}

    fn eval(&mut self) {}

    /// Total number of trainable scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.size()).sum()
    }
}
