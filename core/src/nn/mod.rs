//! Neural network layers.
//!
//! - [`functional`]: stateless activation functions on [`crate::tensor::Tensor`].
//! - [`activation`]: one layer per activation function, sharing the [`ActivationLayer`] contract.

pub mod activation;
pub mod functional;
pub mod module;

pub use activation::{
    ActivationLayer, Celu, Elu, ExtraRepr, Gelu, Hardshrink, Hardsigmoid, Hardswish, Hardtanh,
    LeakyRelu, LogSigmoid, LogSoftmax, Maxout, Mish, PRelu, RRelu, Relu, Relu6, Selu, Sigmoid,
    Silu, Softmax, Softmax2D, Softplus, Softshrink, Softsign, Swish, Tanh, Tanhshrink,
    ThresholdedRelu,
};
pub use functional::DataFormat;
pub use module::Module;
