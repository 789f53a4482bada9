//! Activation Layers.
//!
//! # What is an Activation Function?
//!
//! Activation functions introduce **non-linearity** into neural networks. Without them, a neural network
//! (no matter how deep) would just be a single linear transformation.
//!
//! Each layer here stores its configuration, forwards it unchanged to one function of
//! [`crate::nn::functional`], and describes itself through [`ExtraRepr`]:
//!
//! ```rust
//! use shardwise::nn::{ActivationLayer, Celu, ExtraRepr};
//! use shardwise::tensor::Tensor;
//!
//! let layer = Celu::new(0.2).unwrap().with_name("celu_0");
//! assert_eq!(layer.extra_repr(), "alpha=0.2, name=celu_0");
//! assert_eq!(layer.to_string(), "CELU(alpha=0.2, name=celu_0)");
//!
//! let x = Tensor::<f32, 1>::new(vec![-1.0, 1.0], [2]).unwrap();
//! let y = layer.forward(&x).unwrap();
//! assert_eq!(y.data()[1], 1.0);
//! ```
//!
//! Layers never validate input shapes themselves; shape errors come from the functional API.
//! Parameter domains (e.g. `lower <= upper` for [`RRelu`]) are checked once, at construction.

use super::functional::{self as F, DataFormat};
use super::module::Module;
use crate::tensor::{FloatElem, Result, Tensor, TensorError};
use std::fmt;

/// Human-readable description of a layer's configuration.
pub trait ExtraRepr {
    /// Class-style name used by `Display`, e.g. `"LeakyReLU"`.
    fn layer_name(&self) -> &'static str;

    /// The active parameters, e.g. `"negative_slope=0.01, name=act"`.
    fn extra_repr(&self) -> String;
}

/// The uniform contract every activation layer implements.
pub trait ActivationLayer<T: FloatElem>: Module<T> + ExtraRepr {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>>;
}

/// Appends the optional layer name to a parameter description.
fn with_name_suffix(params: String, name: Option<&str>) -> String {
    match (params.is_empty(), name) {
        (_, None) => params,
        (true, Some(name)) => format!("name={}", name),
        (false, Some(name)) => format!("{}, name={}", params, name),
    }
}

/// Framework-style dtype name of an element type, e.g. `"float32"` for `f32`.
fn dtype_name<T>() -> &'static str {
    match std::any::type_name::<T>() {
        "f32" => "float32",
        "f64" => "float64",
        other => other,
    }
}

macro_rules! impl_display {
    ($layer:ident) => {
        impl fmt::Display for $layer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", self.layer_name(), self.extra_repr())
            }
        }
    };
}

macro_rules! impl_with_name {
    ($layer:ident) => {
        impl $layer {
            /// Attaches a name shown by `extra_repr`.
            pub fn with_name(mut self, name: impl Into<String>) -> Self {
                self.name = Some(name.into());
                self
            }

            pub fn name(&self) -> Option<&str> {
                self.name.as_deref()
            }
        }
    };
}

/// Defines a layer without parameters that forwards to `functional::$func`.
macro_rules! stateless_activation {
    ($(#[$doc:meta])* $layer:ident, $display:literal, $func:ident $(, $arg:expr)*) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $layer {
            name: Option<String>,
        }

        impl $layer {
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl_with_name!($layer);

        impl ExtraRepr for $layer {
            fn layer_name(&self) -> &'static str {
                $display
            }

            fn extra_repr(&self) -> String {
                with_name_suffix(String::new(), self.name.as_deref())
            }
        }

        impl<T: FloatElem> Module<T> for $layer {}

        impl<T: FloatElem> ActivationLayer<T> for $layer {
            fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
                Ok(F::$func(x $(, $arg)*))
            }
        }

        impl_display!($layer);
    };
}

stateless_activation!(
    /// `x * relu6(x + 3) / 6`.
    Hardswish,
    "Hardswish",
    hardswish
);
stateless_activation!(Tanh, "Tanh", tanh);
stateless_activation!(
    /// `max(0, x)`.
    Relu,
    "ReLU",
    relu
);
stateless_activation!(
    /// `min(max(0, x), 6)`.
    Relu6,
    "ReLU6",
    relu6
);
stateless_activation!(Sigmoid, "Sigmoid", sigmoid);
stateless_activation!(
    /// `clamp(x / 6 + 0.5, 0, 1)`.
    Hardsigmoid,
    "Hardsigmoid",
    hardsigmoid,
    0.1666667,
    0.5
);
stateless_activation!(Softsign, "Softsign", softsign);
stateless_activation!(
    /// `x * sigmoid(x)`.
    Swish,
    "Swish",
    swish
);
stateless_activation!(
    /// `x * tanh(softplus(x))`.
    Mish,
    "Mish",
    mish
);
stateless_activation!(Tanhshrink, "Tanhshrink", tanhshrink);
stateless_activation!(
    /// Sigmoid Linear Unit, `x * sigmoid(x)`.
    Silu,
    "Silu",
    silu
);
stateless_activation!(LogSigmoid, "LogSigmoid", log_sigmoid);

/// Continuously differentiable ELU.
#[derive(Debug, Clone, PartialEq)]
pub struct Celu {
    alpha: f64,
    name: Option<String>,
}

impl Celu {
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `alpha` is zero.
    pub fn new(alpha: f64) -> Result<Self> {
        if alpha == 0.0 {
            return Err(TensorError::InvalidArgument(
                "alpha cannot be 0 for celu".into(),
            ));
        }
        Ok(Self { alpha, name: None })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Default for Celu {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            name: None,
        }
    }
}

impl_with_name!(Celu);

impl ExtraRepr for Celu {
    fn layer_name(&self) -> &'static str {
        "CELU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(format!("alpha={:?}", self.alpha), self.name.as_deref())
    }
}

impl<T: FloatElem> Module<T> for Celu {}

impl<T: FloatElem> ActivationLayer<T> for Celu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::celu(x, self.alpha)
    }
}

impl_display!(Celu);

#[derive(Debug, Clone, PartialEq)]
pub struct Elu {
    alpha: f64,
    name: Option<String>,
}

impl Elu {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, name: None }
    }
}

impl Default for Elu {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl_with_name!(Elu);

impl ExtraRepr for Elu {
    fn layer_name(&self) -> &'static str {
        "ELU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(format!("alpha={:?}", self.alpha), self.name.as_deref())
    }
}

impl<T: FloatElem> Module<T> for Elu {}

impl<T: FloatElem> ActivationLayer<T> for Elu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::elu(x, self.alpha))
    }
}

impl_display!(Elu);

/// Gaussian Error Linear Unit. Used in **GPT-2**, **BERT**.
///
/// `approximate` selects the tanh approximation instead of the exact erf form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gelu {
    approximate: bool,
    name: Option<String>,
}

impl Gelu {
    pub fn new(approximate: bool) -> Self {
        Self {
            approximate,
            name: None,
        }
    }
}

impl_with_name!(Gelu);

impl ExtraRepr for Gelu {
    fn layer_name(&self) -> &'static str {
        "GELU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("approximate={}", self.approximate),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Gelu {}

impl<T: FloatElem> ActivationLayer<T> for Gelu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::gelu(x, self.approximate))
    }
}

impl_display!(Gelu);

#[derive(Debug, Clone, PartialEq)]
pub struct Hardshrink {
    threshold: f64,
    name: Option<String>,
}

impl Hardshrink {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            name: None,
        }
    }
}

impl Default for Hardshrink {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl_with_name!(Hardshrink);

impl ExtraRepr for Hardshrink {
    fn layer_name(&self) -> &'static str {
        "Hardshrink"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("threshold={:?}", self.threshold),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Hardshrink {}

impl<T: FloatElem> ActivationLayer<T> for Hardshrink {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::hardshrink(x, self.threshold))
    }
}

impl_display!(Hardshrink);

#[derive(Debug, Clone, PartialEq)]
pub struct Hardtanh {
    min: f64,
    max: f64,
    name: Option<String>,
}

impl Hardtanh {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            name: None,
        }
    }
}

impl Default for Hardtanh {
    fn default() -> Self {
        Self::new(-1.0, 1.0)
    }
}

impl_with_name!(Hardtanh);

impl ExtraRepr for Hardtanh {
    fn layer_name(&self) -> &'static str {
        "Hardtanh"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("min={:?}, max={:?}", self.min, self.max),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Hardtanh {}

impl<T: FloatElem> ActivationLayer<T> for Hardtanh {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::hardtanh(x, self.min, self.max))
    }
}

impl_display!(Hardtanh);

/// Parametric ReLU with a trainable slope for negative inputs.
///
/// The weight holds `num_parameters` slopes: 1 shares a slope across all channels, the channel
/// count gives each channel its own.
#[derive(Debug, Clone, PartialEq)]
pub struct PRelu<T: FloatElem> {
    num_parameters: usize,
    init: f64,
    data_format: DataFormat,
    weight: Tensor<T, 1>,
    name: Option<String>,
}

impl<T: FloatElem> PRelu<T> {
    /// Creates the layer with every slope set to `init`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `num_parameters` is zero or `init` is not
    /// representable in `T`.
    pub fn new(num_parameters: usize, init: f64, data_format: DataFormat) -> Result<Self> {
        if num_parameters == 0 {
            return Err(TensorError::InvalidArgument(
                "num_parameters of PReLU must be positive".into(),
            ));
        }
        let value = T::from_f64(init).ok_or_else(|| {
            TensorError::InvalidArgument(format!("init {} is not representable", init))
        })?;
        Ok(Self {
            num_parameters,
            init,
            data_format,
            weight: Tensor::full([num_parameters], value),
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn weight(&self) -> &Tensor<T, 1> {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Tensor<T, 1> {
        &mut self.weight
    }
}

impl<T: FloatElem> ExtraRepr for PRelu<T> {
    fn layer_name(&self) -> &'static str {
        "PReLU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!(
                "num_parameters={}, data_format={}, init={:?}, dtype={}",
                self.num_parameters,
                self.data_format,
                self.init,
                dtype_name::<T>()
            ),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for PRelu<T> {
    fn parameters(&self) -> Vec<&Tensor<T, 1>> {
        vec![&self.weight]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor<T, 1>> {
        vec![&mut self.weight]
    }
}

impl<T: FloatElem> ActivationLayer<T> for PRelu<T> {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::prelu(x, &self.weight, self.data_format)
    }
}

impl<T: FloatElem> fmt::Display for PRelu<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.layer_name(), self.extra_repr())
    }
}

/// Randomized leaky ReLU.
///
/// In training mode negative inputs get a random slope from `[lower, upper]`; after
/// [`RRelu::eval`] they get the mean slope.
#[derive(Debug, Clone, PartialEq)]
pub struct RRelu {
    lower: f64,
    upper: f64,
    training: bool,
    name: Option<String>,
}

impl RRelu {
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` unless `0 <= lower <= upper <= 1`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        F::check_rrelu_bounds(lower, upper)?;
        Ok(Self {
            lower,
            upper,
            training: true,
            name: None,
        })
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Samples a fresh slope per negative element on every forward.
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Uses the fixed slope `(lower + upper) / 2`.
    pub fn eval(&mut self) {
        self.training = false;
    }
}

impl Default for RRelu {
    fn default() -> Self {
        Self {
            lower: 1.0 / 8.0,
            upper: 1.0 / 3.0,
            training: true,
            name: None,
        }
    }
}

impl_with_name!(RRelu);

impl ExtraRepr for RRelu {
    fn layer_name(&self) -> &'static str {
        "RReLU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!(
                "lower={:?}, upper={:?}, training={}",
                self.lower, self.upper, self.training
            ),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for RRelu {
    fn train(&mut self) {
        RRelu::train(self);
    }

    fn eval(&mut self) {
        RRelu::eval(self);
    }
}

impl<T: FloatElem> ActivationLayer<T> for RRelu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::rrelu(x, self.lower, self.upper, self.training)
    }
}

impl_display!(RRelu);

/// Scaled ELU with the self-normalising constants as defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Selu {
    scale: f64,
    alpha: f64,
    name: Option<String>,
}

impl Selu {
    pub const DEFAULT_SCALE: f64 = 1.0507009873554805;
    pub const DEFAULT_ALPHA: f64 = 1.6732632423543772;

    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` unless `scale > 1` and `alpha >= 0`.
    pub fn new(scale: f64, alpha: f64) -> Result<Self> {
        F::check_selu_params(scale, alpha)?;
        Ok(Self {
            scale,
            alpha,
            name: None,
        })
    }
}

impl Default for Selu {
    fn default() -> Self {
        Self {
            scale: Self::DEFAULT_SCALE,
            alpha: Self::DEFAULT_ALPHA,
            name: None,
        }
    }
}

impl_with_name!(Selu);

impl ExtraRepr for Selu {
    fn layer_name(&self) -> &'static str {
        "SELU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("scale={:.16}, alpha={:.16}", self.scale, self.alpha),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Selu {}

impl<T: FloatElem> ActivationLayer<T> for Selu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::selu(x, self.scale, self.alpha)
    }
}

impl_display!(Selu);

#[derive(Debug, Clone, PartialEq)]
pub struct LeakyRelu {
    negative_slope: f64,
    name: Option<String>,
}

impl LeakyRelu {
    pub fn new(negative_slope: f64) -> Self {
        Self {
            negative_slope,
            name: None,
        }
    }
}

impl Default for LeakyRelu {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl_with_name!(LeakyRelu);

impl ExtraRepr for LeakyRelu {
    fn layer_name(&self) -> &'static str {
        "LeakyReLU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("negative_slope={:?}", self.negative_slope),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for LeakyRelu {}

impl<T: FloatElem> ActivationLayer<T> for LeakyRelu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::leaky_relu(x, self.negative_slope))
    }
}

impl_display!(LeakyRelu);

#[derive(Debug, Clone, PartialEq)]
pub struct Softplus {
    beta: f64,
    threshold: f64,
    name: Option<String>,
}

impl Softplus {
    pub fn new(beta: f64, threshold: f64) -> Self {
        Self {
            beta,
            threshold,
            name: None,
        }
    }
}

impl Default for Softplus {
    fn default() -> Self {
        Self::new(1.0, 20.0)
    }
}

impl_with_name!(Softplus);

impl ExtraRepr for Softplus {
    fn layer_name(&self) -> &'static str {
        "Softplus"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("beta={}, threshold={}", self.beta, self.threshold),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Softplus {}

impl<T: FloatElem> ActivationLayer<T> for Softplus {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::softplus(x, self.beta, self.threshold))
    }
}

impl_display!(Softplus);

#[derive(Debug, Clone, PartialEq)]
pub struct Softshrink {
    threshold: f64,
    name: Option<String>,
}

impl Softshrink {
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `threshold` is negative.
    pub fn new(threshold: f64) -> Result<Self> {
        if threshold < 0.0 {
            return Err(TensorError::InvalidArgument(format!(
                "threshold of softshrink must be no less than zero, but got {}",
                threshold
            )));
        }
        Ok(Self {
            threshold,
            name: None,
        })
    }
}

impl Default for Softshrink {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            name: None,
        }
    }
}

impl_with_name!(Softshrink);

impl ExtraRepr for Softshrink {
    fn layer_name(&self) -> &'static str {
        "Softshrink"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("threshold={:?}", self.threshold),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Softshrink {}

impl<T: FloatElem> ActivationLayer<T> for Softshrink {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::softshrink(x, self.threshold)
    }
}

impl_display!(Softshrink);

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdedRelu {
    threshold: f64,
    name: Option<String>,
}

impl ThresholdedRelu {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            name: None,
        }
    }
}

impl Default for ThresholdedRelu {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl_with_name!(ThresholdedRelu);

impl ExtraRepr for ThresholdedRelu {
    fn layer_name(&self) -> &'static str {
        "ThresholdedReLU"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("threshold={:?}", self.threshold),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for ThresholdedRelu {}

impl<T: FloatElem> ActivationLayer<T> for ThresholdedRelu {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        Ok(F::thresholded_relu(x, self.threshold))
    }
}

impl_display!(ThresholdedRelu);

/// Softmax along `axis` (default `-1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Softmax {
    axis: i64,
    name: Option<String>,
}

impl Softmax {
    pub fn new(axis: i64) -> Self {
        Self { axis, name: None }
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl_with_name!(Softmax);

impl ExtraRepr for Softmax {
    fn layer_name(&self) -> &'static str {
        "Softmax"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(format!("axis={}", self.axis), self.name.as_deref())
    }
}

impl<T: FloatElem> Module<T> for Softmax {}

impl<T: FloatElem> ActivationLayer<T> for Softmax {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::softmax(x, self.axis)
    }
}

impl_display!(Softmax);

#[derive(Debug, Clone, PartialEq)]
pub struct LogSoftmax {
    axis: i64,
    name: Option<String>,
}

impl LogSoftmax {
    pub fn new(axis: i64) -> Self {
        Self { axis, name: None }
    }
}

impl Default for LogSoftmax {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl_with_name!(LogSoftmax);

impl ExtraRepr for LogSoftmax {
    fn layer_name(&self) -> &'static str {
        "LogSoftmax"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(format!("axis={}", self.axis), self.name.as_deref())
    }
}

impl<T: FloatElem> Module<T> for LogSoftmax {}

impl<T: FloatElem> ActivationLayer<T> for LogSoftmax {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::log_softmax(x, self.axis)
    }
}

impl_display!(LogSoftmax);

/// Maximum over groups of `groups` consecutive channels along `axis`.
#[derive(Debug, Clone, PartialEq)]
pub struct Maxout {
    groups: usize,
    axis: i64,
    name: Option<String>,
}

impl Maxout {
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `groups` is zero or `axis` is not 1, -1 or 3.
    pub fn new(groups: usize, axis: i64) -> Result<Self> {
        if groups == 0 {
            return Err(TensorError::InvalidArgument(
                "groups of maxout must be positive".into(),
            ));
        }
        if !matches!(axis, 1 | -1 | 3) {
            return Err(TensorError::InvalidArgument(format!(
                "axis of maxout must be 1, -1 or 3, but got {}",
                axis
            )));
        }
        Ok(Self {
            groups,
            axis,
            name: None,
        })
    }
}

impl_with_name!(Maxout);

impl ExtraRepr for Maxout {
    fn layer_name(&self) -> &'static str {
        "Maxout"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(
            format!("groups={}, axis={}", self.groups, self.axis),
            self.name.as_deref(),
        )
    }
}

impl<T: FloatElem> Module<T> for Maxout {}

impl<T: FloatElem> ActivationLayer<T> for Maxout {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        F::maxout(x, self.groups, self.axis)
    }
}

impl_display!(Maxout);

/// Softmax over the channel axis of `(C, H, W)` or `(B, C, H, W)` inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Softmax2D {
    name: Option<String>,
}

impl Softmax2D {
    pub fn new() -> Self {
        Self::default()
    }
}

impl_with_name!(Softmax2D);

impl ExtraRepr for Softmax2D {
    fn layer_name(&self) -> &'static str {
        "Softmax2D"
    }

    fn extra_repr(&self) -> String {
        with_name_suffix(String::new(), self.name.as_deref())
    }
}

impl<T: FloatElem> Module<T> for Softmax2D {}

impl<T: FloatElem> ActivationLayer<T> for Softmax2D {
    fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        if RANK != 3 && RANK != 4 {
            return Err(TensorError::InvalidArgument(format!(
                "Softmax2D requires a 3D or 4D tensor as input. Received: {}D.",
                RANK
            )));
        }
        F::softmax(x, -3)
    }
}

impl_display!(Softmax2D);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_repr_formats() {
        assert_eq!(Celu::default().extra_repr(), "alpha=1.0");
        assert_eq!(Elu::new(0.2).with_name("e").extra_repr(), "alpha=0.2, name=e");
        assert_eq!(Gelu::new(true).extra_repr(), "approximate=true");
        assert_eq!(Hardtanh::default().extra_repr(), "min=-1.0, max=1.0");
        assert_eq!(Softplus::default().extra_repr(), "beta=1, threshold=20");
        assert_eq!(
            Selu::default().extra_repr(),
            "scale=1.0507009873554805, alpha=1.6732632423543772"
        );
        assert_eq!(LeakyRelu::default().extra_repr(), "negative_slope=0.01");
        assert_eq!(Maxout::new(2, 1).unwrap().extra_repr(), "groups=2, axis=1");
        assert_eq!(Softmax::default().extra_repr(), "axis=-1");
        assert_eq!(
            RRelu::default().extra_repr(),
            "lower=0.125, upper=0.3333333333333333, training=true"
        );
        assert_eq!(
            PRelu::<f32>::new(1, 0.25, DataFormat::Nchw)
                .unwrap()
                .extra_repr(),
            "num_parameters=1, data_format=NCHW, init=0.25, dtype=float32"
        );
        assert!(
            PRelu::<f64>::new(1, 0.25, DataFormat::Nchw)
                .unwrap()
                .extra_repr()
                .ends_with("dtype=float64")
        );
    }

    #[test]
    fn test_stateless_repr() {
        assert_eq!(Relu::new().extra_repr(), "");
        assert_eq!(Relu::new().with_name("act").extra_repr(), "name=act");
        assert_eq!(Relu::new().to_string(), "ReLU()");
        assert_eq!(Hardsigmoid::new().with_name("hs").to_string(), "Hardsigmoid(name=hs)");
    }

    #[test]
    fn test_display() {
        assert_eq!(ThresholdedRelu::default().to_string(), "ThresholdedReLU(threshold=1.0)");
        assert_eq!(
            LogSoftmax::new(1).with_name("ls").to_string(),
            "LogSoftmax(axis=1, name=ls)"
        );
    }

    #[test]
    fn test_invalid_construction() {
        assert!(Celu::new(0.0).is_err());
        assert!(RRelu::new(0.4, 0.2).is_err());
        assert!(Maxout::new(0, 1).is_err());
        assert!(Maxout::new(2, 2).is_err());
        assert!(Softshrink::new(-1.0).is_err());
        assert!(Selu::new(0.5, 1.0).is_err());
        assert!(PRelu::<f32>::new(0, 0.25, DataFormat::Nchw).is_err());
    }

    #[test]
    fn test_forward_delegates() {
        let x = Tensor::<f32, 1>::new(vec![-2.0, 0.5, 3.0], [3]).unwrap();
        assert_eq!(Relu::new().forward(&x).unwrap().data(), &[0.0, 0.5, 3.0]);
        assert_eq!(Hardshrink::default().forward(&x).unwrap().data(), &[-2.0, 0.0, 3.0]);
        assert_eq!(
            Softshrink::default().forward(&x).unwrap().data(),
            &[-1.5, 0.0, 2.5]
        );
    }

    #[test]
    fn test_prelu_parameters() {
        let mut layer = PRelu::<f32>::new(3, 0.1, DataFormat::Nchw).unwrap();
        assert_eq!(layer.num_parameters(), 3);
        layer.parameters_mut()[0].data_mut()[1] = 0.5;
        assert_eq!(layer.weight().data(), &[0.1, 0.5, 0.1]);

        let x = Tensor::<f32, 2>::new(vec![-1.0, -1.0, -1.0], [1, 3]).unwrap();
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.data(), &[-0.1, -0.5, -0.1]);
    }

    #[test]
    fn test_rrelu_train_eval() {
        let mut layer = RRelu::new(0.2, 0.4).unwrap();
        assert!(layer.is_training());
        layer.eval();
        assert!(!layer.is_training());
        assert!(layer.extra_repr().ends_with("training=false"));

        let x = Tensor::<f32, 1>::new(vec![-1.0, 2.0], [2]).unwrap();
        let y = layer.forward(&x).unwrap();
        assert!((y.data()[0] + 0.3).abs() < 1e-6);
        assert_eq!(y.data()[1], 2.0);

        layer.train();
        assert!(layer.is_training());

        Module::<f32>::eval(&mut layer);
        assert!(!layer.is_training());
    }

    #[test]
    fn test_softmax2d_rank() {
        let layer = Softmax2D::new();
        let x = Tensor::<f32, 3>::ones([2, 1, 2]);
        let y = layer.forward(&x).unwrap();
        assert!(y.data().iter().all(|v| (v - 0.5).abs() < 1e-6));

        let flat = Tensor::<f32, 2>::ones([2, 2]);
        assert!(matches!(
            layer.forward(&flat),
            Err(TensorError::InvalidArgument(_))
        ));
    }
}
