//! Functional activation API.
//!
//! Every activation layer in [`crate::nn::activation`] is a thin wrapper over one function in
//! this module. The functions are stateless: parameters come in as arguments, the input tensor is
//! never modified, and the output has the input's shape (except [`maxout`], which shrinks the
//! channel axis).
//!
//! Pointwise functions cannot fail and return the tensor directly. Functions that validate their
//! parameters or depend on the input's shape (`softmax`, `maxout`, `prelu`, ...) return
//! [`Result`].
//!
//! ```rust
//! use shardwise::nn::functional as F;
//! use shardwise::tensor::Tensor;
//!
//! let x = Tensor::<f32, 1>::new(vec![-1.0, 0.0, 2.0], [3]).unwrap();
//! assert_eq!(F::relu(&x).data(), &[0.0, 0.0, 2.0]);
//! ```

use crate::tensor::{BinaryOp, FloatElem, Result, Tensor, TensorError};
use rand::Rng;
use std::fmt;
use std::str::FromStr;

#[inline]
fn scalar<T: FloatElem>(v: f64) -> T {
    T::from_f64(v).unwrap_or_else(T::nan)
}

fn sigmoid_scalar<T: FloatElem>(x: T) -> T {
    T::one() / (T::one() + (-x).exp())
}

fn softplus_scalar<T: FloatElem>(x: T, beta: T, threshold: T) -> T {
    let bx = beta * x;
    if bx > threshold {
        x
    } else {
        bx.exp().ln_1p() / beta
    }
}

fn elu_scalar<T: FloatElem>(x: T, alpha: T) -> T {
    if x > T::zero() {
        x
    } else {
        alpha * x.exp_m1()
    }
}

/// `max(0, x) + min(0, alpha * (exp(x / alpha) - 1))`.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `alpha` is zero.
pub fn celu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    alpha: f64,
) -> Result<Tensor<T, RANK>> {
    if alpha == 0.0 {
        return Err(TensorError::InvalidArgument(
            "alpha cannot be 0 for celu".into(),
        ));
    }
    let alpha: T = scalar(alpha);
    Ok(x.map(|v| v.max(T::zero()) + (alpha * (v / alpha).exp_m1()).min(T::zero())))
}

/// `x` for positive inputs, `alpha * (exp(x) - 1)` otherwise.
pub fn elu<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>, alpha: f64) -> Tensor<T, RANK> {
    let alpha: T = scalar(alpha);
    x.map(|v| elu_scalar(v, alpha))
}

/// Gaussian Error Linear Unit.
///
/// The exact form is `0.5 * x * (1 + erf(x / sqrt(2)))`; with `approximate` set the tanh
/// approximation `0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))` is used instead.
pub fn gelu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    approximate: bool,
) -> Tensor<T, RANK> {
    let half: T = scalar(0.5);
    if approximate {
        let k: T = scalar((2.0 / std::f64::consts::PI).sqrt());
        let c: T = scalar(0.044715);
        x.map(|v| half * v * (T::one() + (k * (v + c * v * v * v)).tanh()))
    } else {
        x.map(|v| {
            let e = v
                .to_f64()
                .map(|f| libm::erf(f / std::f64::consts::SQRT_2))
                .unwrap_or(f64::NAN);
            half * v * (T::one() + scalar(e))
        })
    }
}

/// `x` where `|x| > threshold`, zero elsewhere.
pub fn hardshrink<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    threshold: f64,
) -> Tensor<T, RANK> {
    let threshold: T = scalar(threshold);
    x.map(|v| if v.abs() > threshold { v } else { T::zero() })
}

/// `x * relu6(x + 3) / 6`.
pub fn hardswish<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    let three: T = scalar(3.0);
    let six: T = scalar(6.0);
    x.map(|v| v * (v + three).max(T::zero()).min(six) / six)
}

pub fn tanh<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| v.tanh())
}

/// Clamps `x` into `[min, max]`.
pub fn hardtanh<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    min: f64,
    max: f64,
) -> Tensor<T, RANK> {
    let (min, max): (T, T) = (scalar(min), scalar(max));
    x.map(|v| v.max(min).min(max))
}

/// Memory layout of a [`prelu`] input; decides which axis is the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Nc,
    Ncl,
    Nchw,
    Ncdhw,
    Nlc,
    Nhwc,
    Ndhwc,
}

impl DataFormat {
    /// Whether the channel axis is the last one.
    pub fn channel_last(self) -> bool {
        matches!(self, DataFormat::Nlc | DataFormat::Nhwc | DataFormat::Ndhwc)
    }

    fn as_str(self) -> &'static str {
        match self {
            DataFormat::Nc => "NC",
            DataFormat::Ncl => "NCL",
            DataFormat::Nchw => "NCHW",
            DataFormat::Ncdhw => "NCDHW",
            DataFormat::Nlc => "NLC",
            DataFormat::Nhwc => "NHWC",
            DataFormat::Ndhwc => "NDHWC",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "NC" => DataFormat::Nc,
            "NCL" => DataFormat::Ncl,
            "NCHW" => DataFormat::Nchw,
            "NCDHW" => DataFormat::Ncdhw,
            "NLC" => DataFormat::Nlc,
            "NHWC" => DataFormat::Nhwc,
            "NDHWC" => DataFormat::Ndhwc,
            other => {
                return Err(TensorError::InvalidArgument(format!(
                    "data_format must be one of NC, NCL, NCHW, NCDHW, NLC, NHWC, NDHWC, but got {}",
                    other
                )));
            }
        })
    }
}

/// `max(0, x) + weight * min(0, x)`.
///
/// `weight` holds either one slope shared by every element or one slope per channel, the
/// channel axis being 1 or the last axis depending on `data_format`.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if the input has rank 0, or if `weight` has neither 1
/// nor `channels` entries.
pub fn prelu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    weight: &Tensor<T, 1>,
    data_format: DataFormat,
) -> Result<Tensor<T, RANK>> {
    if RANK == 0 {
        return Err(TensorError::InvalidArgument(
            "prelu expects an input with at least one dimension".into(),
        ));
    }

    let negative = x.map(|v| v.min(T::zero()));
    let scaled = if weight.size() == 1 {
        let w = weight.data()[0];
        negative.map(|v| v * w)
    } else {
        let channel_axis = if data_format.channel_last() || RANK == 1 {
            RANK - 1
        } else {
            1
        };
        let channels = x.shape()[channel_axis];
        if weight.size() != channels {
            return Err(TensorError::InvalidArgument(format!(
                "prelu weight has {} entries but the input has {} channels",
                weight.size(),
                channels
            )));
        }
        negative.broadcast_binary(weight, channel_axis as i64, BinaryOp::Mul)?
    };

    x.zip_map(&scaled, |v, s| v.max(T::zero()) + s)
}

pub(crate) fn check_rrelu_bounds(lower: f64, upper: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&lower) {
        return Err(TensorError::InvalidArgument(format!(
            "lower must be in [0, 1], but got {}",
            lower
        )));
    }
    if !(0.0..=1.0).contains(&upper) {
        return Err(TensorError::InvalidArgument(format!(
            "upper must be in [0, 1], but got {}",
            upper
        )));
    }
    if lower > upper {
        return Err(TensorError::InvalidArgument(format!(
            "lower ({}) must not be greater than upper ({})",
            lower, upper
        )));
    }
    Ok(())
}

/// Randomized leaky ReLU drawing slopes from the thread-local generator.
///
/// See [`rrelu_with_rng`].
pub fn rrelu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    lower: f64,
    upper: f64,
    training: bool,
) -> Result<Tensor<T, RANK>> {
    rrelu_with_rng(x, lower, upper, training, &mut rand::rng())
}

/// Randomized leaky ReLU.
///
/// Non-negative elements pass through. In training mode every negative element is scaled by
/// its own slope drawn uniformly from `[lower, upper]`; in eval mode all of them are scaled by
/// `(lower + upper) / 2`.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` unless `0 <= lower <= upper <= 1`.
pub fn rrelu_with_rng<T: FloatElem, R: Rng, const RANK: usize>(
    x: &Tensor<T, RANK>,
    lower: f64,
    upper: f64,
    training: bool,
    rng: &mut R,
) -> Result<Tensor<T, RANK>> {
    check_rrelu_bounds(lower, upper)?;

    if !training {
        let slope: T = scalar((lower + upper) / 2.0);
        return Ok(x.map(|v| if v >= T::zero() { v } else { v * slope }));
    }

    let mut out = x.clone();
    for v in out.data_mut() {
        if *v < T::zero() {
            let slope: T = scalar(rng.random_range(lower..=upper));
            *v = *v * slope;
        }
    }
    Ok(out)
}

pub fn relu<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| v.max(T::zero()))
}

/// `min(max(0, x), 6)`.
pub fn relu6<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    let six: T = scalar(6.0);
    x.map(|v| v.max(T::zero()).min(six))
}

pub(crate) fn check_selu_params(scale: f64, alpha: f64) -> Result<()> {
    if scale <= 1.0 {
        return Err(TensorError::InvalidArgument(format!(
            "scale must be greater than 1.0, but got {}",
            scale
        )));
    }
    if alpha < 0.0 {
        return Err(TensorError::InvalidArgument(format!(
            "alpha must be no less than zero, but got {}",
            alpha
        )));
    }
    Ok(())
}

/// `scale * elu(x, alpha)`.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` unless `scale > 1` and `alpha >= 0`.
pub fn selu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    scale: f64,
    alpha: f64,
) -> Result<Tensor<T, RANK>> {
    check_selu_params(scale, alpha)?;
    let (scale, alpha): (T, T) = (scalar(scale), scalar(alpha));
    Ok(x.map(|v| scale * elu_scalar(v, alpha)))
}

pub fn leaky_relu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    negative_slope: f64,
) -> Tensor<T, RANK> {
    let slope: T = scalar(negative_slope);
    x.map(|v| if v >= T::zero() { v } else { v * slope })
}

pub fn sigmoid<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(sigmoid_scalar)
}

/// `clamp(slope * x + offset, 0, 1)`.
pub fn hardsigmoid<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    slope: f64,
    offset: f64,
) -> Tensor<T, RANK> {
    let (slope, offset): (T, T) = (scalar(slope), scalar(offset));
    x.map(|v| (slope * v + offset).max(T::zero()).min(T::one()))
}

/// `ln(1 + exp(beta * x)) / beta`, or `x` once `beta * x` exceeds `threshold`.
pub fn softplus<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    beta: f64,
    threshold: f64,
) -> Tensor<T, RANK> {
    let (beta, threshold): (T, T) = (scalar(beta), scalar(threshold));
    x.map(|v| softplus_scalar(v, beta, threshold))
}

/// Shrinks `x` towards zero by `threshold`.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `threshold` is negative.
pub fn softshrink<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    threshold: f64,
) -> Result<Tensor<T, RANK>> {
    if threshold < 0.0 {
        return Err(TensorError::InvalidArgument(format!(
            "threshold of softshrink must be no less than zero, but got {}",
            threshold
        )));
    }
    let threshold: T = scalar(threshold);
    Ok(x.map(|v| {
        if v > threshold {
            v - threshold
        } else if v < -threshold {
            v + threshold
        } else {
            T::zero()
        }
    }))
}

/// `x / (1 + |x|)`.
pub fn softsign<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| v / (T::one() + v.abs()))
}

/// `x * sigmoid(x)`.
pub fn swish<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| v * sigmoid_scalar(v))
}

/// `x * tanh(softplus(x))`.
pub fn mish<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    let threshold: T = scalar(20.0);
    x.map(|v| v * softplus_scalar(v, T::one(), threshold).tanh())
}

/// `x - tanh(x)`.
pub fn tanhshrink<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| v - v.tanh())
}

/// `x` where `x > threshold`, zero elsewhere.
pub fn thresholded_relu<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    threshold: f64,
) -> Tensor<T, RANK> {
    let threshold: T = scalar(threshold);
    x.map(|v| if v > threshold { v } else { T::zero() })
}

/// Sigmoid Linear Unit, `x / (1 + exp(-x))`.
pub fn silu<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| v / (T::one() + (-v).exp()))
}

/// `ln(1 / (1 + exp(-x)))`, computed as `-softplus(-x)` to stay finite for large `|x|`.
pub fn log_sigmoid<T: FloatElem, const RANK: usize>(x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
    x.map(|v| {
        let m = (-v).max(T::zero());
        -(m + ((-m).exp() + (-v - m).exp()).ln())
    })
}

/// Normalises every lane along `axis` into a probability distribution.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `axis` is out of range.
pub fn softmax<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    axis: i64,
) -> Result<Tensor<T, RANK>> {
    x.map_lanes(axis, |lane| {
        let max = lane.iter().copied().fold(T::neg_infinity(), T::max);
        let mut sum = T::zero();
        for v in lane.iter_mut() {
            *v = (*v - max).exp();
            sum = sum + *v;
        }
        for v in lane.iter_mut() {
            *v = *v / sum;
        }
    })
}

/// `ln(softmax(x))` along `axis`, computed without materialising the softmax.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `axis` is out of range.
pub fn log_softmax<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    axis: i64,
) -> Result<Tensor<T, RANK>> {
    x.map_lanes(axis, |lane| {
        let max = lane.iter().copied().fold(T::neg_infinity(), T::max);
        let sum = lane
            .iter()
            .fold(T::zero(), |acc, &v| acc + (v - max).exp());
        let log_sum = sum.ln();
        for v in lane.iter_mut() {
            *v = *v - max - log_sum;
        }
    })
}

/// Channel-wise maximum over groups of `groups` consecutive channels.
///
/// Output channel `c` is the maximum of input channels `c * groups .. (c + 1) * groups`.
///
/// # Errors
///
/// Returns `TensorError::InvalidArgument` if `axis` is not 1, -1 or 3, if it is out of range for
/// the input, if `groups` is zero, or if the channel count is not divisible by `groups`.
pub fn maxout<T: FloatElem, const RANK: usize>(
    x: &Tensor<T, RANK>,
    groups: usize,
    axis: i64,
) -> Result<Tensor<T, RANK>> {
    if !matches!(axis, 1 | -1 | 3) {
        return Err(TensorError::InvalidArgument(format!(
            "axis of maxout must be 1, -1 or 3, but got {}",
            axis
        )));
    }
    let axis = Tensor::<T, RANK>::normalize_axis(axis)?;
    if groups == 0 {
        return Err(TensorError::InvalidArgument(
            "groups of maxout must be positive".into(),
        ));
    }
    let channels = x.shape()[axis];
    if channels % groups != 0 {
        return Err(TensorError::InvalidArgument(format!(
            "the number of channels ({}) must be divisible by groups ({})",
            channels, groups
        )));
    }

    let mut out_shape = *x.shape();
    out_shape[axis] = channels / groups;
    Ok(Tensor::from_coords(out_shape, |coords| {
        let mut src = *coords;
        (0..groups)
            .map(|k| {
                src[axis] = coords[axis] * groups + k;
                x.at(&src)
            })
            .fold(T::neg_infinity(), T::max)
    }))
}
