//! # Op Conformance Harness
//!
//! Runs one operator under every [`ExecutionMode`] and checks that all modes agree with the
//! single-threaded fp32 reference.
//!
//! ```rust
//! use shardwise::conformance::{Feed, OpTest, check};
//!
//! let test = OpTest::new("gather")
//!     .with_feed("x", Feed::F32 { data: (0..20).map(|v| v as f32).collect(), shape: vec![10, 2] })
//!     .with_feed("y", Feed::I32 { data: vec![1, 3, 5], shape: vec![3] });
//! let outputs = check(&test).unwrap();
//! assert_eq!(outputs.len(), 3);
//! ```
//!
//! The first feed is the operand, the second (for `gather`) the index. Supported op types are
//! `gather` (attribute `axis`, default 0) and `transpose2` (attribute `axis`, the permutation).

use crate::distributed::auto_parallel::Attribute;
use crate::tensor::{Tensor, TensorError};
use half::f16;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConformanceError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("Failed to build the reference thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Op {op_type} is not supported by the harness")]
    UnsupportedOp { op_type: String },
    #[error("Feed {name} is missing or has the wrong dtype")]
    MissingFeed { name: String },
    #[error("Invalid attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },
    #[error("{mode} output shape {got:?} differs from reference {expected:?}")]
    ShapeMismatch {
        mode: ExecutionMode,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("{mode} output[{index}] = {got} differs from reference {expected}")]
    ValueMismatch {
        mode: ExecutionMode,
        index: usize,
        expected: f32,
        got: f32,
    },
}

pub type Result<T> = std::result::Result<T, ConformanceError>;

/// A named input of an op test.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    F32 { data: Vec<f32>, shape: Vec<usize> },
    I32 { data: Vec<i32>, shape: Vec<usize> },
}

/// Where and at which precision an op runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionMode {
    /// Single-threaded fp32: the reference every other mode is compared against.
    CpuFp32,
    /// fp32 on the global `rayon` pool.
    ParallelFp32,
    /// Float feeds and outputs rounded through fp16, on the global `rayon` pool.
    ParallelFp16,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 3] = [
        ExecutionMode::CpuFp32,
        ExecutionMode::ParallelFp32,
        ExecutionMode::ParallelFp16,
    ];

    pub fn is_fp16(self) -> bool {
        matches!(self, ExecutionMode::ParallelFp16)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::CpuFp32 => "cpu_fp32",
            ExecutionMode::ParallelFp32 => "parallel_fp32",
            ExecutionMode::ParallelFp16 => "parallel_fp16",
        };
        f.write_str(name)
    }
}

/// `|got - expected| <= atol + rtol * |expected|`, as `numpy.allclose`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f32,
    pub rtol: f32,
}

impl Tolerance {
    pub const FP32: Tolerance = Tolerance {
        atol: 1e-10,
        rtol: 1e-6,
    };
    pub const FP16: Tolerance = Tolerance {
        atol: 1e-3,
        rtol: 1e-3,
    };

    pub fn allclose(&self, expected: f32, got: f32) -> bool {
        if expected == got {
            return true;
        }
        (got - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// The fetched output of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct OpOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// One operator invocation: its type, ordered feeds and attributes.
#[derive(Debug, Clone)]
pub struct OpTest {
    pub op_type: String,
    pub feeds: Vec<(String, Feed)>,
    pub attrs: BTreeMap<String, Attribute>,
    /// Training graphs do not run in fp16.
    pub is_training: bool,
    pub fp32_tolerance: Tolerance,
    pub fp16_tolerance: Tolerance,
}

impl OpTest {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            feeds: Vec::new(),
            attrs: BTreeMap::new(),
            is_training: false,
            fp32_tolerance: Tolerance::FP32,
            fp16_tolerance: Tolerance::FP16,
        }
    }

    pub fn with_feed(mut self, name: impl Into<String>, feed: Feed) -> Self {
        self.feeds.push((name.into(), feed));
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Whether `mode` is skipped for this test.
    pub fn skip_mode(&self, mode: ExecutionMode) -> bool {
        self.is_training && mode.is_fp16()
    }

    pub fn tolerance(&self, mode: ExecutionMode) -> Tolerance {
        if mode.is_fp16() {
            self.fp16_tolerance
        } else {
            self.fp32_tolerance
        }
    }

    fn f32_feed(&self, position: usize) -> Result<(&[f32], &[usize])> {
        match self.feeds.get(position) {
            Some((_, Feed::F32 { data, shape })) => Ok((data, shape)),
            other => Err(ConformanceError::MissingFeed {
                name: other.map_or_else(|| format!("#{position}"), |(name, _)| name.clone()),
            }),
        }
    }

    fn i32_feed(&self, position: usize) -> Result<&[i32]> {
        match self.feeds.get(position) {
            Some((_, Feed::I32 { data, .. })) => Ok(data),
            other => Err(ConformanceError::MissingFeed {
                name: other.map_or_else(|| format!("#{position}"), |(name, _)| name.clone()),
            }),
        }
    }

    fn int_attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }
}

fn round_fp16(value: f32) -> f32 {
    f16::from_f32(value).to_f32()
}

fn normalize_axis(axis: i64, rank: usize, name: &str) -> Result<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    usize::try_from(resolved)
        .ok()
        .filter(|&a| a < rank)
        .ok_or_else(|| ConformanceError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("axis {axis} out of range for rank {rank}"),
        })
}

fn run_gather<const RANK: usize>(
    data: Vec<f32>,
    shape: [usize; RANK],
    index: &[i32],
    axis: usize,
) -> Result<OpOutput> {
    let x = Tensor::<f32, RANK>::new(data, shape)?;
    let index = Tensor::<i32, 1>::new(index.to_vec(), [index.len()])?;
    let out = x.gather(&index, axis)?;
    Ok(OpOutput {
        shape: out.shape().to_vec(),
        data: out.into_data(),
    })
}

fn run_transpose2<const RANK: usize>(
    data: Vec<f32>,
    shape: [usize; RANK],
    perm: [usize; RANK],
) -> Result<OpOutput> {
    let x = Tensor::<f32, RANK>::new(data, shape)?;
    let (out, _xshape) = x.transpose2(perm)?;
    Ok(OpOutput {
        shape: out.shape().to_vec(),
        data: out.into_data(),
    })
}

fn to_array<const RANK: usize>(values: Vec<usize>) -> Result<[usize; RANK]> {
    values.try_into().map_err(|got: Vec<usize>| {
        TensorError::ShapeMismatch {
            expected: vec![RANK],
            got: vec![got.len()],
        }
        .into()
    })
}

/// Expands `$body` once per supported rank with `$rank` bound as a const.
macro_rules! dispatch_rank {
    ($rank_value:expr, $op_type:expr, $rank:ident => $body:expr) => {
        match $rank_value {
            1 => {
                const $rank: usize = 1;
                $body
            }
            2 => {
                const $rank: usize = 2;
                $body
            }
            3 => {
                const $rank: usize = 3;
                $body
            }
            4 => {
                const $rank: usize = 4;
                $body
            }
            _ => Err(ConformanceError::UnsupportedOp {
                op_type: format!("{} of rank {}", $op_type, $rank_value),
            }),
        }
    };
}

fn run_op(test: &OpTest, fp16: bool) -> Result<OpOutput> {
    let (x, shape) = test.f32_feed(0)?;
    let x: Vec<f32> = if fp16 {
        x.iter().copied().map(round_fp16).collect()
    } else {
        x.to_vec()
    };
    let rank = shape.len();

    let mut output = match test.op_type.as_str() {
        "gather" => {
            let index = test.i32_feed(1)?;
            let axis = match test.int_attr("axis") {
                None => 0,
                Some(Attribute::Int(axis)) => normalize_axis(*axis, rank, "axis")?,
                Some(other) => {
                    return Err(ConformanceError::InvalidAttribute {
                        name: "axis".to_string(),
                        reason: format!("expected Int, got {other:?}"),
                    });
                }
            };
            dispatch_rank!(rank, test.op_type, R => {
                run_gather::<R>(x, to_array(shape.to_vec())?, index, axis)
            })?
        }
        "transpose2" => {
            let perm = match test.int_attr("axis") {
                Some(Attribute::Ints(perm)) => perm
                    .iter()
                    .map(|&p| normalize_axis(p, rank, "axis"))
                    .collect::<Result<Vec<usize>>>()?,
                _ => {
                    return Err(ConformanceError::InvalidAttribute {
                        name: "axis".to_string(),
                        reason: "transpose2 needs an Ints permutation".to_string(),
                    });
                }
            };
            dispatch_rank!(rank, test.op_type, R => {
                run_transpose2::<R>(x, to_array(shape.to_vec())?, to_array(perm)?)
            })?
        }
        other => {
            return Err(ConformanceError::UnsupportedOp {
                op_type: other.to_string(),
            });
        }
    };

    if fp16 {
        output.data.iter_mut().for_each(|v| *v = round_fp16(*v));
    }
    Ok(output)
}

/// Runs `test` once under `mode`.
///
/// # Errors
///
/// Returns an error if a feed or attribute the op needs is missing or malformed, or if the op
/// itself fails (for example a gather index out of range).
pub fn run_op_test(test: &OpTest, mode: ExecutionMode) -> Result<OpOutput> {
    let output = match mode {
        ExecutionMode::CpuFp32 => {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build()?;
            pool.install(|| run_op(test, false))?
        }
        ExecutionMode::ParallelFp32 => run_op(test, false)?,
        ExecutionMode::ParallelFp16 => run_op(test, true)?,
    };
    tracing::debug!(
        op_type = test.op_type.as_str(),
        mode = %mode,
        out_shape = ?output.shape,
        "op_test_run"
    );
    Ok(output)
}

/// Runs `test` under every non-skipped mode and compares each against [`ExecutionMode::CpuFp32`].
///
/// Returns the output of every mode that ran.
///
/// # Errors
///
/// As [`run_op_test`], plus `ShapeMismatch`/`ValueMismatch` for the first disagreement found.
pub fn check(test: &OpTest) -> Result<BTreeMap<ExecutionMode, OpOutput>> {
    let reference = run_op_test(test, ExecutionMode::CpuFp32)?;
    let mut outputs = BTreeMap::new();

    for mode in ExecutionMode::ALL {
        if mode == ExecutionMode::CpuFp32 || test.skip_mode(mode) {
            continue;
        }
        let output = run_op_test(test, mode)?;
        if output.shape != reference.shape {
            return Err(ConformanceError::ShapeMismatch {
                mode,
                expected: reference.shape.clone(),
                got: output.shape,
            });
        }
        let tolerance = test.tolerance(mode);
        let mismatch = reference
            .data
            .iter()
            .zip(&output.data)
            .position(|(&expected, &got)| !tolerance.allclose(expected, got));
        if let Some(index) = mismatch {
            return Err(ConformanceError::ValueMismatch {
                mode,
                index,
                expected: reference.data[index],
                got: output.data[index],
            });
        }
        outputs.insert(mode, output);
    }

    outputs.insert(ExecutionMode::CpuFp32, reference);
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x_feed(shape: Vec<usize>) -> Feed {
        let size = shape.iter().product::<usize>();
        Feed::F32 {
            data: (0..size).map(|v| v as f32 * 0.1).collect(),
            shape,
        }
    }

    #[test]
    fn test_tolerance() {
        assert!(Tolerance::FP32.allclose(1.0, 1.0));
        assert!(!Tolerance::FP32.allclose(1.0, 1.001));
        assert!(Tolerance::FP16.allclose(1.0, 1.0005));
        assert!(!Tolerance::FP16.allclose(1.0, 1.01));
    }

    #[test]
    fn test_gather_along_axis() {
        let test = OpTest::new("gather")
            .with_feed("x", x_feed(vec![3, 2]))
            .with_feed("y", Feed::I32 { data: vec![1], shape: vec![1] })
            .with_attr("axis", Attribute::Int(-1));
        let out = run_op_test(&test, ExecutionMode::ParallelFp32).unwrap();
        assert_eq!(out.shape, vec![3, 1]);
        assert_eq!(out.data, vec![0.1, 0.3, 0.5]);
    }

    #[test]
    fn test_fp16_rounds() {
        let test = OpTest::new("gather")
            .with_feed("x", Feed::F32 { data: vec![0.1, 0.2], shape: vec![2] })
            .with_feed("y", Feed::I32 { data: vec![0], shape: vec![1] });
        let out = run_op_test(&test, ExecutionMode::ParallelFp16).unwrap();
        assert_ne!(out.data[0], 0.1);
        assert!((out.data[0] - 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_transpose2() {
        let test = OpTest::new("transpose2")
            .with_feed("x", x_feed(vec![2, 3]))
            .with_attr("axis", Attribute::Ints(vec![1, 0]));
        let outputs = check(&test).unwrap();
        assert_eq!(outputs[&ExecutionMode::CpuFp32].shape, vec![3, 2]);
    }

    #[test]
    fn test_training_skips_fp16() {
        let mut test = OpTest::new("gather")
            .with_feed("x", x_feed(vec![4]))
            .with_feed("y", Feed::I32 { data: vec![3], shape: vec![1] });
        test.is_training = true;
        let outputs = check(&test).unwrap();
        assert!(!outputs.contains_key(&ExecutionMode::ParallelFp16));
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn test_errors() {
        let missing = OpTest::new("gather").with_feed("x", x_feed(vec![4]));
        assert!(matches!(
            run_op_test(&missing, ExecutionMode::CpuFp32),
            Err(ConformanceError::MissingFeed { .. })
        ));

        let out_of_range = missing
            .clone()
            .with_feed("y", Feed::I32 { data: vec![4], shape: vec![1] });
        assert!(matches!(
            run_op_test(&out_of_range, ExecutionMode::ParallelFp32),
            Err(ConformanceError::Tensor(TensorError::IndexOutOfBounds { .. }))
        ));

        let unsupported = OpTest::new("conv2d").with_feed("x", x_feed(vec![4]));
        assert!(matches!(
            check(&unsupported),
            Err(ConformanceError::UnsupportedOp { .. })
        ));

        let rank5 = OpTest::new("gather")
            .with_feed("x", x_feed(vec![1, 1, 1, 1, 2]))
            .with_feed("y", Feed::I32 { data: vec![0], shape: vec![1] });
        assert!(matches!(
            run_op_test(&rank5, ExecutionMode::ParallelFp32),
            Err(ConformanceError::UnsupportedOp { .. })
        ));
    }
}
