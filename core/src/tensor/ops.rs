//! Tensor operations.
//!
//! - **Element-wise Arithmetic**: `+`, `-`, `*`, `/` between tensors of equal shape, and
//!   [`Tensor::broadcast_binary`] for operands of different shapes.
//! - **Layout**: [`Tensor::permute`] and the `transpose2` operator with its XShape side output.
//! - **Indexing**: [`Tensor::gather`] along an axis.
//! - **Lane-wise transforms**: [`Tensor::map_lanes`] runs a closure over every 1-D lane along an
//!   axis, which is what the normalising activations (softmax, log-softmax) are built from.
//!
//! Heavy lifting is delegated to `shardwise_kernels`, parallelised with `rayon`.
//!
//! ```rust
//! use shardwise::tensor::Tensor;
//!
//! let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
//! let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```

use super::{BinaryOp, Result, Tensor, TensorElem, TensorError, compute_strides};

use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

/// Implements a binary arithmetic operation trait (e.g., `Add`, `Sub`) for `&Tensor`.
///
/// Shapes must match exactly; the element-wise loop runs in parallel using `rayon`.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK>
        where
            T: TensorElem,
        {
            type Output = crate::tensor::Result<Tensor<T, RANK>>;

            fn $method(self, rhs: Self) -> Self::Output {
                self.zip_map(rhs, |a, b| a.$method(b))
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

fn shape_array<const RANK: usize>(shape: Vec<usize>) -> Result<[usize; RANK]> {
    shape
        .try_into()
        .map_err(|got: Vec<usize>| TensorError::ShapeMismatch {
            expected: vec![RANK],
            got: vec![got.len()],
        })
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Applies a function element-wise to the tensor.
    ///
    /// ```rust
    /// use shardwise::tensor::Tensor;
    /// let t = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
    /// let squared = t.map(|x| x * x);
    /// assert_eq!(squared.data(), &[1.0, 4.0, 9.0]);
    /// ```
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// Combines two tensors of identical shape element by element.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the shapes differ.
    pub fn zip_map<F>(&self, rhs: &Self, f: F) -> Result<Self>
    where
        F: Fn(T, T) -> T + Sync + Send,
    {
        if self.shape != rhs.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: rhs.shape.to_vec(),
            });
        }

        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .zip(rhs.data.par_iter())
            .for_each(|((o, a), b)| *o = f(*a, *b));
        Ok(out)
    }

    /// Element-wise binary operation with broadcasting.
    ///
    /// `rhs` may have a lower rank; it is aligned with `self` starting at `axis`, or with the
    /// trailing dims when `axis == -1`.
    ///
    /// ```rust
    /// use shardwise::tensor::{BinaryOp, Tensor};
    /// let x = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
    /// let bias = Tensor::<f32, 1>::new(vec![10.0, 20.0], [2]).unwrap();
    /// let y = x.broadcast_binary(&bias, -1, BinaryOp::Add).unwrap();
    /// assert_eq!(y.data(), &[11.0, 22.0, 13.0, 24.0]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `rhs` has a higher rank than `self`, and
    /// `TensorError::ShapeMismatch` if the shapes cannot be broadcast together.
    pub fn broadcast_binary<const RHS_RANK: usize>(
        &self,
        rhs: &Tensor<T, RHS_RANK>,
        axis: i64,
        op: BinaryOp,
    ) -> Result<Self> {
        if RHS_RANK > RANK {
            return Err(TensorError::InvalidArgument(format!(
                "cannot broadcast a rank {} operand into a rank {} tensor",
                RHS_RANK, RANK
            )));
        }

        let (data, out_shape) = shardwise_kernels::cpu_broadcast_binary(
            &self.data,
            &self.shape,
            &rhs.data,
            &rhs.shape,
            axis,
            op,
        )?;
        Tensor::new(data, shape_array(out_shape)?)
    }

    /// Permutes the axes of the tensor: output axis `i` is input axis `perm[i]`.
    ///
    /// The data is physically moved so that the result stays contiguous.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `perm` is not a permutation of `[0, RANK)`.
    pub fn permute(&self, perm: [usize; RANK]) -> Result<Self> {
        let out_shape = shardwise_kernels::permuted_shape(&self.shape, &perm)?;
        let data = shardwise_kernels::cpu_permute(&self.data, &self.shape, &perm)?;
        Tensor::new(data, shape_array(out_shape)?)
    }

    /// The `transpose2` operator.
    ///
    /// Returns the permuted tensor together with its XShape: the input dims prefixed by a `0`.
    /// The XShape carries the original shape to the gradient op and has rank `RANK + 1`, which
    /// is why its dims mapping has one more entry than the input's.
    pub fn transpose2(&self, perm: [usize; RANK]) -> Result<(Self, Vec<usize>)> {
        let out = self.permute(perm)?;
        let mut xshape = Vec::with_capacity(RANK + 1);
        xshape.push(0);
        xshape.extend_from_slice(&self.shape);
        Ok((out, xshape))
    }

    /// Gathers the slices selected by `index` along `axis`.
    ///
    /// The output keeps the rank of `self`; `shape[axis]` becomes `index.size()`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if an index is negative or not smaller than
    /// `shape[axis]`, and `TensorError::InvalidArgument` if `axis >= RANK`.
    pub fn gather<I: TensorElem>(&self, index: &Tensor<I, 1>, axis: usize) -> Result<Self> {
        let index = index
            .data()
            .iter()
            .map(|i| {
                i.to_i64().ok_or_else(|| {
                    TensorError::InvalidArgument(format!("gather index {:?} is not an integer", i))
                })
            })
            .collect::<Result<Vec<i64>>>()?;

        let data = shardwise_kernels::cpu_gather(&self.data, &self.shape, &index, axis)?;
        let mut out_shape = self.shape;
        out_shape[axis] = index.len();
        Tensor::new(data, out_shape)
    }

    /// Runs `f` over every 1-D lane of the tensor along `axis`.
    ///
    /// Each lane is handed to `f` as a contiguous buffer; lanes are processed in parallel.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidArgument` if `axis` is out of range.
    pub fn map_lanes<F>(&self, axis: i64, f: F) -> Result<Self>
    where
        F: Fn(&mut [T]) + Sync + Send,
    {
        let axis = Self::normalize_axis(axis)?;
        let axis_dim = self.shape[axis];
        let inner: usize = self.shape[axis + 1..].iter().product();
        let block = axis_dim * inner;

        let mut out = self.clone();
        if block == 0 {
            return Ok(out);
        }

        if inner == 1 {
            out.data.par_chunks_mut(axis_dim).for_each(|lane| f(lane));
            return Ok(out);
        }

        out.data.par_chunks_mut(block).for_each(|chunk| {
            let mut lane = Vec::with_capacity(axis_dim);
            for i in 0..inner {
                lane.clear();
                lane.extend((0..axis_dim).map(|k| chunk[k * inner + i]));
                f(&mut lane);
                for (k, &v) in lane.iter().enumerate() {
                    chunk[k * inner + i] = v;
                }
            }
        });
        Ok(out)
    }

    /// Builds a tensor of a new shape (same rank) from a per-element closure over output
    /// coordinates.
    pub(crate) fn from_coords<F>(shape: [usize; RANK], f: F) -> Self
    where
        F: Fn(&[usize; RANK]) -> T + Sync + Send,
    {
        let strides = compute_strides(&shape);
        let mut out = Tensor::zeros(shape);
        out.data.par_iter_mut().enumerate().for_each(|(idx, o)| {
            let mut coords = [0; RANK];
            let mut rem = idx;
            for d in 0..RANK {
                coords[d] = rem / strides[d];
                rem %= strides[d];
            }
            *o = f(&coords);
        });
        out
    }

    /// Reads the element at `coords` without bounds checks beyond the slice's own.
    pub(crate) fn at(&self, coords: &[usize; RANK]) -> T {
        let offset: usize = coords
            .iter()
            .zip(self.strides.iter())
            .map(|(c, s)| c * s)
            .sum();
        self.data[offset]
    }
}
