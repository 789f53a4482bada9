use crate::{BroadcastDimsSimplifier, KernelElem, KernelError, Result, check_len, row_major_strides};
use rayon::prelude::*;

/// Elementwise binary operation applied by [`cpu_broadcast_binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    #[inline]
    pub fn apply<T: KernelElem>(self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
}

/// Computes the shape `lhs` and `rhs` broadcast to.
///
/// The lower-rank operand is aligned starting at `axis` (or with the trailing dims when `axis`
/// is negative) and padded with 1s; each output dim is the non-1 dim of the pair.
pub fn broadcast_shape(lhs: &[usize], rhs: &[usize], axis: i64) -> Result<Vec<usize>> {
    let (big, small) = if lhs.len() >= rhs.len() {
        (lhs, rhs)
    } else {
        (rhs, lhs)
    };
    let rank = big.len();
    let start = if axis < 0 || small.len() == rank {
        rank - small.len()
    } else {
        axis as usize
    };
    if start + small.len() > rank {
        return Err(KernelError::InvalidArgument(format!(
            "shape {:?} does not fit into shape {:?} at axis {}",
            small, big, axis
        )));
    }

    let mut out = big.to_vec();
    for (k, &dim) in small.iter().enumerate() {
        let slot = &mut out[start + k];
        if *slot == 1 {
            *slot = dim;
        } else if dim != 1 && dim != *slot {
            return Err(KernelError::ShapeMismatch {
                expected: lhs.to_vec(),
                got: rhs.to_vec(),
            });
        }
    }
    Ok(out)
}

/// CPU Implementation of a broadcasting elementwise binary operation.
///
/// Returns the output data together with the broadcast output shape. Shapes are collapsed with
/// [`BroadcastDimsSimplifier`] first, so the per-element offset computation only walks the
/// dims that actually differ between the operands.
pub fn cpu_broadcast_binary<T>(
    lhs: &[T],
    lhs_shape: &[usize],
    rhs: &[T],
    rhs_shape: &[usize],
    axis: i64,
    op: BinaryOp,
) -> Result<(Vec<T>, Vec<usize>)>
where
    T: KernelElem,
{
    check_len(lhs, lhs_shape)?;
    check_len(rhs, rhs_shape)?;

    let out_shape = broadcast_shape(lhs_shape, rhs_shape, axis)?;
    let simplified = BroadcastDimsSimplifier::new(&[lhs_shape, rhs_shape], &out_shape, axis)?;

    let out_strides = row_major_strides(&simplified.out_dims);
    let lhs_strides = broadcast_strides(&simplified.in_dims[0]);
    let rhs_strides = broadcast_strides(&simplified.in_dims[1]);
    let rank = simplified.rank;

    let size: usize = out_shape.iter().product();
    let mut out_data = vec![T::zero(); size];
    out_data
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, out)| {
            let mut rem = idx;
            let mut l = 0;
            let mut r = 0;
            for d in 0..rank {
                let coord = rem / out_strides[d];
                rem %= out_strides[d];
                l += coord * lhs_strides[d];
                r += coord * rhs_strides[d];
            }
            *out = op.apply(lhs[l], rhs[r]);
        });

    Ok((out_data, out_shape))
}

/// Row-major strides with broadcast (size 1) dims pinned to stride 0.
fn broadcast_strides(dims: &[usize]) -> Vec<usize> {
    row_major_strides(dims)
        .into_iter()
        .zip(dims)
        .map(|(stride, &dim)| if dim == 1 { 0 } else { stride })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_shape() {
        let (out, shape) =
            cpu_broadcast_binary(&[1.0, 2.0], &[2], &[3.0, 4.0], &[2], -1, BinaryOp::Mul).unwrap();
        assert_eq!(shape, vec![2]);
        assert_eq!(out, vec![3.0, 8.0]);
    }

    #[test]
    fn test_row_broadcast() {
        // [2, 3] + [3]
        let lhs = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let rhs = vec![10.0, 20.0, 30.0];
        let (out, shape) =
            cpu_broadcast_binary(&lhs, &[2, 3], &rhs, &[3], -1, BinaryOp::Add).unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(out, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_channel_broadcast_with_axis() {
        // [1, 2, 2] * [2] at axis 1 scales each channel.
        let lhs = vec![1.0, 1.0, 1.0, 1.0];
        let rhs = vec![2.0, 3.0];
        let (out, shape) =
            cpu_broadcast_binary(&lhs, &[1, 2, 2], &rhs, &[2], 1, BinaryOp::Mul).unwrap();
        assert_eq!(shape, vec![1, 2, 2]);
        assert_eq!(out, vec![2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_both_sides_broadcast() {
        // [2, 1] - [1, 3] -> [2, 3]
        let (out, shape) = cpu_broadcast_binary(
            &[10.0, 20.0],
            &[2, 1],
            &[1.0, 2.0, 3.0],
            &[1, 3],
            -1,
            BinaryOp::Sub,
        )
        .unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(out, vec![9.0, 8.0, 7.0, 19.0, 18.0, 17.0]);
    }

    #[test]
    fn test_incompatible_shapes() {
        let err = cpu_broadcast_binary(&[1.0; 6], &[2, 3], &[1.0; 2], &[2], -1, BinaryOp::Div);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}
