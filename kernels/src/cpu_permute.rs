use crate::{KernelElem, KernelError, Result, check_len, row_major_strides};
use rayon::prelude::*;

/// Returns the shape produced by permuting `shape` with `perm`.
///
/// Output axis `i` takes input axis `perm[i]`. Errors if `perm` is not a bijection over
/// `[0, shape.len())`.
pub fn permuted_shape(shape: &[usize], perm: &[usize]) -> Result<Vec<usize>> {
    if perm.len() != shape.len() {
        return Err(KernelError::InvalidArgument(format!(
            "permutation {:?} has length {} but the tensor has rank {}",
            perm,
            perm.len(),
            shape.len()
        )));
    }
    let mut seen = vec![false; perm.len()];
    for &axis in perm {
        if axis >= perm.len() || seen[axis] {
            return Err(KernelError::InvalidArgument(format!(
                "{:?} is not a permutation of [0, {})",
                perm,
                perm.len()
            )));
        }
        seen[axis] = true;
    }
    Ok(perm.iter().map(|&p| shape[p]).collect())
}

/// CPU Implementation of a general axis permutation.
///
/// Output axis `i` is input axis `perm[i]`, so `perm = [1, 0]` is the matrix transpose.
/// The output is written row by row, each row gathered from the input through the strides of
/// the permuted axes.
///
/// Reads along the innermost output axis are strided by `in_strides[perm[rank - 1]]`, so a
/// permutation that keeps the last axis in place copies contiguous rows.
pub fn cpu_permute<T>(data: &[T], shape: &[usize], perm: &[usize]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(data, shape)?;
    let out_shape = permuted_shape(shape, perm)?;
    let rank = shape.len();

    if rank == 0 || data.is_empty() {
        return Ok(data.to_vec());
    }

    let in_strides = row_major_strides(shape);
    // Input stride seen when stepping along each output axis.
    let mapped: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();

    let inner = out_shape[rank - 1];
    let inner_stride = mapped[rank - 1];
    let mut out_data = vec![T::zero(); data.len()];

    out_data
        .as_mut_slice()
        .par_chunks_mut(inner)
        .enumerate()
        .for_each(|(row, out_row)| {
            let mut rem = row;
            let mut base = 0;
            for d in (0..rank - 1).rev() {
                base += (rem % out_shape[d]) * mapped[d];
                rem /= out_shape[d];
            }
            for (j, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[base + j * inner_stride];
            }
        });

    Ok(out_data)
}
