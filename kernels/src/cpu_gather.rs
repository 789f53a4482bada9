use crate::{KernelElem, KernelError, Result, check_len};
use rayon::prelude::*;

/// CPU Implementation of Gather.
///
/// Selects the slices `index[k]` of `data` along `axis`. The output has the input shape with
/// `shape[axis]` replaced by `index.len()`.
///
/// Each outer block (the product of the dims before `axis`) is filled independently, so the
/// work is split across `rayon` workers per block.
pub fn cpu_gather<T>(data: &[T], shape: &[usize], index: &[i64], axis: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(data, shape)?;
    if axis >= shape.len() {
        return Err(KernelError::InvalidArgument(format!(
            "gather axis {} is out of range for rank {}",
            axis,
            shape.len()
        )));
    }

    let axis_dim = shape[axis];
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();

    let mut rows = Vec::with_capacity(index.len());
    for &i in index {
        if i < 0 || i as usize >= axis_dim {
            return Err(KernelError::IndexOutOfBounds {
                index: vec![i.max(0) as usize],
                shape: shape.to_vec(),
            });
        }
        rows.push(i as usize);
    }

    let block = rows.len() * inner;
    let mut out_data = vec![T::zero(); outer * block];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    out_data
        .as_mut_slice()
        .par_chunks_mut(block)
        .enumerate()
        .for_each(|(o, out_block)| {
            let src_base = o * axis_dim * inner;
            for (k, &row) in rows.iter().enumerate() {
                let src = src_base + row * inner;
                out_block[k * inner..(k + 1) * inner].copy_from_slice(&data[src..src + inner]);
            }
        });

    Ok(out_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_rows() {
        // [3, 2]
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = cpu_gather(&data, &[3, 2], &[2, 0], 0).unwrap();
        assert_eq!(result, vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn test_gather_columns() {
        // [2, 3]
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let result = cpu_gather(&data, &[2, 3], &[1, 1, 2], 1).unwrap();
        assert_eq!(result, vec![2.0, 2.0, 3.0, 5.0, 5.0, 6.0]);
    }

    #[test]
    fn test_gather_empty_index() {
        let data = vec![1.0f32; 4];
        let result = cpu_gather(&data, &[4], &[], 0).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_gather_out_of_bounds() {
        let data = vec![1.0f32; 4];
        assert!(matches!(
            cpu_gather(&data, &[4], &[4], 0),
            Err(KernelError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            cpu_gather(&data, &[4], &[-1], 0),
            Err(KernelError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            cpu_gather(&data, &[4], &[0], 1),
            Err(KernelError::InvalidArgument(_))
        ));
    }
}
