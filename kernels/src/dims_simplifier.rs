//! Broadcast dimension simplification.
//!
//! Elementwise kernels compute one input offset per output element. The fewer dimensions the
//! offset computation walks, the cheaper it is, so before launching a broadcast kernel the input
//! and output shapes are collapsed:
//!
//! ```text
//! Consecutive dims that agree across every input are merged:
//!   in_1 = [2, 3, 4, 5]        in_1 = [2, 12, 5]
//!   in_2 = [1, 3, 4, 5]   ->   in_2 = [1, 12, 5]
//!   in_3 = [2, 3, 4, 1]        in_3 = [2, 12, 1]
//!
//! Runs of 1-dims are merged when every other input matches the output there:
//!   in_1 = [2, 1, 1, 5]        in_1 = [2,  1, 5]
//!   in_2 = [2, 3, 4, 5]   ->   in_2 = [2, 12, 5]
//! ```
//!
//! Unlike the reversed layout GPU launchers prefer, the simplified dims stay in row-major order.

use crate::{KernelError, Result};

type MergePredicate = fn(&[Vec<usize>], &[usize], usize) -> bool;

/// The collapsed input and output shapes of a broadcast.
///
/// All entries of `in_dims` and `out_dims` have length `rank`. A single input is paired with a
/// copy of the output shape so that the merge rules always compare at least two shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastDimsSimplifier {
    pub rank: usize,
    pub out_dims: Vec<usize>,
    pub in_dims: Vec<Vec<usize>>,
}

impl BroadcastDimsSimplifier {
    /// Simplifies the shapes of `ins` broadcast to `out`.
    ///
    /// Inputs with a lower rank than `out` are aligned starting at `axis`; a negative `axis`
    /// aligns them with the trailing dims of `out`.
    ///
    /// # Errors
    ///
    /// Returns `KernelError::InvalidArgument` if an input dim is neither 1 nor equal to the
    /// output dim it is aligned with, or if an input does not fit into the output rank.
    pub fn new(ins: &[&[usize]], out: &[usize], axis: i64) -> Result<Self> {
        if ins.is_empty() {
            return Err(KernelError::InvalidArgument(
                "broadcast requires at least one input".into(),
            ));
        }

        if !need_broadcast(ins, out) {
            let numel: usize = out.iter().product();
            return Ok(Self {
                rank: 1,
                out_dims: vec![numel],
                in_dims: vec![vec![numel]; ins.len()],
            });
        }

        let mut in_dims: Vec<Vec<usize>> = ins.iter().map(|dims| dims.to_vec()).collect();
        if in_dims.len() == 1 {
            in_dims.push(out.to_vec());
        }

        let mut simplifier = Self {
            rank: out.len(),
            out_dims: out.to_vec(),
            in_dims,
        };
        simplifier.extend_input_dims(axis)?;
        simplifier.merge_dims(merge_sequential_dims);

        for _ in 0..simplifier.rank {
            let Some(swap_idx) = simplifier.find_sequential_one_dim() else {
                break;
            };
            simplifier.merge_dims(merge_sequential_one_dims);
            simplifier.in_dims.swap(swap_idx, 0);
        }

        Ok(simplifier)
    }

    fn extend_input_dims(&mut self, axis: i64) -> Result<()> {
        let rank = self.rank;
        let out = &self.out_dims;
        for in_dim in self.in_dims.iter_mut() {
            if in_dim.len() > rank {
                return Err(KernelError::InvalidArgument(format!(
                    "input shape {:?} has a higher rank than the output shape {:?}",
                    in_dim, out
                )));
            }

            let start = if axis < 0 || in_dim.len() == rank {
                rank - in_dim.len()
            } else {
                axis as usize
            };
            if start + in_dim.len() > rank {
                return Err(KernelError::InvalidArgument(format!(
                    "input shape {:?} does not fit into output shape {:?} at axis {}",
                    in_dim, out, axis
                )));
            }

            let mut extended = vec![1; rank];
            for (k, &dim) in in_dim.iter().enumerate() {
                let out_idx = start + k;
                if dim != out[out_idx] && dim != 1 {
                    return Err(KernelError::InvalidArgument(format!(
                        "The {}-th dimension of input tensor is expected to be equal with the {}-th \
                         dimension of output tensor {} or 1, but received {}.",
                        k + 1,
                        out_idx + 1,
                        out[out_idx],
                        dim
                    )));
                }
                extended[out_idx] = dim;
            }
            *in_dim = extended;
        }
        Ok(())
    }

    /// Collapses every run of positions accepted by `accept` into its last position.
    fn merge_dims(&mut self, accept: MergePredicate) {
        let mut i = 0;
        while i < self.rank {
            let low = i;
            let mut cnt = 0;
            while i < self.rank && accept(&self.in_dims, &self.out_dims, i) {
                i += 1;
                cnt += 1;
            }

            if cnt > 1 {
                for dims in self
                    .in_dims
                    .iter_mut()
                    .chain(std::iter::once(&mut self.out_dims))
                {
                    collapse(dims, low, i);
                }
                self.rank -= cnt - 1;
                i -= cnt - 1;
            } else if cnt < 1 {
                i += 1;
            }
        }
    }

    /// Moves the input with the longest run of 1-dims to slot 0 and returns its former slot.
    fn find_sequential_one_dim(&mut self) -> Option<usize> {
        let mut index = 0;
        let mut max_one_length = 0;
        for (j, dims) in self.in_dims.iter().enumerate() {
            let mut run = 0;
            let mut longest = 0;
            for &dim in &dims[..self.rank] {
                run = if dim == 1 { run + 1 } else { 0 };
                longest = longest.max(run);
            }
            if longest > max_one_length {
                index = j;
                max_one_length = longest;
            }
        }

        if max_one_length > 1 {
            self.in_dims.swap(0, index);
            Some(index)
        } else {
            None
        }
    }
}

fn need_broadcast(ins: &[&[usize]], out: &[usize]) -> bool {
    let first = ins[0];
    !(ins.iter().all(|dims| *dims == first) && out == first)
}

fn merge_sequential_dims(in_dims: &[Vec<usize>], _out: &[usize], i: usize) -> bool {
    in_dims.iter().all(|dims| dims[i] == in_dims[0][i])
}

fn merge_sequential_one_dims(in_dims: &[Vec<usize>], out: &[usize], i: usize) -> bool {
    in_dims[0][i] == 1 && in_dims[1..].iter().all(|dims| dims[i] == out[i])
}

/// Replaces `dims[low..high]` by its product.
fn collapse(dims: &mut Vec<usize>, low: usize, high: usize) {
    dims[high - 1] = dims[low..high].iter().product();
    dims.drain(low..high - 1);
}
