//! Computation costs of single ops on one process.

use super::{CompDesc, Cost};
use crate::distributed::auto_parallel::Cluster;

/// Cost model of one computation op type.
///
/// The default [`CompOpCost::calc_cost`] prices an op on a roofline: the slower of streaming
/// its inputs and outputs through device memory and executing its flops at peak throughput.
pub trait CompOpCost {
    const OP_TYPE: &'static str;

    fn calc_flops(desc: &CompDesc) -> u64;

    /// Bytes read plus bytes written.
    fn calc_bytes(desc: &CompDesc) -> u64 {
        desc.input_bytes() + desc.output_bytes()
    }

    /// Bytes the op allocates for its outputs.
    fn calc_memory(desc: &CompDesc) -> u64 {
        desc.output_bytes()
    }

    fn calc_time(desc: &CompDesc, cluster: &Cluster) -> f64 {
        let memory_time = cluster.memory_time_us(Self::calc_bytes(desc));
        let compute_time = cluster.compute_time_us(Self::calc_flops(desc));
        memory_time.max(compute_time)
    }

    fn calc_cost(desc: &CompDesc, cluster: &Cluster) -> Cost {
        Cost {
            time: Self::calc_time(desc, cluster),
            memory: Self::calc_memory(desc),
            flops: Self::calc_flops(desc),
        }
    }
}

/// `transpose2`: pure data movement.
#[derive(Debug, Clone, Copy)]
pub struct Transpose2OpCost;

impl CompOpCost for Transpose2OpCost {
    const OP_TYPE: &'static str = "transpose2";

    fn calc_flops(_desc: &CompDesc) -> u64 {
        0
    }
}

/// `transpose2_grad`: moves `Out@GRAD` back into the input layout.
#[derive(Debug, Clone, Copy)]
pub struct Transpose2GradOpCost;

impl CompOpCost for Transpose2GradOpCost {
    const OP_TYPE: &'static str = "transpose2_grad";

    fn calc_flops(_desc: &CompDesc) -> u64 {
        0
    }
}

/// `scale`: one multiply per output element.
#[derive(Debug, Clone, Copy)]
pub struct ScaleOpCost;

impl CompOpCost for ScaleOpCost {
    const OP_TYPE: &'static str = "scale";

    fn calc_flops(desc: &CompDesc) -> u64 {
        desc.output_numel()
    }

    /// In-place: the output aliases the input.
    fn calc_memory(_desc: &CompDesc) -> u64 {
        0
    }
}
