//! Communication costs of collectives over a process group.

use super::TensorDesc;
use crate::distributed::auto_parallel::{Attribute, Cluster};
use std::collections::BTreeMap;

/// A collective as seen by one process group.
#[derive(Debug, Clone, PartialEq)]
pub struct CommDesc {
    pub op_type: String,
    pub group_ranks: Vec<usize>,
    pub tensor: TensorDesc,
    pub attrs: BTreeMap<String, Attribute>,
}

/// `c_allreduce_sum` priced as a ring all-reduce.
///
/// A ring all-reduce over `n` ranks runs `n - 1` scatter-reduce steps followed by `n - 1`
/// all-gather steps, each moving `1 / n` of the buffer over one link:
///
/// ```text
/// time = 2 (n - 1) / n * bytes / link_bandwidth + 2 (n - 1) * link_latency
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AllreduceSumOpCost;

impl AllreduceSumOpCost {
    pub const OP_TYPE: &'static str = "c_allreduce_sum";

    /// Microseconds to all-reduce `bytes` over `group_size` ranks; zero for a single rank.
    pub fn ring_time(bytes: u64, group_size: usize, cluster: &Cluster) -> f64 {
        if group_size <= 1 {
            return 0.0;
        }
        let n = group_size as f64;
        let steps = 2.0 * (n - 1.0);
        cluster.link_time_us(steps / n * bytes as f64) + steps * cluster.link_latency_us
    }

    pub fn calc_time(desc: &CommDesc, cluster: &Cluster) -> f64 {
        Self::ring_time(desc.tensor.bytes(), desc.group_ranks.len(), cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::auto_parallel::DataType;

    fn cluster() -> Cluster {
        Cluster {
            link_bandwidth_gbps: 1.0,
            link_latency_us: 1.0,
            ..Cluster::default()
        }
    }

    #[test]
    fn test_ring_time() {
        // n = 4, 4000 bytes: 2 * 3 / 4 * 4000 / 1e3 + 6 * 1 = 6 + 6
        assert!((AllreduceSumOpCost::ring_time(4000, 4, &cluster()) - 12.0).abs() < 1e-9);
        assert_eq!(AllreduceSumOpCost::ring_time(4000, 1, &cluster()), 0.0);
        assert_eq!(AllreduceSumOpCost::ring_time(4000, 0, &cluster()), 0.0);
    }

    #[test]
    fn test_calc_time_from_desc() {
        let desc = CommDesc {
            op_type: AllreduceSumOpCost::OP_TYPE.to_string(),
            group_ranks: vec![0, 1],
            tensor: TensorDesc::new(DataType::Float32, vec![250]),
            attrs: BTreeMap::new(),
        };
        // n = 2, 1000 bytes: 1000 / 1e3 + 2 = 3
        assert!((AllreduceSumOpCost::calc_time(&desc, &cluster()) - 3.0).abs() < 1e-9);
    }
}
