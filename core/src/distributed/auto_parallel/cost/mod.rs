//! Per-process cost estimation for distributed ops.
//!
//! A [`CostMapping`] assigns every process of an op's mesh the [`Cost`] of running its shard.
//! Computation ops are priced by a [`CompOpCost`] from the local shapes in a [`CompDesc`];
//! the data-parallel gradient synchronisation of a backward op is priced by [`build_dp_costs`].

pub mod cluster;
pub mod comm_op_cost;
pub mod comp_op_cost;

pub use cluster::Cluster;
pub use comm_op_cost::{AllreduceSumOpCost, CommDesc};
pub use comp_op_cost::{CompOpCost, ScaleOpCost, Transpose2GradOpCost, Transpose2OpCost};

use super::dims_mapping::local_shape;
use super::{Attribute, DataType, DistError, DistributedContext, DistributedOperator, Result};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// Estimated cost of one op on one process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cost {
    /// Microseconds.
    pub time: f64,
    /// Bytes allocated.
    pub memory: u64,
    pub flops: u64,
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost {
            time: self.time + rhs.time,
            memory: self.memory + rhs.memory,
            flops: self.flops + rhs.flops,
        }
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        *self = *self + rhs;
    }
}

/// Process id -> cost of that process's shard.
pub type CostMapping = BTreeMap<usize, Cost>;

/// Dtype and local shape of one tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    pub dtype: DataType,
    pub shape: Vec<i64>,
}

impl TensorDesc {
    pub fn new(dtype: DataType, shape: Vec<i64>) -> Self {
        Self { dtype, shape }
    }

    /// Element count, counting unknown (`-1`) dims as 1. Saturates at `u64::MAX`.
    pub fn numel(&self) -> u64 {
        self.shape
            .iter()
            .map(|&d| if d < 0 { 1 } else { d as u64 })
            .fold(1u64, u64::saturating_mul)
    }

    pub fn bytes(&self) -> u64 {
        self.numel()
            .saturating_mul(self.dtype.size_in_bytes() as u64)
    }
}

/// What one process computes for an op: local tensors per slot plus the op attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompDesc {
    pub op_type: String,
    pub inputs: Vec<(String, Vec<TensorDesc>)>,
    pub outputs: Vec<(String, Vec<TensorDesc>)>,
    pub attrs: BTreeMap<String, Attribute>,
}

impl CompDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, slot: impl Into<String>, tensors: Vec<TensorDesc>) -> Self {
        self.inputs.push((slot.into(), tensors));
        self
    }

    pub fn with_output(mut self, slot: impl Into<String>, tensors: Vec<TensorDesc>) -> Self {
        self.outputs.push((slot.into(), tensors));
        self
    }

    pub fn input_bytes(&self) -> u64 {
        slot_bytes(&self.inputs)
    }

    pub fn output_bytes(&self) -> u64 {
        slot_bytes(&self.outputs)
    }

    pub fn output_numel(&self) -> u64 {
        self.outputs
            .iter()
            .flat_map(|(_, tensors)| tensors)
            .map(TensorDesc::numel)
            .sum()
    }
}

fn slot_bytes(slots: &[(String, Vec<TensorDesc>)]) -> u64 {
    slots
        .iter()
        .flat_map(|(_, tensors)| tensors)
        .map(TensorDesc::bytes)
        .sum()
}

/// Builds the [`CompDesc`] of every process in `dist_op`'s mesh.
///
/// Each variable is resolved in the context's serial block and cut down to its local shape
/// with the dims mapping the op's dist attr assigns it.
///
/// # Errors
///
/// Returns `DistError::UnknownVariable` for a variable missing from the serial block and
/// `DistError::MissingDimsMapping` for a variable without a dims mapping.
pub fn build_comp_desc_from_dist_op(
    dist_op: &DistributedOperator,
    ctx: &DistributedContext,
) -> Result<BTreeMap<usize, CompDesc>> {
    let op = &dist_op.serial_op;
    let attr = &dist_op.dist_attr;
    let mesh = attr.process_mesh();
    let block = ctx.serial_block();

    let local = |name: &str, mapping: &[i64]| -> Result<TensorDesc> {
        let var = block
            .find_var_recursive(name)
            .ok_or_else(|| DistError::UnknownVariable(name.to_string()))?;
        Ok(TensorDesc::new(var.dtype, local_shape(&var.shape, mapping, mesh)))
    };

    let mut desc = CompDesc::new(op.op_type());
    desc.attrs = op.attrs().clone();
    for slot in op.input_names() {
        let vars = op.input(slot).unwrap_or_default();
        let tensors = vars
            .iter()
            .map(|name| local(name, attr.input_dims_mapping(name)?))
            .collect::<Result<Vec<_>>>()?;
        desc.inputs.push((slot.to_string(), tensors));
    }
    for slot in op.output_names() {
        let vars = op.output(slot).unwrap_or_default();
        let tensors = vars
            .iter()
            .map(|name| local(name, attr.output_dims_mapping(name)?))
            .collect::<Result<Vec<_>>>()?;
        desc.outputs.push((slot.to_string(), tensors));
    }

    // Every shard of an evenly split tensor has the same local shape.
    Ok(mesh
        .processes()
        .iter()
        .map(|&process| (process, desc.clone()))
        .collect())
}

/// Prices every process in `processes` with the comp op cost `C`.
///
/// Processes without an entry in `desc_mapping` are skipped.
pub fn build_comp_costs_from_descs<C: CompOpCost>(
    ctx: &DistributedContext,
    processes: &[usize],
    desc_mapping: &BTreeMap<usize, CompDesc>,
    cluster: &Cluster,
) -> CostMapping {
    let mut costs = CostMapping::new();
    for &process in processes {
        let Some(desc) = desc_mapping.get(&process) else {
            continue;
        };
        let cost = C::calc_cost(desc, cluster);
        tracing::trace!(
            op_type = C::OP_TYPE,
            process,
            planning_rank = ctx.rank(),
            time_us = cost.time,
            memory = cost.memory,
            "comp_cost"
        );
        costs.insert(process, cost);
    }
    costs
}

/// Appends the cost of data-parallel gradient synchronisation to `result`.
///
/// For each gradient in `var_names` the gradient is all-reduced (summed) over every process
/// group along mesh axis `parallel_axis` and then scaled by `1 / group_size`; both are combined
/// into a single [`CostMapping`]. A gradient variable that is not declared falls back to the
/// shape of its forward variable, and a gradient without its own dims mapping falls back to the
/// forward variable's input mapping.
///
/// # Errors
///
/// Returns `DistError::UnknownVariable` if neither the gradient nor its forward variable is
/// declared, and `DistError::MissingDimsMapping` if neither has a dims mapping.
pub fn build_dp_costs(
    result: &mut Vec<CostMapping>,
    dist_op: &DistributedOperator,
    ctx: &DistributedContext,
    var_names: &[String],
    attrs: &BTreeMap<String, Attribute>,
    parallel_axis: usize,
    cluster: &Cluster,
) -> Result<()> {
    let attr = &dist_op.dist_attr;
    let mesh = attr.process_mesh();
    let block = ctx.serial_block();
    let groups = mesh.groups_along(parallel_axis);

    for var_name in var_names {
        let forward_name = var_name.strip_suffix("@GRAD").unwrap_or(var_name);
        let var = block
            .find_var_recursive(var_name)
            .or_else(|| block.find_var_recursive(forward_name))
            .ok_or_else(|| DistError::UnknownVariable(var_name.clone()))?;
        let mapping = attr
            .get_input_dims_mapping(var_name)
            .or_else(|| attr.get_output_dims_mapping(var_name))
            .or_else(|| attr.get_input_dims_mapping(forward_name))
            .ok_or_else(|| DistError::MissingDimsMapping(var_name.clone()))?;
        let tensor = TensorDesc::new(var.dtype, local_shape(&var.shape, mapping, mesh));

        let scale_desc = CompDesc::new(ScaleOpCost::OP_TYPE)
            .with_input("X", vec![tensor.clone()])
            .with_output("Out", vec![tensor.clone()]);
        let scale_cost = ScaleOpCost::calc_cost(&scale_desc, cluster);

        let mut costs = CostMapping::new();
        for group in &groups {
            let comm = CommDesc {
                op_type: AllreduceSumOpCost::OP_TYPE.to_string(),
                group_ranks: group.clone(),
                tensor: tensor.clone(),
                attrs: attrs.clone(),
            };
            let comm_cost = Cost {
                time: AllreduceSumOpCost::calc_time(&comm, cluster),
                ..Cost::default()
            };
            for &process in group {
                let cost = comm_cost + scale_cost;
                tracing::trace!(
                    var = var_name.as_str(),
                    process,
                    group_size = group.len(),
                    time_us = cost.time,
                    "dp_cost"
                );
                costs.insert(process, cost);
            }
        }
        result.push(costs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::auto_parallel::{
        Block, OpDesc, OperatorDistAttr, ProcessMesh, VarDesc,
    };

    fn transpose_setup(mapping: Vec<i64>) -> (DistributedOperator, DistributedContext) {
        let mut block = Block::new();
        block.add_var(VarDesc::new("x", vec![8, 4], DataType::Float32));
        block.add_var(VarDesc::new("out", vec![4, 8], DataType::Float32));
        block.add_var(VarDesc::new("xshape", vec![0, 8, 4], DataType::Float32));
        let op = OpDesc::new("transpose2")
            .with_input("X", vec!["x".to_string()])
            .with_output("Out", vec!["out".to_string()])
            .with_output("XShape", vec!["xshape".to_string()])
            .with_attr("axis", Attribute::Ints(vec![1, 0]));

        let mut attr = OperatorDistAttr::new(ProcessMesh::linear(2).unwrap());
        let out_mapping = vec![mapping[1], mapping[0]];
        let xshape_mapping = vec![-1, mapping[0], mapping[1]];
        attr.set_input_dims_mapping("x", mapping);
        attr.set_output_dims_mapping("out", out_mapping);
        attr.set_output_dims_mapping("xshape", xshape_mapping);
        (DistributedOperator::new(op, attr), DistributedContext::new(block, 0))
    }

    #[test]
    fn test_tensor_desc() {
        let desc = TensorDesc::new(DataType::Float16, vec![-1, 3, 4]);
        assert_eq!(desc.numel(), 12);
        assert_eq!(desc.bytes(), 24);
        assert_eq!(TensorDesc::new(DataType::Float32, vec![0, 3]).bytes(), 0);
    }

    #[test]
    fn test_tensor_desc_saturates() {
        let huge = TensorDesc::new(DataType::Float64, vec![i64::MAX, i64::MAX, 4]);
        assert_eq!(huge.numel(), u64::MAX);
        assert_eq!(huge.bytes(), u64::MAX);

        let wide = TensorDesc::new(DataType::Float32, vec![1 << 62]);
        assert_eq!(wide.numel(), 1 << 62);
        assert_eq!(wide.bytes(), u64::MAX);
    }

    #[test]
    fn test_cost_add() {
        let mut cost = Cost {
            time: 1.5,
            memory: 10,
            flops: 3,
        };
        cost += Cost {
            time: 0.5,
            memory: 2,
            flops: 1,
        };
        assert_eq!(
            cost,
            Cost {
                time: 2.0,
                memory: 12,
                flops: 4
            }
        );
    }

    #[test]
    fn test_comp_desc_local_shapes() {
        let (dist_op, ctx) = transpose_setup(vec![0, -1]);
        let descs = build_comp_desc_from_dist_op(&dist_op, &ctx).unwrap();
        assert_eq!(descs.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

        let desc = &descs[&1];
        assert_eq!(desc.op_type, "transpose2");
        assert_eq!(desc.inputs[0].1[0].shape, vec![4, 4]);
        assert_eq!(desc.outputs[0].0, "Out");
        assert_eq!(desc.outputs[0].1[0].shape, vec![4, 4]);
        assert_eq!(desc.outputs[1].1[0].shape, vec![0, 4, 4]);
        assert_eq!(desc.attrs.get("axis"), Some(&Attribute::Ints(vec![1, 0])));
    }

    #[test]
    fn test_comp_desc_unknown_variable() {
        let (mut dist_op, ctx) = transpose_setup(vec![-1, -1]);
        dist_op.serial_op.set_input("X", vec!["missing".to_string()]);
        dist_op.dist_attr.set_input_dims_mapping("missing", vec![-1, -1]);
        assert!(matches!(
            build_comp_desc_from_dist_op(&dist_op, &ctx),
            Err(DistError::UnknownVariable(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_build_comp_costs_skips_unknown_processes() {
        let (dist_op, ctx) = transpose_setup(vec![-1, -1]);
        let descs = build_comp_desc_from_dist_op(&dist_op, &ctx).unwrap();
        let costs = build_comp_costs_from_descs::<Transpose2OpCost>(
            &ctx,
            &[0, 1, 7],
            &descs,
            &Cluster::default(),
        );
        assert_eq!(costs.len(), 2);
        assert!(costs[&0].time > 0.0);
        assert_eq!(costs[&0], costs[&1]);
    }

    #[test]
    fn test_build_dp_costs_falls_back_to_forward_var() {
        let mut block = Block::new();
        block.add_var(VarDesc::parameter("w", vec![8, 4], DataType::Float32));
        let ctx = DistributedContext::new(block, 0);
        let mut attr = OperatorDistAttr::new(ProcessMesh::new(vec![2, 2], vec![0, 1, 2, 3]).unwrap());
        attr.set_input_dims_mapping("w", vec![0, -1]);
        let dist_op = DistributedOperator::new(OpDesc::new("transpose2_grad"), attr);

        let cluster = Cluster {
            link_bandwidth_gbps: 1.0,
            link_latency_us: 1.0,
            ..Cluster::default()
        };
        let mut result = Vec::new();
        build_dp_costs(
            &mut result,
            &dist_op,
            &ctx,
            &["w@GRAD".to_string()],
            &BTreeMap::from([("use_calc_stream".to_string(), Attribute::Bool(true))]),
            0,
            &cluster,
        )
        .unwrap();

        assert_eq!(result.len(), 1);
        let costs = &result[0];
        assert_eq!(costs.len(), 4);
        // local shard [4, 4] f32 = 64 bytes; n = 2: 64 / 1e3 + 2 * 1
        let comm_time = 0.064 + 2.0;
        assert!(costs[&0].time > comm_time);
        assert_eq!(costs[&0].flops, 16);
        assert_eq!(costs[&0], costs[&3]);
    }

    #[test]
    fn test_build_dp_costs_missing_mapping() {
        let mut block = Block::new();
        block.add_var(VarDesc::parameter("w", vec![8], DataType::Float32));
        let ctx = DistributedContext::new(block, 0);
        let attr = OperatorDistAttr::new(ProcessMesh::linear(2).unwrap());
        let dist_op = DistributedOperator::new(OpDesc::new("transpose2_grad"), attr);
        let mut result = Vec::new();
        assert!(matches!(
            build_dp_costs(
                &mut result,
                &dist_op,
                &ctx,
                &["w@GRAD".to_string()],
                &BTreeMap::new(),
                0,
                &Cluster::default(),
            ),
            Err(DistError::MissingDimsMapping(_))
        ));
        assert!(result.is_empty());
    }
}
