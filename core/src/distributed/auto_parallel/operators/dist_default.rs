use super::is_parameter_related;
use crate::distributed::auto_parallel::{
    Attribute, DistError, DistributedContext, DistributedOperator, OpDesc, OpRole,
    OperatorDistAttr, Result, VarDesc,
};

/// Lowering shared by ops that run unchanged on every shard.
///
/// Forward copies the serial op into the distributed block. Backward does the same and then
/// synchronises the gradient of every data-parallel parameter: a `c_allreduce_sum` over the
/// process group along the parameter's batch mesh axis, followed by a `scale` by
/// `1 / group_size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributedDefaultImpl0;

impl DistributedDefaultImpl0 {
    /// # Errors
    ///
    /// Returns `DistError::UnknownVariable` if one of the op's variables is not declared in
    /// the serial block.
    pub fn forward(ctx: &mut DistributedContext, dist_op: &DistributedOperator) -> Result<()> {
        let op = &dist_op.serial_op;
        let names: Vec<String> = op
            .input_arg_names()
            .chain(op.output_arg_names())
            .map(str::to_string)
            .collect();
        sync_vars(ctx, &names)?;
        ctx.append_dist_op(op.clone(), dist_op.dist_attr.clone());
        Ok(())
    }

    /// # Errors
    ///
    /// As [`Self::forward`]; additionally `DistError::MissingDimsMapping` if a parameter input
    /// has no dims mapping.
    pub fn backward(ctx: &mut DistributedContext, dist_op: &DistributedOperator) -> Result<()> {
        Self::forward(ctx, dist_op)?;

        let op = &dist_op.serial_op;
        let attr = &dist_op.dist_attr;
        let mesh = attr.process_mesh();

        let mut synced = Vec::new();
        for varname in op.input_arg_names() {
            if varname.contains("@GRAD") || !is_parameter_related(varname, ctx.serial_block())? {
                continue;
            }
            let mapping = attr.input_dims_mapping(varname)?;
            let Some(axis) = mapping.first().and_then(|&m| usize::try_from(m).ok()) else {
                continue;
            };
            if mesh.dim_size(axis).is_none_or(|size| size <= 1) {
                continue;
            }
            let Some(group) = mesh.group_along(ctx.rank(), axis) else {
                // This process is not part of the mesh; nothing to synchronise with.
                continue;
            };
            let grad_name = format!("{varname}@GRAD");
            let grad_mapping = attr
                .get_output_dims_mapping(&grad_name)
                .or_else(|| attr.get_input_dims_mapping(&grad_name))
                .unwrap_or(mapping)
                .clone();
            synced.push((grad_name, grad_mapping, group));
        }

        for (grad_name, grad_mapping, group) in synced {
            sync_vars(ctx, std::slice::from_ref(&grad_name))?;
            let group_size = group.len();
            let ring_ranks = group.iter().map(|&r| r as i64).collect();

            let allreduce = OpDesc::new("c_allreduce_sum")
                .with_input("X", vec![grad_name.clone()])
                .with_output("Out", vec![grad_name.clone()])
                .with_attr("ring_ranks", Attribute::Ints(ring_ranks))
                .with_attr("use_calc_stream", Attribute::Bool(true))
                .with_attr(OpRole::ATTR_NAME, OpRole::Backward.as_attr());
            let scale = OpDesc::new("scale")
                .with_input("X", vec![grad_name.clone()])
                .with_output("Out", vec![grad_name.clone()])
                .with_attr("scale", Attribute::Float(1.0 / group_size as f64))
                .with_attr(OpRole::ATTR_NAME, OpRole::Backward.as_attr());

            for comm_op in [allreduce, scale] {
                let mut comm_attr = OperatorDistAttr::new(mesh.clone());
                comm_attr.set_input_dims_mapping(grad_name.clone(), grad_mapping.clone());
                comm_attr.set_output_dims_mapping(grad_name.clone(), grad_mapping.clone());
                ctx.append_dist_op(comm_op, comm_attr);
            }
            tracing::debug!(
                grad = grad_name.as_str(),
                group_size,
                rank = ctx.rank(),
                "dp_grad_sync_inserted"
            );
        }
        Ok(())
    }
}

/// Declares `names` in the distributed block, copying their descs from the serial block.
///
/// A gradient that the serial block does not declare takes the shape and dtype of its forward
/// variable.
fn sync_vars(ctx: &mut DistributedContext, names: &[String]) -> Result<()> {
    for name in names {
        if ctx.dist_block().has_var(name) {
            continue;
        }
        let serial = ctx.serial_block();
        let var = match serial.find_var_recursive(name) {
            Some(var) => var.clone(),
            None => {
                let forward = name
                    .strip_suffix("@GRAD")
                    .and_then(|fwd| serial.find_var_recursive(fwd))
                    .ok_or_else(|| DistError::UnknownVariable(name.clone()))?;
                VarDesc::new(name.clone(), forward.shape.clone(), forward.dtype)
            }
        };
        ctx.dist_block_mut().add_var(var);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::auto_parallel::{Block, DataType, ProcessMesh};

    fn grad_op() -> OpDesc {
        OpDesc::new("transpose2_grad")
            .with_input("XShape", vec!["w_xshape".to_string()])
            .with_input("Weight", vec!["w".to_string()])
            .with_input("Out@GRAD", vec!["out@GRAD".to_string()])
            .with_output("X@GRAD", vec!["w@GRAD".to_string()])
            .with_attr("axis", Attribute::Ints(vec![1, 0]))
    }

    fn serial_block() -> Block {
        let mut block = Block::new();
        block.add_var(VarDesc::parameter("w", vec![8, 4], DataType::Float32));
        block.add_var(VarDesc::new("w_xshape", vec![0, 8, 4], DataType::Float32));
        block.add_var(VarDesc::new("out@GRAD", vec![4, 8], DataType::Float32));
        block
    }

    fn dist_op(mesh: ProcessMesh, w_mapping: Vec<i64>) -> DistributedOperator {
        let mut attr = OperatorDistAttr::new(mesh);
        attr.set_input_dims_mapping("w", w_mapping.clone());
        attr.set_input_dims_mapping("w_xshape", vec![-1, w_mapping[0], w_mapping[1]]);
        attr.set_input_dims_mapping("out@GRAD", vec![w_mapping[1], w_mapping[0]]);
        attr.set_output_dims_mapping("w@GRAD", w_mapping);
        DistributedOperator::new(grad_op(), attr)
    }

    #[test]
    fn test_forward_copies_op_and_vars() {
        let mut ctx = DistributedContext::new(serial_block(), 0);
        let op = dist_op(ProcessMesh::linear(2).unwrap(), vec![0, -1]);
        DistributedDefaultImpl0::forward(&mut ctx, &op).unwrap();

        assert_eq!(ctx.dist_block().ops(), std::slice::from_ref(&op.serial_op));
        assert_eq!(ctx.dist_attr_for_op(0), Some(&op.dist_attr));
        assert!(ctx.dist_block().has_var("w"));
        // Gradient of a declared parameter is derived from it.
        assert_eq!(ctx.dist_block().var("w@GRAD").unwrap().shape, vec![8, 4]);
    }

    #[test]
    fn test_backward_inserts_allreduce_and_scale() {
        let mesh = ProcessMesh::new(vec![2, 2], vec![0, 1, 2, 3]).unwrap();
        let mut ctx = DistributedContext::new(serial_block(), 1);
        DistributedDefaultImpl0::backward(&mut ctx, &dist_op(mesh, vec![0, -1])).unwrap();

        let ops = ctx.dist_block().ops();
        let types: Vec<&str> = ops.iter().map(OpDesc::op_type).collect();
        assert_eq!(types, vec!["transpose2_grad", "c_allreduce_sum", "scale"]);

        assert_eq!(ops[1].attr("ring_ranks"), Some(&Attribute::Ints(vec![1, 3])));
        assert_eq!(ops[1].attr("use_calc_stream"), Some(&Attribute::Bool(true)));
        assert_eq!(ops[1].input("X"), Some(&["w@GRAD".to_string()][..]));
        assert_eq!(ops[2].attr("scale"), Some(&Attribute::Float(0.5)));
        assert_eq!(
            ops[2].attr(OpRole::ATTR_NAME),
            Some(&OpRole::Backward.as_attr())
        );
        let scale_attr = ctx.dist_attr_for_op(2).unwrap();
        assert_eq!(scale_attr.get_output_dims_mapping("w@GRAD"), Some(&vec![0, -1]));
    }

    #[test]
    fn test_backward_without_data_parallel() {
        let mut ctx = DistributedContext::new(serial_block(), 0);
        DistributedDefaultImpl0::backward(
            &mut ctx,
            &dist_op(ProcessMesh::linear(2).unwrap(), vec![-1, 0]),
        )
        .unwrap();
        assert_eq!(ctx.dist_block().ops().len(), 1);

        let mut ctx = DistributedContext::new(serial_block(), 0);
        DistributedDefaultImpl0::backward(
            &mut ctx,
            &dist_op(ProcessMesh::linear(1).unwrap(), vec![0, -1]),
        )
        .unwrap();
        assert_eq!(ctx.dist_block().ops().len(), 1);
    }

    #[test]
    fn test_forward_unknown_variable() {
        let mut ctx = DistributedContext::new(Block::new(), 0);
        let op = dist_op(ProcessMesh::linear(2).unwrap(), vec![0, -1]);
        assert!(matches!(
            DistributedDefaultImpl0::forward(&mut ctx, &op),
            Err(DistError::UnknownVariable(_))
        ));
        assert!(ctx.dist_block().ops().is_empty());
    }
}
