use super::{DistributedDefaultImpl0, DistributedOperatorImpl, is_parameter_related};
use crate::distributed::auto_parallel::cost::{
    Transpose2GradOpCost, Transpose2OpCost, build_comp_costs_from_descs,
    build_comp_desc_from_dist_op, build_dp_costs,
};
use crate::distributed::auto_parallel::{
    Attribute, Cluster, CostMapping, DimsMapping, DistError, DistributedContext,
    DistributedOperator, OpRole, Result, compute_compatible_and_update_dim_mapping,
};
use std::collections::BTreeMap;

/// `transpose2` whose output keeps the input's sharding, permuted with the data.
///
/// For `Out = transpose(X, perm)` the mappings are consistent when `Out[i] == X[perm[i]]`, and
/// the `XShape` side output (`[0, X.shape...]`) carries `-1` followed by `X`'s mapping.
#[derive(Debug, Clone)]
pub struct DistributedTranspose2Impl {
    name: String,
}

impl DistributedTranspose2Impl {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn calc_fwd_cost(
        &self,
        dist_op: &DistributedOperator,
        ctx: &DistributedContext,
        cluster: &Cluster,
    ) -> Result<Vec<CostMapping>> {
        let desc_mapping = build_comp_desc_from_dist_op(dist_op, ctx)?;
        let processes = dist_op.dist_attr.process_mesh().processes();
        Ok(vec![build_comp_costs_from_descs::<Transpose2OpCost>(
            ctx,
            processes,
            &desc_mapping,
            cluster,
        )])
    }

    fn calc_bwd_cost(
        &self,
        dist_op: &DistributedOperator,
        ctx: &DistributedContext,
        cluster: &Cluster,
    ) -> Result<Vec<CostMapping>> {
        let desc_mapping = build_comp_desc_from_dist_op(dist_op, ctx)?;
        let attr = &dist_op.dist_attr;
        let mesh = attr.process_mesh();
        let mut res = vec![build_comp_costs_from_descs::<Transpose2GradOpCost>(
            ctx,
            mesh.processes(),
            &desc_mapping,
            cluster,
        )];

        let dp_attrs = BTreeMap::from([("use_calc_stream".to_string(), Attribute::Bool(true))]);
        for varname in dist_op.serial_op.input_arg_names() {
            if varname.contains("@GRAD") || !is_parameter_related(varname, ctx.serial_block())? {
                continue;
            }
            let mapping = attr.input_dims_mapping(varname)?;
            let Some(parallel_axis) = mapping.first().and_then(|&m| usize::try_from(m).ok())
            else {
                continue;
            };
            if mesh.dim_size(parallel_axis).is_some_and(|size| size > 1) {
                build_dp_costs(
                    &mut res,
                    dist_op,
                    ctx,
                    &[format!("{varname}@GRAD")],
                    &dp_attrs,
                    parallel_axis,
                    cluster,
                )?;
            }
        }
        Ok(res)
    }
}

/// `perm`, `X`, `Out` and `XShape` mappings of a transpose op.
fn transpose_mappings(
    dist_op: &DistributedOperator,
) -> Result<(Vec<i64>, [(String, DimsMapping); 3])> {
    let op = &dist_op.serial_op;
    let attr = &dist_op.dist_attr;
    let perm = op.attr_ints("axis")?.to_vec();
    let x_name = op.first_input("X")?;
    let out_name = op.first_output("Out")?;
    let xshape_name = op.first_output("XShape")?;
    Ok((
        perm,
        [
            (x_name.to_string(), attr.input_dims_mapping(x_name)?.clone()),
            (out_name.to_string(), attr.output_dims_mapping(out_name)?.clone()),
            (
                xshape_name.to_string(),
                attr.output_dims_mapping(xshape_name)?.clone(),
            ),
        ],
    ))
}

/// `perm` as indices, if it is a permutation of `0..rank`.
fn as_permutation(perm: &[i64], rank: usize) -> Option<Vec<usize>> {
    if perm.len() != rank {
        return None;
    }
    let mut seen = vec![false; rank];
    perm.iter()
        .map(|&p| {
            let p = usize::try_from(p).ok().filter(|&p| p < rank)?;
            (!std::mem::replace(&mut seen[p], true)).then_some(p)
        })
        .collect()
}

impl DistributedOperatorImpl for DistributedTranspose2Impl {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_input_compatible(&self, _dist_op: &DistributedOperator) -> bool {
        true
    }

    fn is_output_compatible(&self, _dist_op: &DistributedOperator) -> bool {
        true
    }

    fn is_auto_compatible(&self, dist_op: &DistributedOperator) -> bool {
        if !self.is_input_compatible(dist_op) || !self.is_output_compatible(dist_op) {
            return false;
        }
        let Ok((perm, [(_, x), (_, out), (_, xshape)])) = transpose_mappings(dist_op) else {
            return false;
        };
        let Some(perm) = as_permutation(&perm, x.len()) else {
            return false;
        };
        out.len() == x.len()
            && perm.iter().zip(&out).all(|(&p, &o)| x[p] == o)
            && xshape.first() == Some(&-1)
            && xshape[1..] == x[..]
    }

    /// # Panics
    ///
    /// Panics if the `axis` attribute is not a permutation of `X`'s axes.
    fn update_dims_mapping(&self, dist_op: &mut DistributedOperator) -> Result<bool> {
        let (perm, [(x_name, mut x), (out_name, mut out), (xshape_name, mut xshape)]) =
            transpose_mappings(dist_op)?;
        assert_eq!(
            perm.len(),
            x.len(),
            "transpose2 perm {perm:?} does not match the rank of {x_name}"
        );
        let perm = as_permutation(&perm, x.len())
            .unwrap_or_else(|| panic!("transpose2 axis {perm:?} is not a permutation"));
        if out.len() != x.len() {
            return Err(DistError::DimsMappingRank {
                var: out_name,
                expected: x.len(),
                got: out.len(),
            });
        }
        if xshape.len() != x.len() + 1 {
            return Err(DistError::DimsMappingRank {
                var: xshape_name,
                expected: x.len() + 1,
                got: xshape.len(),
            });
        }

        let mut changed = false;
        let mut permuted: DimsMapping = perm.iter().map(|&p| x[p]).collect();
        for i in 0..out.len() {
            let pair: &mut [&mut [i64]] = &mut [permuted.as_mut_slice(), out.as_mut_slice()];
            if compute_compatible_and_update_dim_mapping(pair, &[i, i]) {
                changed = true;
            }
        }
        for (i, &p) in perm.iter().enumerate() {
            if x[p] != permuted[i] {
                x[p] = permuted[i];
                changed = true;
            }
        }
        let mut new_xshape = Vec::with_capacity(x.len() + 1);
        new_xshape.push(-1);
        new_xshape.extend_from_slice(&x);
        if new_xshape != xshape {
            xshape = new_xshape;
            changed = true;
        }

        if changed {
            tracing::debug!(
                x = x_name.as_str(),
                x_dims_mapping = ?x,
                out_dims_mapping = ?out,
                "transpose2_dims_mapping_updated"
            );
            let attr = &mut dist_op.dist_attr;
            attr.set_input_dims_mapping(x_name, x);
            attr.set_output_dims_mapping(out_name, out);
            attr.set_output_dims_mapping(xshape_name, xshape);
        }
        Ok(changed)
    }

    #[tracing::instrument(skip(self, dist_op, ctx, cluster), fields(op_type = dist_op.op_type()))]
    fn calc_cost(
        &self,
        op_role: OpRole,
        dist_op: &DistributedOperator,
        ctx: &DistributedContext,
        cluster: &Cluster,
    ) -> Result<Vec<CostMapping>> {
        let cost = match op_role {
            OpRole::Backward => self.calc_bwd_cost(dist_op, ctx, cluster)?,
            OpRole::Forward | OpRole::Optimize => self.calc_fwd_cost(dist_op, ctx, cluster)?,
        };
        assert!(!cost.is_empty(), "transpose2 produced no cost");
        Ok(cost)
    }

    fn forward(&self, ctx: &mut DistributedContext, dist_op: &DistributedOperator) -> Result<()> {
        DistributedDefaultImpl0::forward(ctx, dist_op)
    }

    fn backward(&self, ctx: &mut DistributedContext, dist_op: &DistributedOperator) -> Result<()> {
        DistributedDefaultImpl0::backward(ctx, dist_op)
    }
}
