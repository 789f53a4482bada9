//! Distributed implementations of individual op types and the registry that looks them up.

pub mod dist_default;
pub mod dist_transpose;

pub use dist_default::DistributedDefaultImpl0;
pub use dist_transpose::DistributedTranspose2Impl;

use super::{
    Block, Cluster, CostMapping, DistError, DistributedContext, DistributedOperator, OpRole,
    Result,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// How one op type is partitioned, priced and lowered across a process mesh.
///
/// An op type may have several implementations (for example a matmul split along rows or along
/// columns); the planner keeps the ones whose [`is_auto_compatible`] holds for the current dims
/// mappings.
///
/// [`is_auto_compatible`]: DistributedOperatorImpl::is_auto_compatible
pub trait DistributedOperatorImpl: fmt::Debug + Send + Sync {
    /// Name the implementation is registered under.
    fn name(&self) -> &str;

    /// Whether the input dims mappings alone admit this implementation.
    fn is_input_compatible(&self, dist_op: &DistributedOperator) -> bool;

    /// Whether the output dims mappings alone admit this implementation.
    fn is_output_compatible(&self, dist_op: &DistributedOperator) -> bool;

    /// Whether inputs and outputs together are consistent with this implementation.
    ///
    /// Never panics: malformed mappings or attributes make the op incompatible.
    fn is_auto_compatible(&self, dist_op: &DistributedOperator) -> bool;

    /// One propagation step: tightens the op's dims mappings towards a consistent assignment.
    ///
    /// Returns whether any mapping changed.
    fn update_dims_mapping(&self, dist_op: &mut DistributedOperator) -> Result<bool>;

    /// Per-process cost of `dist_op` in the given role.
    ///
    /// The forward cost is a single mapping; the backward cost is the gradient op followed by
    /// one mapping per synchronised parameter gradient.
    fn calc_cost(
        &self,
        op_role: OpRole,
        dist_op: &DistributedOperator,
        ctx: &DistributedContext,
        cluster: &Cluster,
    ) -> Result<Vec<CostMapping>>;

    /// Lowers the forward op into `ctx`'s distributed block.
    fn forward(&self, ctx: &mut DistributedContext, dist_op: &DistributedOperator) -> Result<()>;

    /// Lowers the backward op into `ctx`'s distributed block.
    fn backward(&self, ctx: &mut DistributedContext, dist_op: &DistributedOperator) -> Result<()>;
}

/// The implementations registered for one op type, in registration order.
#[derive(Debug, Clone)]
pub struct DistributedOperatorImplContainer {
    op_type: String,
    impls: Vec<Arc<dyn DistributedOperatorImpl>>,
}

impl DistributedOperatorImplContainer {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            impls: Vec::new(),
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Adds `dist_impl` and returns its index, the value an `OperatorDistAttr::impl_idx`
    /// refers to.
    pub fn register_impl(&mut self, dist_impl: Arc<dyn DistributedOperatorImpl>) -> usize {
        tracing::debug!(
            op_type = self.op_type.as_str(),
            impl_name = dist_impl.name(),
            impl_idx = self.impls.len(),
            "register_dist_op_impl"
        );
        self.impls.push(dist_impl);
        self.impls.len() - 1
    }

    pub fn get_impl(&self, idx: usize) -> Option<&Arc<dyn DistributedOperatorImpl>> {
        self.impls.get(idx)
    }

    pub fn get_impls(&self) -> &[Arc<dyn DistributedOperatorImpl>] {
        &self.impls
    }

    /// Implementations whose input side admits `dist_op`.
    pub fn get_input_compatible_impls(
        &self,
        dist_op: &DistributedOperator,
    ) -> Vec<Arc<dyn DistributedOperatorImpl>> {
        self.filter_impls(|i| i.is_input_compatible(dist_op))
    }

    /// Implementations whose output side admits `dist_op`.
    pub fn get_output_compatible_impls(
        &self,
        dist_op: &DistributedOperator,
    ) -> Vec<Arc<dyn DistributedOperatorImpl>> {
        self.filter_impls(|i| i.is_output_compatible(dist_op))
    }

    /// Implementations fully consistent with `dist_op`.
    pub fn get_compatible_impls(
        &self,
        dist_op: &DistributedOperator,
    ) -> Vec<Arc<dyn DistributedOperatorImpl>> {
        self.filter_impls(|i| i.is_auto_compatible(dist_op))
    }

    fn filter_impls(
        &self,
        predicate: impl Fn(&dyn DistributedOperatorImpl) -> bool,
    ) -> Vec<Arc<dyn DistributedOperatorImpl>> {
        self.impls
            .iter()
            .filter(|i| predicate(i.as_ref()))
            .cloned()
            .collect()
    }
}

static REGISTRY: LazyLock<RwLock<HashMap<String, DistributedOperatorImplContainer>>> =
    LazyLock::new(|| {
        let mut transpose = DistributedOperatorImplContainer::new("transpose2");
        transpose.register_impl(Arc::new(DistributedTranspose2Impl::new(
            "same_mapping_transpose",
        )));
        RwLock::new(HashMap::from([(transpose.op_type.clone(), transpose)]))
    });

/// Registers an empty container for a new op type.
///
/// Returns `false`, leaving the registry untouched, if `op_type` already has a container.
pub fn register_distributed_operator_impl_container(
    container: DistributedOperatorImplContainer,
) -> bool {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if registry.contains_key(&container.op_type) {
        return false;
    }
    tracing::debug!(
        op_type = container.op_type.as_str(),
        "register_dist_op_container"
    );
    registry.insert(container.op_type.clone(), container);
    true
}

/// Adds `dist_impl` to the container of `op_type` and returns its index.
///
/// # Errors
///
/// Returns `DistError::UnknownOperator` if no container is registered for `op_type`.
pub fn register_distributed_operator_impl(
    op_type: &str,
    dist_impl: Arc<dyn DistributedOperatorImpl>,
) -> Result<usize> {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    let container = registry
        .get_mut(op_type)
        .ok_or_else(|| DistError::UnknownOperator(op_type.to_string()))?;
    Ok(container.register_impl(dist_impl))
}

/// A snapshot of the container registered for `op_type`.
pub fn get_distributed_operator_impl_container(
    op_type: &str,
) -> Option<DistributedOperatorImplContainer> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(op_type)
        .cloned()
}

/// Every implementation of `dist_op`'s type that is fully consistent with its dims mappings,
/// in registration order. Empty for an unregistered op type.
pub fn find_compatible_distributed_operator_impls(
    dist_op: &DistributedOperator,
) -> Vec<Arc<dyn DistributedOperatorImpl>> {
    get_distributed_operator_impl_container(dist_op.op_type())
        .map(|container| container.get_compatible_impls(dist_op))
        .unwrap_or_default()
}

/// Whether `varname` is a parameter, or a rewritten copy of one.
///
/// Program rewrites derive names like `w.subprog_0`, `w.cast_fp16` or `w.quantized`; the
/// suffix is dropped before looking the variable up.
///
/// # Errors
///
/// Returns `DistError::UnknownVariable` if the stripped name is not declared in `block` or its
/// ancestors.
pub fn is_parameter_related(varname: &str, block: &Block) -> Result<bool> {
    let mut name = varname;
    for marker in [".subprog_", ".cast_fp", ".quantized"] {
        if let Some(pos) = name.find(marker) {
            name = &name[..pos];
        }
    }
    block
        .find_var_recursive(name)
        .map(|var| var.is_parameter)
        .ok_or_else(|| DistError::UnknownVariable(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::auto_parallel::{
        DataType, OpDesc, OperatorDistAttr, ProcessMesh, VarDesc,
    };

    #[test]
    fn test_is_parameter_related() {
        let mut parent = Block::new();
        parent.add_var(VarDesc::parameter("w", vec![4, 4], DataType::Float32));
        let mut block = Block::with_parent(Arc::new(parent));
        block.add_var(VarDesc::new("x", vec![4], DataType::Float32));

        assert!(is_parameter_related("w", &block).unwrap());
        assert!(is_parameter_related("w.subprog_1", &block).unwrap());
        assert!(is_parameter_related("w.cast_fp16", &block).unwrap());
        assert!(is_parameter_related("w.subprog_2.cast_fp16.quantized", &block).unwrap());
        assert!(!is_parameter_related("x", &block).unwrap());
        assert!(matches!(
            is_parameter_related("y.cast_fp32", &block),
            Err(DistError::UnknownVariable(name)) if name == "y"
        ));
    }

    #[test]
    fn test_transpose_is_registered() {
        let container = get_distributed_operator_impl_container("transpose2").unwrap();
        assert_eq!(container.op_type(), "transpose2");
        assert_eq!(container.get_impl(0).unwrap().name(), "same_mapping_transpose");
        assert!(get_distributed_operator_impl_container("no_such_op").is_none());
    }

    #[test]
    fn test_register_into_unknown_container() {
        let result = register_distributed_operator_impl(
            "unregistered_op_for_test",
            Arc::new(DistributedTranspose2Impl::new("x")),
        );
        assert!(matches!(result, Err(DistError::UnknownOperator(_))));
    }

    #[test]
    fn test_register_container_once() {
        let container = DistributedOperatorImplContainer::new("registry_unit_test_op");
        assert!(register_distributed_operator_impl_container(container.clone()));
        assert!(!register_distributed_operator_impl_container(container));

        let idx = register_distributed_operator_impl(
            "registry_unit_test_op",
            Arc::new(DistributedTranspose2Impl::new("copy")),
        )
        .unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_unregistered_op_has_no_compatible_impls() {
        let op = OpDesc::new("unregistered_op_for_test");
        let dist_op = DistributedOperator::new(
            op,
            OperatorDistAttr::new(ProcessMesh::linear(1).unwrap()),
        );
        assert!(find_compatible_distributed_operator_impls(&dist_op).is_empty());
    }
}
