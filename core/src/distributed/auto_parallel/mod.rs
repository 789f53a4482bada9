//! # Auto-Parallel Planning
//!
//! The planner decides, for every tensor of a program, which of its axes are split across which
//! dimension of a [`ProcessMesh`]. That decision is a **dims mapping**: one entry per tensor
//! axis, `-1` for a replicated axis, otherwise the index of the mesh dimension the axis is split
//! over.
//!
//! ```text
//! mesh topology [2, 4]          tensor [8, 1024]
//! dims mapping  [0, -1]   ->    axis 0 split in 2 (one half per mesh row), axis 1 replicated
//! ```
//!
//! Each operator type plugs into the planner through a [`DistributedOperatorImpl`]:
//!
//! 1. **Compatibility**: does the current assignment of input/output mappings satisfy the op?
//! 2. **Propagation**: one step of a graph-wide fixed point; tightens the mappings of the op's
//!    tensors towards each other and reports whether anything changed.
//! 3. **Cost**: per-process time/memory estimate, including the data-parallel gradient
//!    all-reduce the backward op triggers.
//! 4. **Lowering**: emitting the op (plus any communication it needs) into the distributed
//!    program held by a [`DistributedContext`].
//!
//! Implementations are looked up by op type in a process-wide registry
//! ([`get_distributed_operator_impl_container`]).

pub mod context;
pub mod cost;
pub mod dims_mapping;
pub mod dist_attr;
pub mod operators;
pub mod process_mesh;
pub mod program;

pub use context::DistributedContext;
pub use cost::{Cluster, Cost, CostMapping};
pub use dims_mapping::{
    DimsMapping, compute_compatible_and_update_dim_mapping, compute_compatible_dim_mapping,
};
pub use dist_attr::{DistributedOperator, OperatorDistAttr};
pub use operators::{
    DistributedOperatorImpl, DistributedOperatorImplContainer,
    find_compatible_distributed_operator_impls, get_distributed_operator_impl_container,
    is_parameter_related, register_distributed_operator_impl,
    register_distributed_operator_impl_container,
};
pub use process_mesh::ProcessMesh;
pub use program::{Attribute, Block, DataType, OpDesc, OpRole, VarDesc};

use thiserror::Error;

/// Error type for auto-parallel planning.
#[derive(Error, Debug)]
pub enum DistError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("No dims mapping for variable {0}")]
    MissingDimsMapping(String),
    #[error("Op {op_type} has no {kind} slot {slot}")]
    MissingSlot {
        op_type: String,
        kind: &'static str,
        slot: String,
    },
    #[error("Op {op_type} has no attribute {name} of the expected type")]
    MissingAttribute { op_type: String, name: String },
    #[error("Dims mapping of {var} has length {got}, expected {expected}")]
    DimsMappingRank {
        var: String,
        expected: usize,
        got: usize,
    },
    #[error("Invalid process mesh: {0}")]
    InvalidMesh(String),
    #[error("Invalid cluster config: {0}")]
    InvalidCluster(String),
    #[error("Unknown operator type: {0}")]
    UnknownOperator(String),
    #[error("Failed to read cluster config: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("Failed to parse cluster config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DistError>;
