use super::program::OpDesc;
use super::{DimsMapping, DistError, ProcessMesh, Result};
use std::collections::BTreeMap;

/// Distributed attributes of one op: the mesh it runs on, the dims mapping of every input and
/// output variable, and which registered implementation lowers it.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDistAttr {
    process_mesh: ProcessMesh,
    inputs_dims_mapping: BTreeMap<String, DimsMapping>,
    outputs_dims_mapping: BTreeMap<String, DimsMapping>,
    pub impl_type: String,
    pub impl_idx: usize,
}

impl OperatorDistAttr {
    pub fn new(process_mesh: ProcessMesh) -> Self {
        Self {
            process_mesh,
            inputs_dims_mapping: BTreeMap::new(),
            outputs_dims_mapping: BTreeMap::new(),
            impl_type: "default".to_string(),
            impl_idx: 0,
        }
    }

    pub fn process_mesh(&self) -> &ProcessMesh {
        &self.process_mesh
    }

    pub fn get_input_dims_mapping(&self, name: &str) -> Option<&DimsMapping> {
        self.inputs_dims_mapping.get(name)
    }

    pub fn get_output_dims_mapping(&self, name: &str) -> Option<&DimsMapping> {
        self.outputs_dims_mapping.get(name)
    }

    pub fn set_input_dims_mapping(&mut self, name: impl Into<String>, mapping: DimsMapping) {
        self.inputs_dims_mapping.insert(name.into(), mapping);
    }

    pub fn set_output_dims_mapping(&mut self, name: impl Into<String>, mapping: DimsMapping) {
        self.outputs_dims_mapping.insert(name.into(), mapping);
    }

    /// Like [`Self::get_input_dims_mapping`], but a missing mapping is an error.
    pub fn input_dims_mapping(&self, name: &str) -> Result<&DimsMapping> {
        self.get_input_dims_mapping(name)
            .ok_or_else(|| DistError::MissingDimsMapping(name.to_string()))
    }

    /// Like [`Self::get_output_dims_mapping`], but a missing mapping is an error.
    pub fn output_dims_mapping(&self, name: &str) -> Result<&DimsMapping> {
        self.get_output_dims_mapping(name)
            .ok_or_else(|| DistError::MissingDimsMapping(name.to_string()))
    }

    pub fn inputs_dims_mapping(&self) -> &BTreeMap<String, DimsMapping> {
        &self.inputs_dims_mapping
    }

    pub fn outputs_dims_mapping(&self) -> &BTreeMap<String, DimsMapping> {
        &self.outputs_dims_mapping
    }
}

/// A serial op paired with its distributed attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedOperator {
    pub serial_op: OpDesc,
    pub dist_attr: OperatorDistAttr,
}

impl DistributedOperator {
    pub fn new(serial_op: OpDesc, dist_attr: OperatorDistAttr) -> Self {
        Self {
            serial_op,
            dist_attr,
        }
    }

    pub fn op_type(&self) -> &str {
        self.serial_op.op_type()
    }
}
