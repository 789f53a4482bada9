//! The serial program the planner annotates: variables, ops and the blocks that own them.

use super::{DistError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Int32,
    Int64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Float16 | DataType::BFloat16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }
}

/// Where in the training step an op runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpRole {
    Forward,
    Backward,
    Optimize,
}

impl OpRole {
    /// Key under which ops carry their role as an attribute.
    pub const ATTR_NAME: &'static str = "op_role";

    pub fn as_attr(self) -> Attribute {
        Attribute::Int(match self {
            OpRole::Forward => 0,
            OpRole::Backward => 1,
            OpRole::Optimize => 2,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Bool(bool),
    String(String),
}

/// A variable declared in a [`Block`].
///
/// Shapes use `-1` for dims unknown at planning time, typically the batch dim.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDesc {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: DataType,
    pub is_parameter: bool,
}

impl VarDesc {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
            is_parameter: false,
        }
    }

    /// A trainable parameter.
    pub fn parameter(name: impl Into<String>, shape: Vec<i64>, dtype: DataType) -> Self {
        Self {
            is_parameter: true,
            ..Self::new(name, shape, dtype)
        }
    }
}

/// A single operator of the serial program.
///
/// Input and output slots keep their declaration order, which is the order the cost model scans
/// them in.
#[derive(Debug, Clone, PartialEq)]
pub struct OpDesc {
    op_type: String,
    inputs: Vec<(String, Vec<String>)>,
    outputs: Vec<(String, Vec<String>)>,
    attrs: BTreeMap<String, Attribute>,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, slot: impl Into<String>, vars: Vec<String>) -> Self {
        self.set_input(slot, vars);
        self
    }

    pub fn with_output(mut self, slot: impl Into<String>, vars: Vec<String>) -> Self {
        self.set_output(slot, vars);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn set_input(&mut self, slot: impl Into<String>, vars: Vec<String>) {
        set_slot(&mut self.inputs, slot.into(), vars);
    }

    pub fn set_output(&mut self, slot: impl Into<String>, vars: Vec<String>) {
        set_slot(&mut self.outputs, slot.into(), vars);
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: Attribute) {
        self.attrs.insert(name.into(), value);
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn input(&self, slot: &str) -> Option<&[String]> {
        find_slot(&self.inputs, slot)
    }

    pub fn output(&self, slot: &str) -> Option<&[String]> {
        find_slot(&self.outputs, slot)
    }

    /// Input slot names in declaration order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|(slot, _)| slot.as_str())
    }

    /// Output slot names in declaration order.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(slot, _)| slot.as_str())
    }

    /// Every input variable name, slot by slot.
    pub fn input_arg_names(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .flat_map(|(_, vars)| vars.iter().map(String::as_str))
    }

    /// Every output variable name, slot by slot.
    pub fn output_arg_names(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .iter()
            .flat_map(|(_, vars)| vars.iter().map(String::as_str))
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, Attribute> {
        &self.attrs
    }

    /// # Errors
    ///
    /// Returns `DistError::MissingAttribute` if the attribute is absent or not an `Ints`.
    pub fn attr_ints(&self, name: &str) -> Result<&[i64]> {
        match self.attrs.get(name) {
            Some(Attribute::Ints(values)) => Ok(values),
            _ => Err(DistError::MissingAttribute {
                op_type: self.op_type.clone(),
                name: name.to_string(),
            }),
        }
    }

    /// First variable of input slot `slot`.
    pub fn first_input(&self, slot: &str) -> Result<&str> {
        self.input(slot)
            .and_then(|vars| vars.first())
            .map(String::as_str)
            .ok_or_else(|| DistError::MissingSlot {
                op_type: self.op_type.clone(),
                kind: "input",
                slot: slot.to_string(),
            })
    }

    /// First variable of output slot `slot`.
    pub fn first_output(&self, slot: &str) -> Result<&str> {
        self.output(slot)
            .and_then(|vars| vars.first())
            .map(String::as_str)
            .ok_or_else(|| DistError::MissingSlot {
                op_type: self.op_type.clone(),
                kind: "output",
                slot: slot.to_string(),
            })
    }
}

fn set_slot(slots: &mut Vec<(String, Vec<String>)>, slot: String, vars: Vec<String>) {
    match slots.iter_mut().find(|(name, _)| *name == slot) {
        Some((_, existing)) => *existing = vars,
        None => slots.push((slot, vars)),
    }
}

fn find_slot<'a>(slots: &'a [(String, Vec<String>)], slot: &str) -> Option<&'a [String]> {
    slots
        .iter()
        .find(|(name, _)| name == slot)
        .map(|(_, vars)| vars.as_slice())
}

/// A scope of variables plus the ops that run in it.
///
/// Blocks nest: a lookup that misses locally continues in the parent block.
#[derive(Debug, Clone, Default)]
pub struct Block {
    vars: BTreeMap<String, VarDesc>,
    ops: Vec<OpDesc>,
    parent: Option<Arc<Block>>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child block resolving unknown names through `parent`.
    pub fn with_parent(parent: Arc<Block>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Declares `var`, replacing an earlier declaration of the same name.
    pub fn add_var(&mut self, var: VarDesc) {
        self.vars.insert(var.name.clone(), var);
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Looks `name` up in this block only.
    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.get(name)
    }

    /// Looks `name` up in this block, then in its ancestors.
    pub fn find_var_recursive(&self, name: &str) -> Option<&VarDesc> {
        self.vars.get(name).or_else(|| {
            self.parent
                .as_deref()
                .and_then(|parent| parent.find_var_recursive(name))
        })
    }

    /// Appends `op` and returns its index.
    pub fn append_op(&mut self, op: OpDesc) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    pub fn ops(&self) -> &[OpDesc] {
        &self.ops
    }
}
