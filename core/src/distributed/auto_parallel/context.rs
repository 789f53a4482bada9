use super::program::{Block, OpDesc};
use super::{DistributedOperator, OperatorDistAttr};

/// Planning state shared by the operator implementations of one process.
///
/// Holds the annotated serial block the planner reads from and the distributed block that
/// `forward`/`backward` lowering appends to, together with the dist attrs of the appended ops.
#[derive(Debug, Clone)]
pub struct DistributedContext {
    rank: usize,
    serial_block: Block,
    dist_block: Block,
    dist_op_attrs: Vec<OperatorDistAttr>,
}

impl DistributedContext {
    /// A context lowering `serial_block` for process `rank`.
    pub fn new(serial_block: Block, rank: usize) -> Self {
        Self {
            rank,
            serial_block,
            dist_block: Block::new(),
            dist_op_attrs: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn serial_block(&self) -> &Block {
        &self.serial_block
    }

    pub fn dist_block(&self) -> &Block {
        &self.dist_block
    }

    pub fn dist_block_mut(&mut self) -> &mut Block {
        &mut self.dist_block
    }

    /// Appends `op` to the distributed block and records its dist attr. Returns the op index.
    pub fn append_dist_op(&mut self, op: OpDesc, dist_attr: OperatorDistAttr) -> usize {
        let idx = self.dist_block.append_op(op);
        self.dist_op_attrs.push(dist_attr);
        idx
    }

    /// Dist attr of the `idx`-th op of the distributed block.
    pub fn dist_attr_for_op(&self, idx: usize) -> Option<&OperatorDistAttr> {
        self.dist_op_attrs.get(idx)
    }

    /// The lowered ops with their dist attrs, in program order.
    pub fn dist_ops(&self) -> impl Iterator<Item = DistributedOperator> + '_ {
        self.dist_block
            .ops()
            .iter()
            .zip(&self.dist_op_attrs)
            .map(|(op, attr)| DistributedOperator::new(op.clone(), attr.clone()))
    }
}
