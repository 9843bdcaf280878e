//! Graph view of an [`IrCode`] and the block dominance oracle.
//!
//! [`IrCfg`] exposes the block graph through the generic graph traits in
//! [`crate::utils::graph`], with block arena indices as node ids. Arena slots of removed blocks
//! are simply unreachable from the entry. [`BlockDominators`] wraps the resulting
//! [`DominatorTree`] with a block-typed API.

use crate::{
    ir::{BlockId, IrCode},
    utils::graph::{
        algorithms::{compute_dominators_rooted, DominatorTree},
        GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    },
};

/// Read-only graph view over the blocks of an [`IrCode`].
#[derive(Debug, Clone, Copy)]
pub struct IrCfg<'a> {
    code: &'a IrCode,
}

impl<'a> IrCfg<'a> {
    /// Creates a view over `code`.
    #[must_use]
    pub fn new(code: &'a IrCode) -> Self {
        Self { code }
    }
}

fn node(block: BlockId) -> NodeId {
    NodeId::new(block.index())
}

fn block(node: NodeId) -> BlockId {
    BlockId::new(node.index())
}

impl GraphBase for IrCfg<'_> {
    fn node_count(&self) -> usize {
        self.code.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.code.order.iter().map(|&b| node(b))
    }
}

impl Successors for IrCfg<'_> {
    fn successors(&self, n: NodeId) -> impl Iterator<Item = NodeId> {
        self.code.block(block(n)).successors.iter().map(|&b| node(b))
    }
}

impl Predecessors for IrCfg<'_> {
    fn predecessors(&self, n: NodeId) -> impl Iterator<Item = NodeId> {
        self.code.block(block(n)).predecessors.iter().map(|&b| node(b))
    }
}

impl RootedGraph for IrCfg<'_> {
    fn entry(&self) -> NodeId {
        node(self.code.entry_block())
    }
}

/// Dominance oracle over the blocks of an [`IrCode`].
///
/// Computed once from a snapshot of the graph; it is not updated by later mutations.
#[derive(Debug, Clone)]
pub struct BlockDominators {
    tree: DominatorTree,
}

impl BlockDominators {
    /// Returns `true` if `a` dominates `b`. Every block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.dominates(node(a), node(b))
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.strictly_dominates(node(a), node(b))
    }

    /// Returns the immediate dominator, or `None` for the entry and unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, b: BlockId) -> Option<BlockId> {
        self.tree.immediate_dominator(node(b)).map(block)
    }

    /// Returns `true` if `b` was reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.tree.is_reachable(node(b))
    }

    /// Returns `b` and every block it dominates, in dominator-tree pre-order.
    #[must_use]
    pub fn dominated_blocks(&self, b: BlockId) -> Vec<BlockId> {
        self.tree.dominated_nodes(node(b)).into_iter().map(block).collect()
    }
}

impl IrCode {
    /// Returns a graph view of this unit.
    #[must_use]
    pub fn cfg(&self) -> IrCfg<'_> {
        IrCfg::new(self)
    }

    /// Computes the dominator tree of the current graph. Unreachable blocks are tolerated.
    ///
    /// # Panics
    ///
    /// Panics if the unit has no blocks.
    #[must_use]
    pub fn dominator_tree(&self) -> BlockDominators {
        BlockDominators {
            tree: compute_dominators_rooted(&self.cfg()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrOptions, Position};

    #[test]
    fn test_dominated_blocks() {
        let mut code = IrCode::new(IrOptions::testing());
        let blocks: Vec<BlockId> = (0..4)
            .map(|_| {
                let b = code.create_goto_block(Position::none(), None);
                code.push_block(b);
                b
            })
            .collect();
        // 0 -> 1 -> 2; block 3 has no edges
        code.link(blocks[0], blocks[1]);
        code.link(blocks[1], blocks[2]);
        let unreachable = code.create_goto_block(Position::none(), None);
        code.push_block(unreachable);

        let dominators = code.dominator_tree();
        assert!(dominators.dominates(blocks[0], blocks[2]));
        assert!(dominators.strictly_dominates(blocks[1], blocks[2]));
        assert_eq!(dominators.immediate_dominator(blocks[2]), Some(blocks[1]));
        assert_eq!(dominators.immediate_dominator(blocks[0]), None);
        assert!(!dominators.is_reachable(unreachable));

        let mut dominated = dominators.dominated_blocks(blocks[1]);
        dominated.sort();
        assert_eq!(dominated, vec![blocks[1], blocks[2]]);
        assert_eq!(code.cfg().node_ids().count(), 5);
    }
}
