//! Generic directed-graph abstractions.
//!
//! Algorithms in this module never see IR types. Any structure that can enumerate its nodes and
//! their successors/predecessors by [`NodeId`] can be analyzed, which is how
//! [`crate::ir::IrCfg`] exposes an [`crate::ir::IrCode`] to the dominator computation.
//!
//! # Traits
//!
//! - [`GraphBase`] - Node count and node enumeration
//! - [`Successors`] - Forward edge traversal
//! - [`Predecessors`] - Backward edge traversal
//! - [`RootedGraph`] - A distinguished entry node
//!
//! Nodes are dense: a graph with `node_count() == n` uses identifiers `0..n`. A node that is
//! enumerated but has no edges is allowed (it is simply unreachable from the entry).

mod node;

/// Graph algorithms (dominator trees).
pub mod algorithms;

pub use node::NodeId;

/// Basic node enumeration for a directed graph.
pub trait GraphBase {
    /// Returns the number of node slots in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Forward edges of a directed graph.
pub trait Successors: GraphBase {
    /// Returns the successors of `node`, in edge order.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Backward edges of a directed graph.
pub trait Predecessors: GraphBase {
    /// Returns the predecessors of `node`, in edge order.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A graph with a single distinguished entry node.
pub trait RootedGraph: Successors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}
