//! Node identifier for the graph-algorithm layer.
//!
//! Graph algorithms in [`crate::utils::graph::algorithms`] are written against [`NodeId`] rather
//! than against IR handles, so that they stay independent of the IR. Views such as
//! [`crate::ir::IrCfg`] map IR block handles onto node identifiers one-to-one.

use std::fmt;

/// A strongly-typed identifier for nodes within a directed graph.
///
/// `NodeId` wraps a dense `usize` index that can be used directly to index per-node vectors.
///
/// # Examples
///
/// ```rust
/// use irscope::utils::graph::NodeId;
///
/// let node = NodeId::new(2);
/// let data = vec!["zero", "one", "two"];
/// assert_eq!(data[node.index()], "two");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}
