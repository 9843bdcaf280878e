//! Dominator tree computation using the Lengauer-Tarjan algorithm.
//!
//! The IR uses dominance for two things: deciding which blocks become dead when an edge is
//! removed ([`crate::ir::IrCode::unlink`]) and finding the blocks an inlined call site controls.
//!
//! # Theory
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` must pass through
//! `d`. The **immediate dominator** of `n` is the unique node that strictly dominates `n` but does
//! not strictly dominate any other dominator of `n`.
//!
//! # Unreachable nodes
//!
//! Graphs under transformation routinely contain nodes that are no longer reachable from the
//! entry. Such nodes have no immediate dominator, are dominated by nothing except themselves,
//! and dominate nothing except themselves.
//!
//! # Algorithm
//!
//! Lengauer-Tarjan with path compression, O(V α(V)). Both the DFS and the path compression are
//! iterative, so deep graphs do not exhaust the stack.

use crate::utils::graph::{NodeId, Predecessors, RootedGraph, Successors};

const UNDEFINED: NodeId = NodeId(usize::MAX);

/// Result of dominator tree computation.
///
/// Each reachable node except the entry has exactly one immediate dominator.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator for each node; the entry maps to itself, unreachable nodes to
    /// `UNDEFINED`
    idom: Vec<NodeId>,
    /// Number of nodes in the graph
    node_count: usize,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[inline]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.idom
            .get(node.index())
            .is_some_and(|&idom| idom != UNDEFINED)
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node and for
    /// unreachable nodes.
    #[inline]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry || !self.is_reachable(node) {
            None
        } else {
            Some(self.idom[node.index()])
        }
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A node dominates itself.
    ///
    /// # Complexity
    ///
    /// O(depth) where depth is the depth of `b` in the dominator tree.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(b) {
            return false;
        }

        let mut current = b;
        while current != self.entry {
            let idom = self.idom[current.index()];
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns an iterator over all dominators of a node, from the node itself up to (and
    /// including) the entry node.
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: Some(node),
        }
    }

    /// Returns the depth of a node in the dominator tree.
    ///
    /// The entry node and unreachable nodes have depth 0.
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).count().saturating_sub(1)
    }

    /// Returns all children of a node in the dominator tree.
    ///
    /// # Complexity
    ///
    /// O(V) where V is the number of nodes.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.node_count)
            .map(NodeId::new)
            .filter(|&n| n != self.entry && self.idom[n.index()] == node)
            .collect()
    }

    /// Returns every node dominated by `node`, including `node` itself, in pre-order of the
    /// dominator tree.
    pub fn dominated_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); self.node_count];
        for i in 0..self.node_count {
            let n = NodeId::new(i);
            if let Some(idom) = self.immediate_dominator(n) {
                children[idom.index()].push(n);
            }
        }

        let mut result = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Some(kids) = children.get(current.index()) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        result
    }

    /// Returns the number of nodes in the dominator tree.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_count
    }
}

/// Iterator over dominators of a node, from the node up to the entry.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// # Complexity
///
/// - Time: O(V α(V)) where α is the inverse Ackermann function
/// - Space: O(V)
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();

    if node_count == 0 {
        return DominatorTree {
            entry,
            idom: Vec::new(),
            node_count: 0,
        };
    }

    let mut lt = LengauerTarjan::new(node_count, entry);
    lt.compute(graph);

    DominatorTree {
        entry,
        idom: lt.idom,
        node_count,
    }
}

/// Convenience function to compute dominators for a [`RootedGraph`].
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph + Predecessors,
{
    compute_dominators(graph, graph.entry())
}

/// Internal state for the Lengauer-Tarjan algorithm.
struct LengauerTarjan {
    /// Entry node
    entry: NodeId,
    /// DFS number for each node (0 = not visited)
    dfnum: Vec<usize>,
    /// Node with each DFS number (inverse of dfnum)
    vertex: Vec<NodeId>,
    /// Parent in DFS tree
    parent: Vec<NodeId>,
    /// Semidominator
    semi: Vec<NodeId>,
    /// Immediate dominator (final result)
    idom: Vec<NodeId>,
    /// Ancestor in the forest for link-eval
    ancestor: Vec<NodeId>,
    /// Best node on path to ancestor
    best: Vec<NodeId>,
    /// Nodes whose semidominator is this node
    bucket: Vec<Vec<NodeId>>,
    /// Current DFS counter
    dfs_counter: usize,
}

impl LengauerTarjan {
    fn new(n: usize, entry: NodeId) -> Self {
        Self {
            entry,
            dfnum: vec![0; n],
            vertex: vec![UNDEFINED; n],
            parent: vec![UNDEFINED; n],
            semi: (0..n).map(NodeId::new).collect(),
            idom: vec![UNDEFINED; n],
            ancestor: vec![UNDEFINED; n],
            best: (0..n).map(NodeId::new).collect(),
            bucket: vec![Vec::new(); n],
            dfs_counter: 0,
        }
    }

    fn compute<G: Successors + Predecessors>(&mut self, graph: &G) {
        self.dfs(graph, self.entry);

        for i in (1..self.dfs_counter).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w.index()];

            for v in graph.predecessors(w) {
                if self.dfnum[v.index()] == 0 {
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u.index()].index()]
                    < self.dfnum[self.semi[w.index()].index()]
                {
                    self.semi[w.index()] = self.semi[u.index()];
                }
            }

            let semi_w = self.semi[w.index()];
            self.bucket[semi_w.index()].push(w);
            self.ancestor[w.index()] = parent_w;

            let bucket = std::mem::take(&mut self.bucket[parent_w.index()]);
            for v in bucket {
                let u = self.eval(v);
                if self.semi[u.index()] == self.semi[v.index()] {
                    self.idom[v.index()] = parent_w;
                } else {
                    self.idom[v.index()] = u;
                }
            }
        }

        for i in 1..self.dfs_counter {
            let w = self.vertex[i];
            if self.idom[w.index()] != self.semi[w.index()] {
                self.idom[w.index()] = self.idom[self.idom[w.index()].index()];
            }
        }

        self.idom[self.entry.index()] = self.entry;
    }

    fn dfs<G: Successors>(&mut self, graph: &G, start: NodeId) {
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            let idx = node.index();
            if self.dfnum[idx] != 0 {
                continue;
            }

            self.dfs_counter += 1;
            self.dfnum[idx] = self.dfs_counter;
            self.vertex[self.dfs_counter - 1] = node;

            for succ in graph.successors(node) {
                if self.dfnum[succ.index()] == 0 {
                    self.parent[succ.index()] = node;
                    stack.push(succ);
                }
            }
        }
    }

    fn eval(&mut self, v: NodeId) -> NodeId {
        if self.ancestor[v.index()] == UNDEFINED {
            return v;
        }
        self.compress(v);
        self.best[v.index()]
    }

    fn compress(&mut self, v: NodeId) {
        let mut path = Vec::new();
        let mut current = v;
        while self.ancestor[self.ancestor[current.index()].index()] != UNDEFINED {
            path.push(current);
            current = self.ancestor[current.index()];
        }

        for &node in path.iter().rev() {
            let ancestor = self.ancestor[node.index()];
            let best_ancestor = self.best[ancestor.index()];
            let best_node = self.best[node.index()];
            if self.dfnum[self.semi[best_ancestor.index()].index()]
                < self.dfnum[self.semi[best_node.index()].index()]
            {
                self.best[node.index()] = best_ancestor;
            }
            self.ancestor[node.index()] = self.ancestor[ancestor.index()];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::GraphBase;

    struct TestGraph {
        succs: Vec<Vec<usize>>,
        preds: Vec<Vec<usize>>,
    }

    impl TestGraph {
        fn new(n: usize, edges: &[(usize, usize)]) -> Self {
            let mut succs = vec![Vec::new(); n];
            let mut preds = vec![Vec::new(); n];
            for &(from, to) in edges {
                succs[from].push(to);
                preds[to].push(from);
            }
            Self { succs, preds }
        }
    }

    impl GraphBase for TestGraph {
        fn node_count(&self) -> usize {
            self.succs.len()
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.succs.len()).map(NodeId::new)
        }
    }

    impl Successors for TestGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.succs[node.index()].iter().map(|&s| NodeId::new(s))
        }
    }

    impl Predecessors for TestGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.preds[node.index()].iter().map(|&p| NodeId::new(p))
        }
    }

    fn n(i: usize) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_dominator_empty_graph() {
        let graph = TestGraph::new(0, &[]);
        let dom_tree = compute_dominators(&graph, n(0));
        assert_eq!(dom_tree.node_count(), 0);
    }

    #[test]
    fn test_dominator_linear_chain() {
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 3)]);
        let dom_tree = compute_dominators(&graph, n(0));

        assert_eq!(dom_tree.immediate_dominator(n(0)), None);
        assert_eq!(dom_tree.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom_tree.immediate_dominator(n(3)), Some(n(2)));
        assert!(dom_tree.dominates(n(1), n(3)));
        assert!(!dom_tree.dominates(n(3), n(1)));
        assert_eq!(dom_tree.depth(n(3)), 3);
    }

    #[test]
    fn test_dominator_diamond() {
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dom_tree = compute_dominators(&graph, n(0));

        assert_eq!(dom_tree.immediate_dominator(n(3)), Some(n(0)));
        assert!(!dom_tree.strictly_dominates(n(1), n(3)));
        assert!(!dom_tree.strictly_dominates(n(2), n(3)));
        assert!(dom_tree.strictly_dominates(n(0), n(3)));
    }

    #[test]
    fn test_dominator_loop() {
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let dom_tree = compute_dominators(&graph, n(0));

        assert_eq!(dom_tree.immediate_dominator(n(2)), Some(n(1)));
        assert_eq!(dom_tree.immediate_dominator(n(3)), Some(n(1)));
        assert_eq!(
            dom_tree.dominators(n(2)).collect::<Vec<_>>(),
            vec![n(2), n(1), n(0)]
        );
    }

    #[test]
    fn test_dominator_unreachable_nodes() {
        // 3 -> 2 is an edge from an unreachable node into the reachable part.
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (3, 2)]);
        let dom_tree = compute_dominators(&graph, n(0));

        assert!(!dom_tree.is_reachable(n(3)));
        assert_eq!(dom_tree.immediate_dominator(n(3)), None);
        assert_eq!(dom_tree.immediate_dominator(n(2)), Some(n(1)));
        assert!(dom_tree.dominates(n(3), n(3)));
        assert!(!dom_tree.dominates(n(0), n(3)));
        assert!(!dom_tree.dominates(n(3), n(2)));
    }

    #[test]
    fn test_dominated_nodes_and_children() {
        //      0
        //     / \
        //    1   2
        //   / \   \
        //  3   4   5
        //       \ /
        //        6
        let graph = TestGraph::new(
            7,
            &[(0, 1), (0, 2), (1, 3), (1, 4), (2, 5), (4, 6), (5, 6)],
        );
        let dom_tree = compute_dominators(&graph, n(0));

        let mut under_one = dom_tree.dominated_nodes(n(1));
        under_one.sort();
        assert_eq!(under_one, vec![n(1), n(3), n(4)]);

        let mut children = dom_tree.children(n(0));
        children.sort();
        assert_eq!(children, vec![n(1), n(2), n(6)]);

        assert_eq!(dom_tree.dominated_nodes(n(0)).len(), 7);
    }

    #[test]
    fn test_dominator_irreducible() {
        // Two entries into the cycle 1 <-> 2.
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 2), (2, 1), (2, 3)]);
        let dom_tree = compute_dominators(&graph, n(0));

        assert_eq!(dom_tree.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(dom_tree.immediate_dominator(n(2)), Some(n(0)));
        assert_eq!(dom_tree.immediate_dominator(n(3)), Some(n(2)));
    }

    #[test]
    fn test_dominator_deep_chain() {
        let count = 20_000;
        let edges: Vec<(usize, usize)> = (0..count - 1).map(|i| (i, i + 1)).collect();
        let graph = TestGraph::new(count, &edges);
        let dom_tree = compute_dominators(&graph, n(0));
        assert_eq!(dom_tree.immediate_dominator(n(count - 1)), Some(n(count - 2)));
    }
}
