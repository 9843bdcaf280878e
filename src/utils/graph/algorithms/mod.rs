//! Algorithms over the traits of [`crate::utils::graph`].
//!
//! # Available Algorithms
//!
//! - [`compute_dominators`] - Lengauer-Tarjan dominator tree, tolerant of unreachable nodes
//! - [`compute_dominators_rooted`] - Same, starting from [`crate::utils::graph::RootedGraph::entry`]

mod dominators;

pub use dominators::{compute_dominators, compute_dominators_rooted, DominatorTree};
