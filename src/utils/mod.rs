//! Supporting data structures shared by the IR.
//!
//! - [`BitSet`] - growable bit vector used for liveness and visited sets
//! - [`graph`] - graph traits and the dominator tree computation

mod bitset;
pub mod graph;

pub use bitset::{BitSet, BitSetIter};
