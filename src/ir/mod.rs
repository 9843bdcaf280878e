//! SSA control-flow-graph IR for a single compiled unit.
//!
//! # Architecture
//!
//! The module is organized into focused sub-modules, leaves first:
//!
//! - `ids` - arena handles ([`ValueId`], [`InstrId`], [`BlockId`])
//! - `value` / `phi` - SSA values, def-use bookkeeping and trivial-phi pruning
//! - `instruction` - the closed set of instruction kinds and their input/output wiring
//! - `catch` - catch-handler tables
//! - `block` - basic blocks and block-local shape queries
//! - `edges` - edge and catch-handler mutations that keep jump encodings in sync
//! - `builder` - the filled/sealed construction protocol and [`SsaBuilder`]
//! - `code` - the [`IrCode`] container, numbering and topological order
//! - `marking` - marking colors, reachability and block removal
//! - `cursor` - the mutation protocol ([`InstructionCursor`], [`BlockCursor`])
//! - `inliner` - splicing a callee graph in place of a call
//! - `liveness` - live-at-entry sets for register allocation
//! - `cfg` - a graph view for the dominator tree
//! - `verify` - global consistency checks
//!
//! # Handles and arenas
//!
//! Blocks, instructions and values are stored in arenas owned by [`IrCode`] and addressed by
//! handles. Back-pointers (instruction to block, value to definition) are handle fields, so the
//! graph never needs shared ownership. Entities are never freed individually: removed blocks and
//! instructions simply drop out of the block order.
//!
//! # Edge encoding
//!
//! Jump targets are encoded as positions in the successor list of a block:
//!
//! - a goto jumps to the last successor
//! - an `If` jumps to `successors[len - 2]` when taken and falls through to the last successor
//! - a switch stores explicit successor indices for its cases and its fallthrough
//! - catch targets always form a prefix of the successor list
//!
//! Every successor-list edit in `edges` rewrites these encodings in lock-step.

mod block;
mod builder;
mod catch;
mod cfg;
mod code;
mod config;
mod cursor;
mod edges;
mod ids;
mod inliner;
mod instruction;
mod liveness;
mod marking;
mod metadata;
mod phi;
mod position;
mod value;
mod verify;

pub use block::{BasicBlock, EdgeType};
pub use builder::SsaBuilder;
pub use catch::{CatchGuard, CatchHandlers};
pub use cfg::{BlockDominators, IrCfg};
pub use code::IrCode;
pub use config::IrOptions;
pub use cursor::{BlockCursor, InstructionCursor};
pub use ids::{BlockId, InstrId, ValueId};
pub use instruction::{BinopKind, IfCondition, Instruction, InstructionKind};
pub use liveness::LiveAtEntrySets;
pub use marking::MarkingScope;
pub use metadata::IrMetadata;
pub use phi::Phi;
pub use position::Position;
pub use value::{DebugLocalInfo, Value, ValueDefinition, ValueStorage, ValueType};
