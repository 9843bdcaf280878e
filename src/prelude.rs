//! # irscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the irscope
//! library. Import it to build, mutate and verify graphs without spelling out module paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all irscope operations
pub use crate::Error;

/// The result type used throughout irscope
pub use crate::Result;

/// Verification and debug-info configuration of a unit
pub use crate::ir::IrOptions;

// ================================================================================================
// Graph Container and Entities
// ================================================================================================

/// The graph of one compiled unit
pub use crate::ir::IrCode;

/// Arena handles
pub use crate::ir::{BlockId, InstrId, ValueId};

/// Blocks and catch handlers
pub use crate::ir::{BasicBlock, CatchGuard, CatchHandlers, EdgeType};

/// Instructions
pub use crate::ir::{BinopKind, IfCondition, Instruction, InstructionKind};

/// Values and phis
pub use crate::ir::{DebugLocalInfo, Phi, Value, ValueDefinition, ValueStorage, ValueType};

/// Source positions and the "may contain" summary
pub use crate::ir::{IrMetadata, Position};

// ================================================================================================
// Construction, Mutation and Analysis
// ================================================================================================

/// Incremental SSA construction
pub use crate::ir::SsaBuilder;

/// The mutation protocol
pub use crate::ir::{BlockCursor, InstructionCursor};

/// Marking colors held for a scope
pub use crate::ir::MarkingScope;

/// Dominance and liveness
pub use crate::ir::{BlockDominators, LiveAtEntrySets};
