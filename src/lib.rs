// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! # irscope
//!
//! A mutable, SSA-form control-flow-graph intermediate representation for ahead-of-time
//! bytecode optimizers. `irscope` owns the graph substrate of a single compiled unit (one
//! method body) together with the algorithms that construct, mutate, and verify it.
//!
//! # Architecture
//!
//! The crate is organized as a small set of layers, leaves first:
//!
//! - **Values and phis** ([`ir::Value`], [`ir::Phi`]) - SSA names with def-use bookkeeping
//! - **Instructions** ([`ir::Instruction`], [`ir::InstructionKind`]) - a closed set of instruction
//!   kinds with ordered inputs, at most one output, debug values and a source position
//! - **Basic blocks** ([`ir::BasicBlock`]) - instruction streams, edges, catch-handler tables and
//!   the filled/sealed SSA construction state
//! - **Graph container** ([`ir::IrCode`]) - arenas, numbering, marking colors, liveness and the
//!   global consistency checks
//! - **Mutation protocol** ([`ir::InstructionCursor`], [`ir::BlockCursor`]) - the sanctioned way
//!   to insert, remove, replace, split and inline
//!
//! All graph entities live in per-unit arenas and are addressed by small integer handles
//! ([`ir::ValueId`], [`ir::InstrId`], [`ir::BlockId`]). Back-pointers such as
//! instruction-to-block or value-to-definition are plain handle fields, so the cyclic structure of
//! a CFG never fights the borrow checker.
//!
//! # Usage
//!
//! ```rust
//! use irscope::prelude::*;
//!
//! let mut code = IrCode::new(IrOptions::testing());
//! let mut builder = SsaBuilder::new(&mut code);
//!
//! let entry = builder.new_block();
//! let left = builder.new_block();
//! let right = builder.new_block();
//! let join = builder.new_block();
//! builder.add_edge(entry, left);
//! builder.add_edge(entry, right);
//! builder.add_edge(left, join);
//! builder.add_edge(right, join);
//!
//! builder.set_current_block(entry);
//! let cond = builder.add_argument(0, ValueType::Int);
//! builder.add_if(IfCondition::Eqz, &[cond])?;
//!
//! builder.set_current_block(left);
//! builder.add_const(1, 1, ValueType::Int);
//! builder.add_goto()?;
//!
//! builder.set_current_block(right);
//! builder.add_const(1, 2, ValueType::Int);
//! builder.add_goto()?;
//!
//! builder.set_current_block(join);
//! let merged = builder.read_register(1, ValueType::Int)?;
//! builder.add_return(Some(merged))?;
//! builder.build()?;
//!
//! assert!(code.value(merged).is_phi());
//! # Ok::<(), irscope::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Malformed input (an SSA value read before any definition reaches it, a catch handler entered
//! through normal control flow) is reported through [`Error`] and aborts only the affected unit.
//! Violations of graph invariants by a calling pass are programming errors and panic.
//!
//! # Thread Safety
//!
//! An [`ir::IrCode`] is owned and mutated by exactly one worker. All types are `Send`, so
//! independent units can be processed on independent threads.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
#![deny(unsafe_code)]

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use irscope::prelude::*;
///
/// let code = IrCode::new(IrOptions::default());
/// assert!(code.blocks().is_empty());
/// ```
pub mod prelude;

/// The SSA control-flow-graph IR.
///
/// This module contains the value, instruction, block and graph types together with the
/// mutation protocol, SSA construction, liveness and consistency checks.
///
/// # Key Types
///
/// - [`ir::IrCode`] - The graph container for one compiled unit
/// - [`ir::BasicBlock`] - A basic block with edges and catch handlers
/// - [`ir::SsaBuilder`] - Incremental SSA construction driver
/// - [`ir::InstructionCursor`] - Instruction-level mutation protocol
pub mod ir;

/// Generic utilities shared by the IR (bit sets and directed-graph algorithms).
pub mod utils;

/// `irscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `irscope` Error type
///
/// The main error type for all operations in this crate. Compilation errors abort a single unit;
/// consistency-check failures carry the source location of the failed check.
///
/// # Examples
///
/// ```rust
/// use irscope::Error;
///
/// fn describe(err: &Error) -> &'static str {
///     match err {
///         Error::UndefinedValue { .. } => "undefined value",
///         Error::InvalidGraph { .. } => "inconsistent graph",
///         _ => "other",
///     }
/// }
/// ```
pub use error::Error;

/// Options controlling verification and debug-info handling of an [`ir::IrCode`].
pub use ir::IrOptions;
