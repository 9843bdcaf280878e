//! Global consistency checks.
//!
//! Each check walks the blocks in the order and fails with [`crate::Error::InvalidGraph`] at the
//! first violation, naming the offending entity. [`IrCode::is_consistent_ssa`] runs all of them
//! and is what [`IrCode::debug_check`] calls after every pass when verification is enabled.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    ir::{BlockId, InstructionKind, IrCode, ValueDefinition, ValueId},
    Result,
};

impl IrCode {
    /// Checks the graph shape and the SSA form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] for the first failed check.
    pub fn is_consistent_ssa(&self) -> Result<()> {
        self.is_consistent_graph()?;
        self.consistent_def_use_chains()?;
        self.valid_throwing_instructions()?;
        self.no_critical_edges()?;
        self.verify_no_imprecise_or_bottom_types()
    }

    /// Checks the graph shape: numbering, edges, catch handlers and instruction placement.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] for the first failed check.
    pub fn is_consistent_graph(&self) -> Result<()> {
        ensure_graph!(
            self.no_colors_in_use(),
            "marking colors {:#x} are still in use",
            self.used_marking_colors
        );
        self.consistent_block_numbering()?;
        self.consistent_predecessor_successors()?;
        self.consistent_catch_handlers()?;
        self.consistent_block_instructions()
    }

    /// Checks that block numbers are unique.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the duplicated number.
    pub fn consistent_block_numbering(&self) -> Result<()> {
        let mut seen: FxHashMap<i32, BlockId> = FxHashMap::default();
        for &block in &self.order {
            let number = self.block(block).number;
            if let Some(other) = seen.insert(number, block) {
                return Err(graph_error!(
                    "{} and {} share block number {}",
                    other,
                    block,
                    number
                ));
            }
        }
        Ok(())
    }

    /// Checks that edges are distinct, point into the order and are recorded on both sides.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the offending edge.
    pub fn consistent_predecessor_successors(&self) -> Result<()> {
        let in_order: FxHashSet<BlockId> = self.order.iter().copied().collect();
        for &block in &self.order {
            let b = self.block(block);
            let distinct: FxHashSet<BlockId> = b.successors.iter().copied().collect();
            ensure_graph!(
                distinct.len() == b.successors.len(),
                "{} has duplicate successors",
                block
            );
            for &succ in &b.successors {
                ensure_graph!(in_order.contains(&succ), "successor {} of {} was removed", succ, block);
                ensure_graph!(
                    self.block(succ).predecessors.contains(&block),
                    "{} is missing predecessor {}",
                    succ,
                    block
                );
            }

            let distinct: FxHashSet<BlockId> = b.predecessors.iter().copied().collect();
            ensure_graph!(
                distinct.len() == b.predecessors.len(),
                "{} has duplicate predecessors",
                block
            );
            for &pred in &b.predecessors {
                ensure_graph!(in_order.contains(&pred), "predecessor {} of {} was removed", pred, block);
                ensure_graph!(
                    self.block(pred).successors.contains(&block),
                    "{} is missing successor {}",
                    pred,
                    block
                );
            }
        }
        Ok(())
    }

    /// Checks the shape of every catch-handler table.
    ///
    /// A block with handlers ends in a goto or a throw, its guards are unique with a catch-all
    /// only in last place, and its catch targets are a prefix of the successors followed by at
    /// most one normal successor (none for a throw).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the offending block.
    pub fn consistent_catch_handlers(&self) -> Result<()> {
        for &block in &self.order {
            let b = self.block(block);
            if !b.has_catch_handlers() {
                continue;
            }
            let exit = self.exit_kind(block);
            ensure_graph!(
                exit.is_goto() || exit.is_throw(),
                "{} has catch handlers but exits with {}",
                block,
                exit.name()
            );

            let handlers = b.catch_handlers_with_indices();
            let guards = handlers.guards();
            for (i, guard) in guards.iter().enumerate() {
                ensure_graph!(
                    !guards[..i].contains(guard),
                    "{} has duplicate guard {}",
                    block,
                    guard
                );
                ensure_graph!(
                    !guard.is_catch_all() || i == guards.len() - 1,
                    "catch-all guard of {} is not last",
                    block
                );
            }

            let mut indices = handlers.unique_targets();
            indices.sort_unstable();
            let last_index = indices[indices.len() - 1];
            ensure_graph!(indices[0] == 0, "catch targets of {} do not start the successors", block);
            ensure_graph!(
                last_index < indices.len(),
                "catch targets of {} are not contiguous",
                block
            );
            let last_successor = b.successors.len() - 1;
            ensure_graph!(
                last_index == last_successor || last_index + 1 == last_successor,
                "{} has more than one normal successor besides its catch targets",
                block
            );
            ensure_graph!(
                last_index == last_successor || !exit.is_throw(),
                "throwing exit of {} has a normal successor",
                block
            );
        }
        Ok(())
    }

    /// Checks instruction placement and positions.
    ///
    /// Arguments may only start the first block, a debug-local read needs debug values, a
    /// move-exception must start its block and be entered through catch edges, and positions must
    /// satisfy [`crate::ir::Instruction::verify_valid_position_info`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the offending instruction.
    pub fn consistent_block_instructions(&self) -> Result<()> {
        let mut arguments_allowed = true;
        for &block in &self.order {
            for (index, &instr) in self.block(block).instructions.iter().enumerate() {
                let instruction = self.instruction(instr);
                ensure_graph!(
                    instruction.verify_valid_position_info(
                        self.options.debug,
                        self.options.all_throwing_instructions_have_positions
                    ),
                    "{} {} in {} has no valid position",
                    instruction.kind().name(),
                    instr,
                    block
                );
                ensure_graph!(
                    instruction.block() == Some(block),
                    "{} is listed in {} but points to {:?}",
                    instr,
                    block,
                    instruction.block()
                );
                let kind = instruction.kind();
                ensure_graph!(
                    !kind.is_argument() || arguments_allowed,
                    "argument {} in {} follows other instructions",
                    instr,
                    block
                );
                ensure_graph!(
                    !matches!(kind, InstructionKind::DebugLocalRead)
                        || !instruction.debug_values().is_empty(),
                    "debug-local read {} in {} reads nothing",
                    instr,
                    block
                );
                if kind.is_move_exception() {
                    ensure_graph!(index == 0, "move-exception {} does not start {}", instr, block);
                    for &pred in &self.block(block).predecessors {
                        ensure_graph!(
                            self.has_catch_successor(pred, block)
                                || (self.is_trivial_goto(pred)
                                    && self.end_of_goto_chain(pred) == Some(block)),
                            "handler {} is entered from {} without a catch edge",
                            block,
                            pred
                        );
                    }
                }
                if !kind.is_argument() {
                    arguments_allowed = false;
                }
            }
            arguments_allowed = false;
        }
        Ok(())
    }

    /// Checks that def-use links are symmetric and phis are well formed.
    ///
    /// Every phi has one operand per predecessor and is not trivial; every operand, input and
    /// debug value lists its reader; and every value reachable from the graph points back at its
    /// definition and only lists readers that actually read it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the offending value.
    pub fn consistent_def_use_chains(&self) -> Result<()> {
        let mut values: FxHashSet<ValueId> = FxHashSet::default();

        for &block in &self.order {
            let b = self.block(block);
            for &phi in &b.phis {
                let operands = self.phi_operands(phi);
                ensure_graph!(!self.is_trivial_phi(phi), "{} in {} is trivial", phi, block);
                ensure_graph!(
                    operands.len() == b.predecessors.len(),
                    "{} in {} has {} operands for {} predecessors",
                    phi,
                    block,
                    operands.len(),
                    b.predecessors.len()
                );
                values.insert(phi);
                for &operand in operands {
                    values.insert(operand);
                    ensure_graph!(
                        self.value(operand).phi_users().contains(&phi),
                        "{} does not list phi user {}",
                        operand,
                        phi
                    );
                    ensure_graph!(
                        !self.value(phi).has_local_info()
                            || self.value(phi).local_info() == self.value(operand).local_info(),
                        "{} and its operand {} are bound to different locals",
                        phi,
                        operand
                    );
                }
            }

            for &instr in &b.instructions {
                let instruction = self.instruction(instr);
                ensure_graph!(
                    instruction.block() == Some(block),
                    "{} is listed in {} but points elsewhere",
                    instr,
                    block
                );
                if let Some(out) = instruction.out_value() {
                    values.insert(out);
                    ensure_graph!(
                        self.value(out).defining_instruction() == Some(instr),
                        "{} is not defined by {}",
                        out,
                        instr
                    );
                }
                for &input in instruction.inputs() {
                    values.insert(input);
                    ensure_graph!(
                        self.value(input).users().contains(&instr),
                        "{} does not list user {}",
                        input,
                        instr
                    );
                }
                for &debug_value in instruction.debug_values() {
                    values.insert(debug_value);
                    ensure_graph!(
                        self.value(debug_value).debug_users().contains(&instr),
                        "{} does not list debug user {}",
                        debug_value,
                        instr
                    );
                }
            }
        }

        for value in values {
            self.verify_value(value)?;
            self.consistent_value_uses(value)?;
        }
        Ok(())
    }

    fn verify_value(&self, value: ValueId) -> Result<()> {
        match self.value(value).definition() {
            ValueDefinition::Phi(phi) => ensure_graph!(
                self.block(phi.block()).phis.contains(&value),
                "{} is not listed in its block {}",
                value,
                phi.block()
            ),
            ValueDefinition::Instruction(instr) => ensure_graph!(
                self.instruction(*instr).out_value() == Some(value),
                "{} is not the output of its definition {}",
                value,
                instr
            ),
            ValueDefinition::None => return Err(graph_error!("{} has no definition", value)),
            ValueDefinition::Removed => {
                return Err(graph_error!("{} is a removed phi but still used", value))
            }
        }
        Ok(())
    }

    fn consistent_value_uses(&self, value: ValueId) -> Result<()> {
        let v = self.value(value);
        for user in v.unique_users() {
            ensure_graph!(
                self.instruction(user).inputs().contains(&value),
                "user {} of {} does not read it",
                user,
                value
            );
        }
        for phi in v.unique_phi_users() {
            ensure_graph!(
                self.phi_operands(phi).contains(&value),
                "phi user {} of {} does not read it",
                phi,
                value
            );
            let block = self.value(phi).phi().map(|p| p.block());
            ensure_graph!(
                block.is_some_and(|block| self.block(block).phis.contains(&phi)),
                "phi user {} of {} is not in its block",
                phi,
                value
            );
        }
        if v.has_local_info() {
            for &user in v.debug_users() {
                ensure_graph!(
                    self.instruction(user).debug_values().contains(&value),
                    "debug user {} of {} does not keep it alive",
                    user,
                    value
                );
            }
        }
        Ok(())
    }

    /// Checks exceptional edges: catch targets have a single predecessor, and a block with
    /// handlers holds at most one throwing instruction, followed only by debug instructions,
    /// constants, stack bookkeeping and the final jump.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the offending block.
    pub fn valid_throwing_instructions(&self) -> Result<()> {
        for &block in &self.order {
            if !self.block(block).has_catch_handlers() {
                continue;
            }
            for handler in self.catch_handlers(block).unique_targets() {
                ensure_graph!(
                    self.block(handler).predecessors.len() == 1,
                    "catch target {} of {} has several predecessors",
                    handler,
                    block
                );
            }
            let mut seen_throwing = false;
            for &instr in &self.block(block).instructions {
                let kind = self.instruction(instr).kind();
                if kind.can_throw() {
                    ensure_graph!(
                        !seen_throwing,
                        "{} has catch handlers and several throwing instructions",
                        block
                    );
                    seen_throwing = true;
                    continue;
                }
                if seen_throwing {
                    ensure_graph!(
                        kind.is_debug()
                            || kind.is_jump()
                            || kind.is_const()
                            || kind.is_store()
                            || kind.is_pop(),
                        "{} {} follows the throwing instruction of {}",
                        kind.name(),
                        instr,
                        block
                    );
                }
            }
        }
        Ok(())
    }

    /// Checks that every block with several predecessors is entered only from blocks with a
    /// single normal exit, and is not a catch handler.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the critical edge.
    pub fn no_critical_edges(&self) -> Result<()> {
        for &block in &self.order {
            let b = self.block(block);
            if b.predecessors.len() <= 1 {
                continue;
            }
            ensure_graph!(
                b.is_empty() || !self.instruction(b.entry()).kind().is_move_exception(),
                "catch handler {} has several predecessors",
                block
            );
            for &pred in &b.predecessors {
                ensure_graph!(
                    self.has_one_normal_exit(pred),
                    "critical edge {} -> {}",
                    pred,
                    block
                );
            }
        }
        Ok(())
    }

    /// Checks that no value in the graph has an imprecise or bottom type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] naming the offending value.
    pub fn verify_no_imprecise_or_bottom_types(&self) -> Result<()> {
        for &block in &self.order {
            let b = self.block(block);
            let outputs = b
                .instructions
                .iter()
                .filter_map(|&instr| self.instruction(instr).out_value());
            for value in b.phis.iter().copied().chain(outputs) {
                let ty = self.value(value).ty();
                ensure_graph!(!ty.is_bottom(), "{} has bottom type", value);
                ensure_graph!(ty.is_precise(), "{} has imprecise type {}", value, ty);
            }
        }
        Ok(())
    }
}
