//! SSA construction.
//!
//! Blocks move through the construction states *open*, *filled* and *sealed*. An open block
//! accepts instructions at its end; closing it marks it filled. A block is sealed once every
//! predecessor is filled, which is tracked by counting unfilled predecessors as edges are added
//! and predecessors are closed.
//!
//! Register reads follow Braun et al.: a read in a block without a local definition walks single
//! predecessor chains iteratively, and creates a phi where control flow merges. In an unsealed
//! block the phi stays *incomplete* until sealing fills in one operand per predecessor. Trivial
//! phis are collapsed as soon as their operands are known.
//!
//! Writes by throwing instructions keep the previous definition of the register available to
//! catch successors under the register `-(r + 1)`, because the new value is not defined on the
//! exceptional edge.
//!
//! # Example
//!
//! ```rust
//! use irscope::ir::{IrCode, IrOptions, SsaBuilder, ValueType};
//!
//! let mut code = IrCode::new(IrOptions::testing());
//! let mut builder = SsaBuilder::new(&mut code);
//! let entry = builder.new_block();
//! builder.set_current_block(entry);
//! let x = builder.add_const(0, 42, ValueType::Int);
//! assert_eq!(builder.read_register(0, ValueType::Int)?, x);
//! builder.add_return(Some(x))?;
//! builder.build()?;
//! # Ok::<(), irscope::Error>(())
//! ```

use crate::{
    ir::{
        BinopKind, BlockId, CatchGuard, EdgeType, IfCondition, InstructionKind, IrCode, Position,
        ValueId, ValueType,
    },
    Error, Result,
};

/// Maps a register to the slot holding its value on the exceptional edge.
fn on_throw_register(register: i32) -> i32 {
    -(register + 1)
}

impl IrCode {
    /// Records one more predecessor that has not been filled yet.
    pub fn increment_unfilled_predecessor_count(&mut self, block: BlockId) {
        let b = &mut self.blocks[block.index()];
        b.unfilled_predecessors_count += 1;
        b.estimated_predecessors_count += 1;
    }

    /// Forgets `n` predecessors that will never be filled.
    pub fn decrement_unfilled_predecessor_count(&mut self, block: BlockId, n: usize) {
        let b = &mut self.blocks[block.index()];
        assert!(b.unfilled_predecessors_count >= n, "{} has fewer unfilled predecessors", block);
        b.unfilled_predecessors_count -= n;
        b.estimated_predecessors_count -= n;
    }

    fn on_throw_value(&self, block: BlockId, register: i32, edge: EdgeType) -> Option<Option<ValueId>> {
        if edge != EdgeType::Exceptional {
            return None;
        }
        self.block(block)
            .current_definitions
            .as_ref()
            .and_then(|defs| defs.get(&on_throw_register(register)).copied())
    }

    /// Returns the value of `register` at the end of `block` as seen along `edge`.
    ///
    /// Catch successors see the value the register had before the throwing instruction that
    /// last wrote it.
    #[must_use]
    pub fn read_current_definition(
        &self,
        block: BlockId,
        register: i32,
        edge: EdgeType,
    ) -> Option<ValueId> {
        if let Some(on_throw) = self.on_throw_value(block, register, edge) {
            return on_throw;
        }
        self.block(block)
            .current_definitions
            .as_ref()
            .and_then(|defs| defs.get(&register).copied().flatten())
    }

    /// Sets the current definition of `register` in `block`.
    ///
    /// A write along an exceptional edge that shadows a throwing write updates the on-throw slot.
    pub fn update_current_definition(
        &mut self,
        block: BlockId,
        register: i32,
        value: ValueId,
        edge: EdgeType,
    ) {
        let register = if self.on_throw_value(block, register, edge).is_some() {
            on_throw_register(register)
        } else {
            register
        };
        self.set_current_definition(block, register, Some(value));
    }

    /// Sets the current definition of `register`. If `can_throw`, the previous definition stays
    /// visible to catch successors.
    pub fn write_current_definition(
        &mut self,
        block: BlockId,
        register: i32,
        value: ValueId,
        can_throw: bool,
    ) {
        if can_throw {
            let previous = self.read_current_definition(block, register, EdgeType::NonEdge);
            self.set_current_definition(block, on_throw_register(register), previous);
        }
        self.update_current_definition(block, register, value, EdgeType::NonEdge);
    }

    fn set_current_definition(&mut self, block: BlockId, register: i32, value: Option<ValueId>) {
        let Some(defs) = self.blocks[block.index()].current_definitions.as_mut() else {
            panic!("{} is not under construction", block);
        };
        let previous = defs.insert(register, value).flatten();
        let still_defined = previous.is_some_and(|p| defs.values().any(|&v| v == Some(p)));

        if let Some(value) = value {
            if let Some(phi) = self.values[value.index()].phi_mut() {
                if !phi.definition_users.contains(&block) {
                    phi.definition_users.push(block);
                }
            }
        }
        if let Some(previous) = previous {
            if !still_defined {
                if let Some(phi) = self.values[previous.index()].phi_mut() {
                    phi.definition_users.retain(|&b| b != block);
                }
            }
        }
    }

    /// Replaces every current definition of `old` in `block` with `new`.
    pub(crate) fn replace_current_definitions(&mut self, block: BlockId, old: ValueId, new: ValueId) {
        let Some(defs) = self.blocks[block.index()].current_definitions.as_mut() else {
            return;
        };
        let mut replaced = false;
        for value in defs.values_mut() {
            if *value == Some(old) {
                *value = Some(new);
                replaced = true;
            }
        }
        if !replaced {
            return;
        }
        if let Some(phi) = self.values[old.index()].phi_mut() {
            phi.definition_users.retain(|&b| b != block);
        }
        if let Some(phi) = self.values[new.index()].phi_mut() {
            if !phi.definition_users.contains(&block) {
                phi.definition_users.push(block);
            }
        }
    }

    /// Registers a phi of an unsealed block that is completed when the block is sealed.
    pub fn add_incomplete_phi(&mut self, block: BlockId, register: i32, phi: ValueId, edge: EdgeType) {
        let register = if self.on_throw_value(block, register, edge).is_some() {
            on_throw_register(register)
        } else {
            register
        };
        let previous = self.blocks[block.index()].incomplete_phis.insert(register, phi);
        debug_assert!(previous.is_none(), "{} already has an incomplete phi for r{}", block, register);
    }

    /// Drops the construction state of `block`.
    pub fn clear_current_definitions(&mut self, block: BlockId) {
        self.blocks[block.index()].current_definitions = None;
        for phi in self.blocks[block.index()].phis.clone() {
            if let Some(data) = self.values[phi.index()].phi_mut() {
                data.definition_users.clear();
            }
        }
    }
}

/// A phi whose operands are being read, one predecessor at a time.
struct PendingPhi {
    phi: ValueId,
    block: BlockId,
    register: i32,
    operands: Vec<ValueId>,
}

impl PendingPhi {
    fn new(phi: ValueId, block: BlockId, register: i32) -> Self {
        Self {
            phi,
            block,
            register,
            operands: Vec::new(),
        }
    }
}

/// Drives SSA construction of an [`IrCode`].
///
/// Edges into a block must be added before the predecessor is closed. Reads of a register that
/// no definition reaches fail with [`Error::UndefinedValue`].
pub struct SsaBuilder<'a> {
    code: &'a mut IrCode,
    current: Option<BlockId>,
    arguments: usize,
    position: Position,
    /// Phis of sealed blocks still waiting for their operands, innermost last.
    pending_phis: Vec<PendingPhi>,
}

impl<'a> SsaBuilder<'a> {
    /// Creates a builder appending to `code`.
    pub fn new(code: &'a mut IrCode) -> Self {
        let arguments = code.collect_arguments(false).len();
        Self {
            code,
            current: None,
            arguments,
            position: Position::none(),
            pending_phis: Vec::new(),
        }
    }

    /// Sets the source position given to the instructions added from now on.
    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Returns the graph under construction.
    #[must_use]
    pub fn code(&self) -> &IrCode {
        self.code
    }

    /// Creates an open block at the end of the block order. The first block is the entry.
    pub fn new_block(&mut self) -> BlockId {
        let block = self.code.create_block();
        self.code.blocks[block.index()].current_definitions = Some(Default::default());
        self.code.push_block(block);
        block
    }

    /// Adds a normal edge. Edges leaving a block keep the order in which they were added.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        debug_assert!(!self.code.block(from).filled, "{} is already closed", from);
        self.code.link(from, to);
        self.code.increment_unfilled_predecessor_count(to);
    }

    /// Adds a catch edge from `from` to `handler`, guarded by `guard`.
    pub fn add_catch_edge(&mut self, from: BlockId, handler: BlockId, guard: CatchGuard) {
        debug_assert!(!self.code.block(from).filled, "{} is already closed", from);
        let existing = self.code.catch_handlers(from);
        assert!(
            !existing.contains_guard(&guard),
            "{} already handles {}",
            from,
            guard
        );
        let mut guards: Vec<CatchGuard> = existing.guards().to_vec();
        let mut targets: Vec<BlockId> = existing.all_targets().to_vec();
        guards.push(guard);
        targets.push(handler);
        let newly_linked = !self.code.block(from).successors.contains(&handler);
        self.code.link_catch_successors(from, guards, &targets);
        if newly_linked {
            self.code.increment_unfilled_predecessor_count(handler);
        }
    }

    /// Makes `block` the block receiving instructions.
    pub fn set_current_block(&mut self, block: BlockId) {
        debug_assert!(!self.code.block(block).filled, "{} is already closed", block);
        self.current = Some(block);
    }

    /// Returns the block receiving instructions.
    ///
    /// # Panics
    ///
    /// Panics if no block is current.
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        match self.current {
            Some(block) => block,
            None => panic!("no current block"),
        }
    }

    /// Appends an instruction to the current block.
    ///
    /// With an `output`, a fresh value of the given type is created and written to the register.
    pub fn add_instruction(
        &mut self,
        kind: InstructionKind,
        inputs: &[ValueId],
        output: Option<(i32, ValueType)>,
    ) -> Option<ValueId> {
        let block = self.current_block();
        let can_throw = kind.can_throw();
        let out = output.map(|(_, ty)| self.code.create_value(ty, None));
        let instr = self.code.create_instruction(kind, inputs.to_vec(), out);
        self.code.set_position(instr, self.position.clone());
        self.code.append_instruction(block, instr);
        if let (Some((register, _)), Some(out)) = (output, out) {
            self.code.write_current_definition(block, register, out, can_throw);
        }
        out
    }

    /// Binds the next parameter to `register`.
    pub fn add_argument(&mut self, register: i32, ty: ValueType) -> ValueId {
        let index = self.arguments;
        self.arguments += 1;
        let value = self.add_instruction(InstructionKind::Argument { index }, &[], Some((register, ty)));
        match value {
            Some(value) => value,
            None => unreachable!("arguments always define a value"),
        }
    }

    /// Binds the receiver to `register`.
    pub fn add_this_argument(&mut self, register: i32) -> ValueId {
        let value = self.add_argument(register, ValueType::Reference);
        self.code.mark_this(value);
        value
    }

    /// Writes a numeric constant to `register`.
    pub fn add_const(&mut self, register: i32, value: i64, ty: ValueType) -> ValueId {
        match self.add_instruction(InstructionKind::ConstNumber(value), &[], Some((register, ty))) {
            Some(value) => value,
            None => unreachable!("constants always define a value"),
        }
    }

    /// Writes the result of `lhs op rhs` to `register`.
    pub fn add_binop(
        &mut self,
        op: BinopKind,
        register: i32,
        lhs: ValueId,
        rhs: ValueId,
        ty: ValueType,
    ) -> ValueId {
        match self.add_instruction(InstructionKind::Binop(op), &[lhs, rhs], Some((register, ty))) {
            Some(value) => value,
            None => unreachable!("binops always define a value"),
        }
    }

    /// Calls `method`, writing the result to a register if given.
    pub fn add_invoke(
        &mut self,
        method: impl Into<String>,
        arguments: &[ValueId],
        result: Option<(i32, ValueType)>,
    ) -> Option<ValueId> {
        self.add_instruction(
            InstructionKind::Invoke {
                method: method.into(),
            },
            arguments,
            result,
        )
    }

    /// Receives the caught exception into `register`; must start a catch handler.
    pub fn add_move_exception(&mut self, register: i32) -> ValueId {
        debug_assert!(self.code.block(self.current_block()).instructions.is_empty());
        let value = self.add_instruction(
            InstructionKind::MoveException,
            &[],
            Some((register, ValueType::Reference)),
        );
        match value {
            Some(value) => {
                self.code.mark_never_null(value);
                value
            }
            None => unreachable!("move-exception always defines a value"),
        }
    }

    /// Makes `value` the current definition of `register`.
    pub fn write_register(&mut self, register: i32, value: ValueId) {
        let block = self.current_block();
        self.code.write_current_definition(block, register, value, false);
    }

    /// Reads `register` in the current block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedValue`] if no definition of the register reaches the block.
    pub fn read_register(&mut self, register: i32, ty: ValueType) -> Result<ValueId> {
        let block = self.current_block();
        self.read_register_in(block, register, ty, EdgeType::NonEdge)
    }

    fn read_register_in(
        &mut self,
        block: BlockId,
        register: i32,
        ty: ValueType,
        edge: EdgeType,
    ) -> Result<ValueId> {
        if let Some(value) = self.code.read_current_definition(block, register, edge) {
            return Ok(value);
        }
        let value = self.resolve_register(block, register, ty, edge)?;
        self.complete_pending_phis()?;
        // Completion may have collapsed the phi that `value` names.
        Ok(self
            .code
            .read_current_definition(block, register, edge)
            .unwrap_or(value))
    }

    /// Finds the value of `register` on entry to `block` without completing any phi.
    ///
    /// Single-predecessor chains are walked in place. The first merge point without a definition
    /// gets a fresh phi, which is queued on `pending_phis` when its block is sealed.
    fn resolve_register(
        &mut self,
        mut block: BlockId,
        register: i32,
        ty: ValueType,
        mut edge: EdgeType,
    ) -> Result<ValueId> {
        let mut chain = Vec::new();
        let mut found = self.code.read_current_definition(block, register, edge);
        while found.is_none()
            && self.code.block(block).sealed
            && self.code.block(block).predecessors.len() == 1
        {
            let pred = self.code.block(block).predecessors[0];
            let pred_edge = self.code.edge_type(pred, block);
            chain.push((block, edge));
            found = self.code.read_current_definition(pred, register, pred_edge);
            block = pred;
            edge = pred_edge;
        }

        let value = match found {
            Some(value) => value,
            None => {
                let phi = self.create_phi_for_read(block, register, ty, edge)?;
                self.code.update_current_definition(block, register, phi, edge);
                phi
            }
        };
        for (b, e) in chain {
            self.code.update_current_definition(b, register, value, e);
        }
        Ok(value)
    }

    fn create_phi_for_read(
        &mut self,
        block: BlockId,
        register: i32,
        ty: ValueType,
        edge: EdgeType,
    ) -> Result<ValueId> {
        let b = self.code.block(block);
        if b.predecessors.is_empty() && b.unfilled_predecessors_count == 0 {
            // Nothing can ever flow into a block without predecessors.
            return Err(Error::UndefinedValue {
                phi: self.code.value_count(),
                block,
            });
        }
        let phi = self.code.create_phi(block, ty, None);
        if self.code.block(block).sealed {
            self.pending_phis.push(PendingPhi::new(phi, block, register));
        } else {
            self.code.add_incomplete_phi(block, register, phi, edge);
        }
        Ok(phi)
    }

    /// Gives every queued phi its operands.
    ///
    /// The queue is a stack of phis being completed. Reading an operand may queue a phi at a
    /// further merge point; that phi is completed first and the operand is read again, so a
    /// collapse is visible before the waiting phi receives it. The depth of the graph never
    /// turns into call depth.
    fn complete_pending_phis(&mut self) -> Result<()> {
        while let Some(top) = self.pending_phis.last() {
            let (phi, block, register) = (top.phi, top.block, top.register);
            let next = top.operands.len();
            match self.code.block(block).predecessors.get(next).copied() {
                Some(pred) => {
                    let edge = self.code.edge_type(pred, block);
                    let ty = self.code.value(phi).ty();
                    let depth = self.pending_phis.len();
                    let value = self.resolve_register(pred, register, ty, edge)?;
                    if self.pending_phis.len() == depth {
                        self.pending_phis[depth - 1].operands.push(value);
                    }
                }
                None => {
                    if let Some(done) = self.pending_phis.pop() {
                        self.code.add_phi_operands(done.phi, done.operands, true)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Notes that one predecessor of `block` was filled; seals `block` when it was the last one.
    fn filled_predecessor(&mut self, block: BlockId) -> Result<()> {
        let b = &mut self.code.blocks[block.index()];
        assert!(b.unfilled_predecessors_count > 0, "{} has no unfilled predecessors", block);
        b.unfilled_predecessors_count -= 1;
        if b.unfilled_predecessors_count == 0 {
            debug_assert_eq!(b.estimated_predecessors_count, b.predecessors.len());
            self.seal(block)?;
        }
        Ok(())
    }

    fn seal(&mut self, block: BlockId) -> Result<()> {
        while let Some((register, phi)) = self.code.blocks[block.index()].incomplete_phis.pop_first()
        {
            let register = if register < 0 {
                on_throw_register(register)
            } else {
                register
            };
            self.pending_phis.push(PendingPhi::new(phi, block, register));
        }
        self.code.blocks[block.index()].sealed = true;
        self.complete_pending_phis()
    }

    /// Marks `block` filled and notifies its successors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedValue`] if sealing a successor completes a phi that no
    /// definition reaches.
    pub fn close(&mut self, block: BlockId) -> Result<()> {
        let b = self.code.block(block);
        assert!(!b.filled, "{} is already closed", block);
        assert!(!b.instructions.is_empty(), "cannot close empty {}", block);
        assert!(self.code.exit_kind(block).is_jump(), "{} does not end in a jump", block);
        let b = &mut self.code.blocks[block.index()];
        b.filled = true;
        if b.unfilled_predecessors_count == 0 && !b.sealed {
            self.seal(block)?;
        }
        for successor in self.code.block(block).successors.clone() {
            self.filled_predecessor(successor)?;
        }
        if self.current == Some(block) {
            self.current = None;
        }
        Ok(())
    }

    /// Closes the current block.
    ///
    /// # Errors
    ///
    /// See [`SsaBuilder::close`].
    pub fn close_current_block(&mut self) -> Result<()> {
        let block = self.current_block();
        self.close(block)
    }

    /// Ends the current block with a goto to its single normal successor.
    ///
    /// # Errors
    ///
    /// See [`SsaBuilder::close`].
    pub fn add_goto(&mut self) -> Result<()> {
        self.add_instruction(InstructionKind::Goto, &[], None);
        self.close_current_block()
    }

    /// Ends the current block with a conditional jump. The first normal successor is the taken
    /// target, the second the fallthrough.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockStructure`] if the operand count does not match the
    /// condition, otherwise see [`SsaBuilder::close`].
    pub fn add_if(&mut self, condition: IfCondition, inputs: &[ValueId]) -> Result<()> {
        if inputs.len() != condition.arity() {
            return Err(Error::InvalidBlockStructure(format!(
                "{} expects {} operands, got {}",
                condition,
                condition.arity(),
                inputs.len()
            )));
        }
        self.add_instruction(InstructionKind::If(condition), inputs, None);
        self.close_current_block()
    }

    /// Ends the current block with a switch on `key`.
    ///
    /// `targets` and `fallthrough` are indices into the successor list of the block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockStructure`] if keys and targets differ in length, otherwise
    /// see [`SsaBuilder::close`].
    pub fn add_switch(
        &mut self,
        key: ValueId,
        keys: Vec<i32>,
        targets: Vec<usize>,
        fallthrough: usize,
    ) -> Result<()> {
        if keys.len() != targets.len() {
            return Err(Error::InvalidBlockStructure(format!(
                "switch has {} keys but {} targets",
                keys.len(),
                targets.len()
            )));
        }
        self.add_instruction(
            InstructionKind::Switch {
                keys,
                target_indices: targets,
                fallthrough_index: fallthrough,
            },
            &[key],
            None,
        );
        self.close_current_block()
    }

    /// Ends the current block with a return.
    ///
    /// # Errors
    ///
    /// See [`SsaBuilder::close`].
    pub fn add_return(&mut self, value: Option<ValueId>) -> Result<()> {
        let inputs: Vec<ValueId> = value.into_iter().collect();
        self.add_instruction(InstructionKind::Return, &inputs, None);
        self.close_current_block()
    }

    /// Ends the current block by throwing `exception`.
    ///
    /// # Errors
    ///
    /// See [`SsaBuilder::close`].
    pub fn add_throw(&mut self, exception: ValueId) -> Result<()> {
        self.add_instruction(InstructionKind::Throw, &[exception], None);
        self.close_current_block()
    }

    /// Finishes construction.
    ///
    /// Drops the construction state, collapses remaining trivial phis and splits critical edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockStructure`] if a block is not filled or not sealed,
    /// [`Error::UndefinedValue`] if a remaining phi has no defined operand, and
    /// [`Error::InvalidGraph`] if verification is enabled and the graph is inconsistent.
    pub fn build(self) -> Result<()> {
        let code = self.code;
        for &block in &code.order {
            let b = code.block(block);
            if !b.filled || !b.sealed {
                return Err(Error::InvalidBlockStructure(format!(
                    "{} is not {} at the end of construction",
                    block,
                    if b.filled { "sealed" } else { "filled" }
                )));
            }
            debug_assert!(!b.has_incomplete_phis());
        }
        for block in code.order.clone() {
            code.clear_current_definitions(block);
        }
        code.remove_all_trivial_phis()?;
        code.split_critical_edges();
        code.update_all_throwing_instructions_have_positions();
        code.debug_check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrOptions;

    #[test]
    fn test_straight_line_read() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let next = builder.new_block();
        builder.add_edge(entry, next);

        builder.set_current_block(entry);
        let x = builder.add_const(3, 7, ValueType::Int);
        builder.add_goto().unwrap();

        builder.set_current_block(next);
        assert_eq!(builder.read_register(3, ValueType::Int).unwrap(), x);
        builder.add_return(Some(x)).unwrap();
        builder.build().unwrap();
        assert!(code.block(next).phis().is_empty());
    }

    #[test]
    fn test_undefined_read_in_entry() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        builder.set_current_block(entry);
        assert!(matches!(
            builder.read_register(0, ValueType::Int),
            Err(Error::UndefinedValue { .. })
        ));
    }

    #[test]
    fn test_loop_phi_is_completed_on_seal() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let header = builder.new_block();
        let body = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, header);
        builder.add_edge(header, body);
        builder.add_edge(header, exit);
        builder.add_edge(body, header);

        builder.set_current_block(entry);
        let zero = builder.add_const(0, 0, ValueType::Int);
        builder.add_goto().unwrap();

        builder.set_current_block(header);
        let i = builder.read_register(0, ValueType::Int).unwrap();
        assert!(builder.code().value(i).is_phi());
        builder.add_if(IfCondition::Eqz, &[i]).unwrap();

        builder.set_current_block(body);
        let one = builder.add_const(1, 1, ValueType::Int);
        let current = builder.read_register(0, ValueType::Int).unwrap();
        builder.add_binop(BinopKind::Add, 0, current, one, ValueType::Int);
        builder.add_goto().unwrap();

        builder.set_current_block(exit);
        builder.add_return(None).unwrap();
        builder.build().unwrap();

        let phi_operands = code.phi_operands(i);
        assert_eq!(phi_operands.len(), 2);
        assert_eq!(phi_operands[0], zero);
        assert_ne!(phi_operands[1], zero);
    }

    #[test]
    fn test_loop_without_redefinition_collapses() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let header = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, header);
        builder.add_edge(header, header);
        builder.add_edge(header, exit);

        builder.set_current_block(entry);
        let x = builder.add_const(0, 5, ValueType::Int);
        builder.add_goto().unwrap();

        builder.set_current_block(header);
        let read = builder.read_register(0, ValueType::Int).unwrap();
        builder.add_if(IfCondition::Nez, &[read]).unwrap();

        builder.set_current_block(exit);
        let after = builder.read_register(0, ValueType::Int).unwrap();
        builder.add_return(Some(after)).unwrap();
        builder.build().unwrap();

        // phi(x, phi) is trivial once the back edge is known.
        assert!(code.value(read).is_removed());
        assert_eq!(after, x);
        let branch = code.block(header).exit();
        assert_eq!(code.instruction(branch).inputs(), &[x]);

        // The self loop was a critical edge and got a trampoline.
        let trampoline = code.block(header).successors()[0];
        assert_ne!(trampoline, header);
        assert_eq!(code.block(header).predecessors(), &[entry, trampoline]);
    }

    #[test]
    fn test_dropped_predecessor_seals_block() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, exit);
        // An edge that was announced but will never be added.
        builder.code.increment_unfilled_predecessor_count(exit);

        builder.set_current_block(entry);
        builder.add_goto().unwrap();
        assert!(!builder.code().block(exit).is_sealed());

        builder.code.decrement_unfilled_predecessor_count(exit, 1);
        builder.set_current_block(exit);
        builder.add_return(None).unwrap();
        assert!(builder.code().block(exit).is_sealed());
        builder.build().unwrap();
    }

    #[test]
    fn test_catch_handler_sees_value_before_throwing_write() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let call = builder.new_block();
        let handler = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, call);
        builder.add_catch_edge(call, handler, CatchGuard::CatchAll);
        builder.add_edge(call, exit);

        builder.set_current_block(entry);
        let before = builder.add_const(0, 1, ValueType::Int);
        builder.add_goto().unwrap();

        builder.set_current_block(call);
        let result = builder
            .add_invoke("f", &[], Some((0, ValueType::Int)))
            .unwrap();
        builder.add_goto().unwrap();

        builder.set_current_block(handler);
        builder.add_move_exception(1);
        let seen = builder.read_register(0, ValueType::Int).unwrap();
        builder.add_return(Some(seen)).unwrap();

        builder.set_current_block(exit);
        let after = builder.read_register(0, ValueType::Int).unwrap();
        builder.add_return(Some(after)).unwrap();
        builder.build().unwrap();

        assert_eq!(seen, before);
        assert_eq!(after, result);
        assert_eq!(code.block(call).successors(), &[handler, exit]);
    }

    #[test]
    fn test_unclosed_block_fails_build() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let dangling = builder.new_block();
        builder.set_current_block(entry);
        builder.add_return(None).unwrap();
        let _ = dangling;
        assert!(matches!(
            builder.build(),
            Err(Error::InvalidBlockStructure(_))
        ));
    }

    /// `rungs` if/else blocks in sequence. Register 1 is written in the entry and, when
    /// `redefine_first` is set, again in the right arm of the first rung. Nothing reads it before
    /// the final block.
    fn sequential_diamonds(code: &mut IrCode, rungs: usize, redefine_first: bool) -> [ValueId; 3] {
        let mut builder = SsaBuilder::new(code);
        let entry = builder.new_block();
        builder.set_current_block(entry);
        let flag = builder.add_argument(0, ValueType::Int);
        let x = builder.add_const(1, 1, ValueType::Int);
        let mut redefined = x;

        let mut current = entry;
        for rung in 0..rungs {
            let left = builder.new_block();
            let right = builder.new_block();
            let join = builder.new_block();
            builder.add_edge(current, left);
            builder.add_edge(current, right);
            builder.add_edge(left, join);
            builder.add_edge(right, join);
            builder.add_if(IfCondition::Eqz, &[flag]).unwrap();

            builder.set_current_block(left);
            builder.add_goto().unwrap();
            builder.set_current_block(right);
            if rung == 0 && redefine_first {
                redefined = builder.add_const(1, 2, ValueType::Int);
            }
            builder.add_goto().unwrap();
            builder.set_current_block(join);
            current = join;
        }
        let result = builder.read_register(1, ValueType::Int).unwrap();
        builder.add_return(Some(result)).unwrap();
        builder.build().unwrap();
        [x, redefined, result]
    }

    #[test]
    fn test_read_after_many_merges() {
        let mut code = IrCode::new(IrOptions::testing());
        let [x, _, result] = sequential_diamonds(&mut code, 2_000, false);
        assert_eq!(result, x);
        assert!(code.blocks().iter().all(|&b| code.block(b).phis().is_empty()));
        assert_eq!(code.blocks().len(), 1 + 3 * 2_000);
    }

    #[test]
    fn test_many_merges_keep_first_phi() {
        let mut code = IrCode::new(IrOptions::testing());
        let [x, y, result] = sequential_diamonds(&mut code, 2_000, true);
        assert!(code.value(result).is_phi());
        assert_eq!(code.phi_operands(result), &[x, y]);
        let phis: usize = code.blocks().iter().map(|&b| code.block(b).phis().len()).sum();
        assert_eq!(phis, 1);
    }
}
