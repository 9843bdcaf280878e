//! The mutation protocol.
//!
//! Passes edit a unit through two cursors:
//!
//! - [`InstructionCursor`] walks the instruction stream of one block. It sits *between*
//!   instructions, like a list iterator: [`InstructionCursor::next`] and
//!   [`InstructionCursor::previous`] move over an instruction and make it *current*, while
//!   [`InstructionCursor::add`] inserts before the cursor. Removal and replacement act on the
//!   current instruction and keep the def-use chains consistent. Splitting cuts the block at the
//!   cursor.
//! - [`BlockCursor`] walks the block order of the unit. It does not borrow the unit, so a block
//!   cursor can be handed to the instruction-level operations that add blocks; they leave it
//!   positioned right after the last block they created.
//!
//! # Example
//!
//! ```rust
//! use irscope::prelude::*;
//!
//! let mut code = IrCode::new(IrOptions::testing());
//! let block = code.create_goto_block(Position::none(), None);
//! code.push_block(block);
//! let target = code.create_goto_block(Position::none(), None);
//! code.push_block(target);
//! code.link(block, target);
//!
//! let mut cursor = code.cursor(block);
//! let value = cursor.insert_const_number_instruction(42, ValueType::Int);
//! assert!(cursor.has_next());
//! let goto = cursor.next().unwrap();
//! assert!(cursor.code().instruction(goto).kind().is_goto());
//! assert!(!code.value(value).is_used());
//! ```

use log::debug;

use crate::{
    ir::{BlockId, InstrId, Instruction, InstructionKind, IrCode, Position, ValueId, ValueType},
    Result,
};

/// A cursor over the block order of an [`IrCode`].
///
/// The cursor stores an index into the order; edits of the order made without the cursor may
/// leave it pointing elsewhere. Operations that take a block cursor reposition it by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockCursor {
    next: usize,
    last: Option<usize>,
}

impl BlockCursor {
    /// Creates a cursor before the first block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cursor before the block at `index`.
    #[must_use]
    pub fn at(index: usize) -> Self {
        Self {
            next: index,
            last: None,
        }
    }

    /// Creates a cursor right after `block`, which becomes the last returned block.
    ///
    /// # Panics
    ///
    /// Panics if `block` is not part of the order.
    #[must_use]
    pub fn after(code: &IrCode, block: BlockId) -> Self {
        let mut cursor = Self::new();
        cursor.position_after(code, block);
        cursor
    }

    /// Moves the cursor right after `block`, which becomes the last returned block.
    ///
    /// # Panics
    ///
    /// Panics if `block` is not part of the order.
    pub fn position_after(&mut self, code: &IrCode, block: BlockId) {
        let index = code
            .block_index(block)
            .unwrap_or_else(|| panic!("{} is not in the block order", block));
        self.next = index + 1;
        self.last = Some(index);
    }

    /// Returns the index of the block [`BlockCursor::next`] would return.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Returns `true` if there is a block after the cursor.
    #[must_use]
    pub fn has_next(&self, code: &IrCode) -> bool {
        self.next < code.order.len()
    }

    /// Returns `true` if there is a block before the cursor.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.next > 0
    }

    /// Moves over the next block and returns it.
    pub fn next(&mut self, code: &IrCode) -> Option<BlockId> {
        let block = code.order.get(self.next).copied()?;
        self.last = Some(self.next);
        self.next += 1;
        Some(block)
    }

    /// Moves back over the previous block and returns it.
    pub fn previous(&mut self, code: &IrCode) -> Option<BlockId> {
        if self.next == 0 {
            return None;
        }
        self.next -= 1;
        self.last = Some(self.next);
        code.order.get(self.next).copied()
    }

    /// Returns the block after the cursor without moving.
    #[must_use]
    pub fn peek_next(&self, code: &IrCode) -> Option<BlockId> {
        code.order.get(self.next).copied()
    }

    /// Returns the block before the cursor without moving.
    #[must_use]
    pub fn peek_previous(&self, code: &IrCode) -> Option<BlockId> {
        self.next
            .checked_sub(1)
            .and_then(|index| code.order.get(index).copied())
    }

    /// Inserts `block` into the order before the cursor.
    pub fn add(&mut self, code: &mut IrCode, block: BlockId) {
        code.insert_block(self.next, block);
        self.next += 1;
        self.last = None;
    }

    /// Removes the last returned block from the order.
    ///
    /// # Panics
    ///
    /// Panics if no block was returned since the last insertion or removal.
    pub fn remove(&mut self, code: &mut IrCode) -> BlockId {
        let index = self
            .last
            .take()
            .unwrap_or_else(|| panic!("no block to remove at cursor index {}", self.next));
        if index < self.next {
            self.next -= 1;
        }
        code.order.remove(index)
    }
}

/// A cursor over the instruction stream of one block.
///
/// Created with [`IrCode::cursor`], [`IrCode::cursor_at`] or [`IrCode::cursor_before`]. The
/// cursor exclusively borrows the unit; [`InstructionCursor::code_mut`] gives access to the
/// factories for creating instructions and values to insert.
#[derive(Debug)]
pub struct InstructionCursor<'a> {
    code: &'a mut IrCode,
    block: BlockId,
    next: usize,
    current: Option<InstrId>,
    position: Option<Position>,
}

impl IrCode {
    /// Returns a cursor before the first instruction of `block`.
    pub fn cursor(&mut self, block: BlockId) -> InstructionCursor<'_> {
        self.cursor_at(block, 0)
    }

    /// Returns a cursor before the instruction at `index` of `block`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is past the end of the block.
    pub fn cursor_at(&mut self, block: BlockId, index: usize) -> InstructionCursor<'_> {
        assert!(
            index <= self.block(block).instructions.len(),
            "index {} is past the end of {}",
            index,
            block
        );
        InstructionCursor {
            code: self,
            block,
            next: index,
            current: None,
            position: None,
        }
    }

    /// Returns a cursor in the block of `instr`, positioned so that the next instruction is
    /// `instr`.
    ///
    /// # Panics
    ///
    /// Panics if `instr` is not in a block.
    pub fn cursor_before(&mut self, instr: InstrId) -> InstructionCursor<'_> {
        let block = self
            .instruction(instr)
            .block()
            .unwrap_or_else(|| panic!("{} is not in a block", instr));
        let index = self
            .block(block)
            .instructions
            .iter()
            .position(|&i| i == instr)
            .unwrap_or_else(|| panic!("{} is not listed in {}", instr, block));
        self.cursor_at(block, index)
    }

    /// Splits blocks so that each block has at most one throwing instruction and the entry block
    /// has none.
    ///
    /// Catch handlers are copied to both halves of every split, so each throwing instruction stays
    /// covered by the handlers it had.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlockStructure`] if a catch target is also reached through
    /// normal control flow.
    pub fn prepare_blocks_for_catch_handlers(&mut self) -> Result<()> {
        if self.order.is_empty() {
            return Ok(());
        }
        let entry = self.entry_block();
        let mut splits = 0;
        {
            let mut cursor = self.cursor(entry);
            if cursor.next_until(Instruction::can_throw).is_some() {
                cursor.previous();
                cursor.split_block(None, false);
                splits += 1;
            }
        }

        let mut index = 1;
        while index < self.order.len() {
            let block = self.order[index];
            index += 1;
            if self.number_of_throwing_instructions(block) <= 1 {
                continue;
            }
            let mut cursor = self.cursor(block);
            cursor.next_until(Instruction::can_throw);
            cursor.split_copy_catch_handlers(None)?;
            splits += 1;
        }
        if splits > 0 {
            debug!("{}: split {} blocks for catch handlers", self.method, splits);
        }
        Ok(())
    }
}

/// Inserts `new_blocks` into the order right after `anchor`, keeping their order.
pub(crate) fn place_blocks_after(code: &mut IrCode, anchor: BlockId, new_blocks: &[BlockId]) {
    let mut index = code
        .block_index(anchor)
        .map_or(code.order.len(), |index| index + 1);
    for &block in new_blocks {
        code.insert_block(index, block);
        index += 1;
    }
}

impl<'a> InstructionCursor<'a> {
    /// Returns the unit.
    #[must_use]
    pub fn code(&self) -> &IrCode {
        self.code
    }

    /// Returns the unit for creating instructions and values.
    pub fn code_mut(&mut self) -> &mut IrCode {
        self.code
    }

    /// Returns the block this cursor walks.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Returns the instruction last moved over, if it was not removed since.
    #[must_use]
    pub fn current(&self) -> Option<InstrId> {
        self.current
    }

    fn instructions(&self) -> &[InstrId] {
        &self.code.block(self.block).instructions
    }

    /// Returns `true` if there is an instruction after the cursor.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next < self.instructions().len()
    }

    /// Returns `true` if there is an instruction before the cursor.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.next > 0
    }

    /// Returns the index of the instruction [`InstructionCursor::next`] would return.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Moves back over the previous instruction and returns it.
    pub fn previous(&mut self) -> Option<InstrId> {
        if self.next == 0 {
            return None;
        }
        self.next -= 1;
        self.current = Some(self.instructions()[self.next]);
        self.current
    }

    /// Returns the instruction after the cursor without moving.
    #[must_use]
    pub fn peek_next(&self) -> Option<InstrId> {
        self.instructions().get(self.next).copied()
    }

    /// Returns the instruction before the cursor without moving.
    #[must_use]
    pub fn peek_previous(&self) -> Option<InstrId> {
        self.next
            .checked_sub(1)
            .and_then(|index| self.instructions().get(index).copied())
    }

    /// Moves forward until an instruction matching `predicate` has been moved over.
    ///
    /// Returns the matching instruction, or `None` with the cursor at the end of the block.
    pub fn next_until(&mut self, mut predicate: impl FnMut(&Instruction) -> bool) -> Option<InstrId> {
        while let Some(instr) = self.next() {
            if predicate(self.code.instruction(instr)) {
                return Some(instr);
            }
        }
        None
    }

    /// Returns `true` if an insertion position is set.
    #[must_use]
    pub fn has_insertion_position(&self) -> bool {
        self.position.is_some()
    }

    /// Sets the position given to inserted instructions that have none.
    pub fn set_insertion_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    /// Clears the insertion position.
    pub fn unset_insertion_position(&mut self) {
        self.position = None;
    }

    /// Inserts `instr` before the cursor and assigns it to the block.
    ///
    /// The cursor ends up after the inserted instruction; the current instruction is unchanged.
    pub fn add(&mut self, instr: InstrId) {
        debug_assert!(
            self.code.instruction(instr).block().is_none(),
            "{} is already in a block",
            instr
        );
        if let Some(position) = &self.position {
            if self.code.instruction(instr).position().is_none() {
                self.code.set_position(instr, position.clone());
            }
        }
        self.code.attach_instruction(self.block, instr);
        self.code.blocks[self.block.index()]
            .instructions
            .insert(self.next, instr);
        self.next += 1;
    }

    /// Replaces the current instruction by `instr` in the instruction list.
    ///
    /// Values are not rewired; see [`InstructionCursor::replace_current_instruction`].
    ///
    /// # Panics
    ///
    /// Panics if there is no current instruction.
    pub fn set(&mut self, instr: InstrId) {
        let current = self.expect_current();
        let index = self.index_of(current);
        self.code.attach_instruction(self.block, instr);
        self.code.blocks[self.block.index()].instructions[index] = instr;
        self.code.instructions[current.index()].block = None;
        self.current = Some(instr);
    }

    /// Removes the current instruction, releasing its inputs.
    ///
    /// # Panics
    ///
    /// Panics if there is no current instruction or its output still has instruction or phi
    /// users.
    pub fn remove(&mut self) {
        let current = self.expect_current();
        let instruction = self.code.instruction(current);
        let out = instruction.out_value();
        if let Some(out) = out {
            let value = self.code.value(out);
            assert!(
                value.users().is_empty() && value.phi_users().is_empty(),
                "cannot remove {}: {} is still used",
                current,
                out
            );
        }
        debug_assert!(instruction.debug_values().is_empty());
        self.code.detach_inputs(current);
        if let Some(out) = out.filter(|&out| self.code.value(out).has_local_info()) {
            for user in self.code.value(out).debug_users().to_vec() {
                self.code.remove_debug_value(user, out);
            }
        }
        self.unlink_current(current);
    }

    /// Removes the current instruction from the list without touching any value.
    ///
    /// # Panics
    ///
    /// Panics if there is no current instruction.
    pub fn remove_instruction_ignore_out_value(&mut self) {
        let current = self.expect_current();
        self.unlink_current(current);
    }

    /// Removes the current instruction, or replaces it by a debug local read if it carries debug
    /// values that must stay alive until this point.
    pub fn remove_or_replace_by_debug_local_read(&mut self) {
        let current = self.expect_current();
        if self.code.instruction(current).debug_values().is_empty() {
            self.remove();
        } else {
            let read = self
                .code
                .create_instruction(InstructionKind::DebugLocalRead, vec![], None);
            self.replace_current_instruction(read);
        }
    }

    /// Replaces the current instruction by `new`.
    ///
    /// Users of the old output are redirected to the output of `new`, debug values move over, and
    /// `new` inherits the position of the old instruction if it has none. `new` becomes current.
    ///
    /// # Panics
    ///
    /// Panics if there is no current instruction, or the old output is used and `new` has none.
    pub fn replace_current_instruction(&mut self, new: InstrId) {
        let current = self.expect_current();
        self.code.move_debug_values(current, new);
        self.code.detach_inputs(current);
        if let Some(old_out) = self.code.instruction(current).out_value() {
            if self.code.value(old_out).is_used() {
                let new_out = self.code.instruction(new).out_value().unwrap_or_else(|| {
                    panic!("{} replaces {} but defines no value for its users", new, current)
                });
                self.code.replace_users(old_out, new_out);
            }
        }
        if self.code.instruction(new).position().is_none() {
            let position = self.code.instruction(current).position().clone();
            self.code.set_position(new, position);
        }
        let index = self.index_of(current);
        self.code.attach_instruction(self.block, new);
        self.code.blocks[self.block.index()].instructions[index] = new;
        self.code.instructions[current.index()].block = None;
        self.current = Some(new);
    }

    /// Inserts a number constant before the cursor and returns its value.
    ///
    /// Without an insertion position the constant gets the position of the current instruction
    /// (or of the block) in debug mode, and no position otherwise.
    pub fn insert_const_number_instruction(&mut self, value: i64, ty: ValueType) -> ValueId {
        let instr = self.code.create_const_number(value, ty);
        if !self.has_insertion_position() {
            let position = if self.code.options.debug {
                match self.current {
                    Some(current) => self.code.instruction(current).position().clone(),
                    None => self.code.block_position(self.block),
                }
            } else {
                Position::none()
            };
            self.code.set_position(instr, position);
        }
        self.add(instr);
        match self.code.instruction(instr).out_value() {
            Some(out) => out,
            None => unreachable!("constants always define a value"),
        }
    }

    /// Adds a throwing instruction before the cursor.
    ///
    /// If the block has catch handlers, the block is split at the cursor, `instr` starts the new
    /// block, and the handlers are copied so that both halves stay covered. Returns the new block
    /// in that case; the cursor stays in the original block, at its end.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlockStructure`] if a catch target is also reached through
    /// normal control flow.
    pub fn add_throwing_instruction_to_possibly_throwing_block(
        &mut self,
        mut blocks: Option<&mut BlockCursor>,
        instr: InstrId,
    ) -> Result<Option<BlockId>> {
        if !self.code.block(self.block).has_catch_handlers() {
            self.add(instr);
            return Ok(None);
        }
        let split = self.split_block(blocks.as_deref_mut(), false);
        self.code.cursor(split).add(instr);
        let trampolines = self.code.copy_catch_handlers(self.block, split)?;
        place_blocks_after(self.code, split, &trampolines);
        if let Some(cursor) = blocks {
            cursor.position_after(self.code, split);
        }
        Ok(Some(split))
    }

    /// Splits the block at the cursor, keeping the catch handlers on the first half if the
    /// instruction before the cursor can throw.
    ///
    /// See [`InstructionCursor::split_block`].
    pub fn split(&mut self, blocks: Option<&mut BlockCursor>) -> BlockId {
        let keep = self
            .peek_previous()
            .is_some_and(|previous| self.code.instruction(previous).can_throw());
        self.split_block(blocks, keep)
    }

    /// Splits the block at the cursor.
    ///
    /// The instructions after the cursor move to a new block that takes over all successors; the
    /// original block ends in a goto to it. Catch handlers stay on the original block with
    /// `keep_catch_handlers`, otherwise they move to the new block. The new block is placed right
    /// after the original in the order, and a given block cursor is positioned after it.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is at the end of the block.
    pub fn split_block(
        &mut self,
        blocks: Option<&mut BlockCursor>,
        keep_catch_handlers: bool,
    ) -> BlockId {
        assert!(
            self.has_next(),
            "cannot split {} after its last instruction",
            self.block
        );
        let position = match self.current {
            Some(current) => self.code.instruction(current).position().clone(),
            None => self.code.block_position(self.block),
        };
        let keep_catch_handlers =
            keep_catch_handlers && self.code.block(self.block).has_catch_handlers();
        let catch_successors = self.code.block(self.block).catch_successor_count();

        let new_block = self.code.create_split_block(self.block, keep_catch_handlers);

        let moved = self.code.blocks[self.block.index()]
            .instructions
            .split_off(self.next);
        for &instr in &moved {
            self.code.instructions[instr.index()].block = Some(new_block);
        }
        if self.current.is_some_and(|current| moved.contains(&current)) {
            self.current = None;
        }
        self.code.blocks[new_block.index()].instructions = moved;
        if keep_catch_handlers {
            self.code
                .shift_switch_indices(new_block, -(catch_successors as isize));
        }

        let goto = self.code.create_goto();
        self.code.set_position(goto, position);
        self.add(goto);

        self.code.insert_block_after(self.block, new_block);
        if let Some(cursor) = blocks {
            cursor.position_after(self.code, new_block);
        }
        new_block
    }

    /// Splits at the cursor and again after `instructions` instructions of the new block.
    ///
    /// Returns the middle block, which holds exactly those instructions followed by a goto.
    pub fn split_n(&mut self, mut blocks: Option<&mut BlockCursor>, instructions: usize) -> BlockId {
        let middle = self.split(blocks.as_deref_mut());
        let mut cursor = self.code.cursor_at(middle, instructions);
        cursor.split(blocks);
        middle
    }

    /// Splits at the cursor, moving the catch handlers to the new block and copying them back to
    /// the original block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlockStructure`] if a catch target is also reached through
    /// normal control flow.
    pub fn split_copy_catch_handlers(&mut self, blocks: Option<&mut BlockCursor>) -> Result<BlockId> {
        let split = self.split_block(None, false);
        if self.code.block(split).has_catch_handlers() {
            let trampolines = self.code.copy_catch_handlers(self.block, split)?;
            place_blocks_after(self.code, split, &trampolines);
        }
        if let Some(cursor) = blocks {
            cursor.position_after(self.code, split);
        }
        Ok(split)
    }

    fn expect_current(&self) -> InstrId {
        self.current
            .unwrap_or_else(|| panic!("no current instruction in {}", self.block))
    }

    fn index_of(&self, instr: InstrId) -> usize {
        self.instructions()
            .iter()
            .position(|&i| i == instr)
            .unwrap_or_else(|| panic!("{} is not listed in {}", instr, self.block))
    }

    fn unlink_current(&mut self, current: InstrId) {
        let index = self.index_of(current);
        if index < self.next {
            self.next -= 1;
        }
        self.code.blocks[self.block.index()].instructions.remove(index);
        self.code.instructions[current.index()].block = None;
        self.current = None;
    }

    pub(crate) fn into_code(self) -> &'a mut IrCode {
        self.code
    }
}

impl Iterator for InstructionCursor<'_> {
    type Item = InstrId;

    /// Moves over the next instruction and returns it.
    fn next(&mut self) -> Option<InstrId> {
        let instr = self.instructions().get(self.next).copied()?;
        self.next += 1;
        self.current = Some(instr);
        Some(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinopKind, CatchGuard, IrOptions};

    /// Verified options for units whose throwing instructions carry no positions.
    fn unpositioned() -> IrOptions {
        IrOptions {
            all_throwing_instructions_have_positions: false,
            ..IrOptions::testing()
        }
    }

    fn binop(code: &mut IrCode, op: BinopKind, lhs: ValueId, rhs: ValueId) -> InstrId {
        let out = code.create_value(ValueType::Int, None);
        code.create_instruction(InstructionKind::Binop(op), vec![lhs, rhs], Some(out))
    }

    /// `pred -> block -> succ`, where `block` holds three adds before its goto.
    fn straight_line() -> (IrCode, [BlockId; 3], Vec<InstrId>) {
        let mut code = IrCode::new(unpositioned());
        let pred = code.create_block();
        let arg = code.create_value(ValueType::Int, None);
        let argument =
            code.create_instruction(InstructionKind::Argument { index: 0 }, vec![], Some(arg));
        code.append_instruction(pred, argument);
        let goto = code.create_goto();
        code.append_instruction(pred, goto);
        code.push_block(pred);

        let block = code.create_block();
        let x1 = binop(&mut code, BinopKind::Add, arg, arg);
        let v1 = code.instruction(x1).out_value().unwrap();
        let x2 = binop(&mut code, BinopKind::Add, v1, arg);
        let v2 = code.instruction(x2).out_value().unwrap();
        let x3 = binop(&mut code, BinopKind::Add, v2, arg);
        let exit = code.create_goto();
        for instr in [x1, x2, x3, exit] {
            code.append_instruction(block, instr);
        }
        code.push_block(block);

        let succ = code.create_block();
        let v3 = code.instruction(x3).out_value().unwrap();
        let ret = code.create_instruction(InstructionKind::Return, vec![v3], None);
        code.append_instruction(succ, ret);
        code.push_block(succ);

        code.link(pred, block);
        code.link(block, succ);
        (code, [pred, block, succ], vec![x1, x2, x3, exit])
    }

    #[test]
    fn test_split_preserves_sequence() {
        let (mut code, [pred, block, succ], instrs) = straight_line();
        let mut cursor = code.cursor(block);
        cursor.next();
        cursor.next();
        let second = cursor.split(None);

        let first = code.block(block);
        assert_eq!(first.instructions().len(), 3);
        assert_eq!(&first.instructions()[..2], &instrs[..2]);
        assert!(code.exit_kind(block).is_goto());
        assert_eq!(code.block(block).predecessors(), &[pred]);
        assert_eq!(code.block(block).successors(), &[second]);

        assert_eq!(code.block(second).instructions(), &instrs[2..]);
        assert_eq!(code.block(second).predecessors(), &[block]);
        assert_eq!(code.block(second).successors(), &[succ]);
        assert_eq!(code.block(succ).predecessors(), &[second]);
        assert_eq!(code.instruction(instrs[2]).block(), Some(second));
        assert_eq!(code.blocks(), &[pred, block, second, succ]);
        code.is_consistent_ssa().unwrap();
    }

    #[test]
    fn test_split_n_isolates_instruction() {
        let (mut code, [_, block, succ], instrs) = straight_line();
        let mut blocks = BlockCursor::after(&code, block);
        let mut cursor = code.cursor(block);
        cursor.next();
        let middle = cursor.split_n(Some(&mut blocks), 1);

        assert_eq!(code.block(middle).instructions()[0], instrs[1]);
        assert_eq!(code.block(middle).instructions().len(), 2);
        let after = code.block(middle).successors()[0];
        assert_eq!(code.block(after).instructions(), &instrs[2..]);
        assert_eq!(code.block(after).successors(), &[succ]);
        assert_eq!(blocks.peek_previous(&code), Some(after));
        assert_eq!(blocks.peek_next(&code), Some(succ));
        code.is_consistent_ssa().unwrap();
    }

    #[test]
    #[should_panic(expected = "after its last instruction")]
    fn test_split_at_end_panics() {
        let (mut code, [_, block, _], _) = straight_line();
        let mut cursor = code.cursor(block);
        while cursor.next().is_some() {}
        cursor.split(None);
    }

    #[test]
    fn test_add_and_remove() {
        let (mut code, [_, block, _], instrs) = straight_line();
        let mut cursor = code.cursor(block);
        let constant = cursor.insert_const_number_instruction(5, ValueType::Int);
        assert_eq!(cursor.next(), Some(instrs[0]));

        cursor.previous();
        cursor.previous();
        let defining = cursor.current().unwrap();
        assert_eq!(cursor.code().value(constant).defining_instruction(), Some(defining));
        cursor.remove();
        assert!(cursor.current().is_none());
        assert_eq!(cursor.next(), Some(instrs[0]));
        assert_eq!(code.block(block).instructions(), &instrs[..]);
        assert!(code.instruction(defining).block().is_none());
    }

    #[test]
    #[should_panic(expected = "is still used")]
    fn test_remove_used_instruction_panics() {
        let (mut code, [_, block, _], _) = straight_line();
        let mut cursor = code.cursor(block);
        cursor.next();
        cursor.remove();
    }

    #[test]
    fn test_replace_current_instruction() {
        let (mut code, [_, block, _], instrs) = straight_line();
        let lhs = code.instruction(instrs[0]).in_value(0);
        let old_out = code.instruction(instrs[0]).out_value().unwrap();
        let replacement = binop(&mut code, BinopKind::Mul, lhs, lhs);
        let new_out = code.instruction(replacement).out_value().unwrap();
        code.set_position(instrs[0], Position::new(3, "m"));

        let mut cursor = code.cursor(block);
        cursor.next();
        cursor.replace_current_instruction(replacement);
        assert_eq!(cursor.current(), Some(replacement));

        assert_eq!(code.block(block).instructions()[0], replacement);
        assert!(!code.value(old_out).is_used());
        assert_eq!(code.value(new_out).users(), &[instrs[1]]);
        assert_eq!(code.instruction(replacement).position().line, 3);
        assert!(code.instruction(instrs[0]).block().is_none());
        assert!(!code.value(lhs).users().contains(&instrs[0]));
        code.is_consistent_ssa().unwrap();
    }

    #[test]
    fn test_insertion_position() {
        let (mut code, [_, block, _], _) = straight_line();
        let mut cursor = code.cursor(block);
        cursor.set_insertion_position(Position::new(9, "m"));
        let value = cursor.insert_const_number_instruction(1, ValueType::Int);
        cursor.unset_insertion_position();
        assert!(!cursor.has_insertion_position());
        let instr = code.value(value).defining_instruction().unwrap();
        assert_eq!(code.instruction(instr).position().line, 9);
    }

    #[test]
    fn test_add_throwing_instruction_splits_covered_block() {
        let (mut code, [_, block, _], instrs) = straight_line();
        let handler = code.create_rethrow_block(Position::none());
        code.push_block(handler);
        code.add_catch_handler(block, handler, CatchGuard::CatchAll);

        let lhs = code.instruction(instrs[0]).in_value(0);
        let div = binop(&mut code, BinopKind::Div, lhs, lhs);
        let mut cursor = code.cursor(block);
        cursor.next();
        let split = cursor
            .add_throwing_instruction_to_possibly_throwing_block(None, div)
            .unwrap()
            .unwrap();

        assert_eq!(code.block(split).instructions()[0], div);
        assert!(code.block(block).has_catch_handlers());
        assert!(code.block(split).has_catch_handlers());
        // The shared handler got one trampoline per covered block.
        assert_eq!(code.block(handler).predecessors().len(), 2);
        for &trampoline in code.block(handler).predecessors() {
            assert_eq!(code.block(trampoline).predecessors().len(), 1);
            assert!(code.contains_block(trampoline));
        }
        code.is_consistent_ssa().unwrap();
    }

    #[test]
    fn test_prepare_blocks_for_catch_handlers() {
        let mut code = IrCode::new(unpositioned());
        let entry = code.create_block();
        let arg = code.create_value(ValueType::Int, None);
        let argument =
            code.create_instruction(InstructionKind::Argument { index: 0 }, vec![], Some(arg));
        code.append_instruction(entry, argument);
        let first = binop(&mut code, BinopKind::Div, arg, arg);
        let first_out = code.instruction(first).out_value().unwrap();
        let second = binop(&mut code, BinopKind::Rem, first_out, arg);
        let second_out = code.instruction(second).out_value().unwrap();
        let ret = code.create_instruction(InstructionKind::Return, vec![second_out], None);
        for instr in [first, second, ret] {
            code.append_instruction(entry, instr);
        }
        code.push_block(entry);

        code.prepare_blocks_for_catch_handlers().unwrap();
        for &block in code.blocks() {
            assert!(code.number_of_throwing_instructions(block) <= 1);
        }
        assert_eq!(code.number_of_throwing_instructions(code.entry_block()), 0);
        assert_eq!(code.blocks().len(), 3);
        code.is_consistent_ssa().unwrap();
    }

    #[test]
    fn test_block_cursor_navigation() {
        let (mut code, [pred, block, succ], _) = straight_line();
        let mut blocks = BlockCursor::new();
        assert_eq!(blocks.next(&code), Some(pred));
        assert_eq!(blocks.next(&code), Some(block));
        let extra = code.create_goto_block(Position::none(), None);
        blocks.add(&mut code, extra);
        assert_eq!(blocks.peek_previous(&code), Some(extra));
        assert_eq!(blocks.next(&code), Some(succ));
        assert!(!blocks.has_next(&code));
        assert_eq!(blocks.previous(&code), Some(succ));
        assert_eq!(blocks.previous(&code), Some(extra));
        assert_eq!(blocks.remove(&mut code), extra);
        assert_eq!(code.blocks(), &[pred, block, succ]);
        assert_eq!(blocks.peek_next(&code), Some(succ));
    }
}
