//! Basic blocks and block-local shape queries.
//!
//! A [`BasicBlock`] holds an ordered instruction stream ending in a jump, an ordered list of
//! phis, ordered predecessor and successor lists, and a catch-handler table whose targets are
//! indices into the successor list. Catch successors always form a prefix of the successor list.
//!
//! Blocks also carry the construction state used by the SSA builder (filled/sealed flags,
//! incomplete phis and current definitions) and a bit set of marking colors.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::ir::{
    BlockId, CatchGuard, CatchHandlers, InstrId, InstructionKind, IrCode, Position, ValueId,
    ValueType,
};

/// How a block is reached from one of its predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeType {
    /// A read inside the block itself, not along an edge
    NonEdge,
    /// A normal control-flow edge
    Normal,
    /// An edge to a catch handler
    Exceptional,
}

/// A basic block of an [`IrCode`].
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) number: i32,
    pub(crate) instructions: Vec<InstrId>,
    pub(crate) phis: Vec<ValueId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) catch_handlers: CatchHandlers<usize>,
    pub(crate) filled: bool,
    pub(crate) sealed: bool,
    pub(crate) incomplete_phis: BTreeMap<i32, ValueId>,
    pub(crate) estimated_predecessors_count: usize,
    pub(crate) unfilled_predecessors_count: usize,
    pub(crate) color: u32,
    /// Register to value map during construction; `None` entries mark an undefined on-throw value
    pub(crate) current_definitions: Option<FxHashMap<i32, Option<ValueId>>>,
}

impl BasicBlock {
    pub(crate) fn new(number: i32) -> Self {
        Self {
            number,
            instructions: Vec::new(),
            phis: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            catch_handlers: CatchHandlers::default(),
            filled: false,
            sealed: false,
            incomplete_phis: BTreeMap::new(),
            estimated_predecessors_count: 0,
            unfilled_predecessors_count: 0,
            color: 0,
            current_definitions: None,
        }
    }

    /// Returns the block number.
    #[must_use]
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Returns the instructions in order.
    #[must_use]
    pub fn instructions(&self) -> &[InstrId] {
        &self.instructions
    }

    /// Returns the phis in order.
    #[must_use]
    pub fn phis(&self) -> &[ValueId] {
        &self.phis
    }

    /// Returns the predecessors in order; phi operands are aligned with this list.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Returns the successors in order.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Returns the catch-handler table with successor indices as targets.
    #[must_use]
    pub fn catch_handlers_with_indices(&self) -> &CatchHandlers<usize> {
        &self.catch_handlers
    }

    /// Returns `true` if the block has catch handlers.
    #[must_use]
    pub fn has_catch_handlers(&self) -> bool {
        !self.catch_handlers.is_empty()
    }

    /// Returns `true` once the instruction stream is complete.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Returns `true` once all predecessors are known.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns `true` if the block has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the first instruction.
    ///
    /// # Panics
    ///
    /// Panics if the block is empty.
    #[must_use]
    pub fn entry(&self) -> InstrId {
        self.instructions[0]
    }

    /// Returns the last instruction, the jump of a filled block.
    ///
    /// # Panics
    ///
    /// Panics if the block is empty.
    #[must_use]
    pub fn exit(&self) -> InstrId {
        self.instructions[self.instructions.len() - 1]
    }

    /// Returns `true` if the block carries marking `color`.
    #[must_use]
    pub fn is_marked(&self, color: u32) -> bool {
        self.color & color != 0
    }

    /// Returns `true` if the block still has phis waiting for its predecessors.
    #[must_use]
    pub fn has_incomplete_phis(&self) -> bool {
        !self.incomplete_phis.is_empty()
    }

    /// Returns the registers of the incomplete phis.
    pub fn incomplete_phi_registers(&self) -> impl Iterator<Item = i32> + '_ {
        self.incomplete_phis.keys().copied()
    }

    /// Returns the number of catch handlers.
    #[must_use]
    pub fn number_of_catch_handlers(&self) -> usize {
        self.catch_handlers.len()
    }

    pub(crate) fn mark(&mut self, color: u32) {
        debug_assert!(!self.is_marked(color));
        self.color |= color;
    }

    pub(crate) fn clear_mark(&mut self, color: u32) {
        self.color &= !color;
    }

    /// Number of successors that are catch targets.
    pub(crate) fn catch_successor_count(&self) -> usize {
        self.catch_handlers.unique_targets().len()
    }
}

impl IrCode {
    /// Returns the catch handlers of `block` with blocks as targets.
    #[must_use]
    pub fn catch_handlers(&self, block: BlockId) -> CatchHandlers<BlockId> {
        let b = self.block(block);
        b.catch_handlers.map(|index| b.successors[index])
    }

    /// Returns the successors of `block` that are not catch targets.
    #[must_use]
    pub fn normal_successors(&self, block: BlockId) -> Vec<BlockId> {
        let b = self.block(block);
        if !b.has_catch_handlers() {
            return b.successors.clone();
        }
        let handlers = b.catch_handlers.unique_targets();
        b.successors
            .iter()
            .enumerate()
            .filter(|(i, _)| !handlers.contains(i))
            .map(|(_, &s)| s)
            .collect()
    }

    /// Returns the predecessors of `block` that do not reach it through a catch edge.
    #[must_use]
    pub fn normal_predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block)
            .predecessors
            .iter()
            .copied()
            .filter(|&pred| !self.has_catch_successor(pred, block))
            .collect()
    }

    /// Returns `true` if `successor` is a catch target of `block`.
    #[must_use]
    pub fn has_catch_successor(&self, block: BlockId, successor: BlockId) -> bool {
        let b = self.block(block);
        if !b.has_catch_handlers() {
            return false;
        }
        b.successors
            .iter()
            .position(|&s| s == successor)
            .is_some_and(|index| b.catch_handlers.all_targets().contains(&index))
    }

    /// Returns how many guards of `block` lead to `successor`.
    #[must_use]
    pub fn guards_for_catch_successor(&self, block: BlockId, successor: BlockId) -> usize {
        debug_assert!(self.has_catch_successor(block, successor));
        let b = self.block(block);
        let Some(index) = b.successors.iter().position(|&s| s == successor) else {
            return 0;
        };
        b.catch_handlers
            .all_targets()
            .iter()
            .filter(|&&t| t == index)
            .count()
    }

    /// Returns the kind of edge from `block` to `successor`.
    #[must_use]
    pub fn edge_type(&self, block: BlockId, successor: BlockId) -> EdgeType {
        debug_assert!(self.block(block).successors.contains(&successor));
        if self.has_catch_successor(block, successor) {
            EdgeType::Exceptional
        } else {
            EdgeType::Normal
        }
    }

    /// Returns the kind of the exit instruction of `block`.
    #[must_use]
    pub fn exit_kind(&self, block: BlockId) -> &InstructionKind {
        self.instruction(self.block(block).exit()).kind()
    }

    /// Returns the last instruction of `block` that can throw.
    #[must_use]
    pub fn exceptional_exit(&self, block: BlockId) -> Option<InstrId> {
        self.block(block)
            .instructions
            .iter()
            .rev()
            .copied()
            .find(|&instr| self.instruction(instr).can_throw())
    }

    /// Returns the position of the first instruction of `block`.
    #[must_use]
    pub fn block_position(&self, block: BlockId) -> Position {
        self.instruction(self.block(block).entry()).position().clone()
    }

    /// Returns the target of the goto ending `block`, if it ends in a goto.
    #[must_use]
    pub fn goto_target(&self, block: BlockId) -> Option<BlockId> {
        let b = self.block(block);
        if b.is_empty() || !self.exit_kind(block).is_goto() {
            return None;
        }
        b.successors.last().copied()
    }

    /// Returns the block control falls through to when the exit does not jump.
    ///
    /// For a goto that is its target; for an `If` the last successor; for a switch the
    /// fallthrough successor. Returns and throws have none.
    #[must_use]
    pub fn fallthrough_block(&self, block: BlockId) -> Option<BlockId> {
        let b = self.block(block);
        match self.exit_kind(block) {
            InstructionKind::Goto | InstructionKind::If(_) => b.successors.last().copied(),
            InstructionKind::Switch {
                fallthrough_index, ..
            } => b.successors.get(*fallthrough_index).copied(),
            _ => None,
        }
    }

    /// Returns `true` if `block` consists of a single goto.
    #[must_use]
    pub fn is_trivial_goto(&self, block: BlockId) -> bool {
        let b = self.block(block);
        b.instructions.len() == 1 && self.exit_kind(block).is_goto()
    }

    /// Returns `true` if `block` has a single successor reached through a goto.
    #[must_use]
    pub fn has_one_normal_exit(&self, block: BlockId) -> bool {
        self.block(block).successors.len() == 1 && self.exit_kind(block).is_goto()
    }

    /// Follows a chain of trivial gotos and returns the first non-trivial block.
    ///
    /// Returns `None` if the chain is a cycle.
    #[must_use]
    pub fn end_of_goto_chain(&self, block: BlockId) -> Option<BlockId> {
        let mut hare = block;
        let mut tortoise = block;
        let mut advance = false;
        while self.is_trivial_goto(hare) {
            hare = self.goto_target(hare)?;
            if advance {
                tortoise = self.goto_target(tortoise)?;
            }
            advance = !advance;
            if hare == tortoise {
                return None;
            }
        }
        Some(hare)
    }

    /// Returns `true` if the only normal path out of `block` ends in a throw.
    #[must_use]
    pub fn is_simple_always_throwing_path(&self, block: BlockId) -> bool {
        let mut hare = block;
        let mut tortoise = block;
        let mut advance = false;
        loop {
            let normal = self.normal_successors(hare);
            match normal.as_slice() {
                [] => return self.exit_kind(hare).is_throw(),
                [next] => hare = *next,
                _ => return false,
            }
            if advance {
                tortoise = self.normal_successors(tortoise)[0];
            }
            advance = !advance;
            if hare == tortoise {
                return false;
            }
        }
    }

    /// Returns `true` if any instruction of `block` can throw.
    #[must_use]
    pub fn block_can_throw(&self, block: BlockId) -> bool {
        self.block(block)
            .instructions
            .iter()
            .any(|&instr| self.instruction(instr).can_throw())
    }

    /// Returns the number of instructions of `block` that can throw.
    #[must_use]
    pub fn number_of_throwing_instructions(&self, block: BlockId) -> usize {
        self.block(block)
            .instructions
            .iter()
            .filter(|&&instr| self.instruction(instr).can_throw())
            .count()
    }

    /// Returns `true` if `target` is reachable from `block` (or is `block`).
    #[must_use]
    pub fn has_path_to(&self, block: BlockId, target: BlockId) -> bool {
        let mut visited = crate::utils::BitSet::new(self.blocks.len());
        let mut stack = vec![block];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current.index()) {
                continue;
            }
            for &succ in &self.block(current).successors {
                if !visited.contains(succ.index()) {
                    stack.push(succ);
                }
            }
        }
        false
    }

    /// Appends an instruction to a block that is still open.
    pub fn append_instruction(&mut self, block: BlockId, instr: InstrId) {
        debug_assert!(!self.block(block).filled, "cannot append to filled {}", block);
        self.attach_instruction(block, instr);
        self.blocks[block.index()].instructions.push(instr);
    }

    /// Sets the block back-pointer and records metadata for an instruction entering a block.
    pub(crate) fn attach_instruction(&mut self, block: BlockId, instr: InstrId) {
        self.instructions[instr.index()].block = Some(block);
        let kind = &self.instructions[instr.index()].kind;
        self.metadata.record(kind);
    }

    /// Removes an instruction from its block without touching its values.
    pub(crate) fn remove_instruction_from_block(&mut self, instr: InstrId) {
        if let Some(block) = self.instructions[instr.index()].block.take() {
            self.blocks[block.index()]
                .instructions
                .retain(|&i| i != instr);
        }
    }

    /// Creates a filled and sealed block consisting of a single goto.
    ///
    /// With a `target`, the target becomes the only successor; the target's predecessor list is
    /// left for the caller to update.
    pub fn create_goto_block(&mut self, position: Position, target: Option<BlockId>) -> BlockId {
        let block = self.create_block();
        let goto = self.create_goto();
        self.set_position(goto, position);
        self.append_instruction(block, goto);
        let b = &mut self.blocks[block.index()];
        b.filled = true;
        b.sealed = true;
        if let Some(target) = target {
            b.successors.push(target);
        }
        block
    }

    /// Creates a filled and sealed block that receives an exception and rethrows it.
    pub fn create_rethrow_block(&mut self, position: Position) -> BlockId {
        let block = self.create_block();
        let exception = self.create_value(ValueType::Reference, None);
        self.mark_never_null(exception);
        let move_exception =
            self.create_instruction(InstructionKind::MoveException, vec![], Some(exception));
        self.set_position(move_exception, position.clone());
        let throw = self.create_instruction(InstructionKind::Throw, vec![exception], None);
        self.set_position(throw, position);
        self.append_instruction(block, move_exception);
        self.append_instruction(block, throw);
        let b = &mut self.blocks[block.index()];
        b.filled = true;
        b.sealed = true;
        block
    }

    /// Returns `true` if `guard` is handled by `block`.
    #[must_use]
    pub fn handles_guard(&self, block: BlockId, guard: &CatchGuard) -> bool {
        self.block(block).catch_handlers.contains_guard(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrOptions;

    fn goto_chain(code: &mut IrCode, length: usize) -> Vec<BlockId> {
        let mut blocks = Vec::new();
        for _ in 0..length {
            let block = code.create_goto_block(Position::none(), None);
            code.push_block(block);
            blocks.push(block);
        }
        for pair in blocks.windows(2) {
            code.link(pair[0], pair[1]);
        }
        blocks
    }

    #[test]
    fn test_end_of_goto_chain() {
        let mut code = IrCode::new(IrOptions::testing());
        let chain = goto_chain(&mut code, 3);
        let exit = code.create_rethrow_block(Position::none());
        code.push_block(exit);
        code.link(chain[2], exit);

        assert_eq!(code.end_of_goto_chain(chain[0]), Some(exit));
        assert!(code.is_trivial_goto(chain[1]));
        assert!(code.has_one_normal_exit(chain[1]));
        assert!(code.is_simple_always_throwing_path(chain[0]));
    }

    #[test]
    fn test_end_of_goto_chain_cycle() {
        let mut code = IrCode::new(IrOptions::testing());
        let chain = goto_chain(&mut code, 3);
        code.link(chain[2], chain[0]);

        assert_eq!(code.end_of_goto_chain(chain[0]), None);
        assert!(!code.is_simple_always_throwing_path(chain[0]));
        assert!(code.has_path_to(chain[2], chain[1]));
    }

    #[test]
    fn test_has_path_to() {
        let mut code = IrCode::new(IrOptions::testing());
        let chain = goto_chain(&mut code, 3);
        assert!(code.has_path_to(chain[0], chain[2]));
        assert!(code.has_path_to(chain[1], chain[1]));
        assert!(!code.has_path_to(chain[2], chain[0]));
    }

    #[test]
    fn test_rethrow_block_shape() {
        let mut code = IrCode::new(IrOptions::testing());
        let block = code.create_rethrow_block(Position::new(4, "m"));
        let b = code.block(block);
        assert!(b.is_filled() && b.is_sealed());
        assert_eq!(b.instructions().len(), 2);
        assert!(code.instruction(b.entry()).kind().is_move_exception());
        assert!(code.exit_kind(block).is_throw());
        assert_eq!(code.number_of_throwing_instructions(block), 1);
        assert_eq!(code.exceptional_exit(block), Some(b.exit()));
    }
}
