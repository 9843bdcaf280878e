//! The graph container for one compiled unit.
//!
//! [`IrCode`] owns the block, instruction and value arenas of a unit together with the ordered
//! block sequence, the numbering state, the marking-color pool and the [`IrMetadata`] summary.
//! The first block of the order is the entry block.

use std::fmt;

use crate::{
    ir::{
        BasicBlock, BlockId, InstrId, Instruction, IrMetadata, IrOptions, Value, ValueId,
    },
    utils::BitSet,
    Result,
};

/// Distance between consecutive instruction numbers; odd numbers are left for later insertions.
pub(crate) const INSTRUCTION_NUMBER_DELTA: i32 = 2;

/// SSA control-flow graph of one compiled unit.
///
/// # Examples
///
/// ```rust
/// use irscope::prelude::*;
///
/// let mut code = IrCode::new(IrOptions::testing());
/// let block = code.create_goto_block(Position::none(), None);
/// code.push_block(block);
/// assert_eq!(code.entry_block(), block);
/// assert_eq!(code.highest_block_number(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct IrCode {
    pub(crate) options: IrOptions,
    pub(crate) method: String,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) values: Vec<Value>,
    pub(crate) order: Vec<BlockId>,
    pub(crate) metadata: IrMetadata,
    pub(crate) used_marking_colors: u32,
    pub(crate) next_instruction_number: i32,
    pub(crate) numbered: bool,
    pub(crate) next_block_number: i32,
}

impl IrCode {
    /// Creates an empty unit.
    #[must_use]
    pub fn new(options: IrOptions) -> Self {
        Self::with_method("<unit>", options)
    }

    /// Creates an empty unit for the named method.
    #[must_use]
    pub fn with_method(method: impl Into<String>, options: IrOptions) -> Self {
        Self {
            options,
            method: method.into(),
            blocks: Vec::new(),
            instructions: Vec::new(),
            values: Vec::new(),
            order: Vec::new(),
            metadata: IrMetadata::empty(),
            used_marking_colors: 0,
            next_instruction_number: 0,
            numbered: false,
            next_block_number: 0,
        }
    }

    /// Returns the options of the unit.
    #[must_use]
    pub fn options(&self) -> &IrOptions {
        &self.options
    }

    /// Returns the options of the unit for modification.
    pub fn options_mut(&mut self) -> &mut IrOptions {
        &mut self.options
    }

    /// Returns the name of the method this unit was built from.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the "may contain" summary of the unit.
    #[must_use]
    pub fn metadata(&self) -> IrMetadata {
        self.metadata
    }

    /// Returns a value.
    #[must_use]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    /// Returns an instruction.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    /// Returns a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Returns the blocks of the unit in their current order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    /// Returns the entry block.
    ///
    /// # Panics
    ///
    /// Panics if the unit has no blocks.
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.order[0]
    }

    /// Returns the number of values ever created in this unit.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the number of instructions ever created in this unit.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Returns the position of `block` in the block order.
    #[must_use]
    pub fn block_index(&self, block: BlockId) -> Option<usize> {
        self.order.iter().position(|&b| b == block)
    }

    /// Returns `true` if `block` is part of the block order.
    #[must_use]
    pub fn contains_block(&self, block: BlockId) -> bool {
        self.order.contains(&block)
    }

    /// Iterates over all instructions of the unit in block order.
    pub fn instruction_ids(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.order
            .iter()
            .flat_map(move |&block| self.block(block).instructions.iter().copied())
    }

    /// Creates an empty block with a fresh number. The block is not yet part of the order.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        let number = self.next_block_number();
        self.blocks.push(BasicBlock::new(number));
        id
    }

    /// Returns a fresh block number.
    pub fn next_block_number(&mut self) -> i32 {
        let number = self.next_block_number;
        self.next_block_number += 1;
        number
    }

    /// Returns the highest number of any block in the order, or `-1` if there are none.
    #[must_use]
    pub fn highest_block_number(&self) -> i32 {
        self.order
            .iter()
            .map(|&b| self.block(b).number)
            .max()
            .unwrap_or(-1)
    }

    /// Appends a block to the order.
    pub fn push_block(&mut self, block: BlockId) {
        debug_assert!(!self.order.contains(&block), "{} already in order", block);
        self.order.push(block);
    }

    /// Inserts `block` into the order at `index`.
    pub fn insert_block(&mut self, index: usize, block: BlockId) {
        debug_assert!(!self.order.contains(&block), "{} already in order", block);
        self.order.insert(index, block);
    }

    /// Inserts `block` into the order right after `existing`.
    ///
    /// # Panics
    ///
    /// Panics if `existing` is not part of the order.
    pub fn insert_block_after(&mut self, existing: BlockId, block: BlockId) {
        let index = self
            .block_index(existing)
            .unwrap_or_else(|| panic!("{} is not in the block order", existing));
        self.insert_block(index + 1, block);
    }

    /// Inserts `block` into the order right before `existing`.
    ///
    /// # Panics
    ///
    /// Panics if `existing` is not part of the order.
    pub fn insert_block_before(&mut self, existing: BlockId, block: BlockId) {
        let index = self
            .block_index(existing)
            .unwrap_or_else(|| panic!("{} is not in the block order", existing));
        self.insert_block(index, block);
    }

    /// Returns the reachable blocks in a depth-first reverse post-order from the entry.
    ///
    /// With [`IrOptions::place_exceptional_blocks_last`] every block starting with a
    /// move-exception is moved to the end, keeping relative order.
    #[must_use]
    pub fn topologically_sorted_blocks(&self) -> Vec<BlockId> {
        let ordered = self.depth_first_sorting();
        if self.options.place_exceptional_blocks_last {
            self.place_exceptional_blocks_last(ordered)
        } else {
            ordered
        }
    }

    fn depth_first_sorting(&self) -> Vec<BlockId> {
        enum Item {
            Visit(BlockId),
            Finish(BlockId),
        }

        if self.order.is_empty() {
            return Vec::new();
        }
        let mut post_order = Vec::with_capacity(self.order.len());
        let mut visited = BitSet::new(self.blocks.len());
        let mut worklist = vec![Item::Visit(self.entry_block())];
        while let Some(item) = worklist.pop() {
            match item {
                Item::Finish(block) => post_order.push(block),
                Item::Visit(block) => {
                    if !visited.insert(block.index()) {
                        continue;
                    }
                    worklist.push(Item::Finish(block));
                    for &succ in self.block(block).successors.iter().rev() {
                        worklist.push(Item::Visit(succ));
                    }
                }
            }
        }
        post_order.reverse();
        post_order
    }

    fn place_exceptional_blocks_last(&self, blocks: Vec<BlockId>) -> Vec<BlockId> {
        let is_exceptional = |block: BlockId| {
            let b = self.block(block);
            !b.is_empty() && self.instruction(b.entry()).kind().is_move_exception()
        };
        let (mut normal, exceptional): (Vec<_>, Vec<_>) =
            blocks.into_iter().partition(|&b| !is_exceptional(b));
        normal.extend(exceptional);
        normal
    }

    /// Numbers all instructions in topological block order with even numbers.
    ///
    /// Returns the block order used.
    pub fn number_instructions(&mut self) -> Vec<BlockId> {
        let sorted = self.topologically_sorted_blocks();
        for &block in &sorted {
            for instr in self.blocks[block.index()].instructions.clone() {
                let number = self.next_instruction_number;
                self.instructions[instr.index()].number = number;
                self.next_instruction_number += INSTRUCTION_NUMBER_DELTA;
            }
        }
        sorted
    }

    /// Numbers every instruction that has no number yet and returns the next free number.
    pub fn number_remaining_instructions(&mut self) -> i32 {
        for block in self.order.clone() {
            for instr in self.blocks[block.index()].instructions.clone() {
                if self.instructions[instr.index()].number == -1 {
                    self.instructions[instr.index()].number = self.next_instruction_number;
                    self.next_instruction_number += INSTRUCTION_NUMBER_DELTA;
                }
            }
        }
        self.next_instruction_number
    }

    /// Returns the next instruction number that would be assigned.
    #[must_use]
    pub fn next_instruction_number(&self) -> i32 {
        self.next_instruction_number
    }

    /// Numbers the blocks in topological order, once.
    pub fn ensure_block_numbering(&mut self) {
        if self.numbered {
            return;
        }
        self.numbered = true;
        let mut number = 0;
        for block in self.topologically_sorted_blocks() {
            self.blocks[block.index()].number = number;
            number += 1;
        }
        self.next_block_number = self.next_block_number.max(number);
    }

    /// Returns the outputs of the argument instructions of the entry block, in order.
    ///
    /// With `ignore_receiver` the receiver argument is skipped.
    #[must_use]
    pub fn collect_arguments(&self, ignore_receiver: bool) -> Vec<ValueId> {
        if self.order.is_empty() {
            return Vec::new();
        }
        self.block(self.entry_block())
            .instructions
            .iter()
            .map(|&instr| self.instruction(instr))
            .filter(|instruction| instruction.kind().is_argument())
            .filter_map(Instruction::out_value)
            .filter(|&out| !ignore_receiver || !self.value(out).is_this())
            .collect()
    }

    /// Returns the receiver argument, if the unit has one.
    #[must_use]
    pub fn get_this(&self) -> Option<ValueId> {
        self.collect_arguments(false)
            .first()
            .copied()
            .filter(|&first| self.value(first).is_this())
    }

    /// Returns the blocks ending in a return.
    #[must_use]
    pub fn compute_normal_exit_blocks(&self) -> Vec<BlockId> {
        self.order
            .iter()
            .copied()
            .filter(|&block| {
                !self.block(block).is_empty() && self.exit_kind(block).is_return()
            })
            .collect()
    }

    /// Returns `true` if any block has catch handlers.
    #[must_use]
    pub fn has_catch_handlers(&self) -> bool {
        self.order
            .iter()
            .any(|&block| self.block(block).has_catch_handlers())
    }

    /// Merges the metadata summary of an inlined unit.
    pub fn copy_metadata_from_inlinee(&mut self, inlinee: &IrCode) {
        self.metadata.merge(inlinee.metadata);
    }

    /// Returns `true` if every throwing instruction (except string constants) has a position.
    #[must_use]
    pub fn compute_all_throwing_instructions_have_positions(&self) -> bool {
        self.instruction_ids().all(|instr| {
            let instruction = self.instruction(instr);
            !instruction.can_throw()
                || matches!(instruction.kind(), crate::ir::InstructionKind::ConstString(_))
                || !instruction.position().is_none()
        })
    }

    /// Recomputes [`IrOptions::all_throwing_instructions_have_positions`] from the instructions.
    pub fn update_all_throwing_instructions_have_positions(&mut self) {
        self.options.all_throwing_instructions_have_positions =
            self.compute_all_throwing_instructions_have_positions();
    }

    /// Runs [`IrCode::is_consistent_ssa`] when verification is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGraph`] if a check fails.
    pub fn debug_check(&self) -> Result<()> {
        if self.options.verify {
            self.is_consistent_ssa()?;
        }
        Ok(())
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.method)?;
        for &block in &self.order {
            let b = self.block(block);
            write!(f, "block {} ({})", b.number, block)?;
            if !b.predecessors.is_empty() {
                let preds: Vec<String> = b
                    .predecessors
                    .iter()
                    .map(|&p| self.block(p).number.to_string())
                    .collect();
                write!(f, ", pred-counts: {}, preds: {}", preds.len(), preds.join(" "))?;
            }
            writeln!(f)?;
            for &phi in &b.phis {
                let operands: Vec<String> =
                    self.phi_operands(phi).iter().map(ToString::to_string).collect();
                writeln!(f, "  {} <- phi({})", phi, operands.join(", "))?;
            }
            for &instr in &b.instructions {
                let instruction = self.instruction(instr);
                write!(f, "  {:>4}: ", instruction.number())?;
                if let Some(out) = instruction.out_value() {
                    write!(f, "{} <- ", out)?;
                }
                write!(f, "{}", instruction.kind().name())?;
                for input in instruction.inputs() {
                    write!(f, " {}", input)?;
                }
                writeln!(f)?;
            }
            if b.has_catch_handlers() {
                for (guard, target) in self.catch_handlers(block).iter() {
                    writeln!(f, "  catch {} -> {}", guard, self.block(target).number)?;
                }
            }
        }
        Ok(())
    }
}
