//! Marking colors, reachability and block removal.
//!
//! A marking color is one bit of the per-block `color` word. Several traversals can mark the same
//! graph at once as long as each uses its own color. Colors come from a fixed pool of 31 bits:
//! reserve one with [`IrCode::reserve_marking_color`] and hand it back with
//! [`IrCode::return_marking_color`], or let a [`MarkingScope`] do both.
//!
//! # Example
//!
//! ```rust
//! use irscope::ir::{IrCode, IrOptions, Position};
//!
//! let mut code = IrCode::new(IrOptions::testing());
//! let entry = code.create_goto_block(Position::none(), None);
//! code.push_block(entry);
//!
//! let mut scope = code.marking_scope();
//! let color = scope.color();
//! scope.mark_transitive_successors(entry, color);
//! assert!(scope.block(entry).is_marked(color));
//! drop(scope);
//!
//! assert!(code.no_colors_in_use());
//! ```

use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
};

use log::debug;
use rustc_hash::FxHashSet;

use crate::ir::{BlockId, InstructionKind, IrCode, ValueId};

/// The highest color bit handed out.
const MAX_MARKING_COLOR: u32 = 0x4000_0000;

impl IrCode {
    /// Reserves the lowest free marking color.
    ///
    /// # Panics
    ///
    /// Panics if all colors are in use.
    pub fn reserve_marking_color(&mut self) -> u32 {
        let mut color = 1;
        while color <= MAX_MARKING_COLOR {
            if !self.is_marking_color_in_use(color) {
                self.used_marking_colors |= color;
                debug_assert!(!self.any_blocks_marked_with_color(color));
                return color;
            }
            color <<= 1;
        }
        panic!("{}: all marking colors are in use", self.method);
    }

    /// Clears `color` from every block and returns it to the pool.
    pub fn return_marking_color(&mut self, color: u32) {
        assert!(
            self.is_marking_color_in_use(color),
            "marking color {:#x} is not reserved",
            color
        );
        self.clear_marks(color);
        self.used_marking_colors &= !color;
    }

    /// Returns `true` if at least one color is free.
    #[must_use]
    pub fn any_marking_color_available(&self) -> bool {
        let mut color = 1;
        while color <= MAX_MARKING_COLOR {
            if !self.is_marking_color_in_use(color) {
                return true;
            }
            color <<= 1;
        }
        false
    }

    /// Returns `true` if `color` is reserved.
    #[must_use]
    pub fn is_marking_color_in_use(&self, color: u32) -> bool {
        self.used_marking_colors & color != 0
    }

    /// Returns `true` if some block in the order carries `color`.
    #[must_use]
    pub fn any_blocks_marked_with_color(&self, color: u32) -> bool {
        self.order.iter().any(|&b| self.block(b).is_marked(color))
    }

    /// Returns `true` if no color is reserved.
    #[must_use]
    pub fn no_colors_in_use(&self) -> bool {
        self.used_marking_colors == 0
    }

    /// Reserves a color for the lifetime of the returned guard.
    pub fn marking_scope(&mut self) -> MarkingScope<'_> {
        let color = self.reserve_marking_color();
        MarkingScope { code: self, color }
    }

    /// Marks `block`.
    pub fn mark_block(&mut self, block: BlockId, color: u32) {
        debug_assert!(self.is_marking_color_in_use(color));
        self.blocks[block.index()].mark(color);
    }

    /// Clears `color` from every block in the order.
    pub fn clear_marks(&mut self, color: u32) {
        for &block in &self.order {
            self.blocks[block.index()].clear_mark(color);
        }
    }

    /// Marks `block` and everything reachable from it.
    pub fn mark_transitive_successors(&mut self, block: BlockId, color: u32) {
        self.mark_transitive(block, color, |code, b| code.block(b).successors.clone());
    }

    /// Marks `block` and everything that reaches it.
    pub fn mark_transitive_predecessors(&mut self, block: BlockId, color: u32) {
        self.mark_transitive(block, color, |code, b| code.block(b).predecessors.clone());
    }

    fn mark_transitive(
        &mut self,
        start: BlockId,
        color: u32,
        neighbors: impl Fn(&IrCode, BlockId) -> Vec<BlockId>,
    ) {
        debug_assert!(self.is_marking_color_in_use(color));
        if self.block(start).is_marked(color) {
            return;
        }
        let mut worklist = VecDeque::from([start]);
        self.blocks[start.index()].mark(color);
        while let Some(block) = worklist.pop_front() {
            for next in neighbors(self, block) {
                if !self.block(next).is_marked(color) {
                    self.blocks[next.index()].mark(color);
                    worklist.push_back(next);
                }
            }
        }
    }

    /// Returns the blocks reachable from the entry.
    #[must_use]
    pub fn reachable_blocks(&self) -> FxHashSet<BlockId> {
        let mut reachable = FxHashSet::default();
        if self.order.is_empty() {
            return reachable;
        }
        let entry = self.entry_block();
        let mut worklist = VecDeque::from([entry]);
        reachable.insert(entry);
        while let Some(block) = worklist.pop_front() {
            for &succ in &self.block(block).successors {
                if reachable.insert(succ) {
                    worklist.push_back(succ);
                }
            }
        }
        reachable
    }

    /// Returns the blocks of the order that are not reachable from the entry, in block order.
    #[must_use]
    pub fn get_unreachable_blocks(&self) -> Vec<BlockId> {
        let reachable = self.reachable_blocks();
        self.order
            .iter()
            .copied()
            .filter(|b| !reachable.contains(b))
            .collect()
    }

    /// Cleans and removes every block not reachable from the entry.
    ///
    /// Returns the values whose definitions or operands changed.
    pub fn remove_unreachable_blocks(&mut self) -> Vec<ValueId> {
        if self.order.is_empty() {
            return Vec::new();
        }
        let color = self.reserve_marking_color();
        let entry = self.entry_block();
        self.mark_transitive_successors(entry, color);

        let mut affected = Vec::new();
        let mut removed = Vec::new();
        for block in self.order.clone() {
            if !self.block(block).is_marked(color) {
                for value in self.clean_for_removal(block) {
                    if !affected.contains(&value) {
                        affected.push(value);
                    }
                }
                removed.push(block);
            }
        }
        self.remove_blocks(&removed);
        self.return_marking_color(color);
        if !removed.is_empty() {
            debug!(
                "{}: removed {} unreachable blocks",
                self.method,
                removed.len()
            );
        }
        affected
    }

    /// Drops every block carrying `color` from the order.
    pub fn remove_marked_blocks(&mut self, color: u32) {
        let blocks = &self.blocks;
        self.order.retain(|&b| !blocks[b.index()].is_marked(color));
    }

    /// Drops the given blocks from the order. Their edges must already be gone.
    pub fn remove_blocks(&mut self, blocks: &[BlockId]) {
        if blocks.is_empty() {
            return;
        }
        let removed: FxHashSet<BlockId> = blocks.iter().copied().collect();
        self.order.retain(|b| !removed.contains(b));
    }

    /// Reorders the blocks so that every block is followed by its fallthrough successor where
    /// possible.
    ///
    /// Chains of fallthroughs are laid out from the topological order. A fallthrough target that
    /// was already placed gets a goto trampoline right after the chain end. Unreachable blocks are
    /// dropped from the order.
    pub fn trace_blocks(&mut self) -> Vec<BlockId> {
        let sorted = self.topologically_sorted_blocks();
        let color = self.reserve_marking_color();
        let mut traced = Vec::with_capacity(sorted.len());
        let mut trampolines = 0;

        for block in sorted {
            if self.block(block).is_marked(color) {
                continue;
            }
            self.blocks[block.index()].mark(color);
            traced.push(block);

            let mut current = block;
            let mut fallthrough = self.fallthrough_block(current);
            while let Some(next) = fallthrough {
                if self.block(next).is_marked(color) {
                    break;
                }
                self.blocks[next.index()].mark(color);
                traced.push(next);
                current = next;
                fallthrough = self.fallthrough_block(current);
            }

            if let Some(target) = fallthrough {
                let position = self
                    .instruction(self.block(current).exit())
                    .position()
                    .clone();
                let trampoline = self.insert_fallthrough_trampoline(current, target, position);
                self.set_fallthrough_block(current, trampoline);
                self.blocks[trampoline.index()].mark(color);
                traced.push(trampoline);
                trampolines += 1;
            }
        }

        // Trampolines must be in the order before the color is cleared.
        self.order = traced.clone();
        self.return_marking_color(color);
        if trampolines > 0 {
            debug!(
                "{}: traced {} blocks with {} fallthrough trampolines",
                self.method,
                traced.len(),
                trampolines
            );
        }
        traced
    }

    /// Makes `target` the fallthrough successor of `block`.
    fn set_fallthrough_block(&mut self, block: BlockId, target: BlockId) {
        let index = match self.exit_kind(block) {
            InstructionKind::Goto | InstructionKind::If(_) => {
                self.block(block).successors.len() - 1
            }
            InstructionKind::Switch {
                fallthrough_index, ..
            } => *fallthrough_index,
            kind => panic!("{} has no fallthrough for {}", block, kind.name()),
        };
        self.blocks[block.index()].successors[index] = target;
    }
}

/// A reserved marking color that is returned when the scope ends.
///
/// The scope dereferences to the [`IrCode`] it was reserved from, so the graph stays usable
/// while the color is held.
pub struct MarkingScope<'a> {
    code: &'a mut IrCode,
    color: u32,
}

impl MarkingScope<'_> {
    /// Returns the reserved color.
    #[must_use]
    pub fn color(&self) -> u32 {
        self.color
    }
}

impl Deref for MarkingScope<'_> {
    type Target = IrCode;

    fn deref(&self) -> &IrCode {
        self.code
    }
}

impl DerefMut for MarkingScope<'_> {
    fn deref_mut(&mut self) -> &mut IrCode {
        self.code
    }
}

impl Drop for MarkingScope<'_> {
    fn drop(&mut self) {
        self.code.return_marking_color(self.color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IfCondition, IrOptions, Position, ValueType};

    fn goto_blocks(code: &mut IrCode, count: usize) -> Vec<BlockId> {
        (0..count)
            .map(|_| {
                let b = code.create_goto_block(Position::none(), None);
                code.push_block(b);
                b
            })
            .collect()
    }

    #[test]
    fn test_reserve_and_return_colors() {
        let mut code = IrCode::new(IrOptions::testing());
        let first = code.reserve_marking_color();
        let second = code.reserve_marking_color();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        code.return_marking_color(first);
        assert_eq!(code.reserve_marking_color(), 1);
        code.return_marking_color(1);
        code.return_marking_color(2);
        assert!(code.no_colors_in_use());
    }

    #[test]
    fn test_color_pool_exhaustion() {
        let mut code = IrCode::new(IrOptions::testing());
        let colors: Vec<u32> = (0..31).map(|_| code.reserve_marking_color()).collect();
        assert_eq!(colors.last(), Some(&MAX_MARKING_COLOR));
        assert!(!code.any_marking_color_available());
        code.return_marking_color(colors[4]);
        assert!(code.any_marking_color_available());
    }

    #[test]
    #[should_panic(expected = "all marking colors are in use")]
    fn test_reserve_beyond_pool_panics() {
        let mut code = IrCode::new(IrOptions::testing());
        for _ in 0..32 {
            code.reserve_marking_color();
        }
    }

    #[test]
    fn test_scope_returns_color() {
        let mut code = IrCode::new(IrOptions::testing());
        let blocks = goto_blocks(&mut code, 2);
        code.link(blocks[0], blocks[1]);
        {
            let mut scope = code.marking_scope();
            let color = scope.color();
            scope.mark_transitive_predecessors(blocks[1], color);
            assert!(scope.any_blocks_marked_with_color(color));
        }
        assert!(code.no_colors_in_use());
        assert!(!code.any_blocks_marked_with_color(1));
    }

    #[test]
    fn test_remove_unreachable_blocks() {
        let mut code = IrCode::new(IrOptions::testing());
        let blocks = goto_blocks(&mut code, 4);
        code.link(blocks[0], blocks[1]);
        // 2 <-> 3 is a cycle nobody enters
        code.link(blocks[2], blocks[3]);
        code.link(blocks[3], blocks[2]);

        assert_eq!(code.get_unreachable_blocks(), vec![blocks[2], blocks[3]]);
        code.remove_unreachable_blocks();
        assert_eq!(code.blocks(), &[blocks[0], blocks[1]]);
        assert!(code.block(blocks[2]).predecessors().is_empty());
        assert!(code.no_colors_in_use());
    }

    #[test]
    fn test_remove_marked_blocks() {
        let mut code = IrCode::new(IrOptions::testing());
        let blocks = goto_blocks(&mut code, 3);
        let color = code.reserve_marking_color();
        code.mark_block(blocks[1], color);
        code.remove_marked_blocks(color);
        assert_eq!(code.blocks(), &[blocks[0], blocks[2]]);
        code.return_marking_color(color);
    }

    #[test]
    fn test_trace_blocks_lays_out_fallthrough() {
        let mut code = IrCode::new(IrOptions::testing());
        let cond = code.create_value(ValueType::Int, None);
        let entry = code.create_block();
        let branch = code.create_instruction(InstructionKind::If(IfCondition::Eqz), vec![cond], None);
        code.append_instruction(entry, branch);
        code.push_block(entry);
        let blocks = goto_blocks(&mut code, 2);
        let (left, join) = (blocks[0], blocks[1]);
        // entry: if -> join, fallthrough left; left -> join
        code.link(entry, join);
        code.link(entry, left);
        code.link(left, join);

        let traced = code.trace_blocks();
        // join is placed right after left; the fallthrough of left is laid out directly.
        assert_eq!(&traced[..3], &[entry, left, join]);
        assert_eq!(traced.len(), 3);
        assert_eq!(code.blocks(), traced.as_slice());
    }

    #[test]
    fn test_trace_blocks_inserts_trampoline() {
        let mut code = IrCode::new(IrOptions::testing());
        let cond = code.create_value(ValueType::Int, None);
        let entry = goto_blocks(&mut code, 1)[0];
        let header = code.create_block();
        let branch = code.create_instruction(InstructionKind::If(IfCondition::Nez), vec![cond], None);
        code.append_instruction(header, branch);
        code.push_block(header);
        let blocks = goto_blocks(&mut code, 2);
        let (body, exit) = (blocks[0], blocks[1]);
        code.link(entry, header);
        code.link(header, exit);
        code.link(header, body);
        code.link(body, header);

        let traced = code.trace_blocks();
        assert_eq!(traced.len(), 5);
        assert_eq!(&traced[..3], &[entry, header, body]);
        let trampoline = traced[3];
        assert_eq!(traced[4], exit);
        assert_eq!(code.block(body).successors(), &[trampoline]);
        assert_eq!(code.block(trampoline).successors(), &[header]);
        assert_eq!(code.block(header).predecessors(), &[entry, trampoline]);
        assert!(code.no_colors_in_use());
    }

    #[test]
    fn test_remove_unreachable_blocks_on_empty_unit() {
        let mut code = IrCode::new(IrOptions::testing());
        assert!(code.remove_unreachable_blocks().is_empty());
        assert!(code.blocks().is_empty());
        assert!(code.no_colors_in_use());
    }

    #[test]
    fn test_mark_transitive_long_chain() {
        let mut code = IrCode::new(IrOptions::testing());
        let blocks = goto_blocks(&mut code, 10_000);
        for pair in blocks.windows(2) {
            code.link(pair[0], pair[1]);
        }
        let first = blocks[0];
        let last = blocks[blocks.len() - 1];

        let color = code.reserve_marking_color();
        code.mark_transitive_successors(first, color);
        assert!(blocks.iter().all(|&b| code.block(b).is_marked(color)));
        code.clear_marks(color);
        code.mark_transitive_predecessors(last, color);
        assert!(blocks.iter().all(|&b| code.block(b).is_marked(color)));
        code.clear_marks(color);
        code.return_marking_color(color);

        assert!(code.get_unreachable_blocks().is_empty());
        assert!(code.remove_unreachable_blocks().is_empty());
        assert_eq!(code.blocks().len(), blocks.len());
    }
}
