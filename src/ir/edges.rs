//! Edge and catch-handler mutations.
//!
//! Successor lists are positional: gotos, `If`s, switches and catch-handler tables all refer to
//! successors by index. Every operation here that edits a successor list rewrites those encodings
//! in lock-step so the exit instruction of the block stays consistent.
//!
//! Most operations update one side of an edge only where the source graph does; the doc comment
//! of each operation says which side it touches.

use log::{debug, warn};

use crate::{
    ir::{
        BlockDominators, BlockId, CatchGuard, CatchHandlers, InstructionKind, IrCode, Position,
        ValueDefinition, ValueId, ValueStorage,
    },
    Error, Result,
};

/// Re-bases a successor index after slot `removed` was merged into slot `kept`.
fn rebase_merged_index(index: &mut usize, removed: usize, kept: usize) {
    if *index == removed {
        *index = kept;
    }
    if *index > removed {
        *index -= 1;
    }
}

impl IrCode {
    /// Adds the edge `block -> successor` on both sides.
    ///
    /// # Panics
    ///
    /// Panics if the edge already exists.
    pub fn link(&mut self, block: BlockId, successor: BlockId) {
        assert!(
            !self.block(block).successors.contains(&successor),
            "duplicate edge {} -> {}",
            block,
            successor
        );
        assert!(
            !self.block(successor).predecessors.contains(&block),
            "duplicate edge {} -> {}",
            block,
            successor
        );
        self.blocks[block.index()].successors.push(successor);
        self.blocks[successor.index()].predecessors.push(block);
    }

    /// Removes the only incoming edge of `block`, whose source must have no other successor.
    ///
    /// Returns the former predecessor.
    pub fn unlink_single_predecessor(&mut self, block: BlockId) -> BlockId {
        let b = self.block(block);
        assert_eq!(b.predecessors.len(), 1, "{} must have one predecessor", block);
        let pred = b.predecessors[0];
        assert_eq!(
            self.block(pred).successors.len(),
            1,
            "{} must have one successor",
            pred
        );
        self.blocks[pred.index()].successors.clear();
        self.blocks[block.index()].predecessors.clear();
        pred
    }

    /// Like [`IrCode::unlink_single_predecessor`], but the predecessor may have other successors.
    ///
    /// The edge is removed from the predecessor's successor list without rewriting its jump.
    pub fn unlink_single_predecessor_siblings_allowed(&mut self, block: BlockId) -> BlockId {
        let b = self.block(block);
        assert_eq!(b.predecessors.len(), 1, "{} must have one predecessor", block);
        let pred = b.predecessors[0];
        let successors = &mut self.blocks[pred.index()].successors;
        let index = successors
            .iter()
            .position(|&s| s == block)
            .unwrap_or_else(|| panic!("{} is not a successor of {}", block, pred));
        successors.remove(index);
        self.blocks[block.index()].predecessors.clear();
        pred
    }

    /// Removes the only outgoing edge of `block`, whose target must have no other predecessor.
    ///
    /// Returns the former successor.
    pub fn unlink_single_successor(&mut self, block: BlockId) -> BlockId {
        let b = self.block(block);
        assert!(!b.has_catch_handlers(), "{} has catch handlers", block);
        assert_eq!(b.successors.len(), 1, "{} must have one successor", block);
        let succ = b.successors[0];
        assert_eq!(
            self.block(succ).predecessors.len(),
            1,
            "{} must have one predecessor",
            succ
        );
        self.blocks[succ.index()].predecessors.clear();
        self.blocks[block.index()].successors.clear();
        succ
    }

    /// Unlinks a catch handler block from its single predecessor.
    pub fn unlink_catch_handler(&mut self, block: BlockId) {
        let preds = &self.block(block).predecessors;
        assert_eq!(preds.len(), 1, "catch handler {} must have one predecessor", block);
        let pred = preds[0];
        self.remove_successor(pred, block);
        self.blocks[block.index()].predecessors.clear();
    }

    /// Removes every outgoing edge of `block` on both sides.
    ///
    /// Phis of the former successors are not touched.
    pub fn detach_all_successors(&mut self, block: BlockId) {
        let successors = std::mem::take(&mut self.blocks[block.index()].successors);
        for succ in successors {
            let preds = &mut self.blocks[succ.index()].predecessors;
            if let Some(index) = preds.iter().position(|&p| p == block) {
                preds.remove(index);
            }
        }
    }

    /// Removes `successor` from the successor list of `block`.
    ///
    /// Catch handlers are re-based; the exit instruction and the successor's predecessor list
    /// are not updated.
    pub fn remove_successor(&mut self, block: BlockId, successor: BlockId) {
        let index = self
            .block(block)
            .successors
            .iter()
            .position(|&s| s == successor)
            .unwrap_or_else(|| panic!("{} is not a successor of {}", successor, block));
        self.remove_successors_by_index(block, &[index]);
    }

    /// Removes the successors at the given ascending indices.
    ///
    /// Catch handlers targeting a removed successor are dropped and the remaining handler
    /// targets are re-based.
    pub fn remove_successors_by_index(&mut self, block: BlockId, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        let b = &mut self.blocks[block.index()];
        let old = std::mem::take(&mut b.successors);
        b.successors = old
            .into_iter()
            .enumerate()
            .filter(|(i, _)| indices.binary_search(i).is_err())
            .map(|(_, s)| s)
            .collect();

        if b.has_catch_handlers() {
            let (guards, targets) = std::mem::take(&mut b.catch_handlers).into_parts();
            let mut new_guards = Vec::with_capacity(guards.len());
            let mut new_targets = Vec::with_capacity(targets.len());
            for (guard, target) in guards.into_iter().zip(targets) {
                if indices.binary_search(&target).is_ok() {
                    continue;
                }
                let decrease_by = indices.iter().take_while(|&&removed| removed < target).count();
                new_guards.push(guard);
                new_targets.push(target - decrease_by);
            }
            b.catch_handlers = CatchHandlers::new(new_guards, new_targets);
        }
    }

    /// Removes the edge `predecessor -> block` from the predecessor list of `block`.
    ///
    /// The matching phi operands are dropped and phis that become trivial are collapsed. A phi
    /// left with only itself as operand stays in place; its block is dead.
    pub fn remove_predecessor(&mut self, block: BlockId, predecessor: BlockId) {
        let index = self
            .block(block)
            .predecessors
            .iter()
            .position(|&p| p == predecessor)
            .unwrap_or_else(|| panic!("{} is not a predecessor of {}", predecessor, block));
        self.blocks[block.index()].predecessors.remove(index);
        let phis = self.block(block).phis.clone();
        for &phi in &phis {
            self.remove_phi_operand(phi, index);
        }
        let trivial: Vec<ValueId> = phis
            .into_iter()
            .filter(|&phi| self.value(phi).is_phi() && self.is_trivial_phi(phi))
            .collect();
        for phi in trivial {
            // Non-strict collapse never reports an undefined value.
            let _ = self.collapse_trivial_phis(phi, false);
        }
    }

    /// Removes the predecessors at the given ascending indices together with the matching phi
    /// operands. Trivial phis are not collapsed.
    pub fn remove_predecessors_by_index(&mut self, block: BlockId, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        let b = &mut self.blocks[block.index()];
        let old = std::mem::take(&mut b.predecessors);
        b.predecessors = old
            .into_iter()
            .enumerate()
            .filter(|(i, _)| indices.binary_search(i).is_err())
            .map(|(_, p)| p)
            .collect();
        for phi in self.block(block).phis.clone() {
            self.remove_phi_operands_by_index(phi, indices);
        }
    }

    /// Replaces `old` with `new` in the predecessor list of `block`, keeping its position.
    pub fn replace_predecessor(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let preds = &mut self.blocks[block.index()].predecessors;
        let slot = preds
            .iter_mut()
            .find(|p| **p == old)
            .unwrap_or_else(|| panic!("{} is not a predecessor of {}", old, block));
        *slot = new;
    }

    /// Swaps two successors of `block`, including their catch-handler references.
    pub fn swap_successors(&mut self, block: BlockId, a: BlockId, b: BlockId) {
        assert_ne!(a, b);
        let successors = &self.block(block).successors;
        let a_index = successors.iter().position(|&s| s == a);
        let b_index = successors.iter().position(|&s| s == b);
        match (a_index, b_index) {
            (Some(a_index), Some(b_index)) => self.swap_successors_by_index(block, a_index, b_index),
            _ => panic!("{} and {} must both be successors of {}", a, b, block),
        }
    }

    /// Swaps the successors at two indices, including their catch-handler references.
    pub fn swap_successors_by_index(&mut self, block: BlockId, first: usize, second: usize) {
        assert_ne!(first, second);
        let b = &mut self.blocks[block.index()];
        if b.has_catch_handlers() {
            let targets = b.catch_handlers.targets_mut();
            debug_assert_eq!(
                targets.contains(&first),
                targets.contains(&second),
                "swapping a normal successor with a catch successor"
            );
            for target in targets.iter_mut() {
                if *target == first {
                    *target = second;
                } else if *target == second {
                    *target = first;
                }
            }
        }
        b.successors.swap(first, second);
    }

    /// Replaces the successor `old` of `block` with `new`.
    ///
    /// If `new` is already a successor, the two edges are merged: catch handlers, goto, `If` and
    /// switch encodings are rewritten, and an `If` whose two targets become the same block is
    /// turned into a goto (popping operand-stack inputs). The predecessor list of `new` is left
    /// for the caller.
    pub fn replace_successor(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let successors = &self.block(block).successors;
        let old_index = successors
            .iter()
            .position(|&s| s == old)
            .unwrap_or_else(|| panic!("{} is not a successor of {}", old, block));
        let Some(new_index) = successors.iter().position(|&s| s == new) else {
            self.blocks[block.index()].successors[old_index] = new;
            return;
        };

        let b = self.block(block);
        let len = b.successors.len();
        let exit = b.exit();
        let (is_goto, is_if) = {
            let kind = self.instruction(exit).kind();
            (kind.is_goto(), kind.is_if())
        };

        if is_if && old_index >= len - 2 && new_index < len - 2 {
            // Keep the jump slot of `old` and drop the earlier slot of `new`.
            self.rebase_catch_targets(block, new_index, old_index);
            let successors = &mut self.blocks[block.index()].successors;
            successors.remove(new_index);
            successors[old_index - 1] = new;
            return;
        }

        self.rebase_catch_targets(block, old_index, new_index);
        if is_goto {
            if old_index == len - 1 && new_index != len - 2 {
                self.swap_successors_by_index(block, old_index - 1, new_index);
            }
        } else if is_if {
            if old_index >= len - 2 {
                self.replace_if_with_goto(block);
            }
        } else if let InstructionKind::Switch {
            target_indices,
            fallthrough_index,
            ..
        } = &mut self.instructions[exit.index()].kind
        {
            rebase_merged_index(fallthrough_index, old_index, new_index);
            for index in target_indices.iter_mut() {
                rebase_merged_index(index, old_index, new_index);
            }
        }

        let successors = &mut self.blocks[block.index()].successors;
        if let Some(index) = successors.iter().position(|&s| s == old) {
            successors.remove(index);
        }
    }

    fn rebase_catch_targets(&mut self, block: BlockId, removed: usize, kept: usize) {
        let b = &mut self.blocks[block.index()];
        if b.has_catch_handlers() {
            for target in b.catch_handlers.targets_mut().iter_mut() {
                rebase_merged_index(target, removed, kept);
            }
        }
    }

    /// Replaces the `If` ending `block` by a goto, popping its operand-stack inputs.
    fn replace_if_with_goto(&mut self, block: BlockId) {
        let Some(branch) = self.blocks[block.index()].instructions.pop() else {
            return;
        };
        let position = self.instruction(branch).position().clone();
        let inputs = std::mem::take(&mut self.instructions[branch.index()].inputs);
        for &value in inputs.iter().rev() {
            self.values[value.index()].remove_user(branch);
            if self.value(value).storage() != ValueStorage::Stack {
                continue;
            }
            let load = self
                .value(value)
                .defining_instruction()
                .filter(|&def| matches!(self.instruction(def).kind(), InstructionKind::Load));
            match load {
                Some(load) if !self.value(value).is_used() => {
                    self.detach_inputs(load);
                    self.clear_out_value(load);
                    self.remove_instruction_from_block(load);
                }
                _ => {
                    let pop = self.create_instruction(InstructionKind::Pop, vec![value], None);
                    self.set_position(pop, position.clone());
                    self.attach_instruction(block, pop);
                    self.blocks[block.index()].instructions.push(pop);
                }
            }
        }
        self.instructions[branch.index()].block = None;
        let goto = self.create_goto();
        self.set_position(goto, position);
        self.attach_instruction(block, goto);
        self.blocks[block.index()].instructions.push(goto);
    }

    /// Installs a catch-handler table, linking targets that are not yet successors.
    ///
    /// Catch targets are moved to the front of the successor list; normal successors keep their
    /// relative order and switch indices are remapped.
    pub fn link_catch_successors(
        &mut self,
        block: BlockId,
        guards: Vec<CatchGuard>,
        targets: &[BlockId],
    ) {
        let former = std::mem::take(&mut self.blocks[block.index()].successors);
        let mut successors: Vec<BlockId> = Vec::with_capacity(former.len() + targets.len());
        let mut indices = Vec::with_capacity(targets.len());
        for &target in targets {
            let index = match successors.iter().position(|&s| s == target) {
                Some(index) => index,
                None => {
                    successors.push(target);
                    if !former.contains(&target) {
                        self.blocks[target.index()].predecessors.push(block);
                    }
                    successors.len() - 1
                }
            };
            indices.push(index);
        }
        successors.extend(former.iter().copied().filter(|s| !targets.contains(s)));

        let remap: Vec<usize> = former
            .iter()
            .map(|s| successors.iter().position(|n| n == s).unwrap_or(0))
            .collect();
        let b = &mut self.blocks[block.index()];
        b.successors = successors;
        b.catch_handlers = CatchHandlers::new(guards, indices);
        if !b.is_empty() {
            let exit = b.exit();
            if let InstructionKind::Switch {
                target_indices,
                fallthrough_index,
                ..
            } = &mut self.instructions[exit.index()].kind
            {
                *fallthrough_index = remap[*fallthrough_index];
                for index in target_indices.iter_mut() {
                    *index = remap[*index];
                }
            }
        }
    }

    /// Adds `target` as the single catch handler of `block`, in front of the other successors.
    pub fn add_catch_handler(&mut self, block: BlockId, target: BlockId, guard: CatchGuard) {
        assert!(
            !self.block(block).has_catch_handlers(),
            "{} already has catch handlers",
            block
        );
        self.blocks[block.index()].successors.insert(0, target);
        self.blocks[target.index()].predecessors.push(block);
        self.shift_switch_indices(block, 1);
        self.blocks[block.index()].catch_handlers = CatchHandlers::new(vec![guard], vec![0]);
    }

    /// Shifts the successor indices of a switch ending `block`.
    pub(crate) fn shift_switch_indices(&mut self, block: BlockId, delta: isize) {
        let b = self.block(block);
        if b.is_empty() {
            return;
        }
        let exit = b.exit();
        if let InstructionKind::Switch {
            target_indices,
            fallthrough_index,
            ..
        } = &mut self.instructions[exit.index()].kind
        {
            *fallthrough_index = fallthrough_index.wrapping_add_signed(delta);
            for index in target_indices.iter_mut() {
                *index = index.wrapping_add_signed(delta);
            }
        }
    }

    /// Drops the catch handlers of `block` without touching its successors.
    pub fn clear_catch_handlers(&mut self, block: BlockId) {
        self.blocks[block.index()].catch_handlers = CatchHandlers::default();
    }

    /// Moves the catch-handler table of `other` to `block`.
    pub fn transfer_catch_handlers(&mut self, block: BlockId, other: BlockId) {
        let handlers = std::mem::take(&mut self.blocks[other.index()].catch_handlers);
        self.blocks[block.index()].catch_handlers = handlers;
    }

    /// Moves the catch successors of `from` to `block`.
    pub fn move_catch_handlers(&mut self, block: BlockId, from: BlockId) {
        let shared = self.append_catch_handlers(block, from);
        for successor in shared {
            let successors = &mut self.blocks[from.index()].successors;
            if let Some(index) = successors.iter().position(|&s| s == successor) {
                successors.remove(index);
            }
            self.remove_predecessor(successor, from);
        }
        self.clear_catch_handlers(from);
    }

    /// Copies the catch handlers of `from` to `block`.
    ///
    /// Nothing is copied if `block` already has a catch-all. Catch targets shared by both blocks
    /// get their incoming edges split, so every catch target keeps a single predecessor. The new
    /// trampoline blocks are returned in creation order and are not yet part of the block order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockStructure`] if a shared catch target is also reached through
    /// normal control flow.
    pub fn copy_catch_handlers(&mut self, block: BlockId, from: BlockId) -> Result<Vec<BlockId>> {
        if self.block(block).catch_handlers.has_catch_all() {
            warn!(
                "{}: not copying catch handlers of {} into {}, which has a catch-all",
                self.method, from, block
            );
            return Ok(Vec::new());
        }
        let shared = self.append_catch_handlers(block, from);
        let mut new_blocks = Vec::new();
        for successor in shared {
            new_blocks.extend(self.split_critical_exception_edges(successor)?);
        }
        Ok(new_blocks)
    }

    /// Appends the catch handlers of `from` (which must have some) to those of `block`.
    ///
    /// Guards already present are skipped. Returns the catch targets that are now shared with
    /// `from`; no phis are adjusted, that is left to the caller.
    fn append_catch_handlers(&mut self, block: BlockId, from: BlockId) -> Vec<BlockId> {
        debug_assert!(self.block(from).has_catch_handlers());
        let from_handlers = self.catch_handlers(from);

        let mut catch_successors: Vec<BlockId> = Vec::new();
        let mut new_guards = Vec::new();
        let mut new_targets = Vec::new();

        let b = self.block(block);
        if b.has_catch_handlers() {
            new_guards.extend(b.catch_handlers.guards().iter().cloned());
            new_targets.extend(b.catch_handlers.all_targets().iter().copied());
            for &target in &new_targets {
                let successor = b.successors[target];
                if !catch_successors.contains(&successor) {
                    catch_successors.push(successor);
                }
            }
        }
        let former_catch_count = catch_successors.len();

        for (guard, successor) in from_handlers.iter() {
            if new_guards.contains(guard) {
                continue;
            }
            debug_assert_eq!(self.block(successor).predecessors.len(), 1);
            debug_assert!(self.block(successor).phis.is_empty());
            let index = match catch_successors.iter().position(|&s| s == successor) {
                Some(index) => index,
                None => {
                    catch_successors.push(successor);
                    catch_successors.len() - 1
                }
            };
            new_guards.push(guard.clone());
            new_targets.push(index);
        }

        let former_successors = std::mem::take(&mut self.blocks[block.index()].successors);
        let mut shared = Vec::new();
        for (i, &successor) in catch_successors.iter().enumerate() {
            if i < former_catch_count {
                self.blocks[block.index()].successors.push(successor);
            } else {
                self.link(block, successor);
                shared.push(successor);
            }
        }
        self.blocks[block.index()].catch_handlers = CatchHandlers::new(new_guards, new_targets);

        for successor in former_successors {
            if !self.block(block).successors.contains(&successor) {
                debug_assert!(!self.exit_kind(block).is_throw());
                self.blocks[block.index()].successors.push(successor);
            }
        }
        shared
    }

    /// Restores edge-split form for a catch target with several predecessors.
    ///
    /// Every incoming edge gets its own trampoline block. If `block` started with a
    /// move-exception, it is moved into each trampoline and the received exceptions are merged
    /// by a new phi in `block`. Returns the trampolines, which are not yet part of the order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockStructure`] if a predecessor reaches `block` through a
    /// normal edge.
    pub fn split_critical_exception_edges(&mut self, block: BlockId) -> Result<Vec<BlockId>> {
        let predecessors = self.block(block).predecessors.clone();
        if let Some(&predecessor) = predecessors
            .iter()
            .find(|&&pred| !self.has_catch_successor(pred, block))
        {
            return Err(Error::InvalidBlockStructure(format!(
                "catch block {} reachable via non-exceptional flow from {}",
                block, predecessor
            )));
        }

        let position = self.block_position(block);
        let entry = self.block(block).entry();
        let move_exception = self
            .instruction(entry)
            .kind()
            .is_move_exception()
            .then_some(entry);

        let mut exception_info = None;
        if let Some(move_exception) = move_exception {
            debug_assert!(self.instruction(move_exception).debug_values().is_empty());
            let out = self.instruction(move_exception).out_value();
            exception_info = out.map(|out| {
                let value = self.value(out);
                (out, value.ty(), value.local_info().cloned())
            });
            self.blocks[block.index()].instructions.remove(0);
            self.instructions[move_exception.index()].block = None;
        }

        debug!(
            "{}: splitting {} exceptional edges into {}",
            self.method,
            predecessors.len(),
            block
        );
        let mut new_predecessors = Vec::with_capacity(predecessors.len());
        let mut values = Vec::with_capacity(predecessors.len());
        for predecessor in predecessors {
            let new_block = self.create_block();
            if let Some((_, ty, local)) = &exception_info {
                let value = self.create_value(*ty, local.clone());
                self.mark_never_null(value);
                values.push(value);
                let new_move =
                    self.create_instruction(InstructionKind::MoveException, vec![], Some(value));
                self.set_position(new_move, position.clone());
                self.append_instruction(new_block, new_move);
            } else if move_exception.is_some() {
                // The move-exception had no output; keep the shape without a value.
                let new_move = self.create_instruction(InstructionKind::MoveException, vec![], None);
                self.set_position(new_move, position.clone());
                self.append_instruction(new_block, new_move);
            }
            let goto = self.create_goto();
            self.set_position(goto, position.clone());
            self.append_instruction(new_block, goto);
            let nb = &mut self.blocks[new_block.index()];
            nb.filled = true;
            nb.sealed = true;
            nb.successors.push(block);
            nb.predecessors.push(predecessor);
            self.replace_successor(predecessor, block, new_block);
            new_predecessors.push(new_block);
        }
        self.blocks[block.index()].predecessors = new_predecessors.clone();

        if let Some((out, ty, local)) = exception_info {
            let phi = self.create_phi(block, ty, local);
            self.add_phi_operands(phi, values, false)?;
            self.replace_users(out, phi);
        }
        Ok(new_predecessors)
    }

    /// Splits `block` after its last instruction into a new, empty block.
    ///
    /// The new block takes over all successors. Catch handlers stay on `block` when
    /// `keep_catch_handlers` is set, otherwise they move with the successors. The two blocks are
    /// linked, and the new block is filled and sealed. It is not yet part of the block order.
    pub(crate) fn create_split_block(&mut self, block: BlockId, keep_catch_handlers: bool) -> BlockId {
        let had_catch_handlers = self.block(block).has_catch_handlers();
        let new_block = self.create_block();

        let successors = std::mem::take(&mut self.blocks[block.index()].successors);
        for &successor in &successors {
            self.replace_predecessor(successor, block, new_block);
        }
        self.blocks[new_block.index()].successors = successors;
        self.transfer_catch_handlers(new_block, block);

        if keep_catch_handlers && had_catch_handlers {
            self.move_catch_handlers(block, new_block);
        }

        self.link(block, new_block);
        let nb = &mut self.blocks[new_block.index()];
        nb.filled = true;
        nb.sealed = true;
        new_block
    }

    /// Disconnects `block` from the graph and releases every value it defines or uses.
    ///
    /// Returns the values whose definitions or operands changed. The block stays in the order;
    /// callers remove it with [`IrCode::remove_blocks`].
    pub fn clean_for_removal(&mut self, block: BlockId) -> Vec<ValueId> {
        let mut affected = Vec::new();

        let successors = std::mem::take(&mut self.blocks[block.index()].successors);
        for successor in successors {
            for phi in self.block(successor).phis.clone() {
                if !affected.contains(&phi) {
                    affected.push(phi);
                }
            }
            self.remove_predecessor(successor, block);
        }
        let predecessors = std::mem::take(&mut self.blocks[block.index()].predecessors);
        for predecessor in predecessors {
            if self.block(predecessor).successors.contains(&block) {
                self.remove_successor(predecessor, block);
            }
        }

        let phis = std::mem::take(&mut self.blocks[block.index()].phis);
        for phi in phis {
            if let Some(data) = self.values[phi.index()].phi_mut() {
                let operands = std::mem::take(&mut data.operands);
                for operand in operands {
                    self.values[operand.index()].remove_phi_user(phi);
                }
            }
            self.values[phi.index()].definition = ValueDefinition::Removed;
        }

        for instr in self.block(block).instructions.clone() {
            if let Some(out) = self.instruction(instr).out_value() {
                for value in self.affected_values(out) {
                    if !affected.contains(&value) {
                        affected.push(value);
                    }
                }
                self.clear_users(out);
                self.set_out_value(instr, None);
            }
            self.detach_inputs(instr);
        }
        self.blocks[block.index()].catch_handlers = CatchHandlers::default();
        affected
    }

    /// Cleans every block dominated by `successor`, the single-predecessor successor of `block`.
    ///
    /// Returns the cleaned blocks; they stay in the block order until removed.
    pub fn unlink(
        &mut self,
        block: BlockId,
        successor: BlockId,
        dominators: &BlockDominators,
    ) -> Vec<BlockId> {
        assert!(self.block(block).successors.contains(&successor));
        assert_eq!(
            self.block(successor).predecessors,
            [block],
            "{} must be the single predecessor of {}",
            block,
            successor
        );
        let removed = dominators.dominated_blocks(successor);
        for &dominated in &removed {
            self.clean_for_removal(dominated);
        }
        debug!(
            "{}: unlinked {} blocks dominated by {}",
            self.method,
            removed.len(),
            successor
        );
        removed
    }

    /// Splits every critical edge by inserting a goto trampoline on it.
    ///
    /// A predecessor of a merge block needs a trampoline unless it has a single normal exit.
    /// Trampolines are appended to the end of the block order.
    pub fn split_critical_edges(&mut self) {
        let mut new_blocks = Vec::new();
        for block in self.order.clone() {
            let predecessor_count = self.block(block).predecessors.len();
            if predecessor_count <= 1 {
                continue;
            }
            debug_assert!(
                self.block(block).is_empty()
                    || !self.instruction(self.block(block).entry()).kind().is_move_exception()
            );
            for pred_index in 0..predecessor_count {
                let pred = self.block(block).predecessors[pred_index];
                if self.has_one_normal_exit(pred) {
                    continue;
                }
                let position = self.instruction(self.block(pred).exit()).position().clone();
                let new_block = self.create_goto_block(position, Some(block));
                self.replace_successor(pred, block, new_block);
                self.blocks[new_block.index()].predecessors.push(pred);
                self.blocks[block.index()].predecessors[pred_index] = new_block;
                new_blocks.push(new_block);
            }
        }
        if !new_blocks.is_empty() {
            debug!(
                "{}: split {} critical edges",
                self.method,
                new_blocks.len()
            );
        }
        self.order.extend(new_blocks);
    }

    /// Checks that every merge block is entered through single-exit predecessors and every catch
    /// target has a single predecessor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGraph`] naming the first offending edge.
    pub fn verify_split_critical_edges(&self) -> Result<()> {
        for &block in &self.order {
            let preds = &self.block(block).predecessors;
            if preds.len() > 1 {
                for &pred in preds {
                    ensure_graph!(
                        self.has_one_normal_exit(pred),
                        "critical edge {} -> {}",
                        pred,
                        block
                    );
                    ensure_graph!(
                        self.block(pred).successors[0] == block,
                        "{} does not jump to {}",
                        pred,
                        block
                    );
                }
            }
            if self.block(block).has_catch_handlers() {
                for handler in self.catch_handlers(block).unique_targets() {
                    ensure_graph!(
                        self.block(handler).predecessors == [block],
                        "catch target {} of {} is not edge-split",
                        handler,
                        block
                    );
                }
            }
        }
        Ok(())
    }

    /// Creates a goto trampoline after `block` that jumps to `target`, placed right after `block`
    /// in the order. Used when a fallthrough cannot be laid out directly.
    pub(crate) fn insert_fallthrough_trampoline(
        &mut self,
        block: BlockId,
        target: BlockId,
        position: Position,
    ) -> BlockId {
        let trampoline = self.create_goto_block(position, Some(target));
        self.blocks[trampoline.index()].predecessors.push(block);
        self.replace_predecessor(target, block, trampoline);
        trampoline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IfCondition, IrOptions, ValueType};

    fn block_with_exit(code: &mut IrCode, kind: InstructionKind, inputs: Vec<ValueId>) -> BlockId {
        let block = code.create_block();
        let exit = code.create_instruction(kind, inputs, None);
        code.append_instruction(block, exit);
        code.push_block(block);
        block
    }

    fn goto_block(code: &mut IrCode) -> BlockId {
        let block = code.create_goto_block(Position::none(), None);
        code.push_block(block);
        block
    }

    #[test]
    fn test_replace_successor_merges_if_into_goto() {
        let mut code = IrCode::new(IrOptions::testing());
        let cond = code.create_value(ValueType::Int, None);
        let branch = block_with_exit(&mut code, InstructionKind::If(IfCondition::Eqz), vec![cond]);
        let taken = goto_block(&mut code);
        let fallthrough = goto_block(&mut code);
        code.link(branch, taken);
        code.link(branch, fallthrough);

        code.replace_successor(branch, taken, fallthrough);
        assert_eq!(code.block(branch).successors(), &[fallthrough]);
        assert!(code.exit_kind(branch).is_goto());
        assert!(!code.value(cond).is_used());
    }

    #[test]
    fn test_replace_successor_new_block() {
        let mut code = IrCode::new(IrOptions::testing());
        let cond = code.create_value(ValueType::Int, None);
        let branch = block_with_exit(&mut code, InstructionKind::If(IfCondition::Nez), vec![cond]);
        let taken = goto_block(&mut code);
        let fallthrough = goto_block(&mut code);
        let other = goto_block(&mut code);
        code.link(branch, taken);
        code.link(branch, fallthrough);

        code.replace_successor(branch, taken, other);
        assert_eq!(code.block(branch).successors(), &[other, fallthrough]);
        assert!(code.exit_kind(branch).is_if());
        // Predecessors of the new block are the caller's business.
        assert!(code.block(other).predecessors().is_empty());
    }

    #[test]
    fn test_replace_successor_rewrites_switch() {
        let mut code = IrCode::new(IrOptions::testing());
        let key = code.create_value(ValueType::Int, None);
        let switch = block_with_exit(
            &mut code,
            InstructionKind::Switch {
                keys: vec![1, 2],
                target_indices: vec![0, 1],
                fallthrough_index: 2,
            },
            vec![key],
        );
        let targets: Vec<BlockId> = (0..3).map(|_| goto_block(&mut code)).collect();
        for &target in &targets {
            code.link(switch, target);
        }

        code.replace_successor(switch, targets[0], targets[2]);
        assert_eq!(code.block(switch).successors(), &[targets[1], targets[2]]);
        match code.exit_kind(switch) {
            InstructionKind::Switch {
                target_indices,
                fallthrough_index,
                ..
            } => {
                assert_eq!(target_indices, &vec![1, 0]);
                assert_eq!(*fallthrough_index, 1);
            }
            other => panic!("unexpected exit {:?}", other),
        }
    }

    #[test]
    fn test_remove_successors_rebases_catch_handlers() {
        let mut code = IrCode::new(IrOptions::testing());
        let block = goto_block(&mut code);
        let handlers: Vec<BlockId> = (0..2)
            .map(|_| {
                let h = code.create_rethrow_block(Position::none());
                code.push_block(h);
                h
            })
            .collect();
        let normal = goto_block(&mut code);
        code.link_catch_successors(
            block,
            vec![CatchGuard::class("A"), CatchGuard::CatchAll],
            &handlers,
        );
        code.link(block, normal);

        code.remove_successor(block, handlers[0]);
        let table = code.block(block).catch_handlers_with_indices();
        assert_eq!(table.guards(), &[CatchGuard::CatchAll]);
        assert_eq!(table.all_targets(), &[0]);
        assert_eq!(code.normal_successors(block), vec![normal]);
    }

    #[test]
    fn test_split_critical_edges() {
        let mut code = IrCode::new(IrOptions::testing());
        let cond = code.create_value(ValueType::Int, None);
        let entry = block_with_exit(&mut code, InstructionKind::If(IfCondition::Eqz), vec![cond]);
        let left = goto_block(&mut code);
        let join = block_with_exit(&mut code, InstructionKind::Return, vec![]);
        code.link(entry, left);
        code.link(entry, join);
        code.link(left, join);

        code.split_critical_edges();
        assert!(code.verify_split_critical_edges().is_ok());
        let trampoline = code.block(join).predecessors()[0];
        assert_ne!(trampoline, entry);
        assert!(code.is_trivial_goto(trampoline));
        assert_eq!(code.block(entry).successors(), &[left, trampoline]);
        assert_eq!(code.blocks().last(), Some(&trampoline));
    }

    #[test]
    fn test_split_critical_exception_edges() {
        let mut code = IrCode::new(IrOptions::testing());
        let first = goto_block(&mut code);
        let second = goto_block(&mut code);
        let handler = code.create_rethrow_block(Position::none());
        code.push_block(handler);
        code.link_catch_successors(first, vec![CatchGuard::CatchAll], &[handler]);
        code.link_catch_successors(second, vec![CatchGuard::CatchAll], &[handler]);
        let exception = code.instruction(code.block(handler).entry()).out_value().unwrap();

        let trampolines = code.split_critical_exception_edges(handler).unwrap();
        assert_eq!(trampolines.len(), 2);
        assert_eq!(code.block(handler).predecessors(), trampolines.as_slice());
        assert_eq!(code.block(first).successors(), &[trampolines[0]]);
        assert!(code.has_catch_successor(first, trampolines[0]));

        let phi = code.block(handler).phis()[0];
        let throw = code.block(handler).exit();
        assert_eq!(code.instruction(throw).inputs(), &[phi]);
        assert!(!code.value(exception).is_used());
        assert_eq!(code.phi_operands(phi).len(), 2);
    }

    #[test]
    fn test_non_exceptional_edge_into_handler_is_rejected() {
        let mut code = IrCode::new(IrOptions::testing());
        let first = goto_block(&mut code);
        let handler = code.create_rethrow_block(Position::none());
        code.push_block(handler);
        code.link(first, handler);

        assert!(matches!(
            code.split_critical_exception_edges(handler),
            Err(Error::InvalidBlockStructure(_))
        ));
    }

    #[test]
    fn test_remove_predecessor_collapses_phi() {
        let mut code = IrCode::new(IrOptions::testing());
        let a = goto_block(&mut code);
        let b = goto_block(&mut code);
        let join = block_with_exit(&mut code, InstructionKind::Return, vec![]);
        code.link(a, join);
        code.link(b, join);
        let x = code.create_value(ValueType::Int, None);
        let y = code.create_value(ValueType::Int, None);
        let phi = code.create_phi(join, ValueType::Int, None);
        code.add_phi_operands(phi, vec![x, y], false).unwrap();
        let user = code.create_instruction(InstructionKind::Return, vec![phi], None);

        code.remove_predecessor(join, b);
        assert!(code.value(phi).is_removed());
        assert_eq!(code.instruction(user).inputs(), &[x]);
        assert!(code.value(y).phi_users().is_empty());
    }
}
