//! Splicing a callee graph in place of a call.
//!
//! [`InstructionCursor::inline_invoke`] replaces the invoke after the cursor with the whole graph
//! of the callee. The callee's arenas are appended to the caller's with shifted handles, its
//! parameter bindings are replaced by the call's arguments, and its returns are funnelled into a
//! single exit that continues with the code after the call. If the call site was covered by catch
//! handlers, every throwing block of the callee gets a copy of them.

use log::debug;
use rustc_hash::FxHashSet;

use crate::{
    ir::{
        cursor::place_blocks_after, BlockCursor, BlockId, InstrId, Instruction, InstructionCursor,
        InstructionKind, IrCode, Position, ValueDefinition, ValueId, ValueType,
    },
    Result,
};

/// Handle offsets of a unit appended to another unit's arenas.
#[derive(Debug, Clone, Copy)]
struct Offsets {
    values: usize,
    instructions: usize,
    blocks: usize,
}

impl Offsets {
    fn value(self, id: ValueId) -> ValueId {
        id.offset(self.values)
    }

    fn instruction(self, id: InstrId) -> InstrId {
        id.offset(self.instructions)
    }

    fn block(self, id: BlockId) -> BlockId {
        id.offset(self.blocks)
    }
}

impl IrCode {
    /// Moves the arenas of `inlinee` into this unit and returns its blocks in order.
    ///
    /// Blocks get fresh numbers and are not added to the block order. Positions are re-parented
    /// under `call_position`; throwing instructions without a position take the call position.
    fn import_unit(&mut self, inlinee: IrCode, call_position: &Position) -> Vec<BlockId> {
        let offsets = Offsets {
            values: self.values.len(),
            instructions: self.instructions.len(),
            blocks: self.blocks.len(),
        };

        for mut value in inlinee.values {
            for user in value.users.iter_mut().chain(value.debug_users.iter_mut()) {
                *user = offsets.instruction(*user);
            }
            for phi in value.phi_users.iter_mut() {
                *phi = offsets.value(*phi);
            }
            value.definition = match value.definition {
                ValueDefinition::Instruction(instr) => {
                    ValueDefinition::Instruction(offsets.instruction(instr))
                }
                ValueDefinition::Phi(mut phi) => {
                    phi.block = offsets.block(phi.block);
                    for operand in phi.operands.iter_mut() {
                        *operand = offsets.value(*operand);
                    }
                    phi.definition_users.clear();
                    ValueDefinition::Phi(phi)
                }
                other => other,
            };
            self.values.push(value);
        }

        for mut instruction in inlinee.instructions {
            for value in instruction
                .inputs
                .iter_mut()
                .chain(instruction.debug_values.iter_mut())
            {
                *value = offsets.value(*value);
            }
            instruction.output = instruction.output.map(|out| offsets.value(out));
            instruction.block = instruction.block.map(|block| offsets.block(block));
            instruction.number = -1;
            if instruction.position.is_some() {
                instruction.position = instruction.position.with_outermost_caller(call_position);
            } else if instruction.can_throw() && call_position.is_some() {
                instruction.position = call_position.clone();
            }
            self.instructions.push(instruction);
        }

        for mut block in inlinee.blocks {
            block.number = self.next_block_number();
            for instr in block.instructions.iter_mut() {
                *instr = offsets.instruction(*instr);
            }
            for phi in block.phis.iter_mut() {
                *phi = offsets.value(*phi);
            }
            for edge in block
                .predecessors
                .iter_mut()
                .chain(block.successors.iter_mut())
            {
                *edge = offsets.block(*edge);
            }
            block.incomplete_phis.clear();
            block.current_definitions = None;
            block.color = 0;
            self.blocks.push(block);
        }

        inlinee
            .order
            .into_iter()
            .map(|block| offsets.block(block))
            .collect()
    }

    /// Makes `exits`, the blocks of one inlined unit ending in a return, share a single return.
    ///
    /// With several exits a new block holding the only return is placed after the last exit; the
    /// returned values are merged by a phi unless they are all the same value. Returns the
    /// remaining return instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UndefinedValue`] if the merging phi cannot be formed.
    ///
    /// # Panics
    ///
    /// Panics if `exits` is empty.
    pub fn ensure_single_return_instruction(&mut self, exits: &[BlockId]) -> Result<InstrId> {
        assert!(!exits.is_empty(), "no normal exits to merge");
        if let [exit] = exits {
            return Ok(self.block(*exit).exit());
        }

        let exit_block = self.create_block();
        let returned: Vec<Option<ValueId>> = exits
            .iter()
            .map(|&exit| {
                self.instruction(self.block(exit).exit())
                    .inputs()
                    .first()
                    .copied()
            })
            .collect();
        let new_return = match returned.first().copied().flatten() {
            None => self.create_instruction(InstructionKind::Return, vec![], None),
            Some(first) => {
                let operands: Vec<ValueId> = returned
                    .iter()
                    .map(|value| {
                        value.unwrap_or_else(|| panic!("exits of one unit mix void and value returns"))
                    })
                    .collect();
                let value = if operands.iter().all(|&v| v == first) {
                    first
                } else {
                    // Operands are added once the exits are linked, in predecessor order.
                    let ty = self.value(first).ty();
                    self.create_phi(exit_block, ty, None)
                };
                self.create_instruction(InstructionKind::Return, vec![value], None)
            }
        };
        self.set_position(new_return, Position::none());
        self.append_instruction(exit_block, new_return);

        for &exit in exits {
            let goto = self.create_goto();
            let mut cursor = self.cursor_before(self.block(exit).exit());
            cursor.next();
            cursor.replace_current_instruction(goto);
            self.link(exit, exit_block);
        }

        if let Some(&phi) = self.block(exit_block).phis.first() {
            let operands = returned.into_iter().flatten().collect();
            self.add_phi_operands(phi, operands, false)?;
        }

        let b = &mut self.blocks[exit_block.index()];
        b.filled = true;
        b.sealed = true;
        place_blocks_after(self, exits[exits.len() - 1], &[exit_block]);
        Ok(new_return)
    }

    /// Splits `block` after every throwing instruction and gives each piece that can throw the
    /// catch handlers of `from`.
    fn split_block_and_copy_catch_handlers(&mut self, from: BlockId, block: BlockId) -> Result<()> {
        let mut current = Some(block);
        while let Some(block) = current {
            debug_assert!(!self.block(block).has_catch_handlers());
            let mut cursor = self.cursor(block);
            if cursor.next_until(Instruction::can_throw).is_none() {
                break;
            }
            current = if cursor.has_next() {
                Some(cursor.split(None))
            } else {
                None
            };
            let trampolines = self.copy_catch_handlers(block, from)?;
            place_blocks_after(self, block, &trampolines);
        }
        Ok(())
    }

    /// Copies the catch handlers of `from` to every inlined block that can throw.
    fn append_catch_handlers_to_inlined(&mut self, from: BlockId, inlined: &[BlockId]) -> Result<()> {
        for &block in inlined {
            if self.block(block).has_catch_handlers() {
                let trampolines = self.copy_catch_handlers(block, from)?;
                place_blocks_after(self, block, &trampolines);
            } else {
                self.split_block_and_copy_catch_handlers(from, block)?;
            }
        }
        Ok(())
    }

    fn collect_arguments_of(&self, entry: BlockId) -> Vec<ValueId> {
        self.block(entry)
            .instructions
            .iter()
            .map(|&instr| self.instruction(instr))
            .filter(|instruction| instruction.kind().is_argument())
            .filter_map(Instruction::out_value)
            .collect()
    }

    /// Removes the argument instruction defining `argument`, which must be unused.
    fn remove_argument_instruction(&mut self, argument: ValueId) {
        let Some(instr) = self.value(argument).defining_instruction() else {
            panic!("{} is not defined by an argument instruction", argument);
        };
        debug_assert!(self.instruction(instr).kind().is_argument());
        let mut cursor = self.cursor_before(instr);
        cursor.next();
        cursor.remove();
    }
}

impl InstructionCursor<'_> {
    /// Inlines `inlinee` in place of the invoke right after the cursor.
    ///
    /// The block is split around the invoke; the callee's arguments are replaced by the call's
    /// inputs (the receiver through a `CheckCast` to `downcast` if given and used), its returns
    /// are merged into one exit whose value replaces the call's result, and the callee graph is
    /// linked between the two halves. Catch handlers of the call site are copied to every callee
    /// block that can throw. If the callee never returns, the blocks after the call become dead:
    /// they are cleaned and added to `blocks_to_remove`, and stay in the order until the caller
    /// removes them.
    ///
    /// A given block cursor is positioned right after the former invoke block. Returns the block
    /// control continues with after the inlined code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidBlockStructure`] if a catch target of the call site is also
    /// reached through normal control flow, and [`crate::Error::UndefinedValue`] if returns cannot
    /// be merged.
    ///
    /// # Panics
    ///
    /// Panics if the next instruction is not an invoke, or if the argument counts differ.
    pub fn inline_invoke(
        &mut self,
        inlinee: IrCode,
        mut blocks: Option<&mut BlockCursor>,
        blocks_to_remove: &mut FxHashSet<BlockId>,
        downcast: Option<&str>,
    ) -> Result<BlockId> {
        let invoke = match self.peek_next() {
            Some(next) if matches!(self.code().instruction(next).kind(), InstructionKind::Invoke { .. }) => next,
            other => panic!("expected an invoke after the cursor in {}, found {:?}", self.block(), other),
        };
        let invoke_predecessor = self.block();
        let call_position = self.code().instruction(invoke).position().clone();
        let inlinee_metadata = inlinee.metadata();
        let inlinee_method = inlinee.method().to_string();
        let inlinee_can_throw = inlinee
            .instruction_ids()
            .any(|instr| inlinee.instruction(instr).can_throw());

        let invoke_block = self.split_n(blocks.as_deref_mut(), 1);
        let code = self.code_mut();
        debug_assert_eq!(code.block(invoke_block).instructions.len(), 2);
        let after_block = code
            .goto_target(invoke_block)
            .unwrap_or_else(|| panic!("{} must end in a goto", invoke_block));

        let inlined = code.import_unit(inlinee, &call_position);
        let inline_entry = inlined[0];
        let mut insert_at = code
            .block_index(invoke_block)
            .unwrap_or_else(|| panic!("{} is not in the block order", invoke_block));
        for &block in &inlined {
            code.insert_block(insert_at, block);
            insert_at += 1;
        }

        // Map the arguments, the receiver possibly through a cast.
        let arguments = code.collect_arguments_of(inline_entry);
        let inputs = code.instruction(invoke).inputs().to_vec();
        assert_eq!(
            arguments.len(),
            inputs.len(),
            "{} takes {} arguments, the call passes {}",
            inlinee_method,
            arguments.len(),
            inputs.len()
        );
        let mut mapped = 0;
        if let Some(type_name) = downcast {
            let receiver = arguments[0];
            debug_assert!(code.value(receiver).is_this());
            if code.value(receiver).is_used() {
                let cast_out = code.create_value(ValueType::Reference, None);
                let cast = code.create_instruction(
                    InstructionKind::CheckCast {
                        type_name: type_name.to_string(),
                    },
                    vec![inputs[0]],
                    Some(cast_out),
                );
                code.set_position(cast, call_position.clone());
                if code.block_can_throw(inline_entry) {
                    // The cast may throw as well, so it gets a block of its own.
                    code.cursor(inline_entry).split(None);
                }
                code.cursor(inline_entry).add(cast);
                code.replace_users(receiver, cast_out);
                code.remove_argument_instruction(receiver);
                mapped = 1;
            }
        }
        for (&argument, &input) in arguments.iter().zip(&inputs).skip(mapped) {
            code.replace_users(argument, input);
            code.remove_argument_instruction(argument);
        }

        let region_end = code
            .block_index(invoke_block)
            .unwrap_or_else(|| panic!("{} is not in the block order", invoke_block));
        let region_start = region_end - inlined.len();
        let normal_exits: Vec<BlockId> = code.order[region_start..region_end]
            .iter()
            .copied()
            .filter(|&block| code.exit_kind(block).is_return())
            .collect();

        let mut invoke_successor = after_block;
        let mut inline_exit = None;
        if !normal_exits.is_empty() {
            let ret = code.ensure_single_return_instruction(&normal_exits)?;
            if let Some(result) = code.instruction(invoke).out_value() {
                if let Some(&returned) = code.instruction(ret).inputs().first() {
                    code.replace_users(result, returned);
                } else {
                    assert!(
                        !code.value(result).is_used(),
                        "{} returns no value for the used result of {}",
                        inlinee_method,
                        invoke
                    );
                }
            }

            let return_block = code.cursor_before(ret).split_block(None, true);
            inline_exit = Some(code.unlink_single_predecessor_siblings_allowed(return_block));
            let mut cursor = code.cursor(return_block);
            cursor.next();
            cursor.remove();
            code.remove_blocks(&[return_block]);

            code.unlink_single_predecessor_siblings_allowed(invoke_block);
            let mut cursor = code.cursor(invoke_block);
            cursor.next();
            cursor.remove();
            invoke_successor = invoke_block;
        }

        code.link(invoke_predecessor, inline_entry);
        if let Some(exit) = inline_exit {
            code.link(exit, invoke_successor);
        }

        if code.block(invoke_block).has_catch_handlers() {
            let region_end = code
                .block_index(invoke_block)
                .unwrap_or_else(|| panic!("{} is not in the block order", invoke_block));
            let start = code
                .block_index(inline_entry)
                .unwrap_or_else(|| panic!("{} is not in the block order", inline_entry));
            let region = code.order[start..region_end].to_vec();
            code.append_catch_handlers_to_inlined(invoke_block, &region)?;
        }

        // Without a normal exit everything after the call is dead. This has to wait until the
        // catch handlers were copied, before that they are dominated by the invoke block.
        if normal_exits.is_empty() {
            debug_assert!(inlinee_can_throw);
            let dominators = code.dominator_tree();
            let removed = code.unlink(invoke_predecessor, invoke_block, &dominators);
            blocks_to_remove.extend(removed);
        }

        if let Some(cursor) = blocks {
            cursor.position_after(code, invoke_block);
        }
        code.metadata.merge(inlinee_metadata);
        debug!(
            "{}: inlined {} ({} blocks) at {}",
            code.method,
            inlinee_method,
            inlined.len(),
            invoke_block
        );
        Ok(invoke_successor)
    }
}
