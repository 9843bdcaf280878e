//! Live-at-entry sets for the register allocator.
//!
//! A backward dataflow fixpoint over the block graph. Each block's entry set is the union of its
//! successors' entry sets and the phi operands flowing along its outgoing edges, minus what the
//! block defines, plus what it uses. Operand-stack values of a stack-machine encoding are tracked
//! as an ordered stack instead of a set; they may only be live across linear control flow.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, IrCode, ValueId, ValueStorage};

/// Values live on entry to a block.
#[derive(Debug, Clone, Default)]
pub struct LiveAtEntrySets {
    /// Every live value that needs a register, with or without a local binding
    pub live_values: FxHashSet<ValueId>,
    /// The live values bound to a source-level local, a subset of `live_values`
    pub live_local_values: FxHashSet<ValueId>,
    /// Live operand-stack values, bottom first
    pub live_stack_values: Vec<ValueId>,
}

impl LiveAtEntrySets {
    /// Returns `true` if nothing is live in registers or locals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_values.is_empty() && self.live_local_values.is_empty()
    }

    // The stack is fully determined by the other two sets, so it takes no part in convergence.
    fn same_sets(&self, other: &LiveAtEntrySets) -> bool {
        self.live_values == other.live_values && self.live_local_values == other.live_local_values
    }
}

impl IrCode {
    /// Computes the values live on entry to every reachable block.
    ///
    /// Blocks are processed in reverse topological order; a block whose entry sets change puts
    /// its predecessors back on the worklist.
    #[must_use]
    pub fn compute_live_at_entry_sets(&self) -> FxHashMap<BlockId, LiveAtEntrySets> {
        let mut live_at_entry: FxHashMap<BlockId, LiveAtEntrySets> = FxHashMap::default();
        let sorted = self.topologically_sorted_blocks();
        let mut worklist: VecDeque<BlockId> = sorted.iter().rev().copied().collect();
        let mut queued: FxHashSet<BlockId> = worklist.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            queued.remove(&block);
            let sets = self.live_at_entry_of(block, &live_at_entry);
            let changed = live_at_entry
                .get(&block)
                .is_none_or(|previous| !previous.same_sets(&sets));
            live_at_entry.insert(block, sets);
            if changed {
                for &pred in &self.block(block).predecessors {
                    if queued.insert(pred) {
                        worklist.push_back(pred);
                    }
                }
            }
        }

        debug_assert!(sorted
            .first()
            .and_then(|entry| live_at_entry.get(entry))
            .is_none_or(LiveAtEntrySets::is_empty));
        live_at_entry
    }

    fn live_at_entry_of(
        &self,
        block: BlockId,
        live_at_entry: &FxHashMap<BlockId, LiveAtEntrySets>,
    ) -> LiveAtEntrySets {
        let mut live = FxHashSet::default();
        let mut live_locals = FxHashSet::default();
        let mut live_stack: Vec<ValueId> = Vec::new();
        let b = self.block(block);
        let exceptional = self.catch_handlers(block).unique_targets();

        for &succ in &b.successors {
            if let Some(at_succ) = live_at_entry.get(&succ) {
                live.extend(at_succ.live_values.iter().copied());
                live_locals.extend(at_succ.live_local_values.iter().copied());
                if exceptional.contains(&succ) {
                    debug_assert!(at_succ.live_stack_values.is_empty());
                } else {
                    debug_assert!(live_stack.is_empty());
                    live_stack = at_succ.live_stack_values.clone();
                }
            }
            let Some(pred_index) = self.block(succ).predecessors.iter().position(|&p| p == block)
            else {
                continue;
            };
            for &phi in &self.block(succ).phis {
                let operand = self.phi_operands(phi)[pred_index];
                if self.value(operand).storage() == ValueStorage::Stack {
                    live_stack.push(operand);
                } else {
                    live.insert(operand);
                    // A phi bound to a local keeps that local live up to the end of every
                    // predecessor.
                    if self.value(phi).has_local_info() {
                        debug_assert_eq!(
                            self.value(phi).local_info(),
                            self.value(operand).local_info()
                        );
                        live_locals.insert(operand);
                    }
                }
            }
        }
        debug_assert!(live_stack.is_empty() || b.successors.len() - exceptional.len() == 1);

        for &instr in b.instructions.iter().rev() {
            let instruction = self.instruction(instr);
            if let Some(out) = instruction.out_value() {
                if self.value(out).storage() == ValueStorage::Stack {
                    let popped = live_stack.pop();
                    debug_assert_eq!(popped, Some(out));
                } else {
                    live.remove(&out);
                    debug_assert!(self.value(out).has_local_info() || !live_locals.contains(&out));
                    live_locals.remove(&out);
                }
            }
            for &input in instruction.inputs() {
                if self.value(input).needs_register() {
                    live.insert(input);
                } else {
                    live_stack.push(input);
                }
            }
            for &debug_value in instruction.debug_values() {
                debug_assert!(self.value(debug_value).has_local_info());
                live.insert(debug_value);
                live_locals.insert(debug_value);
            }
        }

        for &phi in &b.phis {
            if self.value(phi).storage() == ValueStorage::Stack {
                if let Some(index) = live_stack.iter().position(|&v| v == phi) {
                    live_stack.remove(index);
                }
            } else {
                live.remove(&phi);
            }
            live_locals.remove(&phi);
        }

        LiveAtEntrySets {
            live_values: live,
            live_local_values: live_locals,
            live_stack_values: live_stack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        BinopKind, DebugLocalInfo, IfCondition, InstructionKind, IrOptions, SsaBuilder, ValueType,
    };

    #[test]
    fn test_straight_line() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, exit);
        builder.set_current_block(entry);
        let a = builder.add_argument(0, ValueType::Int);
        let b = builder.add_argument(1, ValueType::Int);
        builder.add_goto().unwrap();
        builder.set_current_block(exit);
        let sum = builder.add_binop(BinopKind::Add, 2, a, b, ValueType::Int);
        builder.add_return(Some(sum)).unwrap();
        builder.build().unwrap();

        let live = code.compute_live_at_entry_sets();
        assert!(live[&entry].is_empty());
        assert_eq!(live[&exit].live_values, [a, b].into_iter().collect());
        assert!(live[&exit].live_local_values.is_empty());
    }

    #[test]
    fn test_phi_operands_live_out_of_predecessors() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let left = builder.new_block();
        let right = builder.new_block();
        let join = builder.new_block();
        builder.add_edge(entry, left);
        builder.add_edge(entry, right);
        builder.add_edge(left, join);
        builder.add_edge(right, join);

        builder.set_current_block(entry);
        let flag = builder.add_argument(0, ValueType::Int);
        builder.add_if(IfCondition::Eqz, &[flag]).unwrap();
        builder.set_current_block(left);
        let one = builder.add_const(1, 1, ValueType::Int);
        builder.add_goto().unwrap();
        builder.set_current_block(right);
        builder.add_const(1, 2, ValueType::Int);
        builder.add_goto().unwrap();
        builder.set_current_block(join);
        let merged = builder.read_register(1, ValueType::Int).unwrap();
        builder.add_return(Some(merged)).unwrap();
        builder.build().unwrap();

        let live = code.compute_live_at_entry_sets();
        assert!(live[&join].is_empty(), "a phi is not live on entry to its own block");
        assert!(live[&left].is_empty());
        assert!(!live[&left].live_values.contains(&one));
        assert!(live[&entry].is_empty());
    }

    #[test]
    fn test_loop_carried_value_is_live_in_header() {
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
        let limit = builder.add_argument(0, ValueType::Int);
        builder.add_const(1, 0, ValueType::Int);
        builder.add_goto().unwrap();
        builder.set_current_block(header);
        let counter = builder.read_register(1, ValueType::Int).unwrap();
        builder.add_if(IfCondition::Ge, &[counter, limit]).unwrap();
        builder.set_current_block(body);
        let counter = builder.read_register(1, ValueType::Int).unwrap();
        let one = builder.add_const(2, 1, ValueType::Int);
        builder.add_binop(BinopKind::Add, 1, counter, one, ValueType::Int);
        builder.add_goto().unwrap();
        builder.set_current_block(exit);
        let counter = builder.read_register(1, ValueType::Int).unwrap();
        builder.add_return(Some(counter)).unwrap();
        builder.build().unwrap();

        let live = code.compute_live_at_entry_sets();
        assert!(live[&header].live_values.contains(&limit));
        assert!(live[&body].live_values.contains(&limit));
        assert!(!live[&exit].live_values.contains(&limit));
        assert!(live[&entry].is_empty());
    }

    #[test]
    fn test_debug_values_are_live_locals() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, exit);
        builder.set_current_block(entry);
        builder.add_argument(0, ValueType::Int);
        builder.add_goto().unwrap();
        builder.set_current_block(exit);
        builder.add_return(None).unwrap();
        builder.build().unwrap();

        let local = code.create_value(ValueType::Int, Some(DebugLocalInfo::new("x", "int")));
        let konst = code.create_const_number(7, ValueType::Int);
        code.set_out_value(konst, Some(local));
        let mut cursor = code.cursor(entry);
        cursor.next();
        cursor.add(konst);
        let ret = code.block(exit).exit();
        code.add_debug_value(ret, local);

        let live = code.compute_live_at_entry_sets();
        assert!(live[&exit].live_values.contains(&local));
        assert!(live[&exit].live_local_values.contains(&local));
        assert!(!live[&entry].live_values.contains(&local));
    }

    #[test]
    fn test_stack_values() {
        let mut code = IrCode::new(IrOptions::testing());
        let mut builder = SsaBuilder::new(&mut code);
        let entry = builder.new_block();
        let exit = builder.new_block();
        builder.add_edge(entry, exit);
        builder.set_current_block(entry);
        builder.add_goto().unwrap();
        builder.set_current_block(exit);
        builder.add_return(None).unwrap();
        builder.build().unwrap();

        let stack = code.create_stack_value(ValueType::Int);
        let push = code.create_const_number(3, ValueType::Int);
        code.set_out_value(push, Some(stack));
        code.cursor(entry).add(push);
        let consume = code.create_instruction(InstructionKind::Pop, vec![stack], None);
        code.cursor(exit).add(consume);

        let live = code.compute_live_at_entry_sets();
        assert_eq!(live[&exit].live_stack_values, vec![stack]);
        assert!(live[&exit].live_values.is_empty());
        assert!(live[&entry].live_stack_values.is_empty());
    }
}
