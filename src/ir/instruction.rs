//! Instructions and their input/output bookkeeping.
//!
//! An [`Instruction`] lives in the instruction arena of an [`IrCode`] and is addressed by an
//! [`InstrId`]. The kind of an instruction is a closed enum, [`InstructionKind`]; the IR core only
//! needs a handful of structural predicates from it (can it throw, is it a jump, is it a debug
//! marker), and everything else about instruction semantics belongs to the passes that consume
//! the graph.
//!
//! # Jump encoding
//!
//! Jumps name their targets by position in the successor list of their block:
//!
//! | Kind     | Targets                                                       |
//! |----------|---------------------------------------------------------------|
//! | `Goto`   | the last successor                                            |
//! | `If`     | true target `successors[len - 2]`, fallthrough the last one  |
//! | `Switch` | explicit `target_indices` and `fallthrough_index`             |
//!
//! Every successor-list edit therefore has to rewrite these encodings in lock-step, which the
//! edge operations in [`crate::ir::IrCode`] do.

use strum::{Display, EnumIter};

use crate::ir::{BlockId, InstrId, IrCode, Position, ValueDefinition, ValueId, ValueType};

/// Condition of an [`InstructionKind::If`].
///
/// The `*z` variants compare their single input against zero (or null).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[allow(missing_docs)]
pub enum IfCondition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    Eqz,
    Nez,
    Ltz,
    Gez,
    Gtz,
    Lez,
}

impl IfCondition {
    /// Returns `true` for conditions comparing against zero.
    #[must_use]
    pub fn is_zero_test(self) -> bool {
        matches!(
            self,
            IfCondition::Eqz
                | IfCondition::Nez
                | IfCondition::Ltz
                | IfCondition::Gez
                | IfCondition::Gtz
                | IfCondition::Lez
        )
    }

    /// Returns the number of inputs the condition reads.
    #[must_use]
    pub fn arity(self) -> usize {
        if self.is_zero_test() {
            1
        } else {
            2
        }
    }
}

/// Operator of an [`InstructionKind::Binop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[allow(missing_docs)]
pub enum BinopKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// The closed set of instruction kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Binds parameter `index`; only at the start of the entry block
    Argument {
        /// Parameter index, the receiver is parameter 0 of instance methods
        index: usize,
    },
    /// Numeric constant
    ConstNumber(i64),
    /// String constant (may throw on resolution)
    ConstString(String),
    /// Arithmetic or logical operation on two inputs
    Binop(BinopKind),
    /// Checked downcast of the single input; the output aliases the input
    CheckCast {
        /// Target type
        type_name: String,
    },
    /// Method call
    Invoke {
        /// Called method
        method: String,
    },
    /// Receives the thrown exception; only as the entry of a catch handler
    MoveException,
    /// Monitor enter or exit on the single input
    Monitor {
        /// `true` for monitor-enter
        enter: bool,
    },
    /// Stack-machine load of a local onto the operand stack
    Load,
    /// Stack-machine store of the operand stack top into a local
    Store,
    /// Discards the operand stack top
    Pop,
    /// Reads debug values to keep them alive
    DebugLocalRead,
    /// Marks a source position
    DebugPosition,
    /// Defines a debug local that has no value yet
    DebugLocalUninitialized,
    /// Unconditional jump to the last successor
    Goto,
    /// Conditional jump
    If(IfCondition),
    /// Multi-way jump
    Switch {
        /// Case keys
        keys: Vec<i32>,
        /// Successor index of each case
        target_indices: Vec<usize>,
        /// Successor index taken when no key matches
        fallthrough_index: usize,
    },
    /// Normal method exit, with an optional return value input
    Return,
    /// Throws the single input
    Throw,
}

impl InstructionKind {
    /// Returns `true` if instructions of this kind can throw.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            InstructionKind::Binop(op) => matches!(op, BinopKind::Div | BinopKind::Rem),
            InstructionKind::ConstString(_)
            | InstructionKind::CheckCast { .. }
            | InstructionKind::Invoke { .. }
            | InstructionKind::Monitor { .. }
            | InstructionKind::Throw => true,
            _ => false,
        }
    }

    /// Returns `true` for block-terminating control transfers.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            InstructionKind::Goto
                | InstructionKind::If(_)
                | InstructionKind::Switch { .. }
                | InstructionKind::Return
                | InstructionKind::Throw
        )
    }

    /// Returns `true` for instructions that only carry debug information.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        matches!(
            self,
            InstructionKind::DebugLocalRead
                | InstructionKind::DebugPosition
                | InstructionKind::DebugLocalUninitialized
        )
    }

    /// Returns `true` for constants.
    #[must_use]
    pub fn is_const(&self) -> bool {
        matches!(
            self,
            InstructionKind::ConstNumber(_) | InstructionKind::ConstString(_)
        )
    }

    /// Returns `true` for [`InstructionKind::Store`].
    #[must_use]
    pub fn is_store(&self) -> bool {
        matches!(self, InstructionKind::Store)
    }

    /// Returns `true` for [`InstructionKind::Pop`].
    #[must_use]
    pub fn is_pop(&self) -> bool {
        matches!(self, InstructionKind::Pop)
    }

    /// Returns `true` for [`InstructionKind::Argument`].
    #[must_use]
    pub fn is_argument(&self) -> bool {
        matches!(self, InstructionKind::Argument { .. })
    }

    /// Returns `true` for [`InstructionKind::MoveException`].
    #[must_use]
    pub fn is_move_exception(&self) -> bool {
        matches!(self, InstructionKind::MoveException)
    }

    /// Returns `true` for [`InstructionKind::Return`].
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self, InstructionKind::Return)
    }

    /// Returns `true` for [`InstructionKind::Goto`].
    #[must_use]
    pub fn is_goto(&self) -> bool {
        matches!(self, InstructionKind::Goto)
    }

    /// Returns `true` for [`InstructionKind::If`].
    #[must_use]
    pub fn is_if(&self) -> bool {
        matches!(self, InstructionKind::If(_))
    }

    /// Returns `true` for [`InstructionKind::Switch`].
    #[must_use]
    pub fn is_switch(&self) -> bool {
        matches!(self, InstructionKind::Switch { .. })
    }

    /// Returns `true` for [`InstructionKind::Throw`].
    #[must_use]
    pub fn is_throw(&self) -> bool {
        matches!(self, InstructionKind::Throw)
    }

    /// Short mnemonic used in graph dumps.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InstructionKind::Argument { .. } => "argument",
            InstructionKind::ConstNumber(_) => "const-number",
            InstructionKind::ConstString(_) => "const-string",
            InstructionKind::Binop(_) => "binop",
            InstructionKind::CheckCast { .. } => "check-cast",
            InstructionKind::Invoke { .. } => "invoke",
            InstructionKind::MoveException => "move-exception",
            InstructionKind::Monitor { .. } => "monitor",
            InstructionKind::Load => "load",
            InstructionKind::Store => "store",
            InstructionKind::Pop => "pop",
            InstructionKind::DebugLocalRead => "debug-local-read",
            InstructionKind::DebugPosition => "debug-position",
            InstructionKind::DebugLocalUninitialized => "debug-local-uninitialized",
            InstructionKind::Goto => "goto",
            InstructionKind::If(_) => "if",
            InstructionKind::Switch { .. } => "switch",
            InstructionKind::Return => "return",
            InstructionKind::Throw => "throw",
        }
    }
}

/// A graph node with ordered inputs and at most one output.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) kind: InstructionKind,
    pub(crate) inputs: Vec<ValueId>,
    pub(crate) output: Option<ValueId>,
    pub(crate) debug_values: Vec<ValueId>,
    pub(crate) block: Option<BlockId>,
    pub(crate) number: i32,
    pub(crate) position: Position,
}

impl Instruction {
    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &InstructionKind {
        &self.kind
    }

    /// Returns the inputs in order.
    #[must_use]
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Returns input `index`.
    #[must_use]
    pub fn in_value(&self, index: usize) -> ValueId {
        self.inputs[index]
    }

    /// Returns the output, if any.
    #[must_use]
    pub fn out_value(&self) -> Option<ValueId> {
        self.output
    }

    /// Returns the debug values kept alive by this instruction.
    #[must_use]
    pub fn debug_values(&self) -> &[ValueId] {
        &self.debug_values
    }

    /// Returns the owning block, or `None` for detached instructions.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Returns the sequence number, `-1` when unnumbered.
    #[must_use]
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Returns the source position.
    #[must_use]
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Shorthand for `kind().can_throw()`.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        self.kind.can_throw()
    }

    /// Returns `true` if the instruction must carry a position in debug-info mode.
    ///
    /// Argument, debug-local and phi-move style bookkeeping instructions, and gotos are exempt.
    #[must_use]
    pub fn requires_position(&self) -> bool {
        !matches!(
            self.kind,
            InstructionKind::Argument { .. }
                | InstructionKind::DebugLocalRead
                | InstructionKind::DebugLocalUninitialized
                | InstructionKind::Goto
                | InstructionKind::Load
                | InstructionKind::Store
                | InstructionKind::Pop
        )
    }

    /// Checks that the position of the instruction is acceptable.
    ///
    /// Throwing instructions always need a position, except string constants, whose resolution
    /// failures are not attributed to a line. In debug-info mode every instruction that
    /// [requires a position](Self::requires_position) needs one, and a synthetic none counts.
    #[must_use]
    pub fn verify_valid_position_info(&self, debug: bool, all_throwing_have_positions: bool) -> bool {
        if debug && self.requires_position() && self.position.is_none() {
            return false;
        }
        if all_throwing_have_positions
            && self.can_throw()
            && !matches!(self.kind, InstructionKind::ConstString(_))
            && !self.position.is_some()
        {
            return false;
        }
        true
    }
}

impl IrCode {
    /// Creates a detached instruction, registering it as a user of its inputs and as the
    /// definition of its output.
    pub fn create_instruction(
        &mut self,
        kind: InstructionKind,
        inputs: Vec<ValueId>,
        output: Option<ValueId>,
    ) -> InstrId {
        let id = InstrId::new(self.instructions.len());
        for &input in &inputs {
            self.values[input.index()].add_user(id);
        }
        self.instructions.push(Instruction {
            kind,
            inputs,
            output: None,
            debug_values: Vec::new(),
            block: None,
            number: -1,
            position: Position::none(),
        });
        if output.is_some() {
            self.set_out_value(id, output);
        }
        id
    }

    /// Sets the output of an instruction, releasing the previous output's definition link.
    pub fn set_out_value(&mut self, instr: InstrId, value: Option<ValueId>) {
        if let Some(old) = self.instructions[instr.index()].output {
            if self.values[old.index()].definition == ValueDefinition::Instruction(instr) {
                self.values[old.index()].definition = ValueDefinition::None;
            }
        }
        self.instructions[instr.index()].output = value;
        if let Some(new) = value {
            debug_assert!(
                !self.value(new).is_phi(),
                "a phi cannot be the output of {}",
                instr
            );
            self.values[new.index()].definition = ValueDefinition::Instruction(instr);
        }
    }

    /// Detaches and returns the output of an instruction.
    pub fn clear_out_value(&mut self, instr: InstrId) -> Option<ValueId> {
        let old = self.instructions[instr.index()].output;
        self.set_out_value(instr, None);
        old
    }

    /// Sets the source position of an instruction.
    pub fn set_position(&mut self, instr: InstrId, position: Position) {
        self.instructions[instr.index()].position = position;
    }

    /// Sets the sequence number of an instruction.
    pub fn set_instruction_number(&mut self, instr: InstrId, number: i32) {
        self.instructions[instr.index()].number = number;
    }

    /// Replaces every input slot holding `old` with `new`, updating both user lists.
    pub fn replace_value(&mut self, instr: InstrId, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let mut replaced = 0;
        for input in self.instructions[instr.index()].inputs.iter_mut() {
            if *input == old {
                *input = new;
                replaced += 1;
            }
        }
        for _ in 0..replaced {
            self.values[old.index()].remove_user(instr);
            self.values[new.index()].add_user(instr);
        }
    }

    /// Replaces input slot `index` with `new`.
    pub fn replace_value_at(&mut self, instr: InstrId, index: usize, new: ValueId) {
        let old = std::mem::replace(&mut self.instructions[instr.index()].inputs[index], new);
        self.values[old.index()].remove_user(instr);
        self.values[new.index()].add_user(instr);
    }

    /// Adds a debug value to an instruction.
    pub fn add_debug_value(&mut self, instr: InstrId, value: ValueId) {
        let debug_values = &mut self.instructions[instr.index()].debug_values;
        if !debug_values.contains(&value) {
            debug_values.push(value);
        }
        self.values[value.index()].add_debug_user(instr);
    }

    /// Removes a debug value from an instruction.
    pub fn remove_debug_value(&mut self, instr: InstrId, value: ValueId) {
        self.instructions[instr.index()]
            .debug_values
            .retain(|&v| v != value);
        self.values[value.index()].remove_debug_user(instr);
    }

    /// Moves all debug values of `from` onto `to`.
    pub fn move_debug_values(&mut self, from: InstrId, to: InstrId) {
        let values = std::mem::take(&mut self.instructions[from.index()].debug_values);
        for value in values {
            self.values[value.index()].remove_debug_user(from);
            self.add_debug_value(to, value);
        }
    }

    /// Releases all inputs and debug values of an instruction.
    pub(crate) fn detach_inputs(&mut self, instr: InstrId) {
        let inputs = std::mem::take(&mut self.instructions[instr.index()].inputs);
        for input in inputs {
            self.values[input.index()].remove_user(instr);
        }
        let debug_values = std::mem::take(&mut self.instructions[instr.index()].debug_values);
        for value in debug_values {
            self.values[value.index()].remove_debug_user(instr);
        }
    }

    /// Creates a detached `ConstNumber` instruction with a fresh output value.
    pub fn create_const_number(&mut self, value: i64, ty: ValueType) -> InstrId {
        let out = self.create_value(ty, None);
        self.create_instruction(InstructionKind::ConstNumber(value), vec![], Some(out))
    }

    /// Creates a detached `Goto` instruction.
    pub fn create_goto(&mut self) -> InstrId {
        self.create_instruction(InstructionKind::Goto, vec![], None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrOptions;

    #[test]
    fn test_kind_predicates() {
        assert!(InstructionKind::Throw.can_throw());
        assert!(InstructionKind::Throw.is_jump());
        assert!(InstructionKind::Binop(BinopKind::Div).can_throw());
        assert!(!InstructionKind::Binop(BinopKind::Add).can_throw());
        assert!(InstructionKind::ConstString("s".into()).is_const());
        assert!(InstructionKind::DebugPosition.is_debug());
        assert!(!InstructionKind::Goto.can_throw());
        assert_eq!(IfCondition::Eqz.arity(), 1);
        assert_eq!(IfCondition::Lt.arity(), 2);
    }

    #[test]
    fn test_create_instruction_wires_users() {
        let mut code = IrCode::new(IrOptions::testing());
        let a = code.create_value(ValueType::Int, None);
        let b = code.create_value(ValueType::Int, None);
        let out = code.create_value(ValueType::Int, None);
        let add = code.create_instruction(InstructionKind::Binop(BinopKind::Add), vec![a, b], Some(out));

        assert_eq!(code.value(a).users(), &[add]);
        assert_eq!(code.value(out).defining_instruction(), Some(add));
        assert_eq!(code.instruction(add).number(), -1);
        assert!(code.instruction(add).block().is_none());
    }

    #[test]
    fn test_set_and_clear_out_value() {
        let mut code = IrCode::new(IrOptions::testing());
        let first = code.create_value(ValueType::Int, None);
        let second = code.create_value(ValueType::Int, None);
        let constant = code.create_instruction(InstructionKind::ConstNumber(1), vec![], Some(first));

        code.set_out_value(constant, Some(second));
        assert_eq!(code.value(second).defining_instruction(), Some(constant));
        assert_eq!(code.value(first).defining_instruction(), None);

        assert_eq!(code.clear_out_value(constant), Some(second));
        assert!(code.instruction(constant).out_value().is_none());
    }

    #[test]
    fn test_replace_value_at_and_debug_values() {
        let mut code = IrCode::new(IrOptions::testing());
        let a = code.create_value(ValueType::Int, None);
        let b = code.create_value(ValueType::Int, None);
        let add = code.create_instruction(InstructionKind::Binop(BinopKind::Add), vec![a, a], None);

        code.replace_value_at(add, 1, b);
        assert_eq!(code.instruction(add).inputs(), &[a, b]);
        assert_eq!(code.value(a).users(), &[add]);
        assert_eq!(code.value(b).users(), &[add]);

        let marker = code.create_instruction(InstructionKind::DebugLocalRead, vec![], None);
        code.add_debug_value(add, a);
        code.add_debug_value(add, a);
        assert_eq!(code.instruction(add).debug_values(), &[a]);
        code.move_debug_values(add, marker);
        assert!(code.instruction(add).debug_values().is_empty());
        assert_eq!(code.value(a).debug_users(), &[marker]);
    }

    #[test]
    fn test_position_requirements() {
        let mut code = IrCode::new(IrOptions::testing());
        let receiver = code.create_value(ValueType::Reference, None);
        let invoke = code.create_instruction(
            InstructionKind::Invoke {
                method: "m".into(),
            },
            vec![receiver],
            None,
        );
        assert!(!code.instruction(invoke).verify_valid_position_info(false, true));
        assert!(code.instruction(invoke).verify_valid_position_info(false, false));

        code.set_position(invoke, Position::new(1, "m"));
        assert!(code.instruction(invoke).verify_valid_position_info(true, true));

        let goto = code.create_goto();
        assert!(code.instruction(goto).verify_valid_position_info(true, true));
        let position = code.create_instruction(InstructionKind::DebugPosition, vec![], None);
        assert!(!code.instruction(position).verify_valid_position_info(true, false));
        code.set_position(position, Position::synthetic_none());
        assert!(code.instruction(position).verify_valid_position_info(true, false));
    }
}
