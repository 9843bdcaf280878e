//! Conservative "may contain" summary of a unit.
//!
//! Passes consult [`IrMetadata`] to skip units that cannot contain what they look for. The flags
//! are only ever added: recorded when an instruction is inserted and merged from an inlinee, never
//! cleared when instructions go away.

use bitflags::bitflags;

use crate::ir::InstructionKind;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    /// Instruction kinds a unit may contain
    pub struct IrMetadata : u32 {
        /// A parameter binding
        const ARGUMENT = 0x0001;
        /// A string constant
        const CONST_STRING = 0x0002;
        /// A checked downcast
        const CHECK_CAST = 0x0004;
        /// A method call
        const INVOKE = 0x0008;
        /// A monitor enter or exit
        const MONITOR = 0x0010;
        /// A multi-way jump
        const SWITCH = 0x0020;
        /// An explicit throw
        const THROW = 0x0040;
        /// A move-exception at a handler entry
        const MOVE_EXCEPTION = 0x0080;
        /// A debug position marker
        const DEBUG_POSITION = 0x0100;
        /// A debug local read
        const DEBUG_LOCAL_READ = 0x0200;
    }
}

impl IrMetadata {
    /// Returns the flag recorded for an instruction kind, if any.
    #[must_use]
    pub fn for_kind(kind: &InstructionKind) -> IrMetadata {
        match kind {
            InstructionKind::Argument { .. } => IrMetadata::ARGUMENT,
            InstructionKind::ConstString(_) => IrMetadata::CONST_STRING,
            InstructionKind::CheckCast { .. } => IrMetadata::CHECK_CAST,
            InstructionKind::Invoke { .. } => IrMetadata::INVOKE,
            InstructionKind::Monitor { .. } => IrMetadata::MONITOR,
            InstructionKind::Switch { .. } => IrMetadata::SWITCH,
            InstructionKind::Throw => IrMetadata::THROW,
            InstructionKind::MoveException => IrMetadata::MOVE_EXCEPTION,
            InstructionKind::DebugPosition => IrMetadata::DEBUG_POSITION,
            InstructionKind::DebugLocalRead => IrMetadata::DEBUG_LOCAL_READ,
            _ => IrMetadata::empty(),
        }
    }

    /// Records an instruction kind.
    pub fn record(&mut self, kind: &InstructionKind) {
        *self |= Self::for_kind(kind);
    }

    /// Merges the summary of an inlined unit.
    ///
    /// Arguments of the inlinee are replaced by the call's arguments, so they are not merged.
    pub fn merge(&mut self, inlinee: IrMetadata) {
        *self |= inlinee - IrMetadata::ARGUMENT;
    }
}
