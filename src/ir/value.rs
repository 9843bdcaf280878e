//! SSA values and their def-use bookkeeping.
//!
//! Every [`Value`] lives in the value arena of an [`IrCode`] and is addressed by a [`ValueId`].
//! A value is produced either by exactly one instruction or by a phi (see [`ValueDefinition`]),
//! and records three kinds of users:
//!
//! - **users**: instructions reading the value as an input (a multiset; an instruction reading a
//!   value twice is listed twice)
//! - **phi users**: phis reading the value as an operand (also a multiset)
//! - **debug users**: instructions keeping the value alive for source-level debugging only
//!
//! The lists are private to the crate. They are updated exclusively by the instruction, phi and
//! cursor operations, which keeps the def-use relation symmetric at all times.

use std::fmt;

use strum::{Display, EnumIter};

use crate::ir::{InstrId, InstructionKind, IrCode, Phi, ValueId};

/// The semantic type tag of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ValueType {
    /// 32-bit integer (also booleans, bytes, chars and shorts)
    #[strum(serialize = "int")]
    Int,
    /// 32-bit floating point
    #[strum(serialize = "float")]
    Float,
    /// 64-bit integer
    #[strum(serialize = "long")]
    Long,
    /// 64-bit floating point
    #[strum(serialize = "double")]
    Double,
    /// Object reference, including null
    #[strum(serialize = "ref")]
    Reference,
    /// A 32-bit value whose int/float nature is not yet known
    #[strum(serialize = "int|float")]
    IntOrFloat,
    /// A 64-bit value whose long/double nature is not yet known
    #[strum(serialize = "long|double")]
    LongOrDouble,
    /// No type information at all
    #[strum(serialize = "bottom")]
    Bottom,
}

impl ValueType {
    /// Returns `true` for types that fully determine the representation of the value.
    #[must_use]
    pub fn is_precise(self) -> bool {
        !matches!(
            self,
            ValueType::IntOrFloat | ValueType::LongOrDouble | ValueType::Bottom
        )
    }

    /// Returns `true` for [`ValueType::Bottom`].
    #[must_use]
    pub fn is_bottom(self) -> bool {
        self == ValueType::Bottom
    }

    /// Returns `true` for 64-bit types, which occupy two registers.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            ValueType::Long | ValueType::Double | ValueType::LongOrDouble
        )
    }

    /// Returns `true` for [`ValueType::Reference`].
    #[must_use]
    pub fn is_reference(self) -> bool {
        self == ValueType::Reference
    }
}

/// Where a value lives in the emitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueStorage {
    /// The value needs a register
    #[default]
    Register,
    /// The value is an operand-stack slot of a stack-machine encoding
    Stack,
}

/// Source-level local variable a value is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugLocalInfo {
    /// Name of the local variable
    pub name: String,
    /// Source type of the local variable
    pub type_name: String,
}

impl DebugLocalInfo {
    /// Creates a new local binding.
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

impl fmt::Display for DebugLocalInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.type_name)
    }
}

/// The producer of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDefinition {
    /// Created but not yet attached to an instruction
    None,
    /// Output of an instruction
    Instruction(InstrId),
    /// A phi owned by a block
    Phi(Phi),
    /// A phi that has been removed from its block
    Removed,
}

/// An SSA value.
#[derive(Debug, Clone)]
pub struct Value {
    pub(crate) ty: ValueType,
    pub(crate) local_info: Option<DebugLocalInfo>,
    pub(crate) storage: ValueStorage,
    pub(crate) definition: ValueDefinition,
    pub(crate) never_null: bool,
    pub(crate) is_this: bool,
    pub(crate) users: Vec<InstrId>,
    pub(crate) phi_users: Vec<ValueId>,
    pub(crate) debug_users: Vec<InstrId>,
}

impl Value {
    pub(crate) fn new(ty: ValueType, local_info: Option<DebugLocalInfo>) -> Self {
        Self {
            ty,
            local_info,
            storage: ValueStorage::Register,
            definition: ValueDefinition::None,
            never_null: false,
            is_this: false,
            users: Vec::new(),
            phi_users: Vec::new(),
            debug_users: Vec::new(),
        }
    }

    /// Returns the type tag.
    #[must_use]
    pub fn ty(&self) -> ValueType {
        self.ty
    }

    /// Returns the debug-local binding, if any.
    #[must_use]
    pub fn local_info(&self) -> Option<&DebugLocalInfo> {
        self.local_info.as_ref()
    }

    /// Returns `true` if the value is bound to a source-level local.
    #[must_use]
    pub fn has_local_info(&self) -> bool {
        self.local_info.is_some()
    }

    /// Returns the storage class of the value.
    #[must_use]
    pub fn storage(&self) -> ValueStorage {
        self.storage
    }

    /// Returns `true` unless the value is a stack-machine operand.
    #[must_use]
    pub fn needs_register(&self) -> bool {
        self.storage == ValueStorage::Register
    }

    /// Returns the producer of the value.
    #[must_use]
    pub fn definition(&self) -> &ValueDefinition {
        &self.definition
    }

    /// Returns the defining instruction, or `None` for phis and detached values.
    #[must_use]
    pub fn defining_instruction(&self) -> Option<InstrId> {
        match self.definition {
            ValueDefinition::Instruction(instr) => Some(instr),
            _ => None,
        }
    }

    /// Returns the phi data if this value is a live phi.
    #[must_use]
    pub fn phi(&self) -> Option<&Phi> {
        match &self.definition {
            ValueDefinition::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    pub(crate) fn phi_mut(&mut self) -> Option<&mut Phi> {
        match &mut self.definition {
            ValueDefinition::Phi(phi) => Some(phi),
            _ => None,
        }
    }

    /// Returns `true` if this value is a live phi.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.definition, ValueDefinition::Phi(_))
    }

    /// Returns `true` if this value was a phi that has been removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(self.definition, ValueDefinition::Removed)
    }

    /// Returns `true` if this value is the receiver argument.
    #[must_use]
    pub fn is_this(&self) -> bool {
        self.is_this
    }

    /// Returns `true` if the value is known never to be null.
    #[must_use]
    pub fn is_never_null(&self) -> bool {
        self.never_null
    }

    /// Instructions using this value, once per use.
    #[must_use]
    pub fn users(&self) -> &[InstrId] {
        &self.users
    }

    /// Instructions using this value, each listed once, in first-use order.
    #[must_use]
    pub fn unique_users(&self) -> Vec<InstrId> {
        unique(&self.users)
    }

    /// Phis using this value, once per operand slot.
    #[must_use]
    pub fn phi_users(&self) -> &[ValueId] {
        &self.phi_users
    }

    /// Phis using this value, each listed once, in first-use order.
    #[must_use]
    pub fn unique_phi_users(&self) -> Vec<ValueId> {
        unique(&self.phi_users)
    }

    /// Instructions keeping this value alive for debugging.
    #[must_use]
    pub fn debug_users(&self) -> &[InstrId] {
        &self.debug_users
    }

    /// Returns `true` if any instruction, phi or debug reader uses the value.
    #[must_use]
    pub fn is_used(&self) -> bool {
        !self.users.is_empty() || !self.phi_users.is_empty() || !self.debug_users.is_empty()
    }

    /// Returns the total number of uses (instruction, phi and debug).
    #[must_use]
    pub fn number_of_all_users(&self) -> usize {
        self.users.len() + self.phi_users.len() + self.debug_users.len()
    }

    pub(crate) fn add_user(&mut self, user: InstrId) {
        self.users.push(user);
    }

    pub(crate) fn remove_user(&mut self, user: InstrId) {
        if let Some(pos) = self.users.iter().position(|&u| u == user) {
            self.users.remove(pos);
        }
    }

    pub(crate) fn add_phi_user(&mut self, phi: ValueId) {
        self.phi_users.push(phi);
    }

    pub(crate) fn remove_phi_user(&mut self, phi: ValueId) {
        if let Some(pos) = self.phi_users.iter().position(|&p| p == phi) {
            self.phi_users.remove(pos);
        }
    }

    pub(crate) fn add_debug_user(&mut self, user: InstrId) {
        if !self.debug_users.contains(&user) {
            self.debug_users.push(user);
        }
    }

    pub(crate) fn remove_debug_user(&mut self, user: InstrId) {
        self.debug_users.retain(|&u| u != user);
    }
}

fn unique<T: Copy + PartialEq>(items: &[T]) -> Vec<T> {
    let mut result = Vec::with_capacity(items.len());
    for &item in items {
        if !result.contains(&item) {
            result.push(item);
        }
    }
    result
}

impl IrCode {
    /// Creates a new, unattached value.
    pub fn create_value(&mut self, ty: ValueType, local_info: Option<DebugLocalInfo>) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(Value::new(ty, local_info));
        id
    }

    /// Creates a new, unattached operand-stack value.
    pub fn create_stack_value(&mut self, ty: ValueType) -> ValueId {
        let id = self.create_value(ty, None);
        self.values[id.index()].storage = ValueStorage::Stack;
        id
    }

    /// Changes the type tag of a value.
    pub fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        self.values[value.index()].ty = ty;
    }

    /// Marks a value as the receiver argument.
    pub fn mark_this(&mut self, value: ValueId) {
        self.values[value.index()].is_this = true;
        self.values[value.index()].never_null = true;
    }

    /// Marks a value as never null.
    pub fn mark_never_null(&mut self, value: ValueId) {
        self.values[value.index()].never_null = true;
    }

    /// Returns `true` if the value is produced by an [`InstructionKind::Argument`].
    #[must_use]
    pub fn is_argument(&self, value: ValueId) -> bool {
        self.value(value)
            .defining_instruction()
            .is_some_and(|instr| self.instruction(instr).kind().is_argument())
    }

    /// Returns `true` if the value is the receiver argument.
    #[must_use]
    pub fn is_this(&self, value: ValueId) -> bool {
        self.value(value).is_this()
    }

    /// Follows aliasing definitions (currently [`InstructionKind::CheckCast`]) to the value they
    /// alias.
    #[must_use]
    pub fn aliased_value(&self, value: ValueId) -> ValueId {
        let mut current = value;
        // A well-formed graph has no cycles through non-phi definitions, but bound the walk anyway.
        for _ in 0..=self.instructions.len() {
            let Some(instr) = self.value(current).defining_instruction() else {
                return current;
            };
            let instruction = self.instruction(instr);
            match instruction.kind() {
                InstructionKind::CheckCast { .. } => current = instruction.inputs()[0],
                _ => return current,
            }
        }
        current
    }

    /// Returns the values that may change when `value` changes: out values of its users and its
    /// phi users.
    #[must_use]
    pub fn affected_values(&self, value: ValueId) -> Vec<ValueId> {
        let v = self.value(value);
        let mut result: Vec<ValueId> = v
            .unique_users()
            .into_iter()
            .filter_map(|user| self.instruction(user).out_value())
            .collect();
        for phi in v.unique_phi_users() {
            if !result.contains(&phi) {
                result.push(phi);
            }
        }
        result
    }

    /// Rewrites every user of `old` to use `new` instead, then clears the users of `old`.
    ///
    /// Instruction inputs and phi operands are always rewritten. Debug uses move to `new` only if
    /// it is bound to the same local as `old`; otherwise they are dropped.
    pub fn replace_users(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        for user in self.value(old).unique_users() {
            self.replace_value(user, old, new);
        }
        for phi in self.value(old).unique_phi_users() {
            self.replace_phi_operand(phi, old, new);
        }
        self.replace_debug_users(old, new);
        self.clear_users(old);
    }

    /// Moves the debug uses of `old` to `new` if both are bound to the same local, otherwise
    /// drops them.
    pub fn replace_debug_users(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let same_local = self.value(new).has_local_info()
            && self.value(new).local_info() == self.value(old).local_info();
        let debug_users = std::mem::take(&mut self.values[old.index()].debug_users);
        for user in debug_users {
            let debug_values = &mut self.instructions[user.index()].debug_values;
            debug_values.retain(|&v| v != old);
            if same_local {
                if !debug_values.contains(&new) {
                    debug_values.push(new);
                }
                self.values[new.index()].add_debug_user(user);
            }
        }
    }

    /// Forgets all users of a value without touching the users themselves.
    pub(crate) fn clear_users(&mut self, value: ValueId) {
        let v = &mut self.values[value.index()];
        v.users.clear();
        v.phi_users.clear();
        v.debug_users.clear();
    }
}
