//! Phi values and minimal-SSA phi pruning.
//!
//! A phi is a [`Value`](crate::ir::Value) whose definition is [`ValueDefinition::Phi`]. Its
//! operands are aligned with the predecessor list of the owning block: operand `i` is the value
//! flowing in along the edge from predecessor `i`.
//!
//! During construction a phi may be *incomplete* (no operands yet) while its block is unsealed.
//! Once operands are added, a phi that merges at most one distinct non-self value is *trivial*
//! and is collapsed into that value. Collapsing can make phis that used the collapsed phi trivial
//! in turn; those are re-tested through an explicit work-list.

use log::trace;

use crate::{
    ir::{BlockId, DebugLocalInfo, IrCode, Value, ValueDefinition, ValueId, ValueType},
    Error, Result,
};

/// The phi-specific part of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub(crate) block: BlockId,
    pub(crate) operands: Vec<ValueId>,
    /// Blocks whose current-definition map refers to this phi during construction
    pub(crate) definition_users: Vec<BlockId>,
}

impl Phi {
    /// Returns the block owning the phi.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Returns the operands, aligned with the predecessors of the owning block.
    #[must_use]
    pub fn operands(&self) -> &[ValueId] {
        &self.operands
    }

    /// Returns the operand flowing in from predecessor `pred_index`.
    #[must_use]
    pub fn operand(&self, pred_index: usize) -> ValueId {
        self.operands[pred_index]
    }
}

impl IrCode {
    /// Creates an operand-less phi and appends it to the phis of `block`.
    pub fn create_phi(
        &mut self,
        block: BlockId,
        ty: ValueType,
        local_info: Option<DebugLocalInfo>,
    ) -> ValueId {
        let id = ValueId::new(self.values.len());
        let mut value = Value::new(ty, local_info);
        value.definition = ValueDefinition::Phi(Phi {
            block,
            operands: Vec::new(),
            definition_users: Vec::new(),
        });
        self.values.push(value);
        self.blocks[block.index()].phis.push(id);
        id
    }

    fn phi_data(&self, phi: ValueId) -> &Phi {
        match self.value(phi).phi() {
            Some(data) => data,
            None => panic!("{} is not a phi", phi),
        }
    }

    pub(crate) fn phi_data_mut(&mut self, phi: ValueId) -> &mut Phi {
        match self.values[phi.index()].phi_mut() {
            Some(data) => data,
            None => panic!("{} is not a phi", phi),
        }
    }

    /// Returns the operands of a phi.
    #[must_use]
    pub fn phi_operands(&self, phi: ValueId) -> &[ValueId] {
        &self.phi_data(phi).operands
    }

    /// Completes a phi with one operand per predecessor.
    ///
    /// Operands may be added only once. With `remove_trivial` the phi is collapsed right away if
    /// it turns out to be trivial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedValue`] if `operands` is empty, or if the phi collapses and has
    /// no operand other than itself.
    pub fn add_phi_operands(
        &mut self,
        phi: ValueId,
        operands: Vec<ValueId>,
        remove_trivial: bool,
    ) -> Result<()> {
        debug_assert!(
            self.phi_data(phi).operands.is_empty(),
            "phi operands are added once"
        );
        if operands.is_empty() {
            return Err(Error::UndefinedValue {
                phi: phi.index(),
                block: self.phi_data(phi).block,
            });
        }
        for operand in operands {
            self.append_phi_operand(phi, operand);
        }
        if remove_trivial {
            self.remove_trivial_phi(phi)?;
        }
        if self.value(phi).is_phi() {
            self.recompute_never_null(phi);
        }
        Ok(())
    }

    pub(crate) fn append_phi_operand(&mut self, phi: ValueId, operand: ValueId) {
        self.phi_data_mut(phi).operands.push(operand);
        self.values[operand.index()].add_phi_user(phi);
    }

    /// Removes the operand at `index`.
    pub fn remove_phi_operand(&mut self, phi: ValueId, index: usize) {
        let operand = self.phi_data_mut(phi).operands.remove(index);
        self.values[operand.index()].remove_phi_user(phi);
        self.recompute_never_null(phi);
    }

    /// Removes the operands at the given ascending indices.
    pub fn remove_phi_operands_by_index(&mut self, phi: ValueId, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        let old = std::mem::take(&mut self.phi_data_mut(phi).operands);
        let mut kept = Vec::with_capacity(old.len() - indices.len());
        for (i, operand) in old.into_iter().enumerate() {
            if indices.binary_search(&i).is_ok() {
                self.values[operand.index()].remove_phi_user(phi);
            } else {
                kept.push(operand);
            }
        }
        self.phi_data_mut(phi).operands = kept;
        self.recompute_never_null(phi);
    }

    /// Replaces the operand flowing in from predecessor `index`.
    pub fn replace_phi_operand_at(&mut self, phi: ValueId, index: usize, new: ValueId) {
        let current = std::mem::replace(&mut self.phi_data_mut(phi).operands[index], new);
        self.values[new.index()].add_phi_user(phi);
        self.values[current.index()].remove_phi_user(phi);
        self.recompute_never_null(phi);
    }

    /// Replaces every occurrence of `old` among the operands of `phi` with `new`.
    pub(crate) fn replace_phi_operand(&mut self, phi: ValueId, old: ValueId, new: ValueId) {
        let mut replaced = 0;
        for operand in self.phi_data_mut(phi).operands.iter_mut() {
            if *operand == old {
                *operand = new;
                replaced += 1;
            }
        }
        for _ in 0..replaced {
            self.values[new.index()].add_phi_user(phi);
            self.values[old.index()].remove_phi_user(phi);
        }
        self.recompute_never_null(phi);
    }

    fn recompute_never_null(&mut self, phi: ValueId) {
        let operands = &self.phi_data(phi).operands;
        let never_null = operands
            .iter()
            .filter(|&&op| op != phi)
            .all(|&op| self.value(op).is_never_null())
            && operands.iter().any(|&op| op != phi);
        self.values[phi.index()].never_null = never_null;
    }

    /// Returns `true` if, ignoring self references, the phi merges at most one distinct value.
    #[must_use]
    pub fn is_trivial_phi(&self, phi: ValueId) -> bool {
        trivial_replacement(phi, &self.phi_data(phi).operands).is_some()
    }

    /// Collapses `phi` if it is trivial, then re-tests every phi that used it.
    ///
    /// Returns `true` if `phi` itself was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedValue`] if a collapsing phi has no operand other than itself.
    pub fn remove_trivial_phi(&mut self, phi: ValueId) -> Result<bool> {
        self.collapse_trivial_phis(phi, true)
    }

    /// Work-list phi collapse.
    ///
    /// With `strict == false` a phi whose only operands are itself is left in place: that only
    /// happens in blocks that lost their last entry edge and are about to be removed.
    pub(crate) fn collapse_trivial_phis(&mut self, phi: ValueId, strict: bool) -> Result<bool> {
        let mut removed_root = false;
        let mut worklist = vec![phi];

        while let Some(current) = worklist.pop() {
            let Some(data) = self.value(current).phi() else {
                continue;
            };
            let block = data.block;
            let Some(same) = trivial_replacement(current, &data.operands) else {
                continue;
            };
            let Some(same) = same else {
                if strict {
                    return Err(Error::UndefinedValue {
                        phi: current.index(),
                        block,
                    });
                }
                continue;
            };
            trace!("collapsing trivial phi {} in {} into {}", current, block, same);

            let data = self.phi_data_mut(current);
            let operands = std::mem::take(&mut data.operands);
            let definition_users = std::mem::take(&mut data.definition_users);
            for operand in operands {
                self.values[operand.index()].remove_phi_user(current);
            }
            for user_block in definition_users {
                self.replace_current_definitions(user_block, current, same);
            }

            let phi_users = self.value(current).unique_phi_users();
            self.replace_users(current, same);
            self.detach_phi(current);
            if current == phi {
                removed_root = true;
            }
            worklist.extend(phi_users.into_iter().rev().filter(|&user| user != current));
        }

        Ok(removed_root)
    }

    /// Collapses every trivial phi in the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedValue`] if a phi has no operand other than itself.
    pub fn remove_all_trivial_phis(&mut self) -> Result<()> {
        for block in self.order.clone() {
            for phi in self.blocks[block.index()].phis.clone() {
                self.remove_trivial_phi(phi)?;
            }
        }
        Ok(())
    }

    /// Removes a phi from its block without touching its users.
    ///
    /// Operands must already have been released.
    pub(crate) fn detach_phi(&mut self, phi: ValueId) {
        let block = self.phi_data(phi).block;
        self.blocks[block.index()].phis.retain(|&p| p != phi);
        self.values[phi.index()].definition = ValueDefinition::Removed;
    }

    /// Removes an unused phi from its block, releasing its operands.
    pub fn remove_phi(&mut self, phi: ValueId) {
        debug_assert!(
            !self.value(phi).is_used(),
            "attempt to remove used phi {}",
            phi
        );
        let operands = std::mem::take(&mut self.phi_data_mut(phi).operands);
        for operand in operands {
            self.values[operand.index()].remove_phi_user(phi);
        }
        self.detach_phi(phi);
    }

    /// Replaces phis of `block` that have exactly the same operands as an earlier phi.
    pub fn deduplicate_phis(&mut self, block: BlockId) {
        let phis = self.blocks[block.index()].phis.clone();
        let mut seen: Vec<ValueId> = Vec::with_capacity(phis.len());
        for phi in phis {
            let replacement = seen
                .iter()
                .copied()
                .find(|&other| self.phi_operands(other) == self.phi_operands(phi));
            match replacement {
                Some(replacement) => {
                    self.replace_users(phi, replacement);
                    self.remove_phi(phi);
                }
                None => seen.push(phi),
            }
        }
    }
}

/// Returns `None` if the phi is not trivial, `Some(None)` if it has no operand other than
/// itself, and `Some(Some(v))` if `v` is its sole distinct non-self operand.
fn trivial_replacement(phi: ValueId, operands: &[ValueId]) -> Option<Option<ValueId>> {
    let mut same = None;
    for &operand in operands {
        if Some(operand) == same || operand == phi {
            continue;
        }
        if same.is_some() {
            return None;
        }
        same = Some(operand);
    }
    Some(same)
}
