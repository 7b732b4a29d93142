use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use thiserror::Error;

use crate::ir::spec::{BlockId, Function, Instruction, Operation, Type, ValueId};

/// Stable identifier assigned to each instruction when indexing a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct InstId(pub u32);

/// Location of an instruction: owning block and position inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstPosition {
    pub block: BlockId,
    pub index: usize,
}

/// Captures structural indices for a single function.
///
/// `users` records one entry per operand slot, so an instruction that reads a
/// value twice appears twice and [`FunctionIndices::use_count`] is exact.
#[derive(Debug, Clone)]
pub struct FunctionIndices {
    inst_values: HashMap<InstId, ValueId>,
    value_types: HashMap<ValueId, Type>,
    param_index_of: HashMap<ValueId, u32>,
    pos_of: HashMap<InstId, InstPosition>,
    value_to_inst: HashMap<ValueId, InstId>,
    users: HashMap<ValueId, SmallVec<[InstId; 4]>>,
    version: HashMap<InstId, u32>,
    next_value: u32,
    next_inst: u32,
}

impl FunctionIndices {
    /// Builds indices for the provided function and validates SSA invariants.
    ///
    /// Uses may precede definitions in layout order (phis on back edges), so
    /// definitions are collected before any operand is resolved.
    pub fn build(function: &Function) -> Result<Self, FunctionIndexError> {
        let mut seen_values: HashSet<ValueId> = HashSet::new();
        let mut value_types: HashMap<ValueId, Type> = HashMap::new();
        let mut param_index_of = HashMap::new();
        let mut pos_of = HashMap::new();
        let mut value_to_inst = HashMap::new();
        let mut inst_values = HashMap::new();
        let mut users: HashMap<ValueId, SmallVec<[InstId; 4]>> = HashMap::new();

        for (index, (param_id, param_ty)) in function
            .parameter_ids
            .iter()
            .zip(function.parameters.iter())
            .enumerate()
        {
            if !seen_values.insert(*param_id) {
                return Err(FunctionIndexError::DuplicateValue { value: *param_id });
            }
            param_index_of.insert(*param_id, index as u32);
            value_types.insert(*param_id, *param_ty);
        }

        let mut next_inst = 0u32;
        let mut located: Vec<(InstId, &Instruction)> = Vec::with_capacity(function.instruction_count());
        for (block_index, block) in function.blocks.iter().enumerate() {
            if block.id.index() != block_index {
                return Err(FunctionIndexError::MisnumberedBlock {
                    expected: BlockId(block_index as u32),
                    found: block.id,
                });
            }
            for (index, instruction) in block.body.iter().enumerate() {
                let inst_id = InstId(next_inst);
                next_inst += 1;
                if !seen_values.insert(instruction.id) {
                    return Err(FunctionIndexError::DuplicateValue {
                        value: instruction.id,
                    });
                }
                pos_of.insert(
                    inst_id,
                    InstPosition {
                        block: block.id,
                        index,
                    },
                );
                value_to_inst.insert(instruction.id, inst_id);
                inst_values.insert(inst_id, instruction.id);
                value_types.insert(instruction.id, instruction.output);
                located.push((inst_id, instruction));
            }
        }

        let block_count = function.blocks.len();
        for (inst_id, instruction) in located {
            check_block_references(instruction, block_count)?;
            for operand in &instruction.operands {
                let Some(referenced) = operand.value() else {
                    continue;
                };
                if !value_types.contains_key(&referenced) {
                    return Err(FunctionIndexError::MissingValueDefinition { value: referenced });
                }
                users.entry(referenced).or_default().push(inst_id);
            }
        }

        let max_value = function
            .parameter_ids
            .iter()
            .copied()
            .chain(function.instructions().map(|inst| inst.id))
            .map(|id| id.0)
            .max();

        let version = pos_of.keys().map(|id| (*id, 0u32)).collect();
        Ok(FunctionIndices {
            inst_values,
            value_types,
            param_index_of,
            pos_of,
            value_to_inst,
            users,
            version,
            next_value: max_value.map_or(0, |max| max + 1),
            next_inst,
        })
    }

    /// Returns the instruction location for the provided identifier.
    pub fn position(&self, inst: InstId) -> Option<InstPosition> {
        self.pos_of.get(&inst).copied()
    }

    /// Returns the SSA value defined by the provided instruction.
    pub fn value_of(&self, inst: InstId) -> Option<ValueId> {
        self.inst_values.get(&inst).copied()
    }

    /// Returns the instruction producing the given value, if any.
    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.value_to_inst.get(&value).copied()
    }

    pub fn is_param(&self, value: ValueId) -> bool {
        self.param_index_of.contains_key(&value)
    }

    /// Returns the type associated with a given SSA value.
    pub fn type_of(&self, value: ValueId) -> Option<Type> {
        self.value_types.get(&value).copied()
    }

    /// Returns the users recorded for a given SSA value, one per operand slot.
    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.users
            .get(&value)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn use_count(&self, value: ValueId) -> usize {
        self.users_of(value).len()
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.pos_of.contains_key(&inst)
    }

    pub fn version(&self, inst: InstId) -> Option<u32> {
        self.version.get(&inst).copied()
    }

    pub fn next_value(&self) -> u32 {
        self.next_value
    }

    pub fn next_inst(&self) -> u32 {
        self.next_inst
    }

    /// Instructions of one block in layout order.
    pub fn insts_in_block(&self, block: BlockId) -> Vec<InstId> {
        let mut entries: Vec<_> = self
            .pos_of
            .iter()
            .filter(|(_, pos)| pos.block == block)
            .map(|(inst, pos)| (*inst, pos.index))
            .collect();
        entries.sort_by_key(|&(_, index)| index);
        entries.into_iter().map(|(inst, _)| inst).collect()
    }

    pub(crate) fn allocate_inst(&mut self) -> InstId {
        let inst = InstId(self.next_inst);
        self.next_inst += 1;
        inst
    }

    pub(crate) fn allocate_value(&mut self) -> ValueId {
        let value = ValueId(self.next_value);
        self.next_value += 1;
        value
    }

    pub(crate) fn insert_instruction(
        &mut self,
        inst_id: InstId,
        pos: InstPosition,
        instruction: &Instruction,
    ) -> Result<(), FunctionIndexError> {
        if self.value_to_inst.contains_key(&instruction.id) {
            return Err(FunctionIndexError::DuplicateValue {
                value: instruction.id,
            });
        }
        for operand in &instruction.operands {
            if let Some(referenced) = operand.value() {
                if !self.value_types.contains_key(&referenced) {
                    return Err(FunctionIndexError::MissingValueDefinition { value: referenced });
                }
            }
        }

        self.shift_positions_from(pos, 1);
        self.pos_of.insert(inst_id, pos);
        self.value_to_inst.insert(instruction.id, inst_id);
        self.inst_values.insert(inst_id, instruction.id);
        self.value_types.insert(instruction.id, instruction.output);
        self.version.insert(inst_id, 0);
        for operand in &instruction.operands {
            if let Some(referenced) = operand.value() {
                self.users.entry(referenced).or_default().push(inst_id);
            }
        }
        Ok(())
    }

    pub(crate) fn remove_instruction(&mut self, inst: InstId, instruction: &Instruction) {
        if let Some(pos) = self.pos_of.remove(&inst) {
            self.shift_positions_from(
                InstPosition {
                    block: pos.block,
                    index: pos.index + 1,
                },
                -1,
            );
        }
        if let Some(value) = self.inst_values.remove(&inst) {
            self.value_to_inst.remove(&value);
            self.value_types.remove(&value);
            self.users.remove(&value);
        }
        self.version.remove(&inst);
        for operand in &instruction.operands {
            let Some(referenced) = operand.value() else {
                continue;
            };
            if let Some(list) = self.users.get_mut(&referenced) {
                list.retain(|id| *id != inst);
                if list.is_empty() {
                    self.users.remove(&referenced);
                }
            }
        }
    }

    /// Moves `slots` recorded uses of `from` by `inst` over to `to`.
    pub(crate) fn update_operand_use(
        &mut self,
        inst: InstId,
        from: ValueId,
        to: ValueId,
        slots: usize,
    ) -> Result<(), FunctionIndexError> {
        if !self.value_types.contains_key(&to) {
            return Err(FunctionIndexError::MissingValueDefinition { value: to });
        }

        if let Some(list) = self.users.get_mut(&from) {
            list.retain(|id| *id != inst);
            if list.is_empty() {
                self.users.remove(&from);
            }
        }
        let entry = self.users.entry(to).or_default();
        for _ in 0..slots {
            entry.push(inst);
        }
        Ok(())
    }

    pub(crate) fn bump_version(&mut self, inst: InstId) {
        if let Some(ver) = self.version.get_mut(&inst) {
            *ver = ver.wrapping_add(1);
        }
    }

    fn shift_positions_from(&mut self, start: InstPosition, delta: isize) {
        if delta == 0 {
            return;
        }
        for pos in self.pos_of.values_mut() {
            if pos.block == start.block && pos.index >= start.index {
                if delta.is_positive() {
                    pos.index += delta.unsigned_abs();
                } else {
                    pos.index -= delta.unsigned_abs();
                }
            }
        }
    }
}

fn check_block_references(
    instruction: &Instruction,
    block_count: usize,
) -> Result<(), FunctionIndexError> {
    let in_range = |block: BlockId| {
        if block.index() < block_count {
            Ok(())
        } else {
            Err(FunctionIndexError::UnknownBlock { block })
        }
    };
    match &instruction.op {
        Operation::Phi { incoming } => {
            if incoming.len() != instruction.operands.len() {
                return Err(FunctionIndexError::PhiArity {
                    value: instruction.id,
                });
            }
            incoming.iter().copied().try_for_each(in_range)
        }
        Operation::Branch { target } => in_range(*target),
        Operation::CondBranch {
            then_block,
            else_block,
        } => {
            in_range(*then_block)?;
            in_range(*else_block)
        }
        _ => Ok(()),
    }
}

/// Errors surfaced when building SSA indices for a function.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FunctionIndexError {
    #[error("duplicate value definition for %{}", value.0)]
    DuplicateValue { value: ValueId },
    #[error("value %{} is used but never defined", value.0)]
    MissingValueDefinition { value: ValueId },
    #[error("phi %{} has mismatched incoming blocks and operands", value.0)]
    PhiArity { value: ValueId },
    #[error("reference to unknown block {}", block.0)]
    UnknownBlock { block: BlockId },
    #[error("block at position {} is numbered {}", expected.0, found.0)]
    MisnumberedBlock { expected: BlockId, found: BlockId },
}
