use std::collections::HashSet;

use thiserror::Error;

use crate::ir::{
    index::{FunctionIndexError, FunctionIndices, InstId, InstPosition},
    spec::{BlockId, Function, Instruction, Operand, Operation, Type, ValueId, WrapFlags},
};

/// Read-only query surface over an indexed function.
#[derive(Clone, Copy)]
pub struct ProgramView<'a> {
    func: &'a Function,
    indices: &'a FunctionIndices,
}

impl<'a> ProgramView<'a> {
    pub fn new(func: &'a Function, indices: &'a FunctionIndices) -> Self {
        Self { func, indices }
    }

    pub fn function(&self) -> &'a Function {
        self.func
    }

    pub fn indices(&self) -> &'a FunctionIndices {
        self.indices
    }

    pub fn instruction(&self, inst: InstId) -> Option<&'a Instruction> {
        let pos = self.indices.position(inst)?;
        self.func
            .blocks
            .get(pos.block.index())?
            .body
            .get(pos.index)
    }

    pub fn op(&self, inst: InstId) -> Option<&'a Operation> {
        self.instruction(inst).map(|instruction| &instruction.op)
    }

    pub fn operands(&self, inst: InstId) -> &'a [Operand] {
        self.instruction(inst)
            .map(|instruction| instruction.operands.as_slice())
            .unwrap_or(&[])
    }

    pub fn value_of(&self, inst: InstId) -> Option<ValueId> {
        self.indices.value_of(inst)
    }

    pub fn type_of(&self, value: ValueId) -> Option<Type> {
        self.indices.type_of(value)
    }

    /// Type of an operand, reading literals directly.
    pub fn operand_type(&self, operand: &Operand) -> Option<Type> {
        match operand {
            Operand::Value(value) => self.type_of(*value),
            Operand::Literal(literal) => Some(literal.ty),
        }
    }

    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.indices.inst_of(value)
    }

    /// Instruction defining `value`; `None` for parameters.
    pub fn defining(&self, value: ValueId) -> Option<(InstId, &'a Instruction)> {
        let inst = self.inst_of(value)?;
        self.instruction(inst).map(|instruction| (inst, instruction))
    }

    pub fn users_of(&self, value: ValueId) -> &'a [InstId] {
        self.indices.users_of(value)
    }

    pub fn use_count(&self, value: ValueId) -> usize {
        self.indices.use_count(value)
    }

    pub fn block_of(&self, inst: InstId) -> Option<BlockId> {
        self.indices.position(inst).map(|pos| pos.block)
    }

    pub fn insts_in_block(&self, block: BlockId) -> Vec<InstId> {
        self.indices.insts_in_block(block)
    }
}

/// Operand of a not-yet-inserted replacement instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOperand {
    /// Operand already present in the function.
    Existing(Operand),
    /// Result of an earlier instruction of the same fragment.
    Local(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentInst {
    pub op: Operation,
    pub operands: Vec<FragmentOperand>,
    pub output: Type,
    pub flags: WrapFlags,
}

/// Declarative splice: insert `fragment` before `root`, redirect every use of
/// `root` to the fragment's `result`, then erase `root` and `erase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub root: InstId,
    pub fragment: Vec<FragmentInst>,
    pub result: usize,
    pub erase: Vec<InstId>,
}

/// Mutable IR editor with stable instruction identifiers and SSA accounting.
pub struct ProgramRewriter<'a> {
    pub func: &'a mut Function,
    indices: FunctionIndices,
}

impl<'a> ProgramRewriter<'a> {
    /// Creates a rewriter for the provided function, indexing its body.
    pub fn new(func: &'a mut Function) -> Result<Self, FunctionIndexError> {
        let indices = FunctionIndices::build(func)?;
        Ok(Self { func, indices })
    }

    pub fn view(&self) -> ProgramView<'_> {
        ProgramView::new(self.func, &self.indices)
    }

    pub fn indices(&self) -> &FunctionIndices {
        &self.indices
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.indices.contains(inst)
    }

    /// Returns the current version counter for an instruction.
    pub fn version(&self, inst: InstId) -> Option<u32> {
        self.indices.version(inst)
    }

    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.indices.users_of(value)
    }

    /// Replaces all uses of `from` with `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<(), RewriteError> {
        if from == to {
            return Ok(());
        }
        let mut consumers = self.indices.users_of(from).to_vec();
        consumers.sort_unstable();
        consumers.dedup();
        for inst in consumers {
            let instruction = self.instruction_mut(inst)?;
            let mut slots = 0usize;
            for operand in &mut instruction.operands {
                if *operand == Operand::Value(from) {
                    *operand = Operand::Value(to);
                    slots += 1;
                }
            }
            self.indices.update_operand_use(inst, from, to, slots)?;
            self.indices.bump_version(inst);
        }
        Ok(())
    }

    /// Erases the instruction identified by `inst`; its value must be dead.
    pub fn erase_inst(&mut self, inst: InstId) -> Result<(), RewriteError> {
        let value = self
            .indices
            .value_of(inst)
            .ok_or(RewriteError::UnknownInstruction { inst })?;
        if !self.indices.users_of(value).is_empty() {
            return Err(RewriteError::LiveUses { value });
        }
        let pos = self.position(inst)?;
        let block = self
            .func
            .blocks
            .get_mut(pos.block.index())
            .ok_or(RewriteError::UnknownInstruction { inst })?;
        if pos.index >= block.body.len() {
            return Err(RewriteError::UnknownInstruction { inst });
        }
        let instruction = block.body.remove(pos.index);
        self.indices.remove_instruction(inst, &instruction);
        Ok(())
    }

    /// Inserts a new instruction before `at`, returning its identifiers.
    pub fn insert_before(
        &mut self,
        at: InstId,
        op: Operation,
        operands: Vec<Operand>,
        output: Type,
        flags: WrapFlags,
    ) -> Result<(InstId, ValueId), RewriteError> {
        let pos = self.position(at)?;
        let inst_id = self.indices.allocate_inst();
        let value_id = self.indices.allocate_value();
        let instruction = Instruction {
            id: value_id,
            op,
            operands,
            output,
            flags,
        };
        self.indices.insert_instruction(inst_id, pos, &instruction)?;
        let block = self
            .func
            .blocks
            .get_mut(pos.block.index())
            .ok_or(RewriteError::UnknownInstruction { inst: at })?;
        block.body.insert(pos.index, instruction);
        Ok((inst_id, value_id))
    }

    /// Applies a [`Replacement`]. The replacement is fully validated first, so
    /// an `Err` leaves the function untouched.
    pub fn splice(&mut self, replacement: &Replacement) -> Result<ValueId, RewriteError> {
        self.validate(replacement)?;

        let root_value = self
            .indices
            .value_of(replacement.root)
            .ok_or(RewriteError::UnknownInstruction {
                inst: replacement.root,
            })?;

        let mut locals: Vec<ValueId> = Vec::with_capacity(replacement.fragment.len());
        for item in &replacement.fragment {
            let operands = item
                .operands
                .iter()
                .map(|operand| match operand {
                    FragmentOperand::Existing(existing) => *existing,
                    FragmentOperand::Local(index) => Operand::Value(locals[*index]),
                })
                .collect();
            let (_, value) = self.insert_before(
                replacement.root,
                item.op.clone(),
                operands,
                item.output,
                item.flags,
            )?;
            locals.push(value);
        }

        let result = locals[replacement.result];
        self.replace_all_uses(root_value, result)?;

        let mut pending: Vec<InstId> = std::iter::once(replacement.root)
            .chain(replacement.erase.iter().copied())
            .collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut remaining = Vec::with_capacity(pending.len());
            for inst in pending {
                let dead = self
                    .indices
                    .value_of(inst)
                    .is_some_and(|value| self.indices.users_of(value).is_empty());
                if dead {
                    self.erase_inst(inst)?;
                } else {
                    remaining.push(inst);
                }
            }
            if remaining.len() == before {
                let value = self
                    .indices
                    .value_of(remaining[0])
                    .unwrap_or(ValueId(u32::MAX));
                return Err(RewriteError::LiveUses { value });
            }
            pending = remaining;
        }
        Ok(result)
    }

    /// Verifies basic SSA invariants after mutations.
    pub fn verify(&self) -> bool {
        FunctionIndices::build(self.func).is_ok()
    }

    fn validate(&self, replacement: &Replacement) -> Result<(), RewriteError> {
        if replacement.fragment.is_empty() || replacement.result >= replacement.fragment.len() {
            return Err(RewriteError::InvalidFragment(
                "fragment must produce a result".to_string(),
            ));
        }

        let mut removed: HashSet<InstId> = HashSet::new();
        for inst in std::iter::once(replacement.root).chain(replacement.erase.iter().copied()) {
            if !self.indices.contains(inst) {
                return Err(RewriteError::UnknownInstruction { inst });
            }
            if !removed.insert(inst) {
                return Err(RewriteError::InvalidFragment(format!(
                    "instruction {} erased twice",
                    inst.0
                )));
            }
        }
        let removed_values: HashSet<ValueId> = removed
            .iter()
            .filter_map(|inst| self.indices.value_of(*inst))
            .collect();

        for (index, item) in replacement.fragment.iter().enumerate() {
            for operand in &item.operands {
                match operand {
                    FragmentOperand::Local(local) if *local >= index => {
                        return Err(RewriteError::InvalidFragment(format!(
                            "fragment instruction {index} reads later result {local}"
                        )));
                    }
                    FragmentOperand::Local(_) => {}
                    FragmentOperand::Existing(Operand::Value(value)) => {
                        if self.indices.type_of(*value).is_none() {
                            return Err(RewriteError::UnknownValue { value: *value });
                        }
                        if removed_values.contains(value) {
                            return Err(RewriteError::InvalidFragment(format!(
                                "fragment reads %{} which the splice erases",
                                value.0
                            )));
                        }
                    }
                    FragmentOperand::Existing(Operand::Literal(_)) => {}
                }
            }
        }

        for inst in &replacement.erase {
            let Some(value) = self.indices.value_of(*inst) else {
                continue;
            };
            let escapes = self
                .indices
                .users_of(value)
                .iter()
                .any(|user| !removed.contains(user));
            if escapes {
                return Err(RewriteError::LiveUses { value });
            }
        }
        Ok(())
    }

    fn position(&self, inst: InstId) -> Result<InstPosition, RewriteError> {
        self.indices
            .position(inst)
            .ok_or(RewriteError::UnknownInstruction { inst })
    }

    fn instruction_mut(&mut self, inst: InstId) -> Result<&mut Instruction, RewriteError> {
        let pos = self.position(inst)?;
        self.func
            .blocks
            .get_mut(pos.block.index())
            .and_then(|block| block.body.get_mut(pos.index))
            .ok_or(RewriteError::UnknownInstruction { inst })
    }
}

/// Errors raised by rewrite planning and splicing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("instruction {} is not part of the function", inst.0)]
    UnknownInstruction { inst: InstId },
    #[error("value %{} is not defined", value.0)]
    UnknownValue { value: ValueId },
    #[error("value %{} still has live uses", value.0)]
    LiveUses { value: ValueId },
    #[error("invalid replacement fragment: {0}")]
    InvalidFragment(String),
    #[error("rule `{rule}` cannot rewrite this instruction: {reason}")]
    Malformed { rule: &'static str, reason: String },
    #[error("rule `{rule}` has no rewrite action")]
    NotModeled { rule: &'static str },
    #[error(transparent)]
    Index(#[from] FunctionIndexError),
}
