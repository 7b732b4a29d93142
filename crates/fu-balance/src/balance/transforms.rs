//! Catalog of semantics-preserving rewrites and their declared usage effect.
//!
//! Each rule pairs a predicate with a rewrite planned as a pure function of
//! the current program; planned fragments are applied through
//! [`ProgramRewriter::splice`], never by editing blocks directly.

use std::fmt;

use super::{classify::is_fusable_multiply, units::FunctionalUnit, usage::UsageDelta};
use crate::ir::{
    index::InstId,
    rewriter::{FragmentInst, FragmentOperand, ProgramRewriter, ProgramView, Replacement, RewriteError},
    spec::{BinaryOp, BlockId, CastKind, Instruction, Literal, Operand, Operation, Type, ValueId, WrapFlags},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewriteRule {
    /// `shl x, k` => `mul x, 2^k`.
    ShiftToMultiply,
    /// `mul x, 2^k` => `shl x, k`.
    MultiplyToShift,
    /// Right shift to division. Declared but not modeled: which unit a
    /// division occupies is unknown, so it has no rewrite and stays out of
    /// [`catalog`].
    RightShiftToDivide,
    /// `fop (conv a), (conv b)` in f32 => `fptrunc (fop (conv64 a), (conv64 b))`.
    PromoteNarrowFloat,
}

const CATALOG: [RewriteRule; 3] = [
    RewriteRule::ShiftToMultiply,
    RewriteRule::MultiplyToShift,
    RewriteRule::PromoteNarrowFloat,
];

/// Rules the balancer searches, in tie-break order.
pub fn catalog() -> &'static [RewriteRule] {
    &CATALOG
}

impl RewriteRule {
    pub const ALL: [RewriteRule; 4] = [
        RewriteRule::ShiftToMultiply,
        RewriteRule::MultiplyToShift,
        RewriteRule::RightShiftToDivide,
        RewriteRule::PromoteNarrowFloat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RewriteRule::ShiftToMultiply => "shift-to-multiply",
            RewriteRule::MultiplyToShift => "multiply-to-shift",
            RewriteRule::RightShiftToDivide => "right-shift-to-divide",
            RewriteRule::PromoteNarrowFloat => "promote-narrow-float",
        }
    }

    pub fn is_modeled(self) -> bool {
        self != RewriteRule::RightShiftToDivide
    }

    /// Declared change to the usage vector per execution of the rewritten
    /// instruction.
    pub fn delta(self) -> UsageDelta {
        use FunctionalUnit::*;
        match self {
            RewriteRule::ShiftToMultiply | RewriteRule::RightShiftToDivide => {
                UsageDelta::from_entries(&[(Shift, -1), (IntMul, 1)])
            }
            RewriteRule::MultiplyToShift => UsageDelta::from_entries(&[(Shift, 1), (IntMul, -1)]),
            RewriteRule::PromoteNarrowFloat => UsageDelta::from_entries(&[
                (Conv32, -2),
                (Fp32, -1),
                (Conv64, 3),
                (Fp64, 1),
            ]),
        }
    }

    pub fn matches(self, view: &ProgramView<'_>, inst: InstId) -> bool {
        let Some(instruction) = view.instruction(inst) else {
            return false;
        };
        match self {
            RewriteRule::ShiftToMultiply => shift_rewrite(view, inst, instruction).is_some(),
            RewriteRule::MultiplyToShift => multiply_rewrite(view, inst, instruction).is_some(),
            RewriteRule::RightShiftToDivide => {
                instruction.output.is_int()
                    && matches!(instruction.op, Operation::Binary(op) if op.is_right_shift())
            }
            RewriteRule::PromoteNarrowFloat => narrow_float_operands(view, inst, instruction).is_some(),
        }
    }

    /// Plans the rewrite of `inst` without touching the program.
    pub fn plan(self, view: &ProgramView<'_>, inst: InstId) -> Result<Replacement, RewriteError> {
        let instruction = view
            .instruction(inst)
            .ok_or(RewriteError::UnknownInstruction { inst })?;
        match self {
            RewriteRule::ShiftToMultiply => {
                let amount = shift_rewrite(view, inst, instruction).ok_or_else(|| {
                    self.malformed("expected a shift by a literal in range that keeps multiply-add fusion")
                })?;
                let factor = Literal::int(instruction.output, (1u64 << amount) as i64);
                Ok(single(
                    inst,
                    FragmentInst {
                        op: Operation::Binary(BinaryOp::Mul),
                        operands: vec![
                            FragmentOperand::Existing(instruction.operands[0]),
                            FragmentOperand::Existing(Operand::Literal(factor)),
                        ],
                        output: instruction.output,
                        flags: carried_flags(instruction, amount),
                    },
                ))
            }
            RewriteRule::MultiplyToShift => {
                let (value, amount) = multiply_rewrite(view, inst, instruction).ok_or_else(|| {
                    self.malformed("expected a multiply by a power-of-two literal that keeps multiply-add fusion")
                })?;
                let amount_literal = Literal::int(instruction.output, i64::from(amount));
                Ok(single(
                    inst,
                    FragmentInst {
                        op: Operation::Binary(BinaryOp::Shl),
                        operands: vec![
                            FragmentOperand::Existing(value),
                            FragmentOperand::Existing(Operand::Literal(amount_literal)),
                        ],
                        output: instruction.output,
                        flags: carried_flags(instruction, amount),
                    },
                ))
            }
            RewriteRule::RightShiftToDivide => Err(RewriteError::NotModeled { rule: self.name() }),
            RewriteRule::PromoteNarrowFloat => {
                let Operation::Binary(op) = instruction.op else {
                    return Err(self.malformed("expected a binary float operation"));
                };
                let [lhs, rhs] = narrow_float_operands(view, inst, instruction)
                    .ok_or_else(|| self.malformed("operands are not single-use narrow conversions"))?;
                let widen = |conv: &NarrowConversion| FragmentInst {
                    op: Operation::Cast(conv.wide_kind()),
                    operands: vec![FragmentOperand::Existing(conv.source)],
                    output: Type::F64,
                    flags: WrapFlags::NONE,
                };
                Ok(Replacement {
                    root: inst,
                    fragment: vec![
                        widen(&lhs),
                        widen(&rhs),
                        FragmentInst {
                            op: Operation::Binary(op),
                            operands: vec![FragmentOperand::Local(0), FragmentOperand::Local(1)],
                            output: Type::F64,
                            flags: WrapFlags::NONE,
                        },
                        FragmentInst {
                            op: Operation::Cast(CastKind::FpTrunc),
                            operands: vec![FragmentOperand::Local(2)],
                            output: Type::F32,
                            flags: WrapFlags::NONE,
                        },
                    ],
                    result: 3,
                    erase: vec![lhs.inst, rhs.inst],
                })
            }
        }
    }

    /// Plans and splices the rewrite. On `Err` the function is unchanged.
    pub fn apply(self, rewriter: &mut ProgramRewriter<'_>, inst: InstId) -> Result<ValueId, RewriteError> {
        let replacement = self.plan(&rewriter.view(), inst)?;
        rewriter.splice(&replacement)
    }

    fn malformed(self, reason: &str) -> RewriteError {
        RewriteError::Malformed {
            rule: self.name(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn single(root: InstId, inst: FragmentInst) -> Replacement {
    Replacement {
        root,
        fragment: vec![inst],
        result: 0,
        erase: Vec::new(),
    }
}

/// `nuw` always carries over between `shl k` and `mul 2^k`. `nsw` only does
/// while `2^k` is positive as a signed value.
fn carried_flags(inst: &Instruction, amount: u32) -> WrapFlags {
    let bits = inst.output.int_bits().map_or(0, u32::from);
    WrapFlags {
        nuw: inst.flags.nuw,
        nsw: inst.flags.nsw && amount + 1 < bits,
    }
}

/// Literal amount of an integer `shl`, when it is below the bit width.
/// Integers wider than 64 bits are never rewritten.
fn shift_amount(inst: &Instruction) -> Option<u32> {
    if inst.op != Operation::Binary(BinaryOp::Shl) {
        return None;
    }
    let bits = u64::from(inst.output.int_bits().filter(|bits| *bits <= 64)?);
    let amount = inst.operands.get(1)?.literal()?.as_u64()?;
    (amount < bits).then_some(amount as u32)
}

/// Non-literal factor and log2 of the literal factor of an integer `mul`.
fn power_of_two_factor(inst: &Instruction) -> Option<(Operand, u32)> {
    let in_range = inst.output.int_bits().is_some_and(|bits| bits <= 64);
    if inst.op != Operation::Binary(BinaryOp::Mul) || !in_range {
        return None;
    }
    let [lhs, rhs] = inst.operands.as_slice() else {
        return None;
    };
    let log2 = |operand: &Operand| {
        let value = operand.literal()?.as_u64()?;
        value.is_power_of_two().then(|| value.trailing_zeros())
    };
    log2(rhs)
        .map(|amount| (*lhs, amount))
        .or_else(|| log2(lhs).map(|amount| (*rhs, amount)))
}

fn shift_rewrite(view: &ProgramView<'_>, inst: InstId, instruction: &Instruction) -> Option<u32> {
    let amount = shift_amount(instruction)?;
    (!toggles_mult_add(view, inst)).then_some(amount)
}

fn multiply_rewrite(
    view: &ProgramView<'_>,
    inst: InstId,
    instruction: &Instruction,
) -> Option<(Operand, u32)> {
    let factor = power_of_two_factor(instruction)?;
    (!toggles_mult_add(view, inst)).then_some(factor)
}

/// Swapping `inst` between `shl` and `mul` flips whether its only user, an
/// integer add or sub, issues as a fused multiply-add, unless another operand
/// of that user fuses already. The shift/multiply deltas leave that add out.
fn toggles_mult_add(view: &ProgramView<'_>, inst: InstId) -> bool {
    let Some(value) = view.value_of(inst) else {
        return false;
    };
    let [user] = view.users_of(value) else {
        return false;
    };
    let Some(consumer) = view.instruction(*user) else {
        return false;
    };
    let is_int_add = matches!(consumer.op, Operation::Binary(BinaryOp::Add | BinaryOp::Sub))
        && consumer.output.is_int();
    is_int_add
        && !consumer
            .operands
            .iter()
            .filter_map(Operand::value)
            .filter(|operand| *operand != value)
            .any(|operand| is_fusable_multiply(view, operand))
}

struct NarrowConversion {
    inst: InstId,
    kind: CastKind,
    source: Operand,
}

impl NarrowConversion {
    fn wide_kind(&self) -> CastKind {
        match self.kind {
            CastKind::SiToFp | CastKind::UiToFp => self.kind,
            _ => CastKind::FpExt,
        }
    }
}

fn narrow_float_operands(
    view: &ProgramView<'_>,
    inst: InstId,
    instruction: &Instruction,
) -> Option<[NarrowConversion; 2]> {
    let is_float_arith = matches!(
        instruction.op,
        Operation::Binary(BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    );
    if !is_float_arith || instruction.output != Type::F32 {
        return None;
    }
    let result = view.value_of(inst)?;
    if view.use_count(result) > 1 {
        return None;
    }
    let [lhs, rhs] = instruction.operands.as_slice() else {
        return None;
    };
    let block = view.block_of(inst)?;
    Some([
        narrow_conversion(view, block, lhs)?,
        narrow_conversion(view, block, rhs)?,
    ])
}

/// A single-use conversion into f32 from an integer of at most 32 bits or
/// from a float no wider than f32, placed in `block`. Conversions hoisted out
/// of the loop would otherwise be pulled back in at the loop's frequency.
fn narrow_conversion(
    view: &ProgramView<'_>,
    block: BlockId,
    operand: &Operand,
) -> Option<NarrowConversion> {
    let value = operand.value()?;
    let (inst, def) = view.defining(value)?;
    let Operation::Cast(kind) = def.op else {
        return None;
    };
    if def.output != Type::F32 || view.use_count(value) != 1 || view.block_of(inst) != Some(block) {
        return None;
    }
    let source = *def.operands.first()?;
    let from = view.operand_type(&source)?;
    let widening = match kind {
        CastKind::SiToFp | CastKind::UiToFp => from.int_bits().is_some_and(|bits| bits <= 32),
        CastKind::FpExt => matches!(from, Type::F16 | Type::F32),
        _ => false,
    };
    widening.then_some(NarrowConversion { inst, kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divide_rule_is_not_in_the_catalog() {
        assert!(!catalog().contains(&RewriteRule::RightShiftToDivide));
        assert!(catalog().iter().all(|rule| rule.is_modeled()));
    }

    fn wide_binary(op: BinaryOp, operand: u64) -> Instruction {
        let wide = Type::Int(128);
        Instruction {
            id: ValueId(1),
            op: Operation::Binary(op),
            operands: vec![
                Operand::Value(ValueId(0)),
                Operand::Literal(Literal { ty: wide, bits: operand }),
            ],
            output: wide,
            flags: WrapFlags::NONE,
        }
    }

    #[test]
    fn integers_wider_than_64_bits_are_not_rewritten() {
        assert_eq!(shift_amount(&wide_binary(BinaryOp::Shl, 100)), None);
        assert_eq!(shift_amount(&wide_binary(BinaryOp::Shl, 3)), None);
        assert_eq!(power_of_two_factor(&wide_binary(BinaryOp::Mul, 8)), None);
    }

    #[test]
    fn inverse_rules_have_opposite_deltas() {
        let forward = RewriteRule::ShiftToMultiply.delta();
        let backward = RewriteRule::MultiplyToShift.delta();
        for unit in FunctionalUnit::ALL {
            assert_eq!(forward.get(unit), -backward.get(unit));
        }
    }
}
