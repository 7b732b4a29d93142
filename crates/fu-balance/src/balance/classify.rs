//! Maps one instruction, in the context of its function, to the functional
//! units it occupies.

use smallvec::{smallvec, SmallVec};

use super::units::FunctionalUnit;
use crate::ir::{
    index::InstId,
    intrinsics::Intrinsic,
    rewriter::ProgramView,
    spec::{BinaryOp, Callee, Instruction, Operand, Operation, Type, ValueId},
};

/// Units charged for one instruction. Empty for no-cost constructs.
pub type UnitSet = SmallVec<[FunctionalUnit; 2]>;

/// Classifies the instruction `inst`. Unknown identifiers cost nothing.
pub fn classify(view: &ProgramView<'_>, inst: InstId) -> UnitSet {
    match view.instruction(inst) {
        Some(instruction) => classify_instruction(view, instruction),
        None => UnitSet::new(),
    }
}

pub fn classify_instruction(view: &ProgramView<'_>, inst: &Instruction) -> UnitSet {
    match &inst.op {
        Operation::Cast(_) => {
            let from = inst
                .operands
                .first()
                .and_then(|operand| view.operand_type(operand))
                .unwrap_or(Type::Void);
            smallvec![conversion_unit(from, inst.output)]
        }
        Operation::Binary(op) => classify_binary(view, inst, *op),
        Operation::Compare(_) => smallvec![FunctionalUnit::Logic],
        Operation::Load | Operation::Store => smallvec![FunctionalUnit::Mem],
        op if op.is_terminator() => smallvec![FunctionalUnit::Control],
        Operation::Call(Callee::Intrinsic { intrinsic, .. }) => {
            intrinsic_units(*intrinsic, inst.output)
        }
        // Opaque calls, address arithmetic, allocation and phis.
        _ => UnitSet::new(),
    }
}

/// Casts are charged by the wider of their two sides.
fn conversion_unit(from: Type, to: Type) -> FunctionalUnit {
    let is_wide = |ty: Type| ty == Type::F64 || ty.int_bits().is_some_and(|bits| bits >= 64);
    let is_word = |ty: Type| ty == Type::F32 || ty.int_bits() == Some(32);
    if is_wide(from) || is_wide(to) {
        FunctionalUnit::Conv64
    } else if is_word(from) || is_word(to) {
        FunctionalUnit::Conv32
    } else {
        FunctionalUnit::Conv
    }
}

fn float_unit(ty: Type) -> FunctionalUnit {
    if ty == Type::F64 {
        FunctionalUnit::Fp64
    } else {
        FunctionalUnit::Fp32
    }
}

fn classify_binary(view: &ProgramView<'_>, inst: &Instruction, op: BinaryOp) -> UnitSet {
    if inst.output.is_float() {
        return smallvec![float_unit(inst.output)];
    }
    if !inst.output.is_int() {
        return UnitSet::new();
    }
    match op {
        BinaryOp::Add | BinaryOp::Sub if can_fuse_mult_add(view, inst) => UnitSet::new(),
        BinaryOp::Add | BinaryOp::Sub => smallvec![FunctionalUnit::IntAdd],
        BinaryOp::Mul => smallvec![FunctionalUnit::IntMul],
        BinaryOp::And if can_bitfield_extract(view, inst) => smallvec![FunctionalUnit::Bitfield],
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => smallvec![FunctionalUnit::Logic],
        BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => smallvec![FunctionalUnit::Shift],
        BinaryOp::Div | BinaryOp::Rem => {
            tracing::trace!(value = inst.id.0, op = op.mnemonic(), "unmodeled integer op");
            UnitSet::new()
        }
    }
}

fn intrinsic_units(intrinsic: Intrinsic, output: Type) -> UnitSet {
    let unit = match intrinsic {
        Intrinsic::IntMinMax => FunctionalUnit::IntAdd,
        Intrinsic::FloatMinMax | Intrinsic::Fma => float_unit(output),
        Intrinsic::Sqrt if output == Type::F64 => FunctionalUnit::Fp64,
        Intrinsic::Transcendental { approx: false } if output == Type::F64 => FunctionalUnit::Fp64,
        Intrinsic::Sqrt | Intrinsic::Transcendental { .. } => FunctionalUnit::Trans,
        Intrinsic::PopCount | Intrinsic::LeadingZeros | Intrinsic::SumAbsDiff => {
            FunctionalUnit::IntMul
        }
        Intrinsic::BitReverse => FunctionalUnit::Bitfield,
        Intrinsic::Shuffle => FunctionalUnit::Warp,
        Intrinsic::RegisterMove => return UnitSet::new(),
        Intrinsic::Reinterpret | Intrinsic::RoundingConvert => {
            if output.bit_width() == Some(64) {
                FunctionalUnit::Conv64
            } else {
                FunctionalUnit::Conv32
            }
        }
    };
    smallvec![unit]
}

/// An integer add/sub reading a single-use integer multiply issues as one
/// multiply-add, so only the multiply is charged.
pub fn can_fuse_mult_add(view: &ProgramView<'_>, inst: &Instruction) -> bool {
    if !matches!(inst.op, Operation::Binary(BinaryOp::Add | BinaryOp::Sub)) || !inst.output.is_int() {
        return false;
    }
    inst.operands
        .iter()
        .filter_map(Operand::value)
        .any(|value| is_fusable_multiply(view, value))
}

/// `value` is an integer multiply with no other user, so the add or sub
/// reading it can absorb it.
pub(crate) fn is_fusable_multiply(view: &ProgramView<'_>, value: ValueId) -> bool {
    view.defining(value).is_some_and(|(_, def)| {
        def.op == Operation::Binary(BinaryOp::Mul) && def.output.is_int() && view.use_count(value) == 1
    })
}

/// `and(shr(x, k), mask)` with literal `k` and `mask`, where the shift has
/// no other user, issues as a single bitfield extract.
pub fn can_bitfield_extract(view: &ProgramView<'_>, inst: &Instruction) -> bool {
    if inst.op != Operation::Binary(BinaryOp::And) || !inst.output.is_int() {
        return false;
    }
    let [lhs, rhs] = inst.operands.as_slice() else {
        return false;
    };
    let shifted = match (lhs, rhs) {
        (Operand::Value(value), Operand::Literal(_)) | (Operand::Literal(_), Operand::Value(value)) => {
            *value
        }
        _ => return false,
    };
    let Some((_, def)) = view.defining(shifted) else {
        return false;
    };
    let is_right_shift = matches!(def.op, Operation::Binary(op) if op.is_right_shift());
    let literal_amount = def.operands.get(1).is_some_and(|amount| amount.literal().is_some());
    is_right_shift && literal_amount && view.use_count(shifted) == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_use_the_wider_side() {
        assert_eq!(conversion_unit(Type::I32, Type::F64), FunctionalUnit::Conv64);
        assert_eq!(conversion_unit(Type::I64, Type::I32), FunctionalUnit::Conv64);
        assert_eq!(conversion_unit(Type::F16, Type::F32), FunctionalUnit::Conv32);
        assert_eq!(conversion_unit(Type::I32, Type::I16), FunctionalUnit::Conv32);
        assert_eq!(conversion_unit(Type::I8, Type::I16), FunctionalUnit::Conv);
    }

    #[test]
    fn intrinsic_table_tracks_result_width() {
        assert_eq!(
            intrinsic_units(Intrinsic::Fma, Type::F64).as_slice(),
            &[FunctionalUnit::Fp64]
        );
        assert_eq!(
            intrinsic_units(Intrinsic::Transcendental { approx: true }, Type::F64).as_slice(),
            &[FunctionalUnit::Trans]
        );
        assert_eq!(
            intrinsic_units(Intrinsic::RoundingConvert, Type::I64).as_slice(),
            &[FunctionalUnit::Conv64]
        );
        assert!(intrinsic_units(Intrinsic::RegisterMove, Type::I32).is_empty());
    }
}
