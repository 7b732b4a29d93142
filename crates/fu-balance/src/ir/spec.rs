use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

use super::intrinsics::Intrinsic;

/// Unique identifier for SSA values in a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Index of a basic block inside [`Function::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scalar types understood by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int(u16),
    F16,
    F32,
    F64,
    Ptr,
    Void,
}

impl Type {
    pub const I1: Type = Type::Int(1);
    pub const I8: Type = Type::Int(8);
    pub const I16: Type = Type::Int(16);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);

    pub fn is_int(self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F16 | Type::F32 | Type::F64)
    }

    pub fn int_bits(self) -> Option<u16> {
        match self {
            Type::Int(bits) => Some(bits),
            _ => None,
        }
    }

    /// Storage width in bits; pointers are 64-bit, `void` has none.
    pub fn bit_width(self) -> Option<u16> {
        match self {
            Type::Int(bits) => Some(bits),
            Type::F16 => Some(16),
            Type::F32 => Some(32),
            Type::F64 | Type::Ptr => Some(64),
            Type::Void => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::F16 => f.write_str("f16"),
            Type::F32 => f.write_str("f32"),
            Type::F64 => f.write_str("f64"),
            Type::Ptr => f.write_str("ptr"),
            Type::Void => f.write_str("void"),
        }
    }
}

/// Typed compile-time constant stored as raw bits.
///
/// Integer literals are masked to their width; float literals hold the IEEE
/// encoding of their own type, half precision included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub ty: Type,
    pub bits: u64,
}

impl Literal {
    pub fn int(ty: Type, value: i64) -> Self {
        let bits = match ty.int_bits() {
            Some(width) => mask_to_width(value as u64, width),
            None => value as u64,
        };
        Self { ty, bits }
    }

    /// Half-precision constant, rounded to nearest from `value`.
    pub fn f16(value: f32) -> Self {
        Self {
            ty: Type::F16,
            bits: u64::from(f16::from_f32(value).to_bits()),
        }
    }

    pub fn f32(value: f32) -> Self {
        Self {
            ty: Type::F32,
            bits: u64::from(value.to_bits()),
        }
    }

    pub fn f64(value: f64) -> Self {
        Self {
            ty: Type::F64,
            bits: value.to_bits(),
        }
    }

    /// Unsigned integer value masked to the literal's width.
    pub fn as_u64(&self) -> Option<u64> {
        let width = self.ty.int_bits()?;
        Some(mask_to_width(self.bits, width))
    }

    /// Sign-extended integer value.
    pub fn as_i64(&self) -> Option<i64> {
        let width = self.ty.int_bits()?;
        let value = mask_to_width(self.bits, width);
        if width == 0 || width >= 64 {
            return Some(value as i64);
        }
        let shift = 64 - u32::from(width);
        Some(((value << shift) as i64) >> shift)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.ty {
            Type::F16 => Some(f16::from_bits(self.bits as u16).to_f64()),
            Type::F32 => Some(f64::from(f32::from_bits(self.bits as u32))),
            Type::F64 => Some(f64::from_bits(self.bits)),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.as_i64(), self.as_f64()) {
            (Some(value), _) => write!(f, "{value}:{}", self.ty),
            (None, Some(value)) => write!(f, "{value:?}:{}", self.ty),
            _ => write!(f, "{:#x}:{}", self.bits, self.ty),
        }
    }
}

pub(crate) fn mask_to_width(value: u64, width: u16) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    Literal(Literal),
}

impl Operand {
    pub fn value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(value) => Some(*value),
            Operand::Literal(_) => None,
        }
    }

    pub fn literal(&self) -> Option<&Literal> {
        match self {
            Operand::Literal(literal) => Some(literal),
            Operand::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Some(match name {
            "add" => BinaryOp::Add,
            "sub" => BinaryOp::Sub,
            "mul" => BinaryOp::Mul,
            "div" => BinaryOp::Div,
            "rem" => BinaryOp::Rem,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "xor" => BinaryOp::Xor,
            "shl" => BinaryOp::Shl,
            "lshr" => BinaryOp::LShr,
            "ashr" => BinaryOp::AShr,
            _ => return None,
        })
    }

    pub fn is_right_shift(self) -> bool {
        matches!(self, BinaryOp::LShr | BinaryOp::AShr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastKind {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

impl CastKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CastKind::Trunc => "trunc",
            CastKind::ZExt => "zext",
            CastKind::SExt => "sext",
            CastKind::FpTrunc => "fptrunc",
            CastKind::FpExt => "fpext",
            CastKind::FpToUi => "fptoui",
            CastKind::FpToSi => "fptosi",
            CastKind::UiToFp => "uitofp",
            CastKind::SiToFp => "sitofp",
            CastKind::Bitcast => "bitcast",
            CastKind::PtrToInt => "ptrtoint",
            CastKind::IntToPtr => "inttoptr",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Some(match name {
            "trunc" => CastKind::Trunc,
            "zext" => CastKind::ZExt,
            "sext" => CastKind::SExt,
            "fptrunc" => CastKind::FpTrunc,
            "fpext" => CastKind::FpExt,
            "fptoui" => CastKind::FpToUi,
            "fptosi" => CastKind::FpToSi,
            "uitofp" => CastKind::UiToFp,
            "sitofp" => CastKind::SiToFp,
            "bitcast" => CastKind::Bitcast,
            "ptrtoint" => CastKind::PtrToInt,
            "inttoptr" => CastKind::IntToPtr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
    Olt,
    Ole,
    Ogt,
    Oge,
    Oeq,
    One,
}

impl Predicate {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Slt => "slt",
            Predicate::Sle => "sle",
            Predicate::Sgt => "sgt",
            Predicate::Sge => "sge",
            Predicate::Ult => "ult",
            Predicate::Ule => "ule",
            Predicate::Ugt => "ugt",
            Predicate::Uge => "uge",
            Predicate::Olt => "olt",
            Predicate::Ole => "ole",
            Predicate::Ogt => "ogt",
            Predicate::Oge => "oge",
            Predicate::Oeq => "oeq",
            Predicate::One => "one",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Predicate::Eq,
            "ne" => Predicate::Ne,
            "slt" => Predicate::Slt,
            "sle" => Predicate::Sle,
            "sgt" => Predicate::Sgt,
            "sge" => Predicate::Sge,
            "ult" => Predicate::Ult,
            "ule" => Predicate::Ule,
            "ugt" => Predicate::Ugt,
            "uge" => Predicate::Uge,
            "olt" => Predicate::Olt,
            "ole" => Predicate::Ole,
            "ogt" => Predicate::Ogt,
            "oge" => Predicate::Oge,
            "oeq" => Predicate::Oeq,
            "one" => Predicate::One,
            _ => return None,
        })
    }
}

/// Call target. Indirect calls take the callee as their first operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    Intrinsic { intrinsic: Intrinsic, name: String },
    Function(String),
    Indirect,
}

impl Callee {
    /// Resolves a symbol name, recognising architecture intrinsics.
    pub fn named(name: &str) -> Self {
        match Intrinsic::from_name(name) {
            Some(intrinsic) => Callee::Intrinsic {
                intrinsic,
                name: name.to_string(),
            },
            None => Callee::Function(name.to_string()),
        }
    }
}

/// Declarative form of an instruction's operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Binary(BinaryOp),
    Cast(CastKind),
    Compare(Predicate),
    Load,
    Store,
    AddressOf,
    Alloca,
    /// Incoming blocks, parallel to the instruction's operands.
    Phi { incoming: Vec<BlockId> },
    Call(Callee),
    Branch { target: BlockId },
    CondBranch { then_block: BlockId, else_block: BlockId },
    Return,
    Unreachable,
}

impl Operation {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Operation::Branch { .. }
                | Operation::CondBranch { .. }
                | Operation::Return
                | Operation::Unreachable
        )
    }

    /// Operations that must survive even when their value is unused.
    pub fn has_side_effects(&self) -> bool {
        self.is_terminator() || matches!(self, Operation::Store | Operation::Call(_))
    }
}

/// No-wrap attributes carried by integer arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WrapFlags {
    pub nuw: bool,
    pub nsw: bool,
}

impl WrapFlags {
    pub const NONE: WrapFlags = WrapFlags {
        nuw: false,
        nsw: false,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub output: Type,
    pub flags: WrapFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    pub body: Vec<Instruction>,
}

/// Single function in SSA form; blocks are addressed by their position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameter_ids: Vec<ValueId>,
    pub parameters: Vec<Type>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn block_by_label(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|block| block.label == label)
            .map(|block| block.id)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.body.len()).sum()
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|block| block.body.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_sign_extends_narrow_integers() {
        let lit = Literal::int(Type::I8, -1);
        assert_eq!(lit.bits, 0xff);
        assert_eq!(lit.as_i64(), Some(-1));
        assert_eq!(lit.as_u64(), Some(255));
    }

    #[test]
    fn literal_keeps_full_width_for_i64() {
        let lit = Literal::int(Type::I64, i64::MIN);
        assert_eq!(lit.as_i64(), Some(i64::MIN));
        assert_eq!(lit.as_u64(), Some(1u64 << 63));
    }

    #[test]
    fn half_literals_decode_as_half_precision() {
        let lit = Literal::f16(1.5);
        assert_eq!(lit.bits, 0x3e00);
        assert_eq!(lit.as_f64(), Some(1.5));
        assert_eq!(Literal::f16(0.1).as_f64(), Some(f16::from_f32(0.1).to_f64()));
        assert_eq!(lit.to_string(), "1.5:f16");
    }

    #[test]
    fn float_literals_are_not_integers() {
        let lit = Literal::f32(1.5);
        assert_eq!(lit.as_i64(), None);
        assert_eq!(lit.as_f64(), Some(1.5));
    }
}
