//! Self-contained SSA program representation the balancing core runs against.
//!
//! The core never mutates a [`spec::Function`] directly: it reads through
//! [`rewriter::ProgramView`] and requests edits as declarative
//! [`rewriter::Replacement`]s applied by [`rewriter::ProgramRewriter::splice`].

pub mod index;
pub mod intrinsics;
pub mod loops;
pub mod rewriter;
pub mod spec;
pub mod text_ir;

pub use index::{FunctionIndexError, FunctionIndices, InstId, InstPosition};
pub use intrinsics::Intrinsic;
pub use loops::{BlockFrequencies, LoopBody, LoopForest, LoopInfo, WeightedBlock};
pub use rewriter::{
    FragmentInst, FragmentOperand, ProgramRewriter, ProgramView, Replacement, RewriteError,
};
pub use spec::{
    BinaryOp, Block, BlockId, Callee, CastKind, Function, Instruction, Literal, Operand,
    Operation, Predicate, Type, ValueId, WrapFlags,
};
pub use text_ir::{parse_module, print_function, print_module, ParsedModule, TextIrError};
