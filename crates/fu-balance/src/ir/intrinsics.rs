//! Recognised architecture intrinsics.
//!
//! Names follow the NVVM convention `llvm.nvvm.<mnemonic>[.<modifier>]*`.
//! Only the family matters to the functional-unit classifier; operand and
//! result widths are read from the call instruction itself.

use serde::{Deserialize, Serialize};

const PREFIX: &str = "llvm.nvvm.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intrinsic {
    /// Integer `min`/`max`.
    IntMinMax,
    /// Float `fmin`/`fmax`.
    FloatMinMax,
    /// Fused multiply-add with explicit rounding.
    Fma,
    /// Square root with explicit rounding (`sqrt.rn.f`, `sqrt.rn.d`, ...).
    Sqrt,
    /// `rcp`, `rsqrt`, `lg2`, `ex2`, `sin`, `cos` and their approximations.
    Transcendental { approx: bool },
    PopCount,
    LeadingZeros,
    SumAbsDiff,
    BitReverse,
    /// Cross-lane shuffles and votes.
    Shuffle,
    /// Special-register reads and plain register moves.
    RegisterMove,
    /// Bit reinterpretation between integer and float registers.
    Reinterpret,
    /// Numeric conversion with an explicit rounding mode (`f2i.rz`, `d2f.rn`, ...).
    RoundingConvert,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(PREFIX)?;
        let mut segments = rest.split('.');
        let mnemonic = segments.next()?;
        let modifiers: Vec<&str> = segments.collect();

        let intrinsic = match mnemonic {
            "min" | "max" => Intrinsic::IntMinMax,
            "fmin" | "fmax" => Intrinsic::FloatMinMax,
            "fma" => Intrinsic::Fma,
            "sqrt" if modifiers.contains(&"approx") => Intrinsic::Transcendental { approx: true },
            "sqrt" => Intrinsic::Sqrt,
            "rcp" | "rsqrt" | "lg2" | "ex2" | "sin" | "cos" => Intrinsic::Transcendental {
                approx: modifiers.contains(&"approx"),
            },
            "popc" => Intrinsic::PopCount,
            "clz" => Intrinsic::LeadingZeros,
            "sad" => Intrinsic::SumAbsDiff,
            "brev32" | "brev64" => Intrinsic::BitReverse,
            "shfl" | "vote" => Intrinsic::Shuffle,
            "read" | "move" => Intrinsic::RegisterMove,
            "bitcast" => Intrinsic::Reinterpret,
            other if is_conversion_mnemonic(other) => Intrinsic::RoundingConvert,
            _ => return None,
        };
        Some(intrinsic)
    }
}

/// Matches `<src>2<dst>` with both sides drawn from the PTX register kinds.
fn is_conversion_mnemonic(mnemonic: &str) -> bool {
    const KINDS: [&str; 7] = ["f", "d", "h", "i", "ui", "ll", "ull"];
    let Some((from, to)) = mnemonic.split_once('2') else {
        return false;
    };
    KINDS.contains(&from) && KINDS.contains(&to)
}
