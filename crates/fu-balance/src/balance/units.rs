use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hardware execution-resource categories.
///
/// The declaration order is the index order of every per-unit vector
/// ([`UsageVector`](super::usage::UsageVector), [`UsageDelta`](super::usage::UsageDelta),
/// [`CapacityProfile`](super::profile::CapacityProfile)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FunctionalUnit {
    #[serde(rename = "FP32")]
    Fp32,
    #[serde(rename = "FP64")]
    Fp64,
    Trans,
    IntAdd,
    IntMul,
    Shift,
    Bitfield,
    Logic,
    Warp,
    Conv32,
    Conv64,
    Conv,
    Mem,
    Control,
    /// Constructs that consume no modeled resource.
    Pseudo,
}

impl FunctionalUnit {
    pub const COUNT: usize = 15;

    pub const ALL: [FunctionalUnit; Self::COUNT] = [
        FunctionalUnit::Fp32,
        FunctionalUnit::Fp64,
        FunctionalUnit::Trans,
        FunctionalUnit::IntAdd,
        FunctionalUnit::IntMul,
        FunctionalUnit::Shift,
        FunctionalUnit::Bitfield,
        FunctionalUnit::Logic,
        FunctionalUnit::Warp,
        FunctionalUnit::Conv32,
        FunctionalUnit::Conv64,
        FunctionalUnit::Conv,
        FunctionalUnit::Mem,
        FunctionalUnit::Control,
        FunctionalUnit::Pseudo,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn short_name(self) -> &'static str {
        match self {
            FunctionalUnit::Fp32 => "FP32",
            FunctionalUnit::Fp64 => "FP64",
            FunctionalUnit::Trans => "Trans",
            FunctionalUnit::IntAdd => "IntAdd",
            FunctionalUnit::IntMul => "IntMul",
            FunctionalUnit::Shift => "Shift",
            FunctionalUnit::Bitfield => "Bitfield",
            FunctionalUnit::Logic => "Logic",
            FunctionalUnit::Warp => "Warp",
            FunctionalUnit::Conv32 => "Conv32",
            FunctionalUnit::Conv64 => "Conv64",
            FunctionalUnit::Conv => "Conv",
            FunctionalUnit::Mem => "Mem",
            FunctionalUnit::Control => "Control",
            FunctionalUnit::Pseudo => "Pseudo",
        }
    }

    pub fn is_pseudo(self) -> bool {
        self == FunctionalUnit::Pseudo
    }

    /// Every unit that carries a hardware capacity.
    pub fn modeled() -> impl Iterator<Item = FunctionalUnit> {
        Self::ALL.into_iter().filter(|unit| !unit.is_pseudo())
    }
}

impl fmt::Display for FunctionalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for FunctionalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.short_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown functional unit `{s}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_declaration_order() {
        for (idx, unit) in FunctionalUnit::ALL.iter().enumerate() {
            assert_eq!(unit.index(), idx);
        }
        assert_eq!(FunctionalUnit::Pseudo.index(), FunctionalUnit::COUNT - 1);
    }

    #[test]
    fn short_names_round_trip() {
        for unit in FunctionalUnit::ALL {
            assert_eq!(unit.short_name().parse::<FunctionalUnit>(), Ok(unit));
        }
        assert!("Tensor".parse::<FunctionalUnit>().is_err());
    }
}
