use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use super::{classify::classify, units::FunctionalUnit};
use crate::ir::{
    index::{FunctionIndexError, FunctionIndices},
    loops::{BlockFrequencies, LoopBody, WeightedBlock},
    rewriter::ProgramView,
    spec::Function,
};

/// Frequency-weighted demand per functional unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageVector([u64; FunctionalUnit::COUNT]);

impl UsageVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_counts(counts: [u64; FunctionalUnit::COUNT]) -> Self {
        Self(counts)
    }

    pub fn get(&self, unit: FunctionalUnit) -> u64 {
        self.0[unit.index()]
    }

    pub fn add(&mut self, unit: FunctionalUnit, weight: u64) {
        let slot = &mut self.0[unit.index()];
        *slot = slot.saturating_add(weight);
    }

    pub fn total(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, value| acc.saturating_add(*value))
    }

    /// Sum over every unit that carries a hardware capacity.
    pub fn modeled_total(&self) -> u64 {
        FunctionalUnit::modeled().fold(0u64, |acc, unit| acc.saturating_add(self.get(unit)))
    }

    pub fn counts(&self) -> &[u64; FunctionalUnit::COUNT] {
        &self.0
    }

    /// Projects the vector after applying `delta` once per unit of `weight`.
    /// Entries never drop below zero.
    pub fn apply(&self, delta: &UsageDelta, weight: u64) -> UsageVector {
        let mut out = *self;
        for unit in FunctionalUnit::ALL {
            let change = i128::from(delta.get(unit)) * i128::from(weight);
            let next = i128::from(self.get(unit)) + change;
            out.0[unit.index()] = next.clamp(0, i128::from(u64::MAX)) as u64;
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (FunctionalUnit, u64)> + '_ {
        FunctionalUnit::ALL.into_iter().map(|unit| (unit, self.get(unit)))
    }
}

impl Index<FunctionalUnit> for UsageVector {
    type Output = u64;

    fn index(&self, unit: FunctionalUnit) -> &u64 {
        &self.0[unit.index()]
    }
}

/// One `NAME count` line per unit, in unit order.
impl fmt::Display for UsageVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, count) in self.iter() {
            writeln!(f, "{} {count}", unit.short_name())?;
        }
        Ok(())
    }
}

/// Signed, mostly-zero change a rewrite declares on a usage vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UsageDelta([i64; FunctionalUnit::COUNT]);

impl UsageDelta {
    pub fn from_entries(entries: &[(FunctionalUnit, i64)]) -> Self {
        let mut delta = Self::default();
        for (unit, change) in entries {
            delta.0[unit.index()] += change;
        }
        delta
    }

    pub fn get(&self, unit: FunctionalUnit) -> i64 {
        self.0[unit.index()]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|change| *change == 0)
    }

    /// Non-zero entries in unit order.
    pub fn entries(&self) -> impl Iterator<Item = (FunctionalUnit, i64)> + '_ {
        FunctionalUnit::ALL
            .into_iter()
            .map(|unit| (unit, self.get(unit)))
            .filter(|(_, change)| *change != 0)
    }
}

impl fmt::Display for UsageDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries()
            .map(|(unit, change)| format!("{}{change:+}", unit.short_name()))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Usage of `body`: every unit an instruction occupies is charged the
/// execution frequency of its block.
pub fn estimate(view: &ProgramView<'_>, body: &LoopBody) -> UsageVector {
    let mut usage = UsageVector::new();
    for weighted in &body.blocks {
        for inst in view.insts_in_block(weighted.block) {
            for unit in classify(view, inst) {
                usage.add(unit, weighted.frequency);
            }
        }
    }
    usage
}

/// Read-only usage estimation for one loop body of `function`.
pub fn analyze(function: &Function, body: &LoopBody) -> Result<UsageVector, FunctionIndexError> {
    let indices = FunctionIndices::build(function)?;
    Ok(estimate(&ProgramView::new(function, &indices), body))
}

/// Instruction mix of a whole function, independent of loop structure.
pub fn analyze_function(
    function: &Function,
    frequencies: &BlockFrequencies,
) -> Result<UsageVector, FunctionIndexError> {
    let body = LoopBody::flat(
        function.name.clone(),
        function
            .blocks
            .iter()
            .map(|block| WeightedBlock {
                block: block.id,
                frequency: frequencies.get(block.id),
            })
            .collect(),
    );
    analyze(function, &body)
}
