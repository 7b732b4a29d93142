use tracing::debug;

use super::driver::{BalanceError, BalanceOutcome, Balancer};
use crate::ir::{
    loops::{BlockFrequencies, LoopBody, LoopForest},
    rewriter::ProgramRewriter,
    spec::Function,
};

/// Result returned by [`BalancePass::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the IR.
    pub changed: bool,
    /// Scan rounds executed across all loops.
    pub iterations: usize,
    /// Total number of rewrites applied.
    pub rewrites_applied: usize,
    /// Instructions removed by applied rewrites.
    pub erased_insts: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_insts: self.erased_insts + other.erased_insts,
        }
    }
}

impl From<&BalanceOutcome> for PassResult {
    fn from(outcome: &BalanceOutcome) -> Self {
        PassResult {
            changed: outcome.changed,
            iterations: outcome.iterations,
            rewrites_applied: outcome.applied.len(),
            erased_insts: outcome.erased_insts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopReport {
    pub label: String,
    /// Set for loops with nested loops, which are never rewritten.
    pub skipped: bool,
    pub outcome: BalanceOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub result: PassResult,
    pub loops: Vec<LoopReport>,
}

/// Runs the [`Balancer`] over every loop of a function.
pub struct BalancePass<'p> {
    balancer: Balancer<'p>,
}

impl<'p> BalancePass<'p> {
    pub const NAME: &'static str = "fu-balance";

    pub fn new(balancer: Balancer<'p>) -> Self {
        Self { balancer }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Visits loops outermost first. Only innermost loops are rewritten.
    pub fn run(
        &self,
        function: &mut Function,
        frequencies: &BlockFrequencies,
        loops: &LoopForest,
    ) -> Result<PassReport, BalanceError> {
        let name = function.name.clone();
        let mut rewriter = ProgramRewriter::new(function).map_err(|source| BalanceError::Index {
            function: name.clone(),
            source,
        })?;

        let mut report = PassReport::default();
        for info in loops.iter() {
            let body = LoopBody::from_loop(info, frequencies);
            let outcome = self.balancer.balance_with(&mut rewriter, &body)?;
            report.result = report.result.merge(PassResult::from(&outcome));
            report.loops.push(LoopReport {
                label: body.label,
                skipped: body.has_subloops,
                outcome,
            });
        }

        debug!(
            function = %name,
            pass = self.name(),
            changed = report.result.changed,
            rewrites = report.result.rewrites_applied,
            "pass finished"
        );
        Ok(report)
    }
}
