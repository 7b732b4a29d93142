use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};

use super::{
    overuse::overuse_rate,
    profile::CapacityProfile,
    transforms::{catalog, RewriteRule},
    usage::{estimate, UsageVector},
};
use crate::env;
use crate::ir::{
    index::{FunctionIndexError, InstId},
    loops::LoopBody,
    rewriter::{ProgramRewriter, RewriteError},
    spec::{BlockId, Function, ValueId},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceConfig {
    /// Upper bound a rewrite's resulting overuse must beat on the first
    /// iteration. `None` accepts any strictly improving rewrite.
    ///
    /// This is an entry bar, not a stopping point: the loop keeps applying
    /// strictly improving rewrites until none is left, even after overuse
    /// falls below the threshold. "Threshold met" therefore means the first
    /// rewrite cleared it; runs stop only at convergence or at
    /// `max_iterations`.
    pub threshold: Option<f64>,
    /// Guard on the number of scan rounds per loop.
    pub max_iterations: usize,
    /// Re-verify SSA invariants after every applied rewrite.
    pub verify: bool,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            max_iterations: usize::MAX,
            verify: false,
        }
    }
}

impl BalanceConfig {
    /// Defaults overridden by `FU_BALANCE_THRESHOLD`, `FU_BALANCE_MAX_ITERS`
    /// and `FU_BALANCE_VERIFY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            threshold: env::threshold_override().or(defaults.threshold),
            max_iterations: env::max_iterations_override().unwrap_or(defaults.max_iterations),
            verify: env::verify_enabled(),
        }
    }

    pub fn with_threshold(mut self, threshold: Option<f64>) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// One rewrite committed by the balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRewrite {
    pub rule: RewriteRule,
    pub block: BlockId,
    /// Value that replaced the rewritten instruction.
    pub result: ValueId,
    /// Overuse rate after the rewrite.
    pub overuse: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOutcome {
    pub changed: bool,
    pub usage: UsageVector,
    pub initial_overuse: f64,
    pub overuse: f64,
    pub applied: Vec<AppliedRewrite>,
    pub iterations: usize,
    pub inserted_insts: usize,
    pub erased_insts: usize,
}

impl BalanceOutcome {
    fn unchanged(usage: UsageVector, overuse: f64) -> Self {
        Self {
            changed: false,
            usage,
            initial_overuse: overuse,
            overuse,
            applied: Vec::new(),
            iterations: 0,
            inserted_insts: 0,
            erased_insts: 0,
        }
    }
}

/// Structural failures. Expected conditions (no candidate, malformed
/// candidate, non-innermost loop) are reported through [`BalanceOutcome`].
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("failed to index function `{function}`")]
    Index {
        function: String,
        #[source]
        source: FunctionIndexError,
    },
    #[error("loop `{label}` references block {} outside the function", block.0)]
    UnknownBlock { label: String, block: BlockId },
    #[error("applying `{rule}` in loop `{label}` failed")]
    Splice {
        rule: RewriteRule,
        label: String,
        #[source]
        source: RewriteError,
    },
    #[error("function failed verification after `{rule}` in loop `{label}`")]
    Verification { rule: RewriteRule, label: String },
}

#[derive(Debug, Clone)]
struct Candidate {
    rule_index: usize,
    rule: RewriteRule,
    inst: InstId,
    block: BlockId,
    projected: UsageVector,
    overuse: f64,
}

/// Greedy fixpoint over the rewrite catalog for one loop body at a time.
pub struct Balancer<'p> {
    profile: &'p CapacityProfile,
    config: BalanceConfig,
    rules: Vec<RewriteRule>,
}

impl<'p> Balancer<'p> {
    pub fn new(profile: &'p CapacityProfile) -> Self {
        Self {
            profile,
            config: BalanceConfig::default(),
            rules: catalog().to_vec(),
        }
    }

    pub fn with_config(mut self, config: BalanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the searched rules; their order is the tie-break order.
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = RewriteRule>) -> Self {
        self.rules = rules.into_iter().collect();
        self
    }

    pub fn profile(&self) -> &CapacityProfile {
        self.profile
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    /// Balances `body` inside `function`.
    pub fn balance(&self, function: &mut Function, body: &LoopBody) -> Result<BalanceOutcome, BalanceError> {
        let name = function.name.clone();
        let mut rewriter = ProgramRewriter::new(function).map_err(|source| BalanceError::Index {
            function: name,
            source,
        })?;
        self.balance_with(&mut rewriter, body)
    }

    /// Balances `body` through an existing rewriter, so several loops of one
    /// function can share its indices.
    pub fn balance_with(
        &self,
        rewriter: &mut ProgramRewriter<'_>,
        body: &LoopBody,
    ) -> Result<BalanceOutcome, BalanceError> {
        let block_count = rewriter.func.blocks.len();
        if let Some(weighted) = body.blocks.iter().find(|weighted| weighted.block.index() >= block_count) {
            return Err(BalanceError::UnknownBlock {
                label: body.label.clone(),
                block: weighted.block,
            });
        }

        let initial = estimate(&rewriter.view(), body);
        let initial_overuse = overuse_rate(&initial, self.profile);
        if !body.is_innermost() {
            debug!(loop_label = %body.label, "skipping loop with nested loops");
            return Ok(BalanceOutcome::unchanged(initial, initial_overuse));
        }

        let mut outcome = BalanceOutcome::unchanged(initial, initial_overuse);
        let mut bound = match self.config.threshold {
            Some(threshold) => initial_overuse.min(threshold),
            None => initial_overuse,
        };
        let mut failure_cache: HashMap<(usize, InstId), u32> = HashMap::new();
        let mut converged = false;

        while outcome.iterations < self.config.max_iterations {
            outcome.iterations += 1;
            let candidates = self.scan(rewriter, body, &outcome.usage, &failure_cache);

            let mut committed = None;
            for candidate in candidates {
                if candidate.overuse >= bound {
                    break;
                }
                let planned = candidate.rule.plan(&rewriter.view(), candidate.inst);
                let replacement = match planned {
                    Ok(replacement) => replacement,
                    Err(err) => {
                        trace!(
                            rule = candidate.rule.name(),
                            inst = candidate.inst.0,
                            error = %err,
                            "discarding candidate"
                        );
                        let version = rewriter.version(candidate.inst).unwrap_or(0);
                        failure_cache.insert((candidate.rule_index, candidate.inst), version);
                        continue;
                    }
                };
                let result = rewriter
                    .splice(&replacement)
                    .map_err(|source| BalanceError::Splice {
                        rule: candidate.rule,
                        label: body.label.clone(),
                        source,
                    })?;
                if self.config.verify && !rewriter.verify() {
                    return Err(BalanceError::Verification {
                        rule: candidate.rule,
                        label: body.label.clone(),
                    });
                }
                outcome.inserted_insts += replacement.fragment.len();
                outcome.erased_insts += replacement.erase.len() + 1;
                committed = Some((candidate, result));
                break;
            }

            let Some((candidate, result)) = committed else {
                converged = true;
                break;
            };
            debug!(
                loop_label = %body.label,
                rule = candidate.rule.name(),
                overuse_before = bound,
                overuse_after = candidate.overuse,
                "applied rewrite"
            );
            bound = candidate.overuse;
            outcome.usage = candidate.projected;
            outcome.overuse = candidate.overuse;
            outcome.changed = true;
            outcome.applied.push(AppliedRewrite {
                rule: candidate.rule,
                block: candidate.block,
                result,
                overuse: candidate.overuse,
            });
        }

        if !converged {
            debug!(
                loop_label = %body.label,
                max_iterations = self.config.max_iterations,
                "iteration guard reached"
            );
        }
        Ok(outcome)
    }

    /// Every applicable (rule, instruction) pair with its projected usage,
    /// ordered by resulting overuse. The sort is stable, so ties keep rule
    /// order, then layout order.
    fn scan(
        &self,
        rewriter: &ProgramRewriter<'_>,
        body: &LoopBody,
        usage: &UsageVector,
        failure_cache: &HashMap<(usize, InstId), u32>,
    ) -> Vec<Candidate> {
        let view = rewriter.view();
        let mut candidates = Vec::new();
        for (rule_index, rule) in self.rules.iter().copied().enumerate() {
            let delta = rule.delta();
            for weighted in &body.blocks {
                for inst in view.insts_in_block(weighted.block) {
                    let failed = failure_cache.get(&(rule_index, inst)).copied();
                    if failed.is_some() && failed == rewriter.version(inst) {
                        continue;
                    }
                    if !rule.matches(&view, inst) {
                        continue;
                    }
                    let projected = usage.apply(&delta, weighted.frequency);
                    let overuse = overuse_rate(&projected, self.profile);
                    candidates.push(Candidate {
                        rule_index,
                        rule,
                        inst,
                        block: weighted.block,
                        projected,
                        overuse,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| a.overuse.total_cmp(&b.overuse));
        candidates
    }
}

/// Runs the balancer on one loop body with default limits, returning whether
/// the function changed and the final usage vector.
pub fn balance(
    function: &mut Function,
    body: &LoopBody,
    profile: &CapacityProfile,
    threshold: Option<f64>,
) -> Result<(bool, UsageVector), BalanceError> {
    let outcome = Balancer::new(profile)
        .with_config(BalanceConfig::default().with_threshold(threshold))
        .balance(function, body)?;
    Ok((outcome.changed, outcome.usage))
}
