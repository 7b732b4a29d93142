//! Loop structure and execution-frequency estimates supplied by the host.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ir::spec::BlockId;

/// Per-block execution-frequency estimates. Blocks without an estimate weigh 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFrequencies {
    weights: HashMap<BlockId, u64>,
}

impl BlockFrequencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, block: BlockId, weight: u64) {
        self.weights.insert(block, weight);
    }

    pub fn get(&self, block: BlockId) -> u64 {
        self.weights.get(&block).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl FromIterator<(BlockId, u64)> for BlockFrequencies {
    fn from_iter<I: IntoIterator<Item = (BlockId, u64)>>(iter: I) -> Self {
        Self {
            weights: iter.into_iter().collect(),
        }
    }
}

/// One natural loop: its own blocks (including those of nested loops) and
/// the loops nested directly inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopInfo {
    pub label: String,
    pub blocks: Vec<BlockId>,
    pub subloops: Vec<LoopInfo>,
}

impl LoopInfo {
    pub fn is_innermost(&self) -> bool {
        self.subloops.is_empty()
    }

    /// Pre-order walk over this loop and every nested loop.
    pub fn walk(&self) -> Vec<&LoopInfo> {
        let mut out = vec![self];
        for sub in &self.subloops {
            out.extend(sub.walk());
        }
        out
    }
}

/// Top-level loops of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopForest {
    pub loops: Vec<LoopInfo>,
}

impl LoopForest {
    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.iter().flat_map(|root| root.walk())
    }

    pub fn innermost(&self) -> impl Iterator<Item = &LoopInfo> {
        self.iter().filter(|info| info.is_innermost())
    }

    pub fn find(&self, label: &str) -> Option<&LoopInfo> {
        self.iter().find(|info| info.label == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedBlock {
    pub block: BlockId,
    pub frequency: u64,
}

/// Weighted block sequence the usage estimator and balancer operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBody {
    pub label: String,
    pub blocks: Vec<WeightedBlock>,
    pub has_subloops: bool,
}

impl LoopBody {
    pub fn from_loop(info: &LoopInfo, frequencies: &BlockFrequencies) -> Self {
        Self {
            label: info.label.clone(),
            blocks: info
                .blocks
                .iter()
                .map(|block| WeightedBlock {
                    block: *block,
                    frequency: frequencies.get(*block),
                })
                .collect(),
            has_subloops: !info.is_innermost(),
        }
    }

    /// Body with no loop structure, e.g. a whole function treated as one region.
    pub fn flat(label: impl Into<String>, blocks: Vec<WeightedBlock>) -> Self {
        Self {
            label: label.into(),
            blocks,
            has_subloops: false,
        }
    }

    pub fn is_innermost(&self) -> bool {
        !self.has_subloops
    }

    pub fn frequency_of(&self, block: BlockId) -> Option<u64> {
        self.blocks
            .iter()
            .find(|weighted| weighted.block == block)
            .map(|weighted| weighted.frequency)
    }
}
