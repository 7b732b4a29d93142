//! Functional-unit usage model and the greedy rebalancing pass.

pub mod classify;
pub mod driver;
pub mod overuse;
pub mod pass;
pub mod profile;
pub mod transforms;
pub mod units;
pub mod usage;

pub use classify::{can_bitfield_extract, can_fuse_mult_add, classify, classify_instruction, UnitSet};
pub use driver::{balance, AppliedRewrite, BalanceConfig, BalanceError, BalanceOutcome, Balancer};
pub use overuse::{overuse_rate, pressure, UnitPressure};
pub use pass::{BalancePass, LoopReport, PassReport, PassResult};
pub use profile::{CapacityProfile, ProfileError, CAPACITY_BASIS};
pub use transforms::{catalog, RewriteRule};
pub use units::FunctionalUnit;
pub use usage::{analyze, analyze_function, estimate, UsageDelta, UsageVector};
