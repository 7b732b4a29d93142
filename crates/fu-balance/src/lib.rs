//! Functional-unit usage estimation and greedy rebalancing for GPU loop
//! bodies.
//!
//! [`balance::analyze`] reports how heavily an innermost loop loads each
//! [`balance::FunctionalUnit`]; [`balance::Balancer`] rewrites instructions
//! with equivalents that shift load from overused units to units with slack,
//! as scored by [`balance::overuse_rate`] against a
//! [`balance::CapacityProfile`].

pub mod balance;
mod env;
pub mod ir;

pub use balance::{
    analyze, analyze_function, balance, BalanceConfig, BalanceError, BalanceOutcome, BalancePass,
    Balancer, CapacityProfile, FunctionalUnit, RewriteRule, UsageVector,
};
pub use env::profile_override;
