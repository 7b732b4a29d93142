use super::{profile::CapacityProfile, units::FunctionalUnit, usage::UsageVector};

/// Share of modeled usage against share of capacity for one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitPressure {
    pub unit: FunctionalUnit,
    pub usage_fraction: f64,
    pub capacity_fraction: f64,
}

impl UnitPressure {
    pub fn is_overused(&self) -> bool {
        self.usage_fraction > self.capacity_fraction
    }

    /// Contribution of this unit to the overuse rate.
    pub fn penalty(&self) -> f64 {
        if self.is_overused() {
            self.usage_fraction / self.capacity_fraction
        } else {
            0.0
        }
    }
}

/// Per-unit pressure for every modeled unit. The pseudo unit is left out of
/// both the total and the listing. Empty when nothing is used.
pub fn pressure(usage: &UsageVector, profile: &CapacityProfile) -> Vec<UnitPressure> {
    let total = usage.modeled_total();
    if total == 0 {
        return Vec::new();
    }
    let total = total as f64;
    FunctionalUnit::modeled()
        .map(|unit| UnitPressure {
            unit,
            usage_fraction: usage.get(unit) as f64 / total,
            capacity_fraction: profile.fraction(unit),
        })
        .collect()
}

/// Penalty score summed over units whose usage share exceeds their capacity
/// share. Zero for an all-zero vector or a perfectly provisioned mix.
pub fn overuse_rate(usage: &UsageVector, profile: &CapacityProfile) -> f64 {
    pressure(usage, profile)
        .iter()
        .map(UnitPressure::penalty)
        .sum()
}
