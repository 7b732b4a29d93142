//! Per-architecture functional-unit capacity tables.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::units::FunctionalUnit;

/// Fixed sum every capacity is expressed against: a unit with capacity `c`
/// owns `c / CAPACITY_BASIS` of the issue bandwidth.
pub const CAPACITY_BASIS: u32 = 256;

/// Relative hardware provisioning per functional unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityProfile {
    name: String,
    capacities: [u32; FunctionalUnit::COUNT],
}

/// On-disk JSON form: `{ "name": "...", "capacities": { "FP32": 192, ... } }`.
#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    name: Option<String>,
    capacities: BTreeMap<String, u32>,
}

impl CapacityProfile {
    /// Builds a profile from a full capacity table. Every modeled unit needs
    /// a non-zero capacity; the pseudo entry is ignored and stored as 0.
    pub fn new(
        name: impl Into<String>,
        mut capacities: [u32; FunctionalUnit::COUNT],
    ) -> Result<Self, ProfileError> {
        if let Some(unit) = FunctionalUnit::modeled().find(|unit| capacities[unit.index()] == 0) {
            return Err(ProfileError::ZeroCapacity { unit });
        }
        capacities[FunctionalUnit::Pseudo.index()] = 0;
        Ok(Self {
            name: name.into(),
            capacities,
        })
    }

    /// Reference Kepler-class (`sm_35`) throughput table, per 256 issue slots.
    pub fn sm_35() -> Self {
        Self {
            name: "sm_35".to_string(),
            capacities: [192, 64, 32, 160, 160, 64, 64, 160, 32, 128, 32, 32, 256, 256, 0],
        }
    }

    /// Looks up a built-in profile by architecture name.
    pub fn by_name(name: &str) -> Result<Self, ProfileError> {
        match name.trim() {
            "sm_35" | "sm35" | "kepler" => Ok(Self::sm_35()),
            other => Err(ProfileError::UnknownArchitecture(other.to_string())),
        }
    }

    pub fn from_json(src: &str) -> Result<Self, ProfileError> {
        let file: ProfileFile = serde_json::from_str(src)?;
        let mut capacities = [0u32; FunctionalUnit::COUNT];
        let mut seen = [false; FunctionalUnit::COUNT];
        for (key, value) in &file.capacities {
            let unit: FunctionalUnit = key
                .parse()
                .map_err(|_| ProfileError::UnknownUnit(key.clone()))?;
            capacities[unit.index()] = *value;
            seen[unit.index()] = true;
        }
        if let Some(unit) = FunctionalUnit::modeled().find(|unit| !seen[unit.index()]) {
            return Err(ProfileError::MissingUnit { unit });
        }
        Self::new(file.name.unwrap_or_else(|| "custom".to_string()), capacities)
    }

    pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let src = fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&src)
    }

    pub fn to_json(&self) -> Result<String, ProfileError> {
        let file = ProfileFile {
            name: Some(self.name.clone()),
            capacities: FunctionalUnit::modeled()
                .map(|unit| (unit.short_name().to_string(), self.capacity(unit)))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self, unit: FunctionalUnit) -> u32 {
        self.capacities[unit.index()]
    }

    /// Share of the issue bandwidth owned by `unit`.
    pub fn fraction(&self, unit: FunctionalUnit) -> f64 {
        f64::from(self.capacity(unit)) / f64::from(CAPACITY_BASIS)
    }
}

impl Default for CapacityProfile {
    fn default() -> Self {
        Self::sm_35()
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unknown architecture profile `{0}` (built in: sm_35)")]
    UnknownArchitecture(String),
    #[error("unknown functional unit `{0}` in capacity table")]
    UnknownUnit(String),
    #[error("capacity table does not list {unit}")]
    MissingUnit { unit: FunctionalUnit },
    #[error("{unit} must have a non-zero capacity")]
    ZeroCapacity { unit: FunctionalUnit },
    #[error("failed to read capacity profile {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid capacity profile: {0}")]
    Json(#[from] serde_json::Error),
}
