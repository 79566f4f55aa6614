//! Simulation names.
//!
//! A name ends up in archive paths (`{status}_{name}`), so it must be a single
//! path component.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

const ADJECTIVES: [&str; 16] = [
    "amber", "brisk", "calm", "dusty", "eager", "frosty", "gentle", "hazy", "icy", "jolly",
    "keen", "lucid", "mellow", "nimble", "quiet", "sunny",
];

const NOUNS: [&str; 16] = [
    "atrium", "beam", "chiller", "duct", "eave", "facade", "gable", "hall", "joist", "kiln",
    "loft", "mullion", "niche", "oriel", "plenum", "rafter",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SimulationName(String);

impl SimulationName {
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name == "." || name == ".." {
            Some("name is a relative path component")
        } else if name.contains(['/', '\\']) {
            Some("name contains a path separator")
        } else if name.contains('\0') {
            Some("name contains a NUL byte")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CoreError::InvalidName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// Random readable slug, e.g. `hazy-gable-3f9a0c12`.
    pub fn generate() -> Self {
        let bytes = *uuid::Uuid::new_v4().as_bytes();
        let adjective = ADJECTIVES[(bytes[0] as usize) % ADJECTIVES.len()];
        let noun = NOUNS[(bytes[1] as usize) % NOUNS.len()];
        let suffix: String = bytes[2..6].iter().map(|b| format!("{:02x}", b)).collect();
        Self(format!("{}-{}-{}", adjective, noun, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SimulationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SimulationName {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<SimulationName> for String {
    fn from(name: SimulationName) -> Self {
        name.0
    }
}

impl AsRef<str> for SimulationName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
