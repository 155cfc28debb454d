use serde::{Deserialize, Serialize};

use crate::spec::SpecError;

/// Fixed step used when none is configured: 60 ticks per simulated second.
pub const DEFAULT_TIMESTEP: f64 = 1.0 / 60.0;

/// World construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Opaque identifier; no effect on physics.
    pub name: String,
    /// Seconds advanced by every update.
    pub timestep: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: "world".into(),
            timestep: DEFAULT_TIMESTEP,
        }
    }
}

impl WorldConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.timestep.is_finite() && self.timestep > 0.0 {
            Ok(())
        } else {
            Err(SpecError::Invalid {
                field: "timestep",
                reason: format!("expected a positive step, got {}", self.timestep),
            })
        }
    }
}
