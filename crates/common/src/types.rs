use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::DVec2;
use serde::{Deserialize, Serialize};

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for an agent.
///
/// Ids are handed out from a single counter, so an id is never reused while
/// the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl AgentId {
    pub fn next() -> Self {
        Self(NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Planar pose: position plus heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: DVec2,
    pub angle: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, angle: f64) -> Self {
        Self {
            position: DVec2::new(x, y),
            angle,
        }
    }

    /// Unit vector along the current heading.
    pub fn heading(&self) -> DVec2 {
        DVec2::from_angle(self.angle)
    }

    /// Transform a point from the body frame into world coordinates.
    pub fn to_world(&self, local: DVec2) -> DVec2 {
        self.position + self.heading().rotate(local)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.angle.is_finite()
    }
}

/// Linear and angular velocity of a body.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: DVec2,
    pub angular: f64,
}

impl Velocity {
    pub const ZERO: Self = Self {
        linear: DVec2::ZERO,
        angular: 0.0,
    };

    pub fn speed(&self) -> f64 {
        self.linear.length()
    }

    pub fn is_finite(&self) -> bool {
        self.linear.is_finite() && self.angular.is_finite()
    }
}
