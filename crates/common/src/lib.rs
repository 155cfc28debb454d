//! Shared value types used across the kinetica workspace.

mod types;

pub use types::{AgentId, Pose, Velocity};
