//! Kinetica kernel: a fixed-timestep world of rigid-body agents.
//!
//! # Invariants
//! - Every registered agent owns exactly one body in the world's physics space.
//! - Actuation queued during a tick is integrated by the next tick's step.
//! - Agents are added and removed only between ticks; removal is a flag until then.
//! - Each agent is destroyed exactly once, through the destroyer bound at creation.

pub mod agent;
pub mod collision;
pub mod config;
pub mod context;
pub mod error;
pub mod physics;
pub mod plugin;
pub mod process;
pub mod sensor;
pub mod spec;
pub mod world;

pub use agent::{
    Agent, AgentSnapshot, DEFAULT_K, DEFAULT_KL, DEFAULT_KR, DEFAULT_OMNI_V, DEFAULT_VF, DEFAULT_VR,
};
pub use collision::{CollisionEvent, CollisionHandler};
pub use config::{DEFAULT_TIMESTEP, WorldConfig};
pub use context::WorldCtx;
pub use error::KernelError;
pub use plugin::{AgentPlugin, AgentType, CreateFn, DestroyFn, PluginRegistry, WorldRef};
pub use process::{Lifecycle, Process};
pub use sensor::{RangeSensor, Sensor, SensorCatalog, SensorReading};
pub use spec::{Definition, SpecError, Specification};
pub use world::{World, WorldEvent, WorldSnapshot};

pub use kinetica_common::{AgentId, Pose, Velocity};

/// Returns crate name and version, for `info`-style reporting.
pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}
