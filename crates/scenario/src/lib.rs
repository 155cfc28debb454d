//! Scenario files: world settings plus the agents to place in it.
//!
//! A scenario is JSON, or YAML when the file ends in `.yaml`/`.yml`:
//!
//! ```text
//! name: arena
//! timestep: 0.0166
//! ticks: 600
//! definitions: [ "defs/rock.json" ]        # spawnable by name
//! agents:
//!   - definition: "defs/robot.json"        # path, relative to the scenario
//!     position: { x: 0, y: 0, theta: 0 }
//!     style: { fill: gray }
//!   - definition: { name: Rock, type: static, friction: { linear: 0, rotational: 0 } }
//!     position: { x: 5, y: 0 }
//! ```
//!
//! Any other keys on an agent entry are copied into its specification
//! document untouched.

mod scenario;

pub use scenario::{AgentEntry, DefinitionSource, PositionEntry, Scenario, ScenarioConfig, ScenarioError};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}
