//! Built-in agent types.
//!
//! [`register_builtin`] installs every type here into a plugin registry,
//! together with the definition documents used to spawn them by name.
//! Types without a behavior of their own (walls) are served by the passive
//! fallback plugin.

mod block;
mod wanderer;

pub use block::Block;
pub use wanderer::{BUMP_FILL, Wanderer};

use kinetica_kernel::{AgentPlugin, KernelError, PluginRegistry, SpecError};
use serde_json::Value;

const BLOCK: &str = include_str!("../definitions/block.json");
const WANDERER: &str = include_str!("../definitions/wanderer.json");
const WALL: &str = include_str!("../definitions/wall.json");

fn parse(source: &str) -> Result<Value, KernelError> {
    serde_json::from_str(source).map_err(|source| {
        SpecError::Malformed {
            field: "definition",
            source,
        }
        .into()
    })
}

pub fn block_definition() -> Result<Value, KernelError> {
    parse(BLOCK)
}

pub fn wanderer_definition() -> Result<Value, KernelError> {
    parse(WANDERER)
}

pub fn wall_definition() -> Result<Value, KernelError> {
    parse(WALL)
}

/// Register `Block`, `Wanderer` and `Wall`, and make unknown types passive.
pub fn register_builtin(registry: &mut PluginRegistry) -> Result<(), KernelError> {
    registry
        .register_type::<Block>("Block")
        .register_type::<Wanderer>("Wanderer")
        .set_fallback(AgentPlugin::passive());
    registry
        .define(block_definition()?)?
        .define(wanderer_definition()?)?
        .define(wall_definition()?)?;
    tracing::debug!(kinds = ?registry.kinds().collect::<Vec<_>>(), "built-in agent types registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetica_kernel::{Pose, Specification, World};

    #[test]
    fn builtin_definitions_parse() {
        for def in [block_definition(), wanderer_definition(), wall_definition()] {
            let def = def.unwrap();
            let spec = Specification::from_parts(def, Pose::default(), None);
            assert!(spec.definition().is_ok(), "{:?}", spec.definition().err());
        }
    }

    #[test]
    fn builtin_types_spawn_by_name() {
        let mut world = World::new("builtin");
        register_builtin(world.plugins_mut()).unwrap();
        assert!(world.plugins().contains("Block"));
        assert!(world.plugins().contains("Wanderer"));
        assert!(!world.plugins().contains("Wall"));

        let wall = world.spawn("Wall", Pose::new(10.0, 0.0, 0.0), None).unwrap();
        let block = world.spawn("Block", Pose::new(0.0, 5.0, 0.0), None).unwrap();
        let wanderer = world.spawn("Wanderer", Pose::default(), None).unwrap();
        assert_eq!(world.agent_count(), 3);
        assert!(world.find_agent(wall).unwrap().is_static());
        assert_eq!(world.find_agent(block).unwrap().type_name(), "Block");
        assert_eq!(world.find_agent(wanderer).unwrap().sensor_count(), 1);
    }
}
