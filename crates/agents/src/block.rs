use kinetica_kernel::{Agent, AgentType, KernelError, Process, WorldCtx, WorldRef};

/// A heavy crate that slides when pushed and comes to rest on its own.
#[derive(Debug, Default)]
pub struct Block;

impl Process for Block {
    fn name(&self) -> &str {
        "block"
    }

    fn update(&mut self, agent: &mut Agent, _ctx: &mut WorldCtx<'_>) -> Result<(), KernelError> {
        agent.damp_movement();
        Ok(())
    }
}

impl AgentType for Block {
    fn create(_agent: &mut Agent, _world: WorldRef<'_>) -> Result<Self, KernelError> {
        Ok(Block)
    }
}

#[cfg(test)]
mod tests {
    use crate::register_builtin;
    use kinetica_kernel::{Pose, World};

    #[test]
    fn pushed_block_slows_down() {
        let mut world = World::new("blocks");
        register_builtin(world.plugins_mut()).unwrap();
        let id = world.spawn("Block", Pose::default(), None).unwrap();
        world.find_agent_mut(id).unwrap().omni_apply_force(300.0, 0.0);
        world.update().unwrap();

        let mut prev = world.find_agent(id).unwrap().vx();
        assert!(prev > 0.0);
        for _ in 0..30 {
            world.update().unwrap();
            let vx = world.find_agent(id).unwrap().vx();
            assert!(vx < prev);
            prev = vx;
        }
    }
}
