use std::collections::BTreeMap;

use kinetica_common::{AgentId, Pose};
use serde_json::Value;

use crate::agent::Agent;
use crate::error::KernelError;
use crate::plugin::{PluginRegistry, WorldRef};

/// The world as seen from inside one agent's update or collision handler.
///
/// The running agent is borrowed separately, so lookups of its own id fail;
/// use the `&mut Agent` passed alongside instead. Agents created here are
/// registered once the current tick completes.
pub struct WorldCtx<'a> {
    before: &'a mut [Agent],
    after: &'a mut [Agent],
    index: &'a BTreeMap<AgentId, usize>,
    current: AgentId,
    plugins: &'a PluginRegistry,
    spawned: &'a mut Vec<Agent>,
    world: WorldRef<'a>,
    remove_current: bool,
}

impl<'a> WorldCtx<'a> {
    pub(crate) fn new(
        before: &'a mut [Agent],
        current: AgentId,
        after: &'a mut [Agent],
        index: &'a BTreeMap<AgentId, usize>,
        plugins: &'a PluginRegistry,
        spawned: &'a mut Vec<Agent>,
        world: WorldRef<'a>,
    ) -> Self {
        Self {
            before,
            after,
            index,
            current,
            plugins,
            spawned,
            world,
            remove_current: false,
        }
    }

    pub fn current(&self) -> AgentId {
        self.current
    }

    pub fn tick(&self) -> u64 {
        self.world.tick
    }

    pub fn timestep(&self) -> f64 {
        self.world.timestep
    }

    pub fn world_name(&self) -> &str {
        self.world.name
    }

    fn slot(&self, id: AgentId) -> Option<Slot> {
        let pos = *self.index.get(&id)?;
        let split = self.before.len();
        match pos.cmp(&split) {
            std::cmp::Ordering::Less => Some(Slot::Before(pos)),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(Slot::After(pos - split - 1)),
        }
    }

    pub fn agent_exists(&self, id: AgentId) -> bool {
        id == self.current || self.index.contains_key(&id)
    }

    pub fn find_agent(&self, id: AgentId) -> Result<&Agent, KernelError> {
        let found = match self.slot(id) {
            Some(Slot::Before(i)) => self.before.get(i),
            Some(Slot::After(i)) => self.after.get(i),
            None => None,
        };
        found.ok_or(KernelError::AgentNotFound(id))
    }

    pub fn find_agent_mut(&mut self, id: AgentId) -> Result<&mut Agent, KernelError> {
        let found = match self.slot(id) {
            Some(Slot::Before(i)) => self.before.get_mut(i),
            Some(Slot::After(i)) => self.after.get_mut(i),
            None => None,
        };
        found.ok_or(KernelError::AgentNotFound(id))
    }

    /// Mark an agent for removal at the end of this tick. Works for the
    /// running agent too.
    pub fn remove_agent(&mut self, id: AgentId) -> Result<(), KernelError> {
        if id == self.current {
            self.remove_current = true;
            return Ok(());
        }
        self.find_agent_mut(id)?.mark_for_removal();
        Ok(())
    }

    /// Create an agent of a defined type now; it joins the world after this tick.
    pub fn add_agent(
        &mut self,
        kind: &str,
        x: f64,
        y: f64,
        theta: f64,
        style: Option<Value>,
    ) -> Result<AgentId, KernelError> {
        let spec = self.plugins.spec_for(kind, Pose::new(x, y, theta), style)?;
        let agent = self.plugins.create(spec, self.world)?;
        let id = agent.id();
        tracing::debug!(agent = %id, kind, "agent queued for registration");
        self.spawned.push(agent);
        Ok(id)
    }

    pub(crate) fn removes_current(&self) -> bool {
        self.remove_current
    }
}

enum Slot {
    Before(usize),
    After(usize),
}
