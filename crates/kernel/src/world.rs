use std::collections::BTreeMap;

use kinetica_common::{AgentId, Pose};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{Agent, AgentSnapshot};
use crate::collision::{CollisionEvent, ContactEvent, ContactPhase, ContactTracker};
use crate::config::WorldConfig;
use crate::context::WorldCtx;
use crate::error::KernelError;
use crate::physics::PhysicsSpace;
use crate::plugin::{PluginRegistry, WorldRef};
use crate::sensor::{Probe, SensorCatalog};
use crate::spec::Specification;

/// A record of every change to the agent registry and every completed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    Registered { id: AgentId, kind: String, pose: Pose },
    Removed { id: AgentId, kind: String },
    /// A pair of agents started touching.
    ContactBegan { tick: u64, first: AgentId, second: AgentId },
    ContactEnded { tick: u64, first: AgentId, second: AgentId },
    /// An agent's update failed; the other agents kept running.
    AgentFault { tick: u64, id: AgentId, message: String },
    Stepped { tick: u64, agents: usize },
}

/// External view of the whole world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub name: String,
    pub tick: u64,
    pub timestep: f64,
    pub agents: Vec<AgentSnapshot>,
}

/// Owner of the physics space and the agent registry.
///
/// One [`update`](World::update) is one tick:
/// 1. actuation queued since the last tick is flushed into the bodies,
/// 2. the physics space steps once,
/// 3. agents read their new body state and sensors,
/// 4. contact edges raised by the step are dispatched to collision handlers,
/// 5. every live agent updates, in registration order,
/// 6. agents marked for removal are stopped and destroyed,
/// 7. agents created during the tick are registered.
///
/// Agents live in a vector in registration order, indexed by id. Removal only
/// clears a flag until step 6, so iteration never sees the registry change.
pub struct World {
    config: WorldConfig,
    space: PhysicsSpace,
    agents: Vec<Agent>,
    index: BTreeMap<AgentId, usize>,
    types: BTreeMap<AgentId, String>,
    tracker: ContactTracker,
    plugins: PluginRegistry,
    sensors: SensorCatalog,
    spawned: Vec<Agent>,
    tick: u64,
    event_log: Vec<WorldEvent>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl World {
    /// Create an empty world stepping at the default rate.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(WorldConfig::named(name))
    }

    pub fn with_config(config: WorldConfig) -> Result<Self, KernelError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        tracing::debug!(world = %config.name, timestep = config.timestep, "world created");
        Self {
            space: PhysicsSpace::new(config.timestep),
            config,
            agents: Vec::new(),
            index: BTreeMap::new(),
            types: BTreeMap::new(),
            tracker: ContactTracker::new(),
            plugins: PluginRegistry::new(),
            sensors: SensorCatalog::new(),
            spawned: Vec::new(),
            tick: 0,
            event_log: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn timestep(&self) -> f64 {
        self.config.timestep
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn body_count(&self) -> usize {
        self.space.body_count()
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
        &mut self.plugins
    }

    pub fn sensors_mut(&mut self) -> &mut SensorCatalog {
        &mut self.sensors
    }

    /// Constructor view of this world, for agent creation.
    pub fn world_ref(&self) -> WorldRef<'_> {
        WorldRef {
            name: &self.config.name,
            timestep: self.config.timestep,
            tick: self.tick,
            sensors: &self.sensors,
        }
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Create an agent through the plugin registered for its type. The agent
    /// is not registered; pass it to [`add_agent`](World::add_agent) or
    /// [`Agent::destroy`].
    pub fn create_agent(&self, spec: Specification) -> Result<Agent, KernelError> {
        self.plugins.create(spec, self.world_ref())
    }

    /// Initialize and start an agent, then put its body into the space.
    ///
    /// On failure nothing is registered and the agent is destroyed.
    pub fn add_agent(&mut self, mut agent: Agent) -> Result<&mut Self, KernelError> {
        let id = agent.id();
        if self.index.contains_key(&id) {
            return Err(KernelError::AlreadyRegistered(id));
        }
        agent.set_timestep(self.config.timestep);
        if let Err(err) = bring_up(&mut agent, &mut self.space) {
            tracing::warn!(agent = %id, error = %err, "agent registration failed");
            if let Err(destroy_err) = agent.destroy() {
                tracing::error!(agent = %id, error = %destroy_err, "could not release rejected agent");
            }
            return Err(err);
        }

        let kind = agent.type_name().to_owned();
        tracing::info!(agent = %id, kind = %kind, "agent registered");
        self.event_log.push(WorldEvent::Registered {
            id,
            kind: kind.clone(),
            pose: agent.pose(),
        });
        self.types.insert(id, kind);
        self.index.insert(id, self.agents.len());
        self.agents.push(agent);
        Ok(self)
    }

    /// Create and register an agent of a defined type.
    pub fn spawn(
        &mut self,
        kind: &str,
        pose: Pose,
        style: Option<Value>,
    ) -> Result<AgentId, KernelError> {
        let spec = self.plugins.spec_for(kind, pose, style)?;
        let agent = self.create_agent(spec)?;
        let id = agent.id();
        self.add_agent(agent)?;
        Ok(id)
    }

    /// Visit every registered agent in registration order.
    pub fn all(&mut self, mut visitor: impl FnMut(&mut Agent)) -> &mut Self {
        for agent in &mut self.agents {
            visitor(agent);
        }
        self
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn agent_exists(&self, id: AgentId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn find_agent(&self, id: AgentId) -> Result<&Agent, KernelError> {
        self.index
            .get(&id)
            .and_then(|&i| self.agents.get(i))
            .ok_or(KernelError::AgentNotFound(id))
    }

    pub fn find_agent_mut(&mut self, id: AgentId) -> Result<&mut Agent, KernelError> {
        self.index
            .get(&id)
            .and_then(|&i| self.agents.get_mut(i))
            .ok_or(KernelError::AgentNotFound(id))
    }

    /// Mark an agent for removal at the end of the next tick.
    pub fn remove_agent(&mut self, id: AgentId) -> Result<(), KernelError> {
        self.find_agent_mut(id)?.mark_for_removal();
        Ok(())
    }

    pub fn is_touching(&self, a: AgentId, b: AgentId) -> bool {
        self.tracker.is_touching(a, b)
    }

    /// Advance the simulation by one timestep.
    ///
    /// A body found in a non-finite state before the step aborts the tick:
    /// its agent is removed, queued actuation stays queued, and the error
    /// names it. A body the step itself breaks is removed before anyone reads
    /// it. Agent faults are logged and recorded as [`WorldEvent::AgentFault`].
    pub fn update(&mut self) -> Result<&mut Self, KernelError> {
        let span = tracing::debug_span!("world_update", world = %self.config.name, tick = self.tick + 1);
        let _guard = span.enter();

        self.quarantine()?;
        self.flush_actuation()?;
        let contacts = self.space.step();
        self.tick += 1;
        if let Err(err) = self.quarantine() {
            tracing::warn!(error = %err, "step produced invalid body state");
        }

        self.sync_agents();
        self.dispatch_contacts(&contacts);
        self.update_agents();
        self.reap();
        self.register_spawned();

        self.event_log.push(WorldEvent::Stepped {
            tick: self.tick,
            agents: self.agents.len(),
        });
        Ok(self)
    }

    fn flush_actuation(&mut self) -> Result<(), KernelError> {
        let mut welds = Vec::new();
        for agent in &mut self.agents {
            let act = agent.take_actuation();
            if act.is_empty() {
                continue;
            }
            let Some(handle) = agent.body_handle() else {
                continue;
            };
            if !act.is_finite() {
                tracing::warn!(agent = %agent.id(), "dropped non-finite actuation");
                self.event_log.push(WorldEvent::AgentFault {
                    tick: self.tick,
                    id: agent.id(),
                    message: "non-finite actuation".into(),
                });
                continue;
            }
            self.space.apply(handle, agent.id(), &act)?;
            welds.extend(act.attach_to.iter().map(|&other| (agent.id(), handle, other)));
        }
        for (id, handle, other) in welds {
            let target = self
                .index
                .get(&other)
                .and_then(|&i| self.agents.get(i))
                .and_then(Agent::body_handle);
            match target {
                Some(target) => self.space.attach(handle, target, id)?,
                None => tracing::warn!(agent = %id, other = %other, "attach target not found"),
            }
        }
        Ok(())
    }

    /// Remove every agent whose body is no longer finite. Returns an error
    /// naming the first one, if any.
    fn quarantine(&mut self) -> Result<(), KernelError> {
        let invalid = self.space.invalid_bodies();
        let Some(&first) = invalid.first() else {
            return Ok(());
        };
        let (broken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.agents)
            .into_iter()
            .partition(|agent| invalid.contains(&agent.id()));
        self.agents = kept;
        self.reindex();
        for agent in broken {
            let id = agent.id();
            tracing::error!(agent = %id, tick = self.tick, "non-finite body state, removing agent");
            self.event_log.push(WorldEvent::AgentFault {
                tick: self.tick,
                id,
                message: "non-finite pose or velocity".into(),
            });
            self.release(agent);
        }
        self.space.refresh_queries();
        Err(KernelError::InvalidBodyState {
            id: first,
            reason: "non-finite pose or velocity".into(),
        })
    }

    fn reindex(&mut self) {
        self.index = self
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id(), i))
            .collect();
    }

    fn sync_agents(&mut self) {
        for agent in &mut self.agents {
            let Some(handle) = agent.body_handle() else {
                continue;
            };
            if let Some(state) = self.space.state(handle) {
                agent.sync(state);
            }
            let probe = Probe::new(&self.space, agent.pose(), Some(handle), &self.types);
            agent.refresh_sensors(&probe);
        }
    }

    fn dispatch_contacts(&mut self, contacts: &[ContactEvent]) {
        for contact in contacts {
            // Pairs with an agent removed earlier in this tick are stale.
            if !(self.index.contains_key(&contact.first) && self.index.contains_key(&contact.second)) {
                continue;
            }
            if !self.tracker.observe(contact) {
                continue;
            }
            let (first, second) = (contact.first, contact.second);
            if contact.phase == ContactPhase::Ended {
                self.event_log.push(WorldEvent::ContactEnded {
                    tick: self.tick,
                    first,
                    second,
                });
                continue;
            }
            self.event_log.push(WorldEvent::ContactBegan {
                tick: self.tick,
                first,
                second,
            });
            let (Some(first_type), Some(second_type)) =
                (self.types.get(&first), self.types.get(&second))
            else {
                continue;
            };
            let seen_by_first = contact.seen_by_first(second_type, self.tick);
            let seen_by_second = contact.seen_by_second(first_type, self.tick);
            self.deliver(&seen_by_first);
            self.deliver(&seen_by_second);
        }
    }

    fn deliver(&mut self, event: &CollisionEvent) {
        let Some(&pos) = self.index.get(&event.agent) else {
            return;
        };
        if !self.agents.get(pos).is_some_and(Agent::is_alive) {
            return;
        }
        self.with_ctx(pos, |agent, ctx| agent.handle_collision(event, ctx));
    }

    fn update_agents(&mut self) {
        for pos in 0..self.agents.len() {
            if !self.agents.get(pos).is_some_and(Agent::is_alive) {
                continue;
            }
            let Some((id, result)) = self.with_ctx(pos, |agent, ctx| (agent.id(), agent.update(ctx)))
            else {
                continue;
            };
            if let Err(err) = result {
                tracing::warn!(agent = %id, error = %err, "agent update failed");
                self.event_log.push(WorldEvent::AgentFault {
                    tick: self.tick,
                    id,
                    message: err.to_string(),
                });
            }
        }
    }

    /// Run `f` on the agent at `pos` with a context over the rest of the registry.
    fn with_ctx<R>(
        &mut self,
        pos: usize,
        f: impl FnOnce(&mut Agent, &mut WorldCtx<'_>) -> R,
    ) -> Option<R> {
        if pos >= self.agents.len() {
            return None;
        }
        let world = WorldRef {
            name: &self.config.name,
            timestep: self.config.timestep,
            tick: self.tick,
            sensors: &self.sensors,
        };
        let (before, rest) = self.agents.split_at_mut(pos);
        let (current, after) = rest.split_first_mut()?;
        let mut ctx = WorldCtx::new(
            before,
            current.id(),
            after,
            &self.index,
            &self.plugins,
            &mut self.spawned,
            world,
        );
        let out = f(current, &mut ctx);
        if ctx.removes_current() {
            current.mark_for_removal();
        }
        Some(out)
    }

    fn reap(&mut self) {
        if self.agents.iter().all(Agent::is_alive) {
            return;
        }
        let (alive, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut self.agents)
            .into_iter()
            .partition(Agent::is_alive);
        self.agents = alive;
        self.reindex();
        for agent in dead {
            self.release(agent);
        }
    }

    /// Stop an unregistered agent, free its body, and hand it to its destroyer.
    fn release(&mut self, mut agent: Agent) {
        let id = agent.id();
        if let Err(err) = agent.stop() {
            tracing::warn!(agent = %id, error = %err, "agent stop failed");
        }
        match agent.detach_body() {
            Some(handle) => {
                if let Err(err) = self.space.remove(handle, id) {
                    tracing::error!(agent = %id, error = %err, "physics body already released");
                }
            }
            None => tracing::error!(agent = %id, "agent had no registered body"),
        }
        self.tracker.purge(id);
        let kind = self.types.remove(&id).unwrap_or_default();
        tracing::info!(agent = %id, kind = %kind, "agent removed");
        self.event_log.push(WorldEvent::Removed { id, kind });
        if let Err(err) = agent.destroy() {
            tracing::error!(agent = %id, error = %err, "agent destroy failed");
        }
    }

    fn register_spawned(&mut self) {
        for agent in std::mem::take(&mut self.spawned) {
            let id = agent.id();
            if let Err(err) = self.add_agent(agent) {
                tracing::warn!(agent = %id, error = %err, "spawned agent rejected");
            }
        }
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            name: self.config.name.clone(),
            tick: self.tick,
            timestep: self.config.timestep,
            agents: self.agents.iter().map(Agent::snapshot).collect(),
        }
    }

    /// Deterministic hash of tick, registry order, and every body state.
    /// Ids are left out so that separately built runs compare equal.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, &self.tick.to_le_bytes());
        mix(&mut h, &(self.agents.len() as u64).to_le_bytes());
        for agent in &self.agents {
            let s = agent.body_state();
            mix(&mut h, agent.type_name().as_bytes());
            for v in [
                s.pose.position.x,
                s.pose.position.y,
                s.pose.angle,
                s.velocity.linear.x,
                s.velocity.linear.y,
                s.velocity.angular,
            ] {
                mix(&mut h, &v.to_le_bytes());
            }
        }
        h
    }
}

fn bring_up(agent: &mut Agent, space: &mut PhysicsSpace) -> Result<(), KernelError> {
    agent.init()?;
    agent.start()?;
    agent.register_body(space)?;
    Ok(())
}

impl Drop for World {
    fn drop(&mut self) {
        for agent in std::mem::take(&mut self.spawned) {
            if let Err(err) = agent.destroy() {
                tracing::error!(error = %err, "pending agent destroy failed");
            }
        }
        let agents = std::mem::take(&mut self.agents);
        self.index.clear();
        for agent in agents {
            self.release(agent);
        }
    }
}
