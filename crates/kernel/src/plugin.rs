//! Agent type plugins: paired creation and destruction entry points, keyed by
//! agent type name.
//!
//! Entry points are plain `fn` pointers. The destroyer is bound to the agent
//! when it is created, so the world never looks it up again at removal.

use std::collections::BTreeMap;

use kinetica_common::Pose;
use serde_json::Value;

use crate::agent::Agent;
use crate::error::KernelError;
use crate::process::Process;
use crate::sensor::SensorCatalog;
use crate::spec::{SpecError, Specification};

pub type CreateFn = fn(Specification, WorldRef<'_>) -> Result<Agent, KernelError>;
pub type DestroyFn = fn(Agent);

/// What agent constructors may see of the world they are created for.
#[derive(Clone, Copy)]
pub struct WorldRef<'a> {
    pub name: &'a str,
    pub timestep: f64,
    pub tick: u64,
    pub sensors: &'a SensorCatalog,
}

impl<'a> WorldRef<'a> {
    pub fn new(name: &'a str, timestep: f64, sensors: &'a SensorCatalog) -> Self {
        Self {
            name,
            timestep,
            tick: 0,
            sensors,
        }
    }
}

/// A Rust type usable as an agent behavior through [`AgentPlugin::of`].
pub trait AgentType: Process + Sized + 'static {
    /// Build the behavior for a freshly constructed agent. Collision handlers
    /// and sub-processes are usually installed on `agent` here.
    fn create(agent: &mut Agent, world: WorldRef<'_>) -> Result<Self, KernelError>;
}

fn create_as<T: AgentType>(spec: Specification, world: WorldRef<'_>) -> Result<Agent, KernelError> {
    let mut agent = Agent::new(spec, world)?;
    let behavior = T::create(&mut agent, world)?;
    Ok(agent.with_behavior(Box::new(behavior)))
}

fn destroy_as<T: AgentType>(agent: Agent) {
    tracing::debug!(agent = %agent.id(), kind = std::any::type_name::<T>(), "agent destroyed");
    drop(agent);
}

fn create_passive(spec: Specification, world: WorldRef<'_>) -> Result<Agent, KernelError> {
    Agent::new(spec, world)
}

fn destroy_passive(agent: Agent) {
    tracing::debug!(agent = %agent.id(), "agent destroyed");
    drop(agent);
}

#[derive(Debug, Clone, Copy)]
pub struct AgentPlugin {
    pub create: CreateFn,
    pub destroy: DestroyFn,
}

impl AgentPlugin {
    pub fn of<T: AgentType>() -> Self {
        Self {
            create: create_as::<T>,
            destroy: destroy_as::<T>,
        }
    }

    /// A body with no behavior: walls, obstacles, props.
    pub fn passive() -> Self {
        Self {
            create: create_passive,
            destroy: destroy_passive,
        }
    }
}

/// Agent type name to plugin, plus the definitions used to spawn by name.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, AgentPlugin>,
    definitions: BTreeMap<String, Value>,
    fallback: Option<AgentPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, plugin: AgentPlugin) -> &mut Self {
        self.plugins.insert(kind.into(), plugin);
        self
    }

    pub fn register_type<T: AgentType>(&mut self, kind: impl Into<String>) -> &mut Self {
        self.register(kind, AgentPlugin::of::<T>())
    }

    /// Plugin used for types with no registration of their own.
    pub fn set_fallback(&mut self, plugin: AgentPlugin) -> &mut Self {
        self.fallback = Some(plugin);
        self
    }

    /// Store a definition document under its `name`.
    pub fn define(&mut self, definition: Value) -> Result<&mut Self, KernelError> {
        let name = definition
            .get("name")
            .and_then(Value::as_str)
            .ok_or(SpecError::Missing("definition.name"))?
            .to_owned();
        self.definitions.insert(name, definition);
        Ok(self)
    }

    pub fn definition(&self, kind: &str) -> Option<&Value> {
        self.definitions.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.plugins.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    fn plugin(&self, kind: &str) -> Result<AgentPlugin, KernelError> {
        self.plugins
            .get(kind)
            .copied()
            .or(self.fallback)
            .ok_or_else(|| KernelError::UnknownAgentType(kind.to_owned()))
    }

    /// Create an agent for the type named in `spec` and bind its destroyer.
    pub fn create(&self, spec: Specification, world: WorldRef<'_>) -> Result<Agent, KernelError> {
        let plugin = self.plugin(spec.type_name())?;
        let mut agent = (plugin.create)(spec, world)?;
        agent.bind_destroyer(plugin.destroy);
        Ok(agent)
    }

    /// Specification for a new instance of a defined type.
    pub fn spec_for(
        &self,
        kind: &str,
        pose: Pose,
        style: Option<Value>,
    ) -> Result<Specification, KernelError> {
        let definition = self
            .definitions
            .get(kind)
            .ok_or_else(|| KernelError::UnknownDefinition(kind.to_owned()))?;
        Ok(Specification::from_parts(definition.clone(), pose, style))
    }
}
