use std::path::{Path, PathBuf};

use kinetica_kernel::{AgentId, KernelError, Pose, Specification, World, WorldConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors from loading a scenario or populating a world from it.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("agent {index}: {source}")]
    Agent {
        index: usize,
        #[source]
        source: KernelError,
    },
}

fn default_timestep() -> f64 {
    kinetica_kernel::DEFAULT_TIMESTEP
}

/// Where an agent definition comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefinitionSource {
    /// A definition file, relative to the scenario file.
    Path(PathBuf),
    Inline(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionEntry {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub theta: f64,
}

impl From<PositionEntry> for Pose {
    fn from(p: PositionEntry) -> Self {
        Pose::new(p.x, p.y, p.theta)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub definition: DefinitionSource,
    #[serde(default)]
    pub position: PositionEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Anything else, passed through into the specification document.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    /// Suggested run length, in ticks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticks: Option<u64>,
    /// Definitions made available for spawning by type name.
    #[serde(default)]
    pub definitions: Vec<DefinitionSource>,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

fn read(path: &Path) -> Result<String, ScenarioError> {
    std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// A parsed scenario plus the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct Scenario {
    config: ScenarioConfig,
    base_dir: PathBuf,
}

impl Scenario {
    pub fn new(config: ScenarioConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let text = read(path)?;
        let config = if is_yaml(path) {
            serde_yaml::from_str(&text)?
        } else {
            serde_json::from_str(&text)?
        };
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        tracing::debug!(path = %path.display(), "scenario loaded");
        Ok(Self::new(config, base_dir))
    }

    pub fn from_json_str(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ScenarioError> {
        Ok(Self::new(serde_json::from_str(text)?, base_dir))
    }

    pub fn from_yaml_str(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ScenarioError> {
        Ok(Self::new(serde_yaml::from_str(text)?, base_dir))
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn world_config(&self) -> WorldConfig {
        WorldConfig::named(self.config.name.clone()).with_timestep(self.config.timestep)
    }

    /// Load a definition document, from disk if it is a path.
    pub fn resolve_definition(&self, source: &DefinitionSource) -> Result<Value, ScenarioError> {
        match source {
            DefinitionSource::Inline(value) => Ok(value.clone()),
            DefinitionSource::Path(rel) => {
                let path = self.base_dir.join(rel);
                let text = read(&path)?;
                Ok(if is_yaml(&path) {
                    serde_yaml::from_str(&text)?
                } else {
                    serde_json::from_str(&text)?
                })
            }
        }
    }

    /// Assemble the specification document for one agent entry.
    pub fn build_specification(&self, entry: &AgentEntry) -> Result<Specification, ScenarioError> {
        let mut document = entry.extra.clone();
        document.insert("definition".into(), self.resolve_definition(&entry.definition)?);
        document.insert(
            "position".into(),
            serde_json::to_value(entry.position)?,
        );
        if let Some(style) = &entry.style {
            document.insert("style".into(), style.clone());
        }
        Ok(Specification::new(Value::Object(document)))
    }

    /// Create a world from the scenario's settings and populate it.
    pub fn build_world(&self, setup: impl FnOnce(&mut World) -> Result<(), KernelError>) -> Result<World, ScenarioError> {
        let mut world = World::with_config(self.world_config())?;
        setup(&mut world)?;
        self.populate(&mut world)?;
        Ok(world)
    }

    /// Register the scenario's definitions and add its agents, in file order.
    pub fn populate(&self, world: &mut World) -> Result<Vec<AgentId>, ScenarioError> {
        for source in &self.config.definitions {
            let definition = self.resolve_definition(source)?;
            world.plugins_mut().define(definition)?;
        }
        let mut ids = Vec::with_capacity(self.config.agents.len());
        for (index, entry) in self.config.agents.iter().enumerate() {
            let spec = self.build_specification(entry)?;
            let mut agent = world
                .create_agent(spec)
                .map_err(|source| ScenarioError::Agent { index, source })?;
            if let Some(client_id) = &entry.client_id {
                agent.set_client_id(client_id.clone());
            }
            ids.push(agent.id());
            world
                .add_agent(agent)
                .map_err(|source| ScenarioError::Agent { index, source })?;
        }
        tracing::info!(scenario = %self.config.name, agents = ids.len(), "world populated");
        Ok(ids)
    }
}
