use kinetica_common::AgentId;

use crate::process::Lifecycle;
use crate::spec::SpecError;

/// Errors raised by the simulation kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("invalid agent specification: {0}")]
    Spec(#[from] SpecError),
    #[error("agent {0} not found")]
    AgentNotFound(AgentId),
    #[error("agent {0} is already registered")]
    AlreadyRegistered(AgentId),
    #[error("sensor index {index} out of range ({len} sensors attached)")]
    SensorIndex { index: usize, len: usize },
    #[error("no plugin registered for agent type `{0}`")]
    UnknownAgentType(String),
    #[error("no definition registered for agent type `{0}`")]
    UnknownDefinition(String),
    #[error("unknown sensor type `{0}`")]
    UnknownSensor(String),
    #[error("physics body of agent {0} is not in this space")]
    BodyNotInSpace(AgentId),
    #[error("agent {0} still owns a registered physics body")]
    StillRegistered(AgentId),
    #[error("invalid body state for agent {id}: {reason}")]
    InvalidBodyState { id: AgentId, reason: String },
    #[error("illegal lifecycle transition {from:?} -> {to:?}")]
    Lifecycle { from: Lifecycle, to: Lifecycle },
    #[error("agent {id} fault: {message}")]
    Agent { id: AgentId, message: String },
}

impl KernelError {
    /// Build an agent-level fault. Agent code returns these from `update`;
    /// the world logs them and keeps stepping the other agents.
    pub fn agent(id: AgentId, message: impl Into<String>) -> Self {
        Self::Agent {
            id,
            message: message.into(),
        }
    }

    /// Whether this error is a failed lookup rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound(_)
                | Self::SensorIndex { .. }
                | Self::UnknownAgentType(_)
                | Self::UnknownDefinition(_)
        )
    }
}
