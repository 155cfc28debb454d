//! Cooperative process contract shared by agent behaviors and their sub-processes.

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::context::WorldCtx;
use crate::error::KernelError;

/// Lifecycle of a scheduled process or agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Started,
    Running,
    Stopped,
    Destroyed,
}

impl Lifecycle {
    /// Move to `to`, rejecting transitions the scheduler never makes.
    pub fn advance(self, to: Lifecycle) -> Result<Lifecycle, KernelError> {
        use Lifecycle::*;
        let legal = matches!(
            (self, to),
            (Uninitialized, Initialized)
                | (Initialized, Started)
                | (Started, Running)
                | (Running, Running)
                | (Initialized | Started | Running, Stopped)
                | (Uninitialized | Stopped, Destroyed)
        );
        if legal {
            Ok(to)
        } else {
            Err(KernelError::Lifecycle { from: self, to })
        }
    }

    /// Brought up and not yet stopped.
    pub fn is_up(self) -> bool {
        matches!(
            self,
            Lifecycle::Initialized | Lifecycle::Started | Lifecycle::Running
        )
    }
}

/// One cooperative unit of per-tick logic.
///
/// Agent behaviors implement this trait, and so do the sub-processes an agent
/// drives with [`Agent::add_process`]. No method may block.
pub trait Process {
    fn name(&self) -> &str {
        "process"
    }

    fn init(&mut self, _agent: &mut Agent) -> Result<(), KernelError> {
        Ok(())
    }

    fn start(&mut self, _agent: &mut Agent) -> Result<(), KernelError> {
        Ok(())
    }

    fn update(&mut self, agent: &mut Agent, ctx: &mut WorldCtx<'_>) -> Result<(), KernelError>;

    fn stop(&mut self, _agent: &mut Agent) -> Result<(), KernelError> {
        Ok(())
    }
}

/// A sub-process together with its lifecycle state.
pub(crate) struct Scheduled {
    process: Box<dyn Process>,
    state: Lifecycle,
}

impl Scheduled {
    pub(crate) fn new(process: Box<dyn Process>) -> Self {
        Self {
            process,
            state: Lifecycle::Uninitialized,
        }
    }

    pub(crate) fn state(&self) -> Lifecycle {
        self.state
    }

    pub(crate) fn init(&mut self, agent: &mut Agent) -> Result<(), KernelError> {
        self.state = self.state.advance(Lifecycle::Initialized)?;
        self.process.init(agent)
    }

    pub(crate) fn start(&mut self, agent: &mut Agent) -> Result<(), KernelError> {
        self.state = self.state.advance(Lifecycle::Started)?;
        self.process.start(agent)
    }

    /// Run one tick, bringing a freshly added process up first.
    pub(crate) fn update(
        &mut self,
        agent: &mut Agent,
        ctx: &mut WorldCtx<'_>,
    ) -> Result<(), KernelError> {
        if self.state == Lifecycle::Uninitialized {
            self.init(agent)?;
        }
        if self.state == Lifecycle::Initialized {
            self.start(agent)?;
        }
        self.state = self.state.advance(Lifecycle::Running)?;
        self.process.update(agent, ctx)
    }

    pub(crate) fn stop(&mut self, agent: &mut Agent) -> Result<(), KernelError> {
        if !self.state.is_up() {
            return Ok(());
        }
        self.state = self.state.advance(Lifecycle::Stopped)?;
        self.process.stop(agent)
    }
}
