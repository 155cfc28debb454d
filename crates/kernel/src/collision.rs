//! Collision dispatch: pair state tracking and per-agent handler tables.
//!
//! The physics space reports contact transitions between bodies. The tracker
//! turns them into edges per agent pair, and each edge that begins a contact
//! is offered to both agents' handler tables, keyed by the other agent's type.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use glam::DVec2;
use kinetica_common::AgentId;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::context::WorldCtx;

/// Reaction installed with [`Agent::notice_collisions_with`].
pub type CollisionHandler = Box<dyn FnMut(&mut Agent, &CollisionEvent, &mut WorldCtx<'_>)>;

/// A collision as seen by one of the two agents involved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollisionEvent {
    pub agent: AgentId,
    pub other: AgentId,
    pub other_type: String,
    /// Contact normal pointing from `agent` towards `other`.
    pub normal: DVec2,
    /// Velocity of `other` relative to `agent`.
    pub relative_velocity: DVec2,
    pub tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPhase {
    Began,
    Ended,
}

/// Contact transition between two agent bodies, as reported by the physics space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactEvent {
    pub first: AgentId,
    pub second: AgentId,
    pub phase: ContactPhase,
    /// Normal pointing from `first` towards `second`.
    pub normal: DVec2,
    pub first_velocity: DVec2,
    pub second_velocity: DVec2,
}

impl ContactEvent {
    /// Order-independent key for the pair.
    pub fn pair(&self) -> (AgentId, AgentId) {
        if self.first <= self.second {
            (self.first, self.second)
        } else {
            (self.second, self.first)
        }
    }

    pub fn seen_by_first(&self, second_type: &str, tick: u64) -> CollisionEvent {
        CollisionEvent {
            agent: self.first,
            other: self.second,
            other_type: second_type.to_owned(),
            normal: self.normal,
            relative_velocity: self.second_velocity - self.first_velocity,
            tick,
        }
    }

    pub fn seen_by_second(&self, first_type: &str, tick: u64) -> CollisionEvent {
        CollisionEvent {
            agent: self.second,
            other: self.first,
            other_type: first_type.to_owned(),
            normal: -self.normal,
            relative_velocity: self.first_velocity - self.second_velocity,
            tick,
        }
    }
}

/// Touching/separated state per agent pair.
///
/// Only transitions pass through: a pair reported as touching on several
/// consecutive ticks yields a single edge.
#[derive(Debug, Clone, Default)]
pub struct ContactTracker {
    touching: BTreeSet<(AgentId, AgentId)>,
}

impl ContactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a contact report. Returns true when it is a state change.
    pub fn observe(&mut self, event: &ContactEvent) -> bool {
        match event.phase {
            ContactPhase::Began => self.touching.insert(event.pair()),
            ContactPhase::Ended => self.touching.remove(&event.pair()),
        }
    }

    pub fn is_touching(&self, a: AgentId, b: AgentId) -> bool {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.touching.contains(&key)
    }

    /// Forget every pair involving `id`. Used when an agent is removed.
    pub fn purge(&mut self, id: AgentId) {
        self.touching.retain(|&(a, b)| a != id && b != id);
    }

    pub fn len(&self) -> usize {
        self.touching.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touching.is_empty()
    }
}

struct InFlight {
    kind: String,
    replaced: bool,
}

/// Agent-type name to reaction table. One handler per type; absent types are ignored.
#[derive(Default)]
pub struct CollisionHandlers {
    table: BTreeMap<String, CollisionHandler>,
    in_flight: Vec<InFlight>,
}

impl CollisionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the handler for `kind`.
    pub fn insert(&mut self, kind: impl Into<String>, handler: CollisionHandler) {
        let kind = kind.into();
        self.mark_replaced(&kind);
        self.table.insert(kind, handler);
    }

    /// Drop the handler for `kind`. Returns true if one was installed.
    pub fn remove(&mut self, kind: &str) -> bool {
        let was_running = self.mark_replaced(kind);
        self.table.remove(kind).is_some() || was_running
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.table.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Check a handler out for invocation. It must be handed back with [`restore`](Self::restore).
    pub(crate) fn take(&mut self, kind: &str) -> Option<CollisionHandler> {
        let handler = self.table.remove(kind)?;
        self.in_flight.push(InFlight {
            kind: kind.to_owned(),
            replaced: false,
        });
        Some(handler)
    }

    /// Return a checked-out handler, unless it was replaced or ignored while running.
    pub(crate) fn restore(&mut self, handler: CollisionHandler) {
        if let Some(flight) = self.in_flight.pop() {
            if !flight.replaced {
                self.table.insert(flight.kind, handler);
            }
        }
    }

    fn mark_replaced(&mut self, kind: &str) -> bool {
        let mut hit = false;
        for flight in self.in_flight.iter_mut().filter(|f| f.kind == kind) {
            flight.replaced = true;
            hit = true;
        }
        hit
    }
}

impl fmt::Debug for CollisionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.table.keys()).finish()
    }
}
