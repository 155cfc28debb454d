//! The agent: one rigid body plus its specification, sensors, collision
//! reactions and behavior.
//!
//! Actuation never touches the physics body directly. Every actuator adds to
//! a pending [`Actuation`] that the world flushes into the body at the start
//! of the next update, so forces queued during tick N are integrated by the
//! step of tick N+1. Queries read the body state cached after the last step.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

use glam::DVec2;
use kinetica_common::{AgentId, Pose, Velocity};
use serde::Serialize;
use serde_json::Value;

use crate::collision::{CollisionEvent, CollisionHandlers};
use crate::config::DEFAULT_TIMESTEP;
use crate::context::WorldCtx;
use crate::error::KernelError;
use crate::physics::{Actuation, BodyDesc, BodyHandle, BodyState, PhysicsSpace};
use crate::plugin::{DestroyFn, WorldRef};
use crate::process::{Lifecycle, Process, Scheduled};
use crate::sensor::{Probe, Sensor, SensorReading};
use crate::spec::{Definition, Friction, Specification};

/// Default linear gain of [`Agent::track_velocity`].
pub const DEFAULT_KL: f64 = 10.0;
/// Default angular gain of [`Agent::track_velocity`].
pub const DEFAULT_KR: f64 = 10.0;
/// Default gain of [`Agent::omni_track_velocity`].
pub const DEFAULT_K: f64 = 10.0;
/// Default forward speed cap of [`Agent::move_toward`].
pub const DEFAULT_VF: f64 = 75.0;
/// Default turn rate cap of [`Agent::move_toward`].
pub const DEFAULT_VR: f64 = 20.0;
/// Default speed cap of [`Agent::omni_move_toward`].
pub const DEFAULT_OMNI_V: f64 = 1.0;
/// Time over which the approach controllers aim to close the remaining error.
pub const SETTLE_TIME: f64 = 0.25;

/// Wrap an angle into `(-PI, PI]`.
fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}

enum Body {
    /// Built from the specification but not yet in a physics space.
    Detached(BodyDesc),
    Registered(BodyHandle),
    Released,
}

/// External view of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub kind: String,
    pub pose: Pose,
    pub velocity: Velocity,
    pub alive: bool,
    pub visible: bool,
    pub client_id: Option<String>,
    pub style: Value,
    pub sensors: Vec<SensorReading>,
}

pub struct Agent {
    id: AgentId,
    spec: Specification,
    definition: Definition,
    body: Body,
    state: BodyState,
    pending: Actuation,
    timestep: f64,
    mass: f64,
    moment: f64,
    rotation_locked: bool,
    alive: bool,
    visible: bool,
    client_id: Option<String>,
    style: Value,
    sensors: Vec<Box<dyn Sensor>>,
    readings: Vec<SensorReading>,
    handlers: CollisionHandlers,
    behavior: Option<Box<dyn Process>>,
    processes: Vec<Scheduled>,
    lifecycle: Lifecycle,
    destroyer: Option<DestroyFn>,
}

impl Agent {
    /// Build an agent from its specification. Configuration errors surface
    /// here, before any physics body exists.
    pub fn new(spec: Specification, world: WorldRef<'_>) -> Result<Self, KernelError> {
        let definition = spec.definition()?;
        let pose = spec.initial_pose()?;
        let sensors = world.sensors.build_all(&definition.sensors)?;
        let readings = sensors.iter().map(|s| s.idle()).collect();
        let mass = definition.mass;
        let moment = definition.shape.moment_of_inertia(mass);
        let desc = BodyDesc {
            pose,
            shape: definition.shape.clone(),
            mass,
            moment,
            is_static: definition.is_static(),
        };
        Ok(Self {
            id: AgentId::next(),
            visible: !definition.invisible,
            style: spec.style().cloned().unwrap_or(Value::Null),
            spec,
            definition,
            body: Body::Detached(desc),
            state: BodyState {
                pose,
                velocity: Velocity::ZERO,
            },
            pending: Actuation::default(),
            timestep: if world.timestep > 0.0 { world.timestep } else { DEFAULT_TIMESTEP },
            mass,
            moment,
            rotation_locked: false,
            alive: true,
            client_id: None,
            sensors,
            readings,
            handlers: CollisionHandlers::new(),
            behavior: None,
            processes: Vec::new(),
            lifecycle: Lifecycle::Uninitialized,
            destroyer: None,
        })
    }

    /// Install the per-tick behavior driven by the world.
    pub fn with_behavior(mut self, behavior: Box<dyn Process>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Agent type name, from `definition.name`.
    pub fn type_name(&self) -> &str {
        &self.definition.name
    }

    pub fn specification(&self) -> &Specification {
        &self.spec
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn is_static(&self) -> bool {
        self.definition.is_static()
    }

    pub fn friction(&self) -> Friction {
        self.definition.friction
    }

    pub fn linear_friction(&self) -> f64 {
        self.definition.friction.linear
    }

    pub fn rotational_friction(&self) -> f64 {
        self.definition.friction.rotational
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn moment_of_inertia(&self) -> f64 {
        self.moment
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    // ---- state queries ----

    pub fn pose(&self) -> Pose {
        self.state.pose
    }

    pub fn position(&self) -> DVec2 {
        self.state.pose.position
    }

    pub fn x(&self) -> f64 {
        self.state.pose.position.x
    }

    pub fn y(&self) -> f64 {
        self.state.pose.position.y
    }

    pub fn angle(&self) -> f64 {
        self.state.pose.angle
    }

    pub fn velocity(&self) -> DVec2 {
        self.state.velocity.linear
    }

    pub fn vx(&self) -> f64 {
        self.state.velocity.linear.x
    }

    pub fn vy(&self) -> f64 {
        self.state.velocity.linear.y
    }

    pub fn angular_velocity(&self) -> f64 {
        self.state.velocity.angular
    }

    pub fn body_state(&self) -> BodyState {
        self.state
    }

    // ---- actuation ----

    /// Add to the pending force and torque. A contribution that is non-finite,
    /// or that would push the running total out of range, is dropped whole.
    fn queue(&mut self, force: DVec2, torque: f64, actuator: &'static str) -> &mut Self {
        let total_force = self.pending.force + force;
        let total_torque = self.pending.torque + torque;
        if !(total_force.is_finite() && total_torque.is_finite()) {
            tracing::warn!(agent = %self.id, actuator, "rejected non-finite actuation");
            return self;
        }
        self.pending.force = total_force;
        self.pending.torque = total_torque;
        self
    }

    /// Thrust along the current heading plus a torque.
    pub fn apply_force(&mut self, thrust: f64, torque: f64) -> &mut Self {
        let force = self.state.pose.heading() * thrust;
        self.queue(force, torque, "apply_force")
    }

    /// Force along the world axes, no torque.
    pub fn omni_apply_force(&mut self, fx: f64, fy: f64) -> &mut Self {
        self.queue(DVec2::new(fx, fy), 0.0, "omni_apply_force")
    }

    /// Proportional control toward a forward speed and turn rate.
    ///
    /// Lateral slip is treated as error too, so the body settles onto its heading.
    pub fn track_velocity(&mut self, linear: f64, angular: f64, kl: f64, kr: f64) -> &mut Self {
        let desired = self.state.pose.heading() * linear;
        let force = (desired - self.state.velocity.linear) * kl * self.mass;
        let torque = (angular - self.state.velocity.angular) * kr * self.moment;
        self.queue(force, torque, "track_velocity")
    }

    pub fn omni_track_velocity(&mut self, vx: f64, vy: f64, k: f64) -> &mut Self {
        let force = (DVec2::new(vx, vy) - self.state.velocity.linear) * k * self.mass;
        self.queue(force, 0.0, "omni_track_velocity")
    }

    /// Remove the friction fraction of the current linear and angular velocity.
    pub fn damp_movement(&mut self) -> &mut Self {
        let linear = self.definition.friction.linear.min(1.0);
        let rotational = self.definition.friction.rotational.min(1.0);
        let force = -self.state.velocity.linear * linear * self.mass / self.timestep;
        let torque = -self.state.velocity.angular * rotational * self.moment / self.timestep;
        self.queue(force, torque, "damp_movement")
    }

    pub fn omni_damp_movement(&mut self) -> &mut Self {
        let linear = self.definition.friction.linear.min(1.0);
        let force = -self.state.velocity.linear * linear * self.mass / self.timestep;
        self.queue(force, 0.0, "omni_damp_movement")
    }

    /// Drive a differential-drive body toward `(x, y)`.
    ///
    /// Targets more than a quarter turn off the heading are approached by
    /// turning in place first.
    pub fn move_toward(&mut self, x: f64, y: f64, vf: f64, vr: f64) -> &mut Self {
        let offset = DVec2::new(x, y) - self.state.pose.position;
        let distance = offset.length();
        if !distance.is_finite() {
            tracing::warn!(agent = %self.id, "rejected non-finite move target");
            return self;
        }
        if distance <= f64::EPSILON {
            return self.track_velocity(0.0, 0.0, DEFAULT_KL, DEFAULT_KR);
        }
        let (vf, vr) = (vf.abs(), vr.abs());
        let error = wrap_angle(offset.to_angle() - self.state.pose.angle);
        let angular = (error / SETTLE_TIME).clamp(-vr, vr);
        let linear = if error.abs() <= FRAC_PI_2 {
            vf.min(distance / SETTLE_TIME) * error.cos()
        } else {
            0.0
        };
        self.track_velocity(linear, angular, DEFAULT_KL, DEFAULT_KR)
    }

    /// Drive a holonomic body straight toward `(x, y)`.
    pub fn omni_move_toward(&mut self, x: f64, y: f64, v: f64) -> &mut Self {
        let offset = DVec2::new(x, y) - self.state.pose.position;
        let distance = offset.length();
        if !distance.is_finite() {
            tracing::warn!(agent = %self.id, "rejected non-finite move target");
            return self;
        }
        let desired = offset.normalize_or_zero() * v.abs().min(distance / SETTLE_TIME);
        self.omni_track_velocity(desired.x, desired.y, DEFAULT_K)
    }

    /// Place the body at a pose and zero its velocity. Takes effect at the
    /// next update; queries see the new pose immediately.
    pub fn teleport(&mut self, x: f64, y: f64, theta: f64) -> &mut Self {
        let pose = Pose::new(x, y, theta);
        if !pose.is_finite() {
            tracing::warn!(agent = %self.id, "rejected non-finite teleport");
            return self;
        }
        self.pending.teleport = Some(pose);
        self.pending.force = DVec2::ZERO;
        self.pending.torque = 0.0;
        self.state = BodyState {
            pose,
            velocity: Velocity::ZERO,
        };
        if let Body::Detached(desc) = &mut self.body {
            desc.pose = pose;
        }
        self
    }

    pub fn prevent_rotation(&mut self) -> &mut Self {
        self.rotation_locked = true;
        self.pending.lock_rotation = Some(true);
        self
    }

    pub fn allow_rotation(&mut self) -> &mut Self {
        self.rotation_locked = false;
        self.pending.lock_rotation = Some(false);
        self
    }

    pub fn rotation_locked(&self) -> bool {
        self.rotation_locked
    }

    /// Weld this agent to `other` at their current relative pose.
    pub fn attach_to(&mut self, other: AgentId) -> &mut Self {
        if other == self.id {
            tracing::warn!(agent = %self.id, "ignored attach to self");
            return self;
        }
        self.pending.attach_to.push(other);
        self
    }

    // ---- sensors ----

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    fn reading(&self, index: usize) -> Result<&SensorReading, KernelError> {
        self.readings.get(index).ok_or(KernelError::SensorIndex {
            index,
            len: self.readings.len(),
        })
    }

    pub fn sensor_value(&self, index: usize) -> Result<f64, KernelError> {
        self.reading(index).map(|r| r.value)
    }

    pub fn sensor_reflection_type(&self, index: usize) -> Result<&str, KernelError> {
        self.reading(index).map(|r| r.reflection_type.as_str())
    }

    pub fn sensor_values(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.value).collect()
    }

    pub fn sensor_reflection_types(&self) -> Vec<&str> {
        self.readings
            .iter()
            .map(|r| r.reflection_type.as_str())
            .collect()
    }

    // ---- collisions ----

    /// React to collisions with agents of type `kind`. Replaces any earlier
    /// handler for the same type.
    pub fn notice_collisions_with<F>(&mut self, kind: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Agent, &CollisionEvent, &mut WorldCtx<'_>) + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    pub fn ignore_collisions_with(&mut self, kind: &str) -> &mut Self {
        self.handlers.remove(kind);
        self
    }

    pub fn handles_collisions_with(&self, kind: &str) -> bool {
        self.handlers.contains(kind)
    }

    /// Run the handler registered for the other agent's type, if any.
    /// Returns whether one ran.
    pub fn handle_collision(&mut self, event: &CollisionEvent, ctx: &mut WorldCtx<'_>) -> bool {
        let Some(mut handler) = self.handlers.take(&event.other_type) else {
            return false;
        };
        tracing::trace!(agent = %self.id, other = %event.other, kind = %event.other_type, "collision");
        handler(self, event, ctx);
        self.handlers.restore(handler);
        true
    }

    // ---- management ----

    /// Drive `process` alongside the behavior, starting next tick.
    pub fn add_process(&mut self, process: Box<dyn Process>) -> &mut Self {
        self.processes.push(Scheduled::new(process));
        self
    }

    pub fn process_states(&self) -> Vec<Lifecycle> {
        self.processes.iter().map(Scheduled::state).collect()
    }

    /// Schedule removal at the end of the current tick. Idempotent.
    pub fn mark_for_removal(&mut self) {
        if self.alive {
            tracing::debug!(agent = %self.id, "marked for removal");
        }
        self.alive = false;
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_client_id(&mut self, client_id: impl Into<String>) -> &mut Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn style(&self) -> &Value {
        &self.style
    }

    pub fn set_style(&mut self, style: Value) -> &mut Self {
        self.style = style;
        self
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            kind: self.definition.name.clone(),
            pose: self.state.pose,
            velocity: self.state.velocity,
            alive: self.alive,
            visible: self.visible,
            client_id: self.client_id.clone(),
            style: self.style.clone(),
            sensors: self.readings.clone(),
        }
    }

    /// Release the agent through the destroyer bound at creation.
    ///
    /// Fails for an agent whose body is still registered in a world.
    pub fn destroy(mut self) -> Result<(), KernelError> {
        if matches!(self.body, Body::Registered(_)) {
            return Err(KernelError::StillRegistered(self.id));
        }
        if let Err(err) = self.stop() {
            tracing::warn!(agent = %self.id, error = %err, "stop failed during destroy");
        }
        self.lifecycle = self.lifecycle.advance(Lifecycle::Destroyed)?;
        self.body = Body::Released;
        match self.destroyer.take() {
            Some(destroy) => destroy(self),
            None => drop(self),
        }
        Ok(())
    }

    // ---- world-facing ----

    pub(crate) fn bind_destroyer(&mut self, destroy: DestroyFn) {
        self.destroyer = Some(destroy);
    }

    pub(crate) fn set_timestep(&mut self, timestep: f64) {
        self.timestep = timestep;
    }

    pub(crate) fn body_handle(&self) -> Option<BodyHandle> {
        match self.body {
            Body::Registered(handle) => Some(handle),
            _ => None,
        }
    }

    pub(crate) fn register_body(&mut self, space: &mut PhysicsSpace) -> Result<BodyHandle, KernelError> {
        let Body::Detached(desc) = &self.body else {
            return Err(KernelError::AlreadyRegistered(self.id));
        };
        let handle = space.insert(desc, self.id)?;
        self.body = Body::Registered(handle);
        // A teleport before registration is already part of the body pose.
        self.pending.teleport = None;
        Ok(handle)
    }

    /// Hand the body handle back for removal from the space.
    pub(crate) fn detach_body(&mut self) -> Option<BodyHandle> {
        let handle = self.body_handle();
        if handle.is_some() {
            self.body = Body::Released;
        }
        handle
    }

    pub(crate) fn take_actuation(&mut self) -> Actuation {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn sync(&mut self, state: BodyState) {
        self.state = state;
    }

    pub(crate) fn refresh_sensors(&mut self, probe: &Probe<'_>) {
        self.readings = self.sensors.iter().map(|s| s.read(probe)).collect();
    }

    fn run_behavior(
        &mut self,
        f: impl FnOnce(&mut dyn Process, &mut Agent) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        let Some(mut behavior) = self.behavior.take() else {
            return Ok(());
        };
        let result = f(behavior.as_mut(), self);
        if self.behavior.is_none() {
            self.behavior = Some(behavior);
        }
        result
    }

    pub(crate) fn init(&mut self) -> Result<(), KernelError> {
        self.lifecycle = self.lifecycle.advance(Lifecycle::Initialized)?;
        self.run_behavior(|b, agent| b.init(agent))
    }

    pub(crate) fn start(&mut self) -> Result<(), KernelError> {
        self.lifecycle = self.lifecycle.advance(Lifecycle::Started)?;
        self.run_behavior(|b, agent| b.start(agent))
    }

    /// One tick of the behavior, then every sub-process. A failing process
    /// does not keep the others from running; the first error is returned.
    pub(crate) fn update(&mut self, ctx: &mut WorldCtx<'_>) -> Result<(), KernelError> {
        self.lifecycle = self.lifecycle.advance(Lifecycle::Running)?;
        let mut first_err = self.run_behavior(|b, agent| b.update(agent, ctx)).err();

        let mut running = std::mem::take(&mut self.processes);
        for process in &mut running {
            if let Err(err) = process.update(self, ctx) {
                first_err.get_or_insert(err);
            }
        }
        running.append(&mut self.processes);
        self.processes = running;

        first_err.map_or(Ok(()), Err)
    }

    pub(crate) fn stop(&mut self) -> Result<(), KernelError> {
        if !self.lifecycle.is_up() {
            return Ok(());
        }
        let mut first_err = None;
        let mut running = std::mem::take(&mut self.processes);
        for process in &mut running {
            if let Err(err) = process.stop(self) {
                first_err.get_or_insert(err);
            }
        }
        self.processes = running;
        if let Err(err) = self.run_behavior(|b, agent| b.stop(agent)) {
            first_err.get_or_insert(err);
        }
        self.lifecycle = self.lifecycle.advance(Lifecycle::Stopped)?;
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("kind", &self.definition.name)
            .field("pose", &self.state.pose)
            .field("alive", &self.alive)
            .field("lifecycle", &self.lifecycle)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::sensor::{NOTHING, RangeSensor, SensorCatalog};
    use approx::assert_relative_eq;
    use serde_json::json;

    const DT: f64 = 1.0 / 60.0;

    fn spec(kind: &str) -> Specification {
        Specification::new(json!({
            "definition": {
                "name": "Robot",
                "type": kind,
                "mass": 2.0,
                "shape": { "radius": 1.0 },
                "friction": { "linear": 0.1, "rotational": 0.5 },
                "sensors": [ { "type": "range" }, { "type": "range", "direction": 1.0 } ]
            },
            "position": { "x": 0, "y": 0, "theta": 0 },
            "style": { "fill": "red" }
        }))
    }

    fn robot() -> Agent {
        let catalog = SensorCatalog::new();
        Agent::new(spec("dynamic"), WorldRef::new("test", DT, &catalog)).unwrap()
    }

    fn moving(linear: DVec2, angular: f64) -> Agent {
        let mut a = robot();
        a.sync(BodyState {
            pose: Pose::default(),
            velocity: Velocity { linear, angular },
        });
        a
    }

    #[test]
    fn derives_constants_from_specification() {
        let a = robot();
        assert_eq!(a.type_name(), "Robot");
        assert_eq!(a.mass(), 2.0);
        assert_relative_eq!(a.moment_of_inertia(), 1.0);
        assert!(!a.is_static());
        assert_eq!(a.linear_friction(), 0.1);
        assert_eq!(a.rotational_friction(), 0.5);
        assert_eq!(a.style(), &json!({ "fill": "red" }));
        assert!(a.visible());
        assert!(a.is_alive());
        assert_eq!(a.lifecycle(), Lifecycle::Uninitialized);
    }

    #[test]
    fn bad_specification_fails_construction() {
        let catalog = SensorCatalog::new();
        let missing = Specification::new(json!({ "definition": { "type": "dynamic" } }));
        assert!(matches!(
            Agent::new(missing, WorldRef::new("test", DT, &catalog)),
            Err(KernelError::Spec(_))
        ));
        let sonar = Specification::new(json!({
            "definition": {
                "type": "dynamic",
                "friction": { "linear": 0, "rotational": 0 },
                "sensors": [ { "type": "sonar" } ]
            }
        }));
        assert!(matches!(
            Agent::new(sonar, WorldRef::new("test", DT, &catalog)),
            Err(KernelError::UnknownSensor(_))
        ));
    }

    #[test]
    fn apply_force_follows_heading_and_chains() {
        let mut a = robot();
        a.teleport(0.0, 0.0, FRAC_PI_2);
        a.take_actuation();
        a.apply_force(10.0, 1.0).apply_force(10.0, 1.0);
        let act = a.take_actuation();
        assert_relative_eq!(act.force.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(act.force.y, 20.0, epsilon = 1e-9);
        assert_eq!(act.torque, 2.0);
        assert!(a.take_actuation().is_empty());
    }

    #[test]
    fn omni_apply_force_uses_world_axes() {
        let mut a = robot();
        a.omni_apply_force(3.0, -4.0);
        let act = a.take_actuation();
        assert_eq!(act.force, DVec2::new(3.0, -4.0));
        assert_eq!(act.torque, 0.0);
    }

    #[test]
    fn track_velocity_is_proportional_to_error() {
        let mut a = moving(DVec2::new(1.0, 0.5), 0.0);
        a.track_velocity(3.0, 1.0, 10.0, 5.0);
        let act = a.take_actuation();
        // (desired - current) * k * mass
        assert_relative_eq!(act.force.x, (3.0 - 1.0) * 10.0 * 2.0);
        assert_relative_eq!(act.force.y, (0.0 - 0.5) * 10.0 * 2.0);
        assert_relative_eq!(act.torque, 1.0 * 5.0 * 1.0);
    }

    #[test]
    fn omni_track_velocity_per_axis() {
        let mut a = moving(DVec2::new(1.0, 1.0), 0.0);
        a.omni_track_velocity(2.0, 0.0, 4.0);
        let act = a.take_actuation();
        assert_eq!(act.force, DVec2::new(8.0, -8.0));
    }

    #[test]
    fn damping_removes_friction_fraction() {
        let mut a = moving(DVec2::new(6.0, 0.0), 2.0);
        a.damp_movement();
        let act = a.take_actuation();
        // One step of dv = F / m * dt removes 10% of the linear velocity.
        assert_relative_eq!(act.force.x / a.mass() * DT, -0.6, epsilon = 1e-12);
        assert_relative_eq!(act.torque / a.moment_of_inertia() * DT, -1.0, epsilon = 1e-12);

        a.omni_damp_movement();
        assert_eq!(a.take_actuation().torque, 0.0);
    }

    #[test]
    fn move_toward_spins_in_place_for_targets_behind() {
        let mut a = robot();
        a.move_toward(-10.0, 0.1, DEFAULT_VF, DEFAULT_VR);
        let act = a.take_actuation();
        assert_relative_eq!(act.force.length(), 0.0, epsilon = 1e-9);
        assert!(act.torque > 0.0);

        a.move_toward(10.0, 0.0, DEFAULT_VF, DEFAULT_VR);
        let act = a.take_actuation();
        assert!(act.force.x > 0.0);
        assert_relative_eq!(act.torque, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn move_toward_caps_speed() {
        let mut a = robot();
        a.move_toward(1000.0, 0.0, 2.0, DEFAULT_VR);
        let act = a.take_actuation();
        assert_relative_eq!(act.force.x, 2.0 * DEFAULT_KL * a.mass());

        a.omni_move_toward(0.0, 1000.0, 3.0);
        let act = a.take_actuation();
        assert_relative_eq!(act.force.y, 3.0 * DEFAULT_K * a.mass());
    }

    #[test]
    fn non_finite_actuation_is_rejected() {
        let mut a = robot();
        a.apply_force(f64::NAN, 0.0)
            .omni_apply_force(f64::INFINITY, 0.0)
            .teleport(f64::NAN, 0.0, 0.0)
            .move_toward(f64::INFINITY, 0.0, 1.0, 1.0);
        assert!(a.take_actuation().is_empty());
        assert_eq!(a.pose(), Pose::default());
    }

    #[test]
    fn overflowing_total_keeps_earlier_actuation() {
        let mut a = robot();
        a.apply_force(f64::MAX, 0.0).apply_force(f64::MAX, 0.0);
        let act = a.take_actuation();
        assert!(act.is_finite());
        assert_eq!(act.force, DVec2::new(f64::MAX, 0.0));

        a.omni_apply_force(0.0, 1.0).apply_force(0.0, f64::MAX).apply_force(0.0, f64::MAX);
        let act = a.take_actuation();
        assert_eq!(act.force, DVec2::new(0.0, 1.0));
        assert_eq!(act.torque, f64::MAX);

        // Products that overflow are caught the same way.
        let mut fast = moving(DVec2::new(f64::MAX, 0.0), 0.0);
        fast.track_velocity(-f64::MAX, 0.0, DEFAULT_KL, DEFAULT_KR)
            .damp_movement();
        assert!(fast.take_actuation().is_empty());
    }

    #[test]
    fn teleport_updates_cached_state() {
        let mut a = moving(DVec2::new(5.0, 5.0), 1.0);
        a.apply_force(10.0, 0.0).teleport(1.0, 2.0, 0.5);
        assert_eq!(a.pose(), Pose::new(1.0, 2.0, 0.5));
        assert_eq!(a.velocity(), DVec2::ZERO);
        let act = a.take_actuation();
        assert_eq!(act.teleport, Some(Pose::new(1.0, 2.0, 0.5)));
        assert_eq!(act.force, DVec2::ZERO);
    }

    #[test]
    fn rotation_lock_and_attach_are_queued() {
        let mut a = robot();
        let other = AgentId::next();
        let me = a.id();
        a.prevent_rotation().attach_to(other).attach_to(me);
        assert!(a.rotation_locked());
        let act = a.take_actuation();
        assert_eq!(act.lock_rotation, Some(true));
        assert_eq!(act.attach_to, vec![other]);
        a.allow_rotation();
        assert!(!a.rotation_locked());
    }

    #[test]
    fn sensor_index_out_of_range_is_an_error() {
        let a = robot();
        assert_eq!(a.sensor_count(), 2);
        // Nothing sensed yet reads as a miss at full range.
        assert_eq!(
            a.sensor_values(),
            vec![RangeSensor::DEFAULT_RANGE, RangeSensor::DEFAULT_RANGE]
        );
        assert_eq!(a.sensor_reflection_types(), vec![NOTHING, NOTHING]);
        assert!(a.sensor_value(1).is_ok());
        let err = a.sensor_value(2).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, KernelError::SensorIndex { index: 2, len: 2 }));
        assert!(a.sensor_reflection_type(7).is_err());
    }

    #[test]
    fn mark_for_removal_is_idempotent() {
        let mut a = robot();
        a.mark_for_removal();
        a.mark_for_removal();
        assert!(!a.is_alive());
    }

    #[test]
    fn collision_handlers_overwrite_and_ignore() {
        let mut a = robot();
        a.notice_collisions_with("Rock", |_, _, _| {})
            .notice_collisions_with("Rock", |agent, _, _| {
                agent.mark_for_removal();
            });
        assert!(a.handles_collisions_with("Rock"));
        a.ignore_collisions_with("Rock");
        assert!(!a.handles_collisions_with("Rock"));
    }

    #[test]
    fn client_id_and_style_pass_through() {
        let mut a = robot();
        assert_eq!(a.client_id(), None);
        a.set_client_id("operator-1").set_style(json!({ "fill": "blue" }));
        let snap = a.snapshot();
        assert_eq!(snap.client_id.as_deref(), Some("operator-1"));
        assert_eq!(snap.style, json!({ "fill": "blue" }));
        assert_eq!(snap.kind, "Robot");
        assert_eq!(snap.sensors.len(), 2);
    }

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    fn counting_destroyer(agent: Agent) {
        DESTROYED.fetch_add(1, Ordering::SeqCst);
        drop(agent);
    }

    #[test]
    fn destroy_calls_bound_destroyer_once() {
        let mut a = robot();
        a.bind_destroyer(counting_destroyer);
        a.init().unwrap();
        a.start().unwrap();
        let before = DESTROYED.load(Ordering::SeqCst);
        a.destroy().unwrap();
        assert_eq!(DESTROYED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn registered_agent_refuses_destroy() {
        let mut space = PhysicsSpace::new(DT);
        let mut a = robot();
        a.register_body(&mut space).unwrap();
        assert!(a.body_handle().is_some());
        assert!(matches!(a.register_body(&mut space), Err(KernelError::AlreadyRegistered(_))));
        let id = a.id();
        assert!(matches!(a.destroy(), Err(KernelError::StillRegistered(got)) if got == id));
    }

    #[test]
    fn wrap_angle_range() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.5), 0.5);
        assert_relative_eq!(wrap_angle(-0.5 - TAU), -0.5, epsilon = 1e-12);
    }
}
