//! Adapter over the rigid-body engine.
//!
//! The rest of the kernel talks to [`PhysicsSpace`] only, in kernel types
//! (`glam` vectors, [`Pose`], [`AgentId`]). The space is planar and top-down:
//! there is no gravity, and every force acting on a body comes from agent
//! actuation or contacts.

use std::sync::Mutex;

use glam::DVec2;
use kinetica_common::{AgentId, Pose, Velocity};
use rapier2d::prelude::*;

use crate::collision::{ContactEvent, ContactPhase};
use crate::error::KernelError;
use crate::spec::{Shape, SpecError};

/// Handle to a body registered in a [`PhysicsSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyHandle(RigidBodyHandle);

/// Everything needed to build a body. Agents hold one until they are registered.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub pose: Pose,
    pub shape: Shape,
    pub mass: f64,
    pub moment: f64,
    pub is_static: bool,
}

/// Forces and overrides queued on one body for the next step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actuation {
    pub force: DVec2,
    pub torque: f64,
    pub teleport: Option<Pose>,
    pub lock_rotation: Option<bool>,
    pub attach_to: Vec<AgentId>,
}

impl Actuation {
    pub fn is_finite(&self) -> bool {
        self.force.is_finite()
            && self.torque.is_finite()
            && self.teleport.is_none_or(|p| p.is_finite())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Pose and velocity of a body after a step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyState {
    pub pose: Pose,
    pub velocity: Velocity,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub agent: AgentId,
    pub distance: f64,
}

fn to_vec(v: &Vector<Real>) -> DVec2 {
    DVec2::new(v.x, v.y)
}

fn owner_of(user_data: u128) -> AgentId {
    AgentId(user_data as u64)
}

/// Collects collision transitions raised while the pipeline steps.
#[derive(Default)]
struct ContactCollector {
    events: Mutex<Vec<ContactEvent>>,
}

impl ContactCollector {
    fn drain(&mut self) -> Vec<ContactEvent> {
        match self.events.get_mut() {
            Ok(events) => std::mem::take(events),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        }
    }
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        // Colliders removed since the last step report a stop we no longer care about.
        let (Some(c1), Some(c2)) = (
            colliders.get(event.collider1()),
            colliders.get(event.collider2()),
        ) else {
            return;
        };
        let velocity = |c: &Collider| {
            c.parent()
                .and_then(|h| bodies.get(h))
                .map(|b| to_vec(b.linvel()))
                .unwrap_or(DVec2::ZERO)
        };
        let normal = contact_pair
            .and_then(|pair| pair.manifolds.first())
            .map(|m| to_vec(&m.data.normal))
            .unwrap_or(DVec2::ZERO);
        let contact = ContactEvent {
            first: owner_of(c1.user_data),
            second: owner_of(c2.user_data),
            phase: if event.started() {
                ContactPhase::Began
            } else {
                ContactPhase::Ended
            },
            normal,
            first_velocity: velocity(c1),
            second_velocity: velocity(c2),
        };
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(contact);
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// The physics space owned by a world.
pub struct PhysicsSpace {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    queries: QueryPipeline,
    contacts: ContactCollector,
}

impl PhysicsSpace {
    pub fn new(timestep: f64) -> Self {
        let mut params = IntegrationParameters::default();
        params.dt = timestep;
        Self {
            gravity: vector![0.0, 0.0],
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            queries: QueryPipeline::new(),
            contacts: ContactCollector::default(),
        }
    }

    pub fn timestep(&self) -> f64 {
        self.params.dt
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.bodies.contains(handle.0)
    }

    /// Build and register a body with its collider. Nothing is inserted when
    /// the shape cannot be built.
    pub fn insert(&mut self, desc: &BodyDesc, owner: AgentId) -> Result<BodyHandle, KernelError> {
        let shape = match &desc.shape {
            Shape::Circle { radius } => ColliderBuilder::ball(*radius),
            Shape::Polygon(_) => {
                let points: Vec<Point<Real>> = desc
                    .shape
                    .vertices()
                    .iter()
                    .map(|v| point![v.x, v.y])
                    .collect();
                ColliderBuilder::convex_hull(&points).ok_or(SpecError::Invalid {
                    field: "definition.shape",
                    reason: "polygon has no area".into(),
                })?
            }
        };
        let collider = shape
            .density(0.0)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(owner.0 as u128)
            .build();

        let builder = if desc.is_static {
            RigidBodyBuilder::fixed()
        } else {
            RigidBodyBuilder::dynamic()
        };
        let body = builder
            .translation(vector![desc.pose.position.x, desc.pose.position.y])
            .rotation(desc.pose.angle)
            .additional_mass_properties(MassProperties::new(
                point![0.0, 0.0],
                desc.mass,
                desc.moment,
            ))
            .can_sleep(false)
            .user_data(owner.0 as u128)
            .build();

        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        Ok(BodyHandle(handle))
    }

    /// Release a body, its collider and any joints on it.
    pub fn remove(&mut self, handle: BodyHandle, owner: AgentId) -> Result<(), KernelError> {
        self.bodies
            .remove(
                handle.0,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .map(|_| ())
            .ok_or(KernelError::BodyNotInSpace(owner))
    }

    pub fn state(&self, handle: BodyHandle) -> Option<BodyState> {
        let body = self.bodies.get(handle.0)?;
        let t = body.translation();
        Some(BodyState {
            pose: Pose::new(t.x, t.y, body.rotation().angle()),
            velocity: Velocity {
                linear: to_vec(body.linvel()),
                angular: body.angvel(),
            },
        })
    }

    /// Push queued actuation into the body. Joints are handled by [`attach`](Self::attach).
    pub fn apply(&mut self, handle: BodyHandle, owner: AgentId, act: &Actuation) -> Result<(), KernelError> {
        let body = self
            .bodies
            .get_mut(handle.0)
            .ok_or(KernelError::BodyNotInSpace(owner))?;
        if let Some(locked) = act.lock_rotation {
            body.lock_rotations(locked, true);
        }
        if let Some(pose) = act.teleport {
            body.set_position(
                Isometry::new(vector![pose.position.x, pose.position.y], pose.angle),
                true,
            );
            body.set_linvel(vector![0.0, 0.0], true);
            body.set_angvel(0.0, true);
            body.reset_forces(true);
            body.reset_torques(true);
        }
        if act.force != DVec2::ZERO {
            body.add_force(vector![act.force.x, act.force.y], true);
        }
        if act.torque != 0.0 {
            body.add_torque(act.torque, true);
        }
        Ok(())
    }

    /// Weld two bodies together at their current relative pose.
    pub fn attach(&mut self, a: BodyHandle, b: BodyHandle, owner: AgentId) -> Result<(), KernelError> {
        let (Some(body_a), Some(body_b)) = (self.bodies.get(a.0), self.bodies.get(b.0)) else {
            return Err(KernelError::BodyNotInSpace(owner));
        };
        let frame_b = body_b.position().inverse() * body_a.position();
        let joint = FixedJointBuilder::new()
            .local_frame1(Isometry::identity())
            .local_frame2(frame_b);
        self.impulse_joints.insert(a.0, b.0, joint, true);
        Ok(())
    }

    /// Owners of every body whose pose or velocity is no longer finite.
    pub fn invalid_bodies(&self) -> Vec<AgentId> {
        self.bodies
            .iter()
            .filter(|(_, body)| {
                let t = body.translation();
                let v = body.linvel();
                !(t.x.is_finite()
                    && t.y.is_finite()
                    && body.rotation().angle().is_finite()
                    && v.x.is_finite()
                    && v.y.is_finite()
                    && body.angvel().is_finite())
            })
            .map(|(_, body)| owner_of(body.user_data))
            .collect()
    }

    /// Bring ray queries up to date after bodies were removed between steps.
    pub fn refresh_queries(&mut self) {
        self.queries.update(&self.colliders);
    }

    #[cfg(test)]
    pub(crate) fn force_velocity(&mut self, handle: BodyHandle, linear: DVec2) {
        if let Some(body) = self.bodies.get_mut(handle.0) {
            body.set_linvel(vector![linear.x, linear.y], false);
        }
    }

    /// Advance one timestep and return the contact transitions it raised.
    ///
    /// Forces accumulated on bodies are consumed by the step.
    pub fn step(&mut self) -> Vec<ContactEvent> {
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.queries),
            &(),
            &self.contacts,
        );
        for (_, body) in self.bodies.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }
        self.contacts.drain()
    }

    /// First body hit by a ray, as of the last step.
    pub fn cast_ray(
        &self,
        origin: DVec2,
        direction: DVec2,
        max_distance: f64,
        exclude: Option<BodyHandle>,
    ) -> Option<RayHit> {
        let dir = direction.normalize_or_zero();
        if dir == DVec2::ZERO {
            return None;
        }
        let ray = Ray::new(point![origin.x, origin.y], vector![dir.x, dir.y]);
        let mut filter = QueryFilter::default();
        if let Some(handle) = exclude {
            filter = filter.exclude_rigid_body(handle.0);
        }
        let (collider, distance) =
            self.queries
                .cast_ray(&self.bodies, &self.colliders, &ray, max_distance, true, filter)?;
        let agent = owner_of(self.colliders.get(collider)?.user_data);
        Some(RayHit { agent, distance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DT: f64 = 1.0 / 60.0;

    fn disc(x: f64, y: f64, is_static: bool) -> BodyDesc {
        let shape = Shape::Circle { radius: 1.0 };
        BodyDesc {
            pose: Pose::new(x, y, 0.0),
            moment: shape.moment_of_inertia(1.0),
            shape,
            mass: 1.0,
            is_static,
        }
    }

    #[test]
    fn insert_and_remove_bodies() {
        let mut space = PhysicsSpace::new(DT);
        let id = AgentId::next();
        let h = space.insert(&disc(0.0, 0.0, false), id).unwrap();
        assert_eq!(space.body_count(), 1);
        assert!(space.contains(h));

        space.remove(h, id).unwrap();
        assert_eq!(space.body_count(), 0);
        assert!(matches!(space.remove(h, id), Err(KernelError::BodyNotInSpace(_))));
    }

    #[test]
    fn queued_force_is_integrated_once() {
        let mut space = PhysicsSpace::new(DT);
        let id = AgentId::next();
        let h = space.insert(&disc(0.0, 0.0, false), id).unwrap();
        let act = Actuation {
            force: DVec2::new(10.0, 0.0),
            ..Actuation::default()
        };
        space.apply(h, id, &act).unwrap();
        space.step();
        let s = space.state(h).unwrap();
        assert_relative_eq!(s.velocity.linear.x, 10.0 * DT, epsilon = 1e-6);
        assert!(s.pose.position.x > 0.0);

        // The force was consumed; the next step coasts.
        space.step();
        let s2 = space.state(h).unwrap();
        assert_relative_eq!(s2.velocity.linear.x, s.velocity.linear.x, epsilon = 1e-9);
    }

    #[test]
    fn teleport_zeroes_velocity() {
        let mut space = PhysicsSpace::new(DT);
        let id = AgentId::next();
        let h = space.insert(&disc(0.0, 0.0, false), id).unwrap();
        space
            .apply(h, id, &Actuation { force: DVec2::new(50.0, 0.0), ..Actuation::default() })
            .unwrap();
        space.step();
        let act = Actuation {
            teleport: Some(Pose::new(10.0, -3.0, 1.0)),
            ..Actuation::default()
        };
        space.apply(h, id, &act).unwrap();
        let s = space.state(h).unwrap();
        assert_eq!(s.velocity, Velocity::ZERO);
        assert_relative_eq!(s.pose.position.x, 10.0);
        assert_relative_eq!(s.pose.angle, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn locked_rotation_ignores_torque() {
        let mut space = PhysicsSpace::new(DT);
        let id = AgentId::next();
        let h = space.insert(&disc(0.0, 0.0, false), id).unwrap();
        let act = Actuation {
            torque: 5.0,
            lock_rotation: Some(true),
            ..Actuation::default()
        };
        space.apply(h, id, &act).unwrap();
        space.step();
        assert_eq!(space.state(h).unwrap().velocity.angular, 0.0);
    }

    #[test]
    fn ray_hits_nearest_body() {
        let mut space = PhysicsSpace::new(DT);
        let near = AgentId::next();
        let far = AgentId::next();
        space.insert(&disc(5.0, 0.0, true), near).unwrap();
        space.insert(&disc(9.0, 0.0, true), far).unwrap();
        space.step();

        let hit = space.cast_ray(DVec2::ZERO, DVec2::X, 20.0, None).unwrap();
        assert_eq!(hit.agent, near);
        assert_relative_eq!(hit.distance, 4.0, epsilon = 1e-6);
        assert!(space.cast_ray(DVec2::ZERO, DVec2::Y, 20.0, None).is_none());
        assert!(space.cast_ray(DVec2::ZERO, DVec2::X, 2.0, None).is_none());
    }

    #[test]
    fn overlapping_bodies_report_contact() {
        let mut space = PhysicsSpace::new(DT);
        let a = AgentId::next();
        let b = AgentId::next();
        space.insert(&disc(0.0, 0.0, false), a).unwrap();
        space.insert(&disc(1.5, 0.0, false), b).unwrap();
        let events = space.step();
        assert!(events.iter().any(|e| e.phase == ContactPhase::Began
            && ((e.first, e.second) == (a, b) || (e.first, e.second) == (b, a))));
    }

    #[test]
    fn fresh_space_has_no_invalid_bodies() {
        let mut space = PhysicsSpace::new(DT);
        space.insert(&disc(0.0, 0.0, false), AgentId::next()).unwrap();
        assert!(space.invalid_bodies().is_empty());
    }

    #[test]
    fn non_finite_body_is_reported_by_owner() {
        let mut space = PhysicsSpace::new(DT);
        let healthy = AgentId::next();
        let broken = AgentId::next();
        space.insert(&disc(0.0, 0.0, false), healthy).unwrap();
        let h = space.insert(&disc(5.0, 0.0, false), broken).unwrap();
        space.force_velocity(h, DVec2::new(f64::INFINITY, 0.0));

        assert_eq!(space.invalid_bodies(), vec![broken]);
        space.remove(h, broken).unwrap();
        space.refresh_queries();
        assert!(space.invalid_bodies().is_empty());
        assert!(space.cast_ray(DVec2::new(5.0, 5.0), DVec2::NEG_Y, 20.0, None).is_none());
    }

    #[test]
    fn actuation_finiteness_covers_teleport() {
        assert!(Actuation::default().is_finite());
        let bad_force = Actuation {
            force: DVec2::new(f64::NAN, 0.0),
            ..Actuation::default()
        };
        assert!(!bad_force.is_finite());
        let bad_teleport = Actuation {
            teleport: Some(Pose::new(0.0, f64::INFINITY, 0.0)),
            ..Actuation::default()
        };
        assert!(!bad_teleport.is_finite());
    }
}
