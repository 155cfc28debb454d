//! Sensor contract, the built-in range finder, and the catalog that builds
//! sensors from `definition.sensors` entries.

use std::collections::BTreeMap;

use glam::DVec2;
use kinetica_common::{AgentId, Pose};
use serde::Serialize;

use crate::error::KernelError;
use crate::physics::{BodyHandle, PhysicsSpace};
use crate::spec::{SensorDef, SpecError};

/// Reflection type reported when nothing was sensed.
pub const NOTHING: &str = "none";

/// One sensor sample: a scalar and the type name of whatever produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub value: f64,
    pub reflection_type: String,
}

impl SensorReading {
    pub fn new(value: f64, reflection_type: impl Into<String>) -> Self {
        Self {
            value,
            reflection_type: reflection_type.into(),
        }
    }
}

/// Read-only view of the world from one agent's body, handed to sensors.
pub struct Probe<'a> {
    space: &'a PhysicsSpace,
    pose: Pose,
    owner: Option<BodyHandle>,
    types: &'a BTreeMap<AgentId, String>,
}

impl<'a> Probe<'a> {
    pub fn new(
        space: &'a PhysicsSpace,
        pose: Pose,
        owner: Option<BodyHandle>,
        types: &'a BTreeMap<AgentId, String>,
    ) -> Self {
        Self {
            space,
            pose,
            owner,
            types,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Cast a ray from a body-local point along a body-relative angle,
    /// ignoring the probing body. Returns the distance and the hit agent's type.
    pub fn cast(&self, location: DVec2, direction: f64, range: f64) -> Option<(f64, &'a str)> {
        let origin = self.pose.to_world(location);
        let dir = DVec2::from_angle(self.pose.angle + direction);
        let hit = self.space.cast_ray(origin, dir, range, self.owner)?;
        let kind = self.types.get(&hit.agent).map_or("", String::as_str);
        Some((hit.distance, kind))
    }
}

pub trait Sensor {
    fn kind(&self) -> &str;
    fn read(&self, probe: &Probe<'_>) -> SensorReading;
    /// Reading reported before the first sample is taken.
    fn idle(&self) -> SensorReading;
}

/// Ray-cast distance sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSensor {
    /// Mount point in body coordinates.
    pub location: DVec2,
    /// Beam angle relative to the body heading, in radians.
    pub direction: f64,
    pub range: f64,
}

impl RangeSensor {
    pub const DEFAULT_RANGE: f64 = 50.0;

    pub fn from_def(def: &SensorDef) -> Result<Self, SpecError> {
        let range = def.param_f64("range").unwrap_or(Self::DEFAULT_RANGE);
        if !(range.is_finite() && range > 0.0) {
            return Err(SpecError::Invalid {
                field: "definition.sensors.range",
                reason: format!("expected a positive range, got {range}"),
            });
        }
        Ok(Self {
            location: def.param_vec("location").unwrap_or(DVec2::ZERO),
            direction: def.param_f64("direction").unwrap_or(0.0),
            range,
        })
    }
}

impl Sensor for RangeSensor {
    fn kind(&self) -> &str {
        "range"
    }

    fn read(&self, probe: &Probe<'_>) -> SensorReading {
        match probe.cast(self.location, self.direction, self.range) {
            Some((distance, kind)) => SensorReading::new(distance, kind),
            None => self.idle(),
        }
    }

    fn idle(&self) -> SensorReading {
        SensorReading::new(self.range, NOTHING)
    }
}

pub type SensorCtor = fn(&SensorDef) -> Result<Box<dyn Sensor>, KernelError>;

fn range_sensor(def: &SensorDef) -> Result<Box<dyn Sensor>, KernelError> {
    Ok(Box::new(RangeSensor::from_def(def)?))
}

/// Sensor type name to constructor.
#[derive(Debug, Clone)]
pub struct SensorCatalog {
    ctors: BTreeMap<String, SensorCtor>,
}

impl Default for SensorCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.register("range", range_sensor);
        catalog
    }
}

impl SensorCatalog {
    /// Catalog holding the built-in sensor types.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            ctors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, ctor: SensorCtor) -> &mut Self {
        self.ctors.insert(kind.into(), ctor);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.ctors.contains_key(kind)
    }

    pub fn build(&self, def: &SensorDef) -> Result<Box<dyn Sensor>, KernelError> {
        let ctor = self
            .ctors
            .get(&def.kind)
            .ok_or_else(|| KernelError::UnknownSensor(def.kind.clone()))?;
        ctor(def)
    }

    /// Build every sensor in order, failing on the first bad entry.
    pub fn build_all(&self, defs: &[SensorDef]) -> Result<Vec<Box<dyn Sensor>>, KernelError> {
        defs.iter().map(|def| self.build(def)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::BodyDesc;
    use crate::spec::Shape;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn sensor_def(value: serde_json::Value) -> SensorDef {
        serde_json::from_value(value).unwrap()
    }

    fn wall(space: &mut PhysicsSpace, x: f64, y: f64) -> AgentId {
        let id = AgentId::next();
        let shape = Shape::Circle { radius: 1.0 };
        let desc = BodyDesc {
            pose: Pose::new(x, y, 0.0),
            moment: shape.moment_of_inertia(1.0),
            shape,
            mass: 1.0,
            is_static: true,
        };
        space.insert(&desc, id).unwrap();
        id
    }

    #[test]
    fn range_sensor_defaults() {
        let s = RangeSensor::from_def(&sensor_def(json!({ "type": "range" }))).unwrap();
        assert_eq!(s.location, DVec2::ZERO);
        assert_eq!(s.direction, 0.0);
        assert_eq!(s.range, RangeSensor::DEFAULT_RANGE);
        assert!(RangeSensor::from_def(&sensor_def(json!({ "type": "range", "range": -2 }))).is_err());
    }

    #[test]
    fn range_sensor_reports_hit_type_and_distance() {
        let mut space = PhysicsSpace::new(1.0 / 60.0);
        let rock = wall(&mut space, 0.0, 10.0);
        space.step();
        let types = BTreeMap::from([(rock, "Rock".to_string())]);

        // Facing +y after a quarter turn; the beam points along the heading.
        let probe = Probe::new(&space, Pose::new(0.0, 0.0, std::f64::consts::FRAC_PI_2), None, &types);
        let sensor = RangeSensor {
            location: DVec2::new(1.0, 0.0),
            direction: 0.0,
            range: 20.0,
        };
        let reading = sensor.read(&probe);
        assert_eq!(reading.reflection_type, "Rock");
        assert_relative_eq!(reading.value, 8.0, epsilon = 1e-6);
    }

    #[test]
    fn range_sensor_miss_reports_full_range() {
        let space = PhysicsSpace::new(1.0 / 60.0);
        let types = BTreeMap::new();
        let probe = Probe::new(&space, Pose::default(), None, &types);
        let sensor = RangeSensor {
            location: DVec2::ZERO,
            direction: 0.0,
            range: 5.0,
        };
        assert_eq!(sensor.read(&probe), SensorReading::new(5.0, NOTHING));
        assert_eq!(sensor.idle(), sensor.read(&probe));
    }

    #[test]
    fn catalog_rejects_unknown_types() {
        let catalog = SensorCatalog::new();
        assert!(catalog.contains("range"));
        let err = catalog
            .build(&sensor_def(json!({ "type": "sonar" })))
            .err()
            .unwrap();
        assert!(matches!(err, KernelError::UnknownSensor(kind) if kind == "sonar"));

        let built = catalog
            .build_all(&[
                sensor_def(json!({ "type": "range" })),
                sensor_def(json!({ "type": "range", "direction": 1.0 })),
            ])
            .unwrap();
        assert_eq!(built.len(), 2);
        assert_eq!(built[1].kind(), "range");
    }
}
