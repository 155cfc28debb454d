//! The per-agent specification document.
//!
//! A specification is a read-only JSON tree. The kernel reads a handful of
//! fields out of it (physical definition, initial position, style) and treats
//! everything else as opaque.

use glam::DVec2;
use kinetica_common::Pose;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration errors found while reading a specification document.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("malformed `{field}`: {source}")]
    Malformed {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn default_mass() -> f64 {
    1.0
}

/// Physical definition of an agent type, read from `definition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// Agent type name. Keys the plugin registry and collision handler tables.
    #[serde(default)]
    pub name: String,
    /// `"static"` marks an immovable agent; anything else is dynamic.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub shape: Shape,
    #[serde(default = "default_mass")]
    pub mass: f64,
    pub friction: Friction,
    #[serde(default)]
    pub sensors: Vec<SensorDef>,
    #[serde(default)]
    pub invisible: bool,
}

impl Definition {
    pub fn is_static(&self) -> bool {
        self.kind == "static"
    }

    fn validate(&self) -> Result<(), SpecError> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(SpecError::Invalid {
                field: "definition.mass",
                reason: format!("expected a positive mass, got {}", self.mass),
            });
        }
        if !(self.friction.linear.is_finite() && self.friction.linear >= 0.0) {
            return Err(SpecError::Invalid {
                field: "definition.friction.linear",
                reason: format!("expected a non-negative value, got {}", self.friction.linear),
            });
        }
        if !(self.friction.rotational.is_finite() && self.friction.rotational >= 0.0) {
            return Err(SpecError::Invalid {
                field: "definition.friction.rotational",
                reason: format!(
                    "expected a non-negative value, got {}",
                    self.friction.rotational
                ),
            });
        }
        self.shape.validate()
    }
}

/// Friction coefficients. Each is the fraction of the remaining velocity
/// removed per tick by the damping actuators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Friction {
    pub linear: f64,
    pub rotational: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// Collision shape in body coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Shape {
    Polygon(Vec<Vertex>),
    Circle { radius: f64 },
}

impl Default for Shape {
    fn default() -> Self {
        Self::Circle { radius: 1.0 }
    }
}

impl Shape {
    pub fn vertices(&self) -> Vec<DVec2> {
        match self {
            Self::Polygon(points) => points.iter().map(|v| DVec2::new(v.x, v.y)).collect(),
            Self::Circle { .. } => Vec::new(),
        }
    }

    /// Signed area; negative for clockwise polygons.
    pub fn area(&self) -> f64 {
        match self {
            Self::Circle { radius } => std::f64::consts::PI * radius * radius,
            Self::Polygon(_) => {
                let verts = self.vertices();
                let twice: f64 = verts
                    .iter()
                    .enumerate()
                    .map(|(i, v1)| v1.perp_dot(verts[(i + 1) % verts.len()]))
                    .sum();
                twice / 2.0
            }
        }
    }

    /// Moment of inertia about the body origin for the given mass.
    pub fn moment_of_inertia(&self, mass: f64) -> f64 {
        match self {
            Self::Circle { radius } => 0.5 * mass * radius * radius,
            Self::Polygon(_) => {
                let verts = self.vertices();
                let mut weighted = 0.0;
                let mut area = 0.0;
                for (i, v1) in verts.iter().enumerate() {
                    let v2 = verts[(i + 1) % verts.len()];
                    let cross = v2.perp_dot(*v1);
                    weighted += cross * (v1.dot(*v1) + v1.dot(v2) + v2.dot(v2));
                    area += cross;
                }
                mass * weighted / (6.0 * area)
            }
        }
    }

    fn validate(&self) -> Result<(), SpecError> {
        match self {
            Self::Circle { radius } if !(radius.is_finite() && *radius > 0.0) => {
                Err(SpecError::Invalid {
                    field: "definition.shape",
                    reason: format!("expected a positive radius, got {radius}"),
                })
            }
            Self::Polygon(points) if points.len() < 3 => Err(SpecError::Invalid {
                field: "definition.shape",
                reason: format!("a polygon needs at least 3 points, got {}", points.len()),
            }),
            Self::Polygon(points) if points.iter().any(|v| !(v.x.is_finite() && v.y.is_finite())) => {
                Err(SpecError::Invalid {
                    field: "definition.shape",
                    reason: "polygon points must be finite".into(),
                })
            }
            Self::Polygon(_) if self.area().abs() <= f64::EPSILON => Err(SpecError::Invalid {
                field: "definition.shape",
                reason: "polygon has no area".into(),
            }),
            _ => Ok(()),
        }
    }
}

/// One entry of `definition.sensors`: a type tag plus free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl SensorDef {
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    /// Read a `{ "x": .., "y": .. }` parameter.
    pub fn param_vec(&self, key: &str) -> Option<DVec2> {
        let v = self.params.get(key)?;
        Some(DVec2::new(v.get("x")?.as_f64()?, v.get("y")?.as_f64()?))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PositionDef {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    theta: f64,
}

/// Read-only specification document for one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Specification {
    document: Value,
}

impl Specification {
    pub fn new(document: Value) -> Self {
        Self { document }
    }

    /// Assemble a document from a definition, a starting pose and an optional style.
    pub fn from_parts(definition: Value, pose: Pose, style: Option<Value>) -> Self {
        let mut document = Map::new();
        document.insert("definition".into(), definition);
        document.insert(
            "position".into(),
            serde_json::json!({
                "x": pose.position.x,
                "y": pose.position.y,
                "theta": pose.angle,
            }),
        );
        if let Some(style) = style {
            document.insert("style".into(), style);
        }
        Self::new(Value::Object(document))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The raw `definition` subtree, if present.
    pub fn definition_value(&self) -> Option<&Value> {
        self.document.get("definition")
    }

    /// Parse and validate the `definition` subtree.
    pub fn definition(&self) -> Result<Definition, SpecError> {
        let raw = self
            .definition_value()
            .ok_or(SpecError::Missing("definition"))?;
        if raw.get("type").is_none() {
            return Err(SpecError::Missing("definition.type"));
        }
        let friction = raw
            .get("friction")
            .ok_or(SpecError::Missing("definition.friction"))?;
        if friction.get("linear").is_none() {
            return Err(SpecError::Missing("definition.friction.linear"));
        }
        if friction.get("rotational").is_none() {
            return Err(SpecError::Missing("definition.friction.rotational"));
        }
        let definition: Definition =
            serde_json::from_value(raw.clone()).map_err(|source| SpecError::Malformed {
                field: "definition",
                source,
            })?;
        definition.validate()?;
        Ok(definition)
    }

    /// Agent type name from `definition.name`, or an empty string.
    pub fn type_name(&self) -> &str {
        self.definition_value()
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Starting pose from `position`; the origin when absent.
    pub fn initial_pose(&self) -> Result<Pose, SpecError> {
        let Some(raw) = self.document.get("position") else {
            return Ok(Pose::default());
        };
        let p: PositionDef =
            serde_json::from_value(raw.clone()).map_err(|source| SpecError::Malformed {
                field: "position",
                source,
            })?;
        let pose = Pose::new(p.x, p.y, p.theta);
        if !pose.is_finite() {
            return Err(SpecError::Invalid {
                field: "position",
                reason: "position must be finite".into(),
            });
        }
        Ok(pose)
    }

    pub fn style(&self) -> Option<&Value> {
        self.document.get("style")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn robot() -> Value {
        json!({
            "definition": {
                "name": "Robot",
                "type": "dynamic",
                "mass": 2.0,
                "shape": [
                    { "x": -1, "y": -1 },
                    { "x": 1, "y": -1 },
                    { "x": 1, "y": 1 },
                    { "x": -1, "y": 1 }
                ],
                "friction": { "linear": 0.1, "rotational": 0.2 },
                "sensors": [
                    { "type": "range", "location": { "x": 1, "y": 0 }, "direction": 0 }
                ]
            },
            "position": { "x": 3, "y": 4, "theta": 0.5 },
            "style": { "fill": "gray" }
        })
    }

    #[test]
    fn parses_definition_fields() {
        let spec = Specification::new(robot());
        let def = spec.definition().unwrap();
        assert_eq!(def.name, "Robot");
        assert!(!def.is_static());
        assert_eq!(def.mass, 2.0);
        assert_eq!(def.friction.linear, 0.1);
        assert_eq!(def.friction.rotational, 0.2);
        assert_eq!(def.sensors.len(), 1);
        assert_eq!(def.sensors[0].kind, "range");
        assert_eq!(def.sensors[0].param_vec("location"), Some(DVec2::new(1.0, 0.0)));
        assert_eq!(spec.type_name(), "Robot");
        assert_eq!(spec.style(), Some(&json!({ "fill": "gray" })));
    }

    #[test]
    fn initial_pose_reads_position() {
        let spec = Specification::new(robot());
        assert_eq!(spec.initial_pose().unwrap(), Pose::new(3.0, 4.0, 0.5));

        let bare = Specification::new(json!({ "definition": {} }));
        assert_eq!(bare.initial_pose().unwrap(), Pose::default());
    }

    #[test]
    fn missing_friction_is_reported() {
        let spec = Specification::new(json!({
            "definition": { "type": "dynamic", "friction": { "linear": 0.1 } }
        }));
        assert!(matches!(
            spec.definition(),
            Err(SpecError::Missing("definition.friction.rotational"))
        ));

        let spec = Specification::new(json!({ "position": { "x": 1 } }));
        assert!(matches!(spec.definition(), Err(SpecError::Missing("definition"))));
    }

    #[test]
    fn malformed_fields_are_reported() {
        let spec = Specification::new(json!({
            "definition": {
                "type": "dynamic",
                "friction": { "linear": "lots", "rotational": 0.1 }
            }
        }));
        assert!(matches!(spec.definition(), Err(SpecError::Malformed { .. })));

        let spec = Specification::new(json!({
            "definition": {
                "type": "dynamic",
                "mass": -1.0,
                "friction": { "linear": 0.1, "rotational": 0.1 }
            }
        }));
        assert!(matches!(spec.definition(), Err(SpecError::Invalid { .. })));
    }

    #[test]
    fn static_type_marks_immovable() {
        let spec = Specification::new(json!({
            "definition": {
                "type": "static",
                "shape": { "radius": 2.0 },
                "friction": { "linear": 0, "rotational": 0 }
            }
        }));
        let def = spec.definition().unwrap();
        assert!(def.is_static());
        assert_eq!(def.shape, Shape::Circle { radius: 2.0 });
    }

    #[test]
    fn moment_of_inertia_for_square_and_circle() {
        let square = Specification::new(robot()).definition().unwrap().shape;
        // side 2, mass 1: (w^2 + h^2) / 12
        assert_relative_eq!(square.moment_of_inertia(1.0), 2.0 / 3.0, epsilon = 1e-12);
        let circle = Shape::Circle { radius: 2.0 };
        assert_relative_eq!(circle.moment_of_inertia(3.0), 6.0);
    }

    #[test]
    fn flat_polygon_is_rejected() {
        let spec = Specification::new(json!({
            "definition": {
                "type": "dynamic",
                "shape": [ { "x": 0, "y": 0 }, { "x": 1, "y": 1 }, { "x": 2, "y": 2 } ],
                "friction": { "linear": 0, "rotational": 0 }
            }
        }));
        assert!(matches!(
            spec.definition(),
            Err(SpecError::Invalid { field: "definition.shape", .. })
        ));
        let square = Specification::new(robot()).definition().unwrap().shape;
        assert_relative_eq!(square.area(), 4.0);
    }

    #[test]
    fn from_parts_round_trips_pose() {
        let def = robot()["definition"].clone();
        let spec = Specification::from_parts(def, Pose::new(-1.0, 2.0, 0.25), None);
        assert_eq!(spec.initial_pose().unwrap(), Pose::new(-1.0, 2.0, 0.25));
        assert_eq!(spec.type_name(), "Robot");
        assert!(spec.style().is_none());
    }
}
