use std::cell::Cell;
use std::rc::Rc;

use glam::DVec2;
use kinetica_kernel::{
    Agent, AgentType, DEFAULT_VR, KernelError, Process, SpecError, WorldCtx, WorldRef,
};
use serde_json::{Value, json};

/// Style fill a wanderer switches to after bumping into a block.
pub const BUMP_FILL: &str = "orange";

/// Cruise speed toward the current waypoint.
const CRUISE: f64 = 4.0;
/// Speed while the range sensor sees something close ahead.
const CAUTIOUS: f64 = 1.0;
const CAUTION_DISTANCE: f64 = 3.0;
const ARRIVE_RADIUS: f64 = 0.5;
/// Half the side of the default patrol square.
const PATROL: f64 = 10.0;

/// Patrols a loop of waypoints, slowing when its range sensor sees an
/// obstacle and skipping to the next waypoint after bumping into a block.
///
/// Waypoints come from a top-level `waypoints: [{x, y}, ..]` entry in the
/// specification; without one the wanderer patrols a square around its start.
#[derive(Debug)]
pub struct Wanderer {
    waypoints: Vec<DVec2>,
    next: usize,
    bumps: Rc<Cell<u32>>,
    seen_bumps: u32,
}

impl Wanderer {
    pub fn target(&self) -> DVec2 {
        self.waypoints[self.next % self.waypoints.len()]
    }

    fn advance(&mut self) {
        self.next = (self.next + 1) % self.waypoints.len();
    }
}

fn waypoints(doc: &Value) -> Result<Option<Vec<DVec2>>, SpecError> {
    let Some(raw) = doc.get("waypoints") else {
        return Ok(None);
    };
    let invalid = |reason: &str| SpecError::Invalid {
        field: "waypoints",
        reason: reason.into(),
    };
    let list = raw.as_array().ok_or_else(|| invalid("expected a list"))?;
    let points = list
        .iter()
        .map(|p| {
            let x = p.get("x").and_then(Value::as_f64);
            let y = p.get("y").and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(DVec2::new(x, y)),
                _ => Err(invalid("each waypoint needs finite x and y")),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    if points.is_empty() {
        return Err(invalid("expected at least one waypoint"));
    }
    Ok(Some(points))
}

impl AgentType for Wanderer {
    fn create(agent: &mut Agent, _world: WorldRef<'_>) -> Result<Self, KernelError> {
        let start = agent.position();
        let waypoints = waypoints(agent.specification().document())?.unwrap_or_else(|| {
            vec![
                start + DVec2::new(PATROL, 0.0),
                start + DVec2::new(PATROL, PATROL),
                start + DVec2::new(0.0, PATROL),
                start,
            ]
        });

        let bumps = Rc::new(Cell::new(0));
        let counter = bumps.clone();
        agent.notice_collisions_with("Block", move |me, event, _ctx| {
            counter.set(counter.get() + 1);
            tracing::debug!(agent = %me.id(), block = %event.other, "bumped into block");
            let mut style = me.style().clone();
            match style.as_object_mut() {
                Some(map) => {
                    map.insert("fill".into(), json!(BUMP_FILL));
                }
                None => style = json!({ "fill": BUMP_FILL }),
            }
            me.set_style(style);
        });

        Ok(Self {
            waypoints,
            next: 0,
            bumps,
            seen_bumps: 0,
        })
    }
}

impl Process for Wanderer {
    fn name(&self) -> &str {
        "wanderer"
    }

    fn update(&mut self, agent: &mut Agent, _ctx: &mut WorldCtx<'_>) -> Result<(), KernelError> {
        let bumps = self.bumps.get();
        if bumps != self.seen_bumps {
            self.seen_bumps = bumps;
            self.advance();
        }
        if agent.position().distance(self.target()) < ARRIVE_RADIUS {
            self.advance();
        }

        let blocked = agent.sensor_count() > 0
            && agent.sensor_reflection_type(0)? != "none"
            && agent.sensor_value(0)? < CAUTION_DISTANCE;
        let speed = if blocked { CAUTIOUS } else { CRUISE };
        let target = self.target();
        agent.move_toward(target.x, target.y, speed, DEFAULT_VR);
        Ok(())
    }
}
