//! Traffic control network: intersections and traffic-light phase machines.
//!
//! Each light cycles RED -> GREEN -> YELLOW -> RED on its own timer. A green
//! phase is stretched by up to 50% while more than
//! [`ADAPTIVE_QUEUE_THRESHOLD`] vehicles wait near the owning intersection.
//!
//! # Invariants
//!
//! - `time_in_current_phase` is never negative and is exactly 0 right after
//!   a transition.
//! - Every configured duration is at least one second.

use metroflow_types::{
    Coordinates, Intersection, IntersectionId, LightPhase, TrafficLight, TrafficLightId, Vehicle,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geo::{self, GeoError};

/// Radius around an intersection in which waiting vehicles count toward
/// adaptive green extension and the intersection's average wait, meters.
pub const QUEUE_RADIUS_M: f64 = 50.0;

/// Green is extended only when strictly more vehicles than this are waiting.
pub const ADAPTIVE_QUEUE_THRESHOLD: usize = 5;

/// Extension added per waiting vehicle, as a fraction of the green duration.
const EXTENSION_PER_VEHICLE: f64 = 0.05;

/// Maximum green extension, as a fraction of the green duration.
const MAX_EXTENSION: f64 = 0.5;

/// Tolerance for accumulated floating-point phase time, seconds.
const PHASE_EPSILON: f64 = 1e-6;

/// Errors raised by traffic-control requests.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    /// A phase duration of zero seconds was requested.
    #[error("{phase:?} duration must be at least 1 second")]
    ZeroDuration {
        /// The phase with the rejected duration.
        phase: LightPhase,
    },

    /// The requested location is not a valid coordinate.
    #[error("invalid location: {0}")]
    Location(#[from] GeoError),

    /// No intersection has the given ID.
    #[error("intersection {0} not found")]
    UnknownIntersection(IntersectionId),
}

/// Phase durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    /// Green phase length.
    #[serde(default = "default_green")]
    pub green: u32,
    /// Yellow phase length.
    #[serde(default = "default_yellow")]
    pub yellow: u32,
    /// Red phase length.
    #[serde(default = "default_red")]
    pub red: u32,
}

impl PhaseDurations {
    fn validate(self) -> Result<Self, SignalError> {
        for (phase, value) in [
            (LightPhase::Green, self.green),
            (LightPhase::Yellow, self.yellow),
            (LightPhase::Red, self.red),
        ] {
            if value == 0 {
                return Err(SignalError::ZeroDuration { phase });
            }
        }
        Ok(self)
    }
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            green: default_green(),
            yellow: default_yellow(),
            red: default_red(),
        }
    }
}

/// Request to create an intersection with one light at its center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionRequest {
    /// Center of the intersection.
    pub location: Coordinates,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Durations for the initial light.
    #[serde(flatten)]
    pub durations: PhaseDurations,
    /// Segments meeting at the intersection; also the light's controlled set.
    #[serde(default)]
    pub connected_segment_ids: Vec<String>,
}

/// Request to attach an extra light to an existing intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightRequest {
    /// Light position. Defaults to the intersection's location.
    #[serde(default)]
    pub location: Option<Coordinates>,
    /// Phase durations.
    #[serde(flatten)]
    pub durations: PhaseDurations,
    /// Phase the light starts in.
    #[serde(default = "default_initial_phase")]
    pub initial_phase: LightPhase,
    /// Segments this light governs. Empty makes it the catch-all for
    /// approaches no other light claims; only the first catch-all counts.
    #[serde(default)]
    pub controlled_segment_ids: Vec<String>,
}

/// Partial timing update; `None` leaves a duration unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingAdjustment {
    /// New green duration.
    pub green: Option<u32>,
    /// New yellow duration.
    pub yellow: Option<u32>,
    /// New red duration.
    pub red: Option<u32>,
}

/// A phase change that happened during a light update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    /// The light that changed.
    pub light_id: TrafficLightId,
    /// Phase it left.
    pub from: LightPhase,
    /// Phase it entered.
    pub to: LightPhase,
}

fn new_light(
    location: Coordinates,
    durations: PhaseDurations,
    initial_phase: LightPhase,
    controlled_segment_ids: Vec<String>,
) -> TrafficLight {
    TrafficLight {
        id: TrafficLightId::new(),
        location,
        current_phase: initial_phase,
        green_duration: durations.green,
        yellow_duration: durations.yellow,
        red_duration: durations.red,
        time_in_current_phase: 0.0,
        controlled_segment_ids,
    }
}

/// Build an intersection owning one RED light at its location.
pub fn build_intersection(request: IntersectionRequest) -> Result<Intersection, SignalError> {
    geo::validate_coordinates(request.location, "intersection location")?;
    let durations = request.durations.validate()?;
    let light = new_light(
        request.location,
        durations,
        LightPhase::Red,
        request.connected_segment_ids.clone(),
    );
    Ok(Intersection {
        id: IntersectionId::new(),
        location: request.location,
        name: request.name,
        traffic_lights: vec![light],
        connected_segment_ids: request.connected_segment_ids,
        average_wait_time: 0.0,
    })
}

/// Attach a new light to the intersection with `intersection_id`.
pub fn add_light(
    intersections: &mut [Intersection],
    intersection_id: IntersectionId,
    request: LightRequest,
) -> Result<TrafficLightId, SignalError> {
    let durations = request.durations.validate()?;
    if let Some(location) = request.location {
        geo::validate_coordinates(location, "light location")?;
    }
    let intersection = intersections
        .iter_mut()
        .find(|i| i.id == intersection_id)
        .ok_or(SignalError::UnknownIntersection(intersection_id))?;
    let light = new_light(
        request.location.unwrap_or(intersection.location),
        durations,
        request.initial_phase,
        request.controlled_segment_ids,
    );
    let id = light.id;
    intersection.traffic_lights.push(light);
    Ok(id)
}

/// Number of halted vehicles within [`QUEUE_RADIUS_M`] of `location`.
pub fn waiting_near(location: Coordinates, vehicles: &[Vehicle]) -> usize {
    vehicles
        .iter()
        .filter(|v| v.waiting_at_light && geo::distance_m(v.position, location) <= QUEUE_RADIUS_M)
        .count()
}

/// Duration the light must spend in its current phase before switching.
pub fn effective_duration(light: &TrafficLight, waiting_count: usize) -> f64 {
    let base = f64::from(light.duration_of(light.current_phase));
    if light.current_phase == LightPhase::Green && waiting_count > ADAPTIVE_QUEUE_THRESHOLD {
        let extension = (waiting_count as f64 * EXTENSION_PER_VEHICLE).min(MAX_EXTENSION);
        base * (1.0 + extension)
    } else {
        base
    }
}

/// Advance one light by `dt` seconds. Returns the phase change, if any.
pub fn advance_light(light: &mut TrafficLight, dt: f64, waiting_count: usize) -> Option<PhaseChange> {
    light.time_in_current_phase = (light.time_in_current_phase + dt.max(0.0)).max(0.0);
    if light.time_in_current_phase + PHASE_EPSILON < effective_duration(light, waiting_count) {
        return None;
    }
    let from = light.current_phase;
    light.current_phase = from.next();
    light.time_in_current_phase = 0.0;
    Some(PhaseChange {
        light_id: light.id,
        from,
        to: light.current_phase,
    })
}

/// Advance every light in the network by `dt` seconds.
pub fn update_lights(intersections: &mut [Intersection], vehicles: &[Vehicle], dt: f64) -> Vec<PhaseChange> {
    let mut changes = Vec::new();
    for intersection in intersections.iter_mut() {
        let waiting = waiting_near(intersection.location, vehicles);
        for light in &mut intersection.traffic_lights {
            if let Some(change) = advance_light(light, dt, waiting) {
                debug!(
                    light_id = %change.light_id,
                    from = ?change.from,
                    to = ?change.to,
                    waiting,
                    "light phase change"
                );
                changes.push(change);
            }
        }
    }
    changes
}

/// Overwrite the supplied durations of the light with `light_id`.
///
/// Returns `Ok(false)` when no light has that ID; nothing is modified.
/// The elapsed time of the current phase is kept, so a shortened phase may
/// end on the next update.
pub fn adjust_timing(
    intersections: &mut [Intersection],
    light_id: TrafficLightId,
    adjustment: TimingAdjustment,
) -> Result<bool, SignalError> {
    for (phase, value) in [
        (LightPhase::Green, adjustment.green),
        (LightPhase::Yellow, adjustment.yellow),
        (LightPhase::Red, adjustment.red),
    ] {
        if value == Some(0) {
            return Err(SignalError::ZeroDuration { phase });
        }
    }

    let Some(light) = intersections
        .iter_mut()
        .flat_map(|i| i.traffic_lights.iter_mut())
        .find(|l| l.id == light_id)
    else {
        return Ok(false);
    };
    if let Some(green) = adjustment.green {
        light.green_duration = green;
    }
    if let Some(yellow) = adjustment.yellow {
        light.yellow_duration = yellow;
    }
    if let Some(red) = adjustment.red {
        light.red_duration = red;
    }
    Ok(true)
}

/// Look up a light anywhere in the network.
pub fn find_light(intersections: &[Intersection], light_id: TrafficLightId) -> Option<&TrafficLight> {
    intersections
        .iter()
        .flat_map(|i| i.traffic_lights.iter())
        .find(|l| l.id == light_id)
}

/// The light at `intersection` that governs a vehicle on `segment`.
///
/// A light listing the segment explicitly wins. Otherwise the first light
/// with an empty controlled set governs. A vehicle answers to at most one
/// light per intersection, so the light that halts it is the one that
/// releases it.
pub fn governing_light<'a>(
    intersection: &'a Intersection,
    segment: Option<&str>,
) -> Option<&'a TrafficLight> {
    let lights = &intersection.traffic_lights;
    lights
        .iter()
        .find(|l| !l.controlled_segment_ids.is_empty() && l.controls(segment))
        .or_else(|| lights.iter().find(|l| l.controlled_segment_ids.is_empty()))
}

/// The first halting light that governs `vehicle` at an intersection ahead
/// of it and within `horizon_m` meters.
pub fn halting_light(
    vehicle: &Vehicle,
    intersections: &[Intersection],
    horizon_m: f64,
) -> Option<TrafficLightId> {
    let segment = vehicle.current_segment_id.as_deref();
    intersections
        .iter()
        .filter(|i| geo::distance_m(vehicle.position, i.location) < horizon_m)
        .filter(|i| geo::forward_projection(vehicle.position, vehicle.heading, i.location) > 0.0)
        .filter_map(|i| governing_light(i, segment))
        .find(|l| l.current_phase.halts_traffic())
        .map(|l| l.id)
}

/// Whether a waiting vehicle may move again.
///
/// A vehicle held by a specific light is released when that light is GREEN
/// or no longer exists. A vehicle with no recorded light is always released.
pub fn is_released(vehicle: &Vehicle, intersections: &[Intersection]) -> bool {
    vehicle.held_by.is_none_or(|id| {
        find_light(intersections, id).is_none_or(|l| l.current_phase == LightPhase::Green)
    })
}

const fn default_green() -> u32 {
    30
}

const fn default_yellow() -> u32 {
    5
}

const fn default_red() -> u32 {
    30
}

const fn default_initial_phase() -> LightPhase {
    LightPhase::Red
}
