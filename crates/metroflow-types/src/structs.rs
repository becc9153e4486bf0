//! Core entity structs for the Metroflow simulation.
//!
//! Covers geographic primitives, the simulated entities (vehicles, traffic
//! lights, intersections, incidents), the external traffic-flow snapshot,
//! and the per-tick snapshot and analytics payloads produced by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{CongestionLevel, DriverProfile, IncidentCategory, LightPhase, VehicleClass};
use crate::ids::{IncidentId, IntersectionId, TrafficLightId, VehicleId};

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// A WGS-84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Coordinates {
    /// Latitude, `[-90, 90]`.
    pub lat: f64,
    /// Longitude, `[-180, 180]`.
    pub lng: f64,
}

impl Coordinates {
    /// Construct a coordinate pair without validation.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Return a copy clamped into the valid latitude/longitude ranges.
    pub fn clamped(self) -> Self {
        Self {
            lat: self.lat.clamp(-90.0, 90.0),
            lng: self.lng.clamp(-180.0, 180.0),
        }
    }

    /// Whether both components are finite numbers.
    pub fn is_finite(self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Axis-aligned geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BoundingBox {
    /// Northern latitude edge.
    pub north: f64,
    /// Southern latitude edge.
    pub south: f64,
    /// Eastern longitude edge.
    pub east: f64,
    /// Western longitude edge.
    pub west: f64,
}

impl BoundingBox {
    /// Return a copy grown by `margin` degrees on every side.
    pub fn expanded(self, margin: f64) -> Self {
        Self {
            north: self.north + margin,
            south: self.south - margin,
            east: self.east + margin,
            west: self.west - margin,
        }
    }

    /// Whether `point` lies inside the box (edges inclusive).
    pub fn contains(&self, point: Coordinates) -> bool {
        (self.south..=self.north).contains(&point.lat)
            && (self.west..=self.east).contains(&point.lng)
    }
}

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

/// A vehicle moving through the simulated area.
///
/// Speeds are in km/h, heading in degrees clockwise from north.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Vehicle {
    /// Unique identifier.
    pub id: VehicleId,
    /// Physical class.
    pub vehicle_class: VehicleClass,
    /// Driver behavior profile.
    pub driver_profile: DriverProfile,
    /// Current position.
    pub position: Coordinates,
    /// Heading in degrees, `[0, 360)`.
    pub heading: f64,
    /// Current speed, km/h, never negative.
    pub current_speed: f64,
    /// Speed the vehicle is converging on this tick, after caps.
    pub target_speed: f64,
    /// Uncapped desired speed; `target_speed` is restored to it every tick.
    pub cruise_speed: f64,
    /// Road segment the vehicle is travelling on, if known.
    pub current_segment_id: Option<String>,
    /// Whether the vehicle is halted at a light.
    pub waiting_at_light: bool,
    /// The light that halted the vehicle, while waiting.
    pub held_by: Option<TrafficLightId>,
    /// Total seconds spent waiting at lights.
    pub wait_time_seconds: f64,
}

// ---------------------------------------------------------------------------
// Traffic control
// ---------------------------------------------------------------------------

/// A traffic light cycling through red, green and yellow phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrafficLight {
    /// Unique identifier.
    pub id: TrafficLightId,
    /// Light position (normally the owning intersection's location).
    pub location: Coordinates,
    /// Phase currently shown.
    pub current_phase: LightPhase,
    /// Green phase length, seconds.
    pub green_duration: u32,
    /// Yellow phase length, seconds.
    pub yellow_duration: u32,
    /// Red phase length, seconds.
    pub red_duration: u32,
    /// Seconds elapsed in the current phase.
    pub time_in_current_phase: f64,
    /// Segments governed by this light. Empty means every approach.
    pub controlled_segment_ids: Vec<String>,
}

impl TrafficLight {
    /// Configured duration of `phase`, in seconds.
    pub const fn duration_of(&self, phase: LightPhase) -> u32 {
        match phase {
            LightPhase::Red => self.red_duration,
            LightPhase::Green => self.green_duration,
            LightPhase::Yellow => self.yellow_duration,
        }
    }

    /// Whether this light governs a vehicle on `segment`.
    pub fn controls(&self, segment: Option<&str>) -> bool {
        if self.controlled_segment_ids.is_empty() {
            return true;
        }
        segment.is_some_and(|s| self.controlled_segment_ids.iter().any(|c| c == s))
    }
}

/// A signal-controlled intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Intersection {
    /// Unique identifier.
    pub id: IntersectionId,
    /// Center of the intersection.
    pub location: Coordinates,
    /// Human-readable name.
    pub name: Option<String>,
    /// Lights owned by this intersection.
    pub traffic_lights: Vec<TrafficLight>,
    /// Segments meeting at this intersection.
    pub connected_segment_ids: Vec<String>,
    /// Mean wait of vehicles currently halted within 50 m, seconds.
    pub average_wait_time: f64,
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// A traffic incident slowing vehicles around its location.
///
/// `end_time` is advisory. Incidents stay active until removed by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Incident {
    /// Unique identifier.
    pub id: IncidentId,
    /// Incident category.
    pub category: IncidentCategory,
    /// Where the incident is.
    pub location: Coordinates,
    /// Free-form description.
    pub description: Option<String>,
    /// Severity, 1 (minor) to 5 (major).
    pub severity: u8,
    /// When the incident was registered.
    pub start_time: DateTime<Utc>,
    /// Expected end, if known.
    pub end_time: Option<DateTime<Utc>>,
    /// Segments reported as affected by the data source.
    pub affected_segments: Vec<String>,
}

// ---------------------------------------------------------------------------
// External traffic-flow snapshot
// ---------------------------------------------------------------------------

/// Observed traffic on one road segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RoadSegment {
    /// Provider-assigned segment ID.
    pub id: String,
    /// Street name, if known.
    pub name: Option<String>,
    /// Polyline geometry, first point is the segment start.
    pub coordinates: Vec<Coordinates>,
    /// Observed speed, km/h.
    pub current_speed: f64,
    /// Uncongested speed, km/h.
    pub free_flow_speed: f64,
    /// Observed traversal time, seconds.
    pub current_travel_time: u32,
    /// Uncongested traversal time, seconds.
    pub free_flow_travel_time: u32,
    /// Congestion classification.
    pub congestion_level: CongestionLevel,
    /// Delay relative to free flow, seconds.
    pub delay_seconds: u32,
    /// `current_speed / free_flow_speed`.
    pub speed_ratio: f64,
    /// Road category reported by the provider.
    pub road_type: Option<String>,
    /// Segment length in meters.
    pub length_meters: Option<f64>,
}

/// A complete traffic-flow observation for an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrafficFlowData {
    /// Observed segments.
    pub segments: Vec<RoadSegment>,
    /// Area the observation covers.
    pub bounding_box: BoundingBox,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Data provider name.
    pub source: String,
    /// Mean speed ratio across segments.
    pub average_speed_ratio: f64,
    /// Number of segments.
    pub total_segments: u32,
    /// Number of heavy or severe segments.
    pub congested_segments: u32,
}

impl TrafficFlowData {
    /// Build a snapshot from raw segments, computing the aggregate fields.
    ///
    /// An empty segment list yields a speed ratio of 1.0 (free flow).
    pub fn from_segments(
        segments: Vec<RoadSegment>,
        bounding_box: BoundingBox,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        let total = segments.len();
        let average_speed_ratio = if total == 0 {
            1.0
        } else {
            segments.iter().map(|s| s.speed_ratio).sum::<f64>() / total as f64
        };
        let congested = segments
            .iter()
            .filter(|s| s.congestion_level.is_congested())
            .count();
        Self {
            segments,
            bounding_box,
            timestamp,
            source: source.into(),
            average_speed_ratio,
            total_segments: u32::try_from(total).unwrap_or(u32::MAX),
            congested_segments: u32::try_from(congested).unwrap_or(u32::MAX),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine output
// ---------------------------------------------------------------------------

/// Aggregate statistics recomputed every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SimulationMetrics {
    /// Active vehicle count.
    pub total_vehicles: u32,
    /// Mean current speed of active vehicles, km/h (0 when none).
    pub average_speed: f64,
    /// Sum of accumulated wait time over active vehicles, seconds.
    pub total_wait_time: f64,
    /// Vehicles that have left the simulated area. Never decreases.
    pub vehicles_completed: u64,
}

/// Full world state published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SimulationSnapshot {
    /// Tick number (1 for the first tick).
    pub tick: u64,
    /// Wall-clock time of the tick, non-decreasing.
    pub timestamp: DateTime<Utc>,
    /// Active vehicles.
    pub vehicles: Vec<Vehicle>,
    /// All lights, flattened across intersections.
    pub traffic_lights: Vec<TrafficLight>,
    /// All intersections, including their lights.
    pub intersections: Vec<Intersection>,
    /// Active incidents.
    pub active_incidents: Vec<Incident>,
    /// Aggregate statistics.
    pub metrics: SimulationMetrics,
}

/// Hourly emissions and fuel estimate for the current traffic state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EmissionsEstimate {
    /// Total CO2, kg per hour.
    pub co2_kg_per_hour: f64,
    /// Total NOx, grams per hour.
    pub nox_grams_per_hour: f64,
    /// Total fuel, liters per hour.
    pub fuel_liters_per_hour: f64,
    /// CO2 per vehicle, kg per hour.
    pub avg_co2_per_vehicle: f64,
    /// Fuel per vehicle, liters per hour.
    pub avg_fuel_per_vehicle: f64,
}

/// Dashboard-level traffic indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrafficMetrics {
    /// Time of the underlying tick.
    pub timestamp: DateTime<Utc>,
    /// Mean speed, km/h.
    pub average_speed: f64,
    /// Active vehicles per simulated minute.
    pub vehicles_per_minute: f64,
    /// 0 (free flowing) to 1 (standstill).
    pub congestion_index: f64,
    /// Mean accumulated wait per active vehicle, seconds.
    pub average_wait_time: f64,
    /// Active vehicle count.
    pub total_active_vehicles: u32,
    /// Vehicles currently halted at a light.
    pub vehicles_waiting: u32,
    /// Active incident count.
    pub active_incidents: u32,
    /// Emissions estimate.
    pub emissions: EmissionsEstimate,
}

/// Live indicators for a single intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IntersectionReport {
    /// The intersection, including its lights.
    pub intersection: Intersection,
    /// Vehicles within 100 m.
    pub nearby_vehicles: u32,
    /// Of those, how many are halted.
    pub waiting_vehicles: u32,
    /// Mean wait of halted vehicles within 50 m, seconds.
    pub average_wait_time: f64,
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn segment(id: &str, ratio: f64) -> RoadSegment {
        RoadSegment {
            id: id.to_owned(),
            name: None,
            coordinates: vec![Coordinates::new(40.0, -74.0)],
            current_speed: 50.0 * ratio,
            free_flow_speed: 50.0,
            current_travel_time: 60,
            free_flow_travel_time: 60,
            congestion_level: CongestionLevel::from_speed_ratio(ratio),
            delay_seconds: 0,
            speed_ratio: ratio,
            road_type: None,
            length_meters: None,
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox {
            north: 41.0,
            south: 40.0,
            east: -73.0,
            west: -74.0,
        }
    }

    #[test]
    fn clamped_coordinates_stay_in_range() {
        let c = Coordinates::new(95.0, -200.0).clamped();
        assert_eq!(c.lat, 90.0);
        assert_eq!(c.lng, -180.0);
    }

    #[test]
    fn bounding_box_expansion_and_containment() {
        let b = bbox();
        let outside = Coordinates::new(41.003, -73.5);
        assert!(!b.contains(outside));
        assert!(b.expanded(0.005).contains(outside));
        assert!(b.contains(Coordinates::new(b.south, b.west)));
    }

    #[test]
    fn flow_aggregates_from_segments() {
        let data = TrafficFlowData::from_segments(
            vec![segment("a", 1.0), segment("b", 0.2)],
            bbox(),
            Utc::now(),
            "test",
        );
        assert_eq!(data.total_segments, 2);
        assert_eq!(data.congested_segments, 1);
        assert!((data.average_speed_ratio - 0.6).abs() < 1e-9);
    }

    #[test]
    fn empty_flow_is_free_flowing() {
        let data = TrafficFlowData::from_segments(Vec::new(), bbox(), Utc::now(), "test");
        assert_eq!(data.average_speed_ratio, 1.0);
        assert_eq!(data.total_segments, 0);
    }

    #[test]
    fn light_with_no_segments_controls_everything() {
        let light = TrafficLight {
            id: TrafficLightId::new(),
            location: Coordinates::new(0.0, 0.0),
            current_phase: LightPhase::Red,
            green_duration: 30,
            yellow_duration: 5,
            red_duration: 30,
            time_in_current_phase: 0.0,
            controlled_segment_ids: Vec::new(),
        };
        assert!(light.controls(None));
        assert!(light.controls(Some("seg-1")));

        let scoped = TrafficLight {
            controlled_segment_ids: vec!["seg-1".to_owned()],
            ..light
        };
        assert!(scoped.controls(Some("seg-1")));
        assert!(!scoped.controls(Some("seg-2")));
        assert!(!scoped.controls(None));
        assert_eq!(scoped.duration_of(LightPhase::Yellow), 5);
    }
}
