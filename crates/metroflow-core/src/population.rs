//! Vehicle population: spawn decisions, vehicle creation, despawn, and
//! retargeting from observed traffic.
//!
//! Every random draw goes through a caller-supplied RNG so that a seeded
//! engine replays identically. The spawn trial itself is behind the
//! [`SpawnGate`] trait so tests can force or suppress spawns.

use std::collections::HashMap;

use metroflow_types::{
    BoundingBox, Coordinates, DriverProfile, TrafficFlowData, Vehicle, VehicleClass, VehicleId,
};
use rand::{Rng, RngCore};

use crate::config::{AreaConfig, ProfileWeights};
use crate::geo::{self, GeoError};

/// Cruising speed of a normal driver before profile scaling, km/h.
pub const BASE_SPEED_KMH: f64 = 50.0;

/// Class distribution for randomly spawned vehicles. Emergency vehicles
/// are never spawned at random.
const CLASS_WEIGHTS: [(VehicleClass, f64); 4] = [
    (VehicleClass::Car, 0.75),
    (VehicleClass::Truck, 0.10),
    (VehicleClass::Motorcycle, 0.10),
    (VehicleClass::Bus, 0.05),
];

/// Spawn rate when observed traffic is completely free-flowing.
const MIN_FLOW_SPAWN_RATE: f64 = 0.3;

/// Additional spawn rate at full standstill.
const FLOW_SPAWN_RATE_SPAN: f64 = 0.7;

/// Errors raised while creating a vehicle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PopulationError {
    /// The computed spawn position is not a valid coordinate.
    #[error("invalid spawn position: {0}")]
    InvalidSpawnPosition(#[from] GeoError),
}

/// Decides whether a spawn trial succeeds.
pub trait SpawnGate: Send {
    /// Run one trial with success `probability`.
    fn should_spawn(&mut self, probability: f64, rng: &mut dyn RngCore) -> bool;
}

/// Bernoulli trial against the engine RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct BernoulliGate;

impl SpawnGate for BernoulliGate {
    fn should_spawn(&mut self, probability: f64, rng: &mut dyn RngCore) -> bool {
        if probability.is_nan() {
            return false;
        }
        rng.random_bool(probability.clamp(0.0, 1.0))
    }
}

/// Every trial succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSpawn;

impl SpawnGate for AlwaysSpawn {
    fn should_spawn(&mut self, _probability: f64, _rng: &mut dyn RngCore) -> bool {
        true
    }
}

/// No trial ever succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSpawn;

impl SpawnGate for NeverSpawn {
    fn should_spawn(&mut self, _probability: f64, _rng: &mut dyn RngCore) -> bool {
        false
    }
}

/// Where a new vehicle appears and which way it faces.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnPoint {
    /// Initial position.
    pub position: Coordinates,
    /// Initial heading, degrees.
    pub heading: f64,
    /// Segment the vehicle starts on, for segment spawns.
    pub segment_id: Option<String>,
}

/// Draw a driver profile from the weight table.
///
/// Weights need not sum to 1; the draw is proportional to them.
pub fn select_profile(rng: &mut dyn RngCore, weights: &ProfileWeights) -> DriverProfile {
    let total = weights.total();
    if !total.is_finite() || total <= 0.0 {
        return DriverProfile::Normal;
    }
    let draw = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for profile in DriverProfile::ALL {
        cumulative += weights.weight(profile);
        if draw < cumulative {
            return profile;
        }
    }
    // Rounding left `draw` at the very top of the range.
    DriverProfile::ALL
        .iter()
        .rev()
        .copied()
        .find(|p| weights.weight(*p) > 0.0)
        .unwrap_or(DriverProfile::Normal)
}

/// Draw a vehicle class from the fixed class distribution.
pub fn select_class(rng: &mut dyn RngCore) -> VehicleClass {
    let draw = rng.random::<f64>();
    let mut cumulative = 0.0;
    for (class, weight) in CLASS_WEIGHTS {
        cumulative += weight;
        if draw < cumulative {
            return class;
        }
    }
    VehicleClass::Car
}

/// Pick a spawn point.
///
/// Prefers the first coordinate of a random observed segment with usable
/// geometry, facing along the segment. Otherwise picks one of the four
/// edges around the reference center with uniform jitter along it.
pub fn spawn_point(
    rng: &mut dyn RngCore,
    flow: Option<&TrafficFlowData>,
    area: &AreaConfig,
) -> Result<SpawnPoint, PopulationError> {
    if let Some(point) = flow.and_then(|data| segment_spawn_point(rng, data)) {
        return Ok(point);
    }

    let center = area.center;
    let offset = area.spawn_offset;
    let jitter = rng.random_range(-offset..=offset);
    let position = match rng.random_range(0..4_u8) {
        0 => Coordinates::new(center.lat + offset, center.lng + jitter),
        1 => Coordinates::new(center.lat - offset, center.lng + jitter),
        2 => Coordinates::new(center.lat + jitter, center.lng + offset),
        _ => Coordinates::new(center.lat + jitter, center.lng - offset),
    };
    geo::validate_coordinates(position, "spawn position")?;

    Ok(SpawnPoint {
        position,
        heading: rng.random_range(0.0..360.0),
        segment_id: None,
    })
}

fn segment_spawn_point(rng: &mut dyn RngCore, flow: &TrafficFlowData) -> Option<SpawnPoint> {
    let usable: Vec<_> = flow
        .segments
        .iter()
        .filter(|s| {
            s.coordinates
                .first()
                .is_some_and(|c| geo::validate_coordinates(*c, "segment").is_ok())
        })
        .collect();
    if usable.is_empty() {
        return None;
    }
    let segment = usable.get(rng.random_range(0..usable.len()))?;
    let mut points = segment.coordinates.iter();
    let start = *points.next()?;
    let heading = match points.next() {
        Some(next) => geo::bearing_deg(start, *next),
        None => rng.random_range(0.0..360.0),
    };
    Some(SpawnPoint {
        position: start,
        heading,
        segment_id: Some(segment.id.clone()),
    })
}

/// Create a vehicle at rest with a random profile, class, and spawn point.
pub fn create_vehicle(
    rng: &mut dyn RngCore,
    weights: &ProfileWeights,
    flow: Option<&TrafficFlowData>,
    area: &AreaConfig,
) -> Result<Vehicle, PopulationError> {
    let driver_profile = select_profile(rng, weights);
    let vehicle_class = select_class(rng);
    let spawn = spawn_point(rng, flow, area)?;
    let cruise_speed = BASE_SPEED_KMH * driver_profile.speed_multiplier();

    Ok(Vehicle {
        id: VehicleId::new(),
        vehicle_class,
        driver_profile,
        position: spawn.position,
        heading: geo::normalize_heading(spawn.heading),
        current_speed: 0.0,
        target_speed: cruise_speed,
        cruise_speed,
        current_segment_id: spawn.segment_id,
        waiting_at_light: false,
        held_by: None,
        wait_time_seconds: 0.0,
    })
}

/// Remove vehicles outside `bounds` grown by `margin`. Returns how many left.
///
/// Without bounds nothing is removed.
pub fn despawn(vehicles: &mut Vec<Vehicle>, bounds: Option<BoundingBox>, margin: f64) -> usize {
    let Some(bounds) = bounds else {
        return 0;
    };
    let limit = bounds.expanded(margin);
    let before = vehicles.len();
    vehicles.retain(|v| limit.contains(v.position));
    before.saturating_sub(vehicles.len())
}

/// Spawn rate implied by an observed average speed ratio.
///
/// Heavier congestion means more vehicles entering the area.
pub fn spawn_rate_for_flow(average_speed_ratio: f64) -> f64 {
    let ratio = if average_speed_ratio.is_finite() {
        average_speed_ratio.clamp(0.0, 1.0)
    } else {
        1.0
    };
    (1.0 - ratio).mul_add(FLOW_SPAWN_RATE_SPAN, MIN_FLOW_SPAWN_RATE)
}

/// Point vehicles on an observed segment at that segment's current speed,
/// spread by `variance`. Returns how many vehicles were retargeted.
pub fn retarget(
    vehicles: &mut [Vehicle],
    flow: &TrafficFlowData,
    variance: f64,
    rng: &mut dyn RngCore,
) -> usize {
    let speeds: HashMap<&str, f64> = flow
        .segments
        .iter()
        .filter(|s| s.current_speed.is_finite())
        .map(|s| (s.id.as_str(), s.current_speed.max(0.0)))
        .collect();

    let mut retargeted = 0_usize;
    for vehicle in vehicles.iter_mut() {
        let Some(speed) = vehicle
            .current_segment_id
            .as_deref()
            .and_then(|id| speeds.get(id))
        else {
            continue;
        };
        let spread = if variance > 0.0 {
            rng.random_range(-variance..=variance)
        } else {
            0.0
        };
        vehicle.cruise_speed = (speed * (1.0 + spread)).max(0.0);
        vehicle.target_speed = vehicle.cruise_speed;
        retargeted = retargeted.saturating_add(1);
    }
    retargeted
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use chrono::Utc;
    use metroflow_types::{CongestionLevel, RoadSegment};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn segment(id: &str, coords: Vec<Coordinates>, speed: f64) -> RoadSegment {
        RoadSegment {
            id: id.to_owned(),
            name: None,
            coordinates: coords,
            current_speed: speed,
            free_flow_speed: 50.0,
            current_travel_time: 60,
            free_flow_travel_time: 60,
            congestion_level: CongestionLevel::from_speed_ratio(speed / 50.0),
            delay_seconds: 0,
            speed_ratio: speed / 50.0,
            road_type: None,
            length_meters: None,
        }
    }

    fn flow(segments: Vec<RoadSegment>) -> TrafficFlowData {
        TrafficFlowData::from_segments(
            segments,
            BoundingBox {
                north: 40.8,
                south: 40.6,
                east: -73.9,
                west: -74.1,
            },
            Utc::now(),
            "test",
        )
    }

    #[test]
    fn profile_draw_follows_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        let only_learners = ProfileWeights {
            aggressive: 0.0,
            normal: 0.0,
            cautious: 0.0,
            learner: 1.0,
        };
        for _ in 0..50 {
            assert_eq!(select_profile(&mut rng, &only_learners), DriverProfile::Learner);
        }
    }

    #[test]
    fn profile_draw_covers_every_positive_weight() {
        let mut rng = StdRng::seed_from_u64(2);
        let weights = ProfileWeights::default();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..2000 {
            seen.insert(select_profile(&mut rng, &weights));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn random_spawns_are_never_emergency_vehicles() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            assert_ne!(select_class(&mut rng), VehicleClass::Emergency);
        }
    }

    #[test]
    fn fallback_spawn_lies_on_an_edge() {
        let mut rng = StdRng::seed_from_u64(4);
        let area = AreaConfig::default();
        for _ in 0..100 {
            let point = spawn_point(&mut rng, None, &area).unwrap();
            let dlat = (point.position.lat - area.center.lat).abs();
            let dlng = (point.position.lng - area.center.lng).abs();
            let on_lat_edge = (dlat - area.spawn_offset).abs() < 1e-9 && dlng <= area.spawn_offset + 1e-9;
            let on_lng_edge = (dlng - area.spawn_offset).abs() < 1e-9 && dlat <= area.spawn_offset + 1e-9;
            assert!(on_lat_edge || on_lng_edge, "{point:?}");
            assert!(point.segment_id.is_none());
        }
    }

    #[test]
    fn segment_spawn_uses_first_coordinate_and_bearing() {
        let mut rng = StdRng::seed_from_u64(5);
        let start = Coordinates::new(40.70, -74.00);
        let data = flow(vec![
            segment("empty", Vec::new(), 30.0),
            segment("north", vec![start, Coordinates::new(40.71, -74.00)], 30.0),
        ]);
        for _ in 0..20 {
            let point = spawn_point(&mut rng, Some(&data), &AreaConfig::default()).unwrap();
            assert_eq!(point.position, start);
            assert_eq!(point.segment_id.as_deref(), Some("north"));
            assert!(point.heading < 0.01 || point.heading > 359.99);
        }
    }

    #[test]
    fn new_vehicle_starts_at_rest_with_profile_speed() {
        let mut rng = StdRng::seed_from_u64(6);
        let weights = ProfileWeights {
            aggressive: 1.0,
            normal: 0.0,
            cautious: 0.0,
            learner: 0.0,
        };
        let v = create_vehicle(&mut rng, &weights, None, &AreaConfig::default()).unwrap();
        assert_eq!(v.current_speed, 0.0);
        assert!((v.target_speed - 60.0).abs() < 1e-9);
        assert_eq!(v.cruise_speed, v.target_speed);
        assert!(!v.waiting_at_light);
        assert!((0.0..360.0).contains(&v.heading));
    }

    #[test]
    fn spawn_near_pole_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let area = AreaConfig {
            center: Coordinates::new(89.999, 0.0),
            ..AreaConfig::default()
        };
        let results: Vec<_> = (0..50).map(|_| spawn_point(&mut rng, None, &area)).collect();
        assert!(results.iter().any(Result::is_err));
    }

    #[test]
    fn despawn_uses_margin_and_needs_bounds() {
        let mut rng = StdRng::seed_from_u64(8);
        let area = AreaConfig::default();
        let mut vehicles: Vec<_> = (0..3)
            .map(|_| create_vehicle(&mut rng, &ProfileWeights::default(), None, &area).unwrap())
            .collect();
        vehicles[0].position = Coordinates::new(40.0, -74.0);
        vehicles[1].position = Coordinates::new(40.7128, -74.0060);
        vehicles[2].position = Coordinates::new(40.7128 + 0.012, -74.0060);

        assert_eq!(despawn(&mut vehicles, None, 0.005), 0);
        assert_eq!(vehicles.len(), 3);

        let bounds = BoundingBox {
            north: 40.7228,
            south: 40.7028,
            east: -73.9960,
            west: -74.0160,
        };
        assert_eq!(despawn(&mut vehicles, Some(bounds), 0.005), 1);
        assert_eq!(vehicles.len(), 2);
    }

    #[test]
    fn congested_flow_raises_spawn_rate() {
        assert!((spawn_rate_for_flow(1.0) - 0.3).abs() < 1e-12);
        assert!((spawn_rate_for_flow(0.0) - 1.0).abs() < 1e-12);
        assert!((spawn_rate_for_flow(0.5) - 0.65).abs() < 1e-12);
        assert!((spawn_rate_for_flow(f64::NAN) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn retarget_only_touches_matching_segments() {
        let mut rng = StdRng::seed_from_u64(9);
        let area = AreaConfig::default();
        let mut vehicles: Vec<_> = (0..2)
            .map(|_| create_vehicle(&mut rng, &ProfileWeights::default(), None, &area).unwrap())
            .collect();
        vehicles[0].current_segment_id = Some("a".to_owned());
        let untouched = vehicles[1].cruise_speed;

        let data = flow(vec![segment("a", vec![area.center], 20.0)]);
        assert_eq!(retarget(&mut vehicles, &data, 0.1, &mut rng), 1);
        assert!((18.0..=22.0).contains(&vehicles[0].cruise_speed));
        assert_eq!(vehicles[0].target_speed, vehicles[0].cruise_speed);
        assert_eq!(vehicles[1].cruise_speed, untouched);
    }
}
