//! Tick cycle: the ordered phase sequence that advances the simulation.
//!
//! Each tick runs through these phases:
//!
//! 0. **Ingest** -- apply a pending traffic-flow snapshot, if one arrived
//!    since the previous tick (spawn-rate and segment retargeting).
//!
//! 1. **Spawn** -- one spawn trial while below the vehicle limit.
//!
//! 2. **Lights** -- advance every traffic light's phase timer, with
//!    adaptive green extension for long queues.
//!
//! 3. **Vehicles** -- for each vehicle: wait-at-light handling, incident and
//!    following-distance caps, speed convergence, stop-at-light check, and
//!    position integration.
//!
//! 4. **Despawn** -- remove vehicles that left the simulated area and count
//!    them as completed.
//!
//! 5. **Metrics** -- recompute aggregate statistics and intersection waits.
//!
//! Publishing the snapshot is the caller's job (see [`crate::engine`]).
//!
//! A failing phase is logged and skipped; the remaining phases still run.
//! A failing vehicle update evicts only that vehicle. Only a clock failure
//! aborts the tick as a whole.

use std::collections::HashMap;

use metroflow_types::{
    BoundingBox, Incident, Intersection, SimulationMetrics, SimulationSnapshot, TrafficFlowData,
    Vehicle, VehicleId,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::clock::{ClockError, SimClock};
use crate::config::{AreaConfig, EngineConfig, SimulationConfig};
use crate::incidents;
use crate::interaction::{self, Kinematics};
use crate::metrics;
use crate::physics::{self, VehicleError};
use crate::population::{self, PopulationError, SpawnGate};
use crate::signals::{self, PhaseChange};

/// Errors that abort a whole tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Errors that cause a single phase to be skipped.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    /// Vehicle creation failed.
    #[error("spawn failed: {0}")]
    Spawn(#[from] PopulationError),

    /// An aggregate came out as NaN or infinity. Previous metrics are kept.
    #[error("metric {field} is not finite")]
    NonFiniteMetric {
        /// Name of the offending aggregate.
        field: &'static str,
    },
}

/// The tick phases that can fail and be skipped.
///
/// Lights, vehicles, and despawn never fail as a phase; a bad vehicle is
/// evicted on its own instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Vehicle spawn trial.
    Spawn,
    /// Aggregate statistics.
    Metrics,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Spawn => "spawn",
            Self::Metrics => "metrics",
        };
        f.write_str(name)
    }
}

/// A phase that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPhase {
    /// Which phase.
    pub phase: Phase,
    /// Rendered error.
    pub error: String,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The tick number that was executed.
    pub tick: u64,
    /// The vehicle created this tick, if any.
    pub spawned: Option<VehicleId>,
    /// Vehicles evicted because their update failed.
    pub evicted: Vec<VehicleId>,
    /// Vehicles that left the area this tick.
    pub despawned: usize,
    /// Traffic-light phase changes.
    pub phase_changes: Vec<PhaseChange>,
    /// Phases skipped because they failed.
    pub skipped: Vec<SkippedPhase>,
}

impl TickReport {
    /// Record a failed phase and log it.
    pub fn skip(&mut self, phase: Phase, error: &dyn std::error::Error) {
        warn!(tick = self.tick, %phase, error = %error, "phase failed, skipped");
        self.skipped.push(SkippedPhase {
            phase,
            error: error.to_string(),
        });
    }
}

/// The mutable simulation state driven by the tick cycle.
///
/// Owned by the engine and only touched inside a tick or by serialized
/// external calls between ticks.
#[derive(Debug)]
pub struct SimulationState {
    /// Tick counter and timestamp.
    pub clock: SimClock,
    /// Active simulation parameters. `spawn_rate` follows ingested traffic.
    pub config: SimulationConfig,
    /// Spawn reference and despawn settings.
    pub area: AreaConfig,
    /// Active vehicles.
    pub vehicles: Vec<Vehicle>,
    /// Intersections and their lights.
    pub intersections: Vec<Intersection>,
    /// Active incidents.
    pub incidents: Vec<Incident>,
    /// Aggregates from the latest metrics phase.
    pub metrics: SimulationMetrics,
    /// Latest ingested traffic-flow snapshot.
    pub flow: Option<TrafficFlowData>,
    /// Source of every random draw.
    pub rng: StdRng,
}

impl SimulationState {
    /// Create an empty world at tick 0.
    ///
    /// The RNG is seeded from `simulation.seed` when set.
    pub fn new(config: &EngineConfig) -> Self {
        let rng = match config.simulation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            clock: SimClock::new(config.simulation.tick_interval_ms),
            config: config.simulation.clone(),
            area: config.area,
            vehicles: Vec::new(),
            intersections: Vec::new(),
            incidents: Vec::new(),
            metrics: SimulationMetrics::default(),
            flow: None,
            rng,
        }
    }

    /// Despawn bounds: the latest traffic snapshot's area, else the
    /// configured fallback, else none.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.flow
            .as_ref()
            .map(|f| f.bounding_box)
            .or(self.area.bounds)
    }

    /// Full snapshot of the current world.
    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            tick: self.clock.tick(),
            timestamp: self.clock.timestamp(),
            vehicles: self.vehicles.clone(),
            traffic_lights: self
                .intersections
                .iter()
                .flat_map(|i| i.traffic_lights.iter().cloned())
                .collect(),
            intersections: self.intersections.clone(),
            active_incidents: self.incidents.clone(),
            metrics: self.metrics,
        }
    }

    /// Adopt a traffic-flow snapshot: retune the spawn rate from its
    /// congestion and retarget vehicles on its segments.
    pub fn apply_flow(&mut self, flow: TrafficFlowData) {
        self.config.spawn_rate = population::spawn_rate_for_flow(flow.average_speed_ratio);
        let retargeted =
            population::retarget(&mut self.vehicles, &flow, self.config.speed_variance, &mut self.rng);
        info!(
            source = %flow.source,
            segments = flow.total_segments,
            congested = flow.congested_segments,
            spawn_rate = self.config.spawn_rate,
            retargeted,
            "traffic flow applied"
        );
        self.flow = Some(flow);
    }
}

/// Execute one complete tick.
///
/// `pending_flow` is applied before the spawn phase.
pub fn run_tick(
    state: &mut SimulationState,
    gate: &mut dyn SpawnGate,
    pending_flow: Option<TrafficFlowData>,
) -> Result<TickReport, TickError> {
    let tick = state.clock.advance()?;
    let dt = state.clock.dt_seconds();
    let mut report = TickReport {
        tick,
        ..TickReport::default()
    };
    debug!(tick, vehicles = state.vehicles.len(), "tick started");

    // --- Phase 0: Ingest ---
    if let Some(flow) = pending_flow {
        state.apply_flow(flow);
    }

    // --- Phase 1: Spawn ---
    match phase_spawn(state, gate, dt) {
        Ok(spawned) => report.spawned = spawned,
        Err(e) => report.skip(Phase::Spawn, &e),
    }

    // --- Phase 2: Lights ---
    report.phase_changes = signals::update_lights(&mut state.intersections, &state.vehicles, dt);

    // --- Phase 3: Vehicles ---
    report.evicted = phase_vehicles(state, dt);

    // --- Phase 4: Despawn ---
    let bounds = state.bounds();
    report.despawned = population::despawn(&mut state.vehicles, bounds, state.area.bounds_margin);
    state.metrics.vehicles_completed = state
        .metrics
        .vehicles_completed
        .saturating_add(u64::try_from(report.despawned).unwrap_or(u64::MAX));

    // --- Phase 5: Metrics ---
    if let Err(e) = phase_metrics(state) {
        report.skip(Phase::Metrics, &e);
    }

    debug!(
        tick,
        spawned = report.spawned.is_some(),
        evicted = report.evicted.len(),
        despawned = report.despawned,
        vehicles = state.metrics.total_vehicles,
        avg_speed = state.metrics.average_speed,
        "tick complete"
    );
    Ok(report)
}

/// Phase 1: one spawn trial with probability `spawn_rate * dt`.
fn phase_spawn(
    state: &mut SimulationState,
    gate: &mut dyn SpawnGate,
    dt: f64,
) -> Result<Option<VehicleId>, PhaseError> {
    let limit = usize::try_from(state.config.max_vehicles).unwrap_or(usize::MAX);
    if state.vehicles.len() >= limit {
        return Ok(None);
    }
    if !gate.should_spawn(state.config.spawn_rate * dt, &mut state.rng) {
        return Ok(None);
    }
    let vehicle = population::create_vehicle(
        &mut state.rng,
        &state.config.profile_weights,
        state.flow.as_ref(),
        &state.area,
    )?;
    let id = vehicle.id;
    debug!(
        vehicle_id = %id,
        class = ?vehicle.vehicle_class,
        profile = ?vehicle.driver_profile,
        "vehicle spawned"
    );
    state.vehicles.push(vehicle);
    Ok(Some(id))
}

/// Read-only world view shared by every vehicle update in a tick.
struct VehicleContext<'a> {
    dt: f64,
    config: &'a SimulationConfig,
    intersections: &'a [Intersection],
    incidents: &'a [Incident],
    kinematics: &'a [Kinematics],
    proximity: &'a HashMap<VehicleId, f64>,
}

/// Phase 3: update every vehicle, evicting those whose update fails.
fn phase_vehicles(state: &mut SimulationState, dt: f64) -> Vec<VehicleId> {
    let kinematics = interaction::snapshot(&state.vehicles);
    let proximity = interaction::proximity_caps(&kinematics, state.config.min_following_distance);
    let ctx = VehicleContext {
        dt,
        config: &state.config,
        intersections: &state.intersections,
        incidents: &state.incidents,
        kinematics: &kinematics,
        proximity: &proximity,
    };

    let mut evicted = Vec::new();
    let mut kept = Vec::with_capacity(state.vehicles.len());
    for (mut vehicle, own) in std::mem::take(&mut state.vehicles).into_iter().zip(&kinematics) {
        match update_vehicle(&mut vehicle, own, &ctx) {
            Ok(()) => kept.push(vehicle),
            Err(e) => {
                warn!(vehicle_id = %vehicle.id, error = %e, "vehicle update failed, evicted");
                evicted.push(vehicle.id);
            }
        }
    }
    state.vehicles = kept;
    evicted
}

/// Per-vehicle update for one tick.
fn update_vehicle(vehicle: &mut Vehicle, own: &Kinematics, ctx: &VehicleContext<'_>) -> Result<(), VehicleError> {
    vehicle.target_speed = vehicle.cruise_speed;

    if vehicle.waiting_at_light {
        vehicle.wait_time_seconds += ctx.dt;
        if !signals::is_released(vehicle, ctx.intersections) {
            return physics::ensure_finite(vehicle);
        }
        vehicle.waiting_at_light = false;
        vehicle.held_by = None;
    }

    let caps = [
        incidents::speed_ceiling(ctx.incidents, vehicle.position, vehicle.target_speed),
        interaction::headway_cap(own, ctx.kinematics, ctx.config.min_following_distance),
        ctx.proximity.get(&vehicle.id).copied(),
    ];
    vehicle.target_speed = caps
        .into_iter()
        .flatten()
        .fold(vehicle.target_speed, f64::min)
        .max(0.0);

    physics::approach_target(vehicle, ctx.dt, ctx.config);

    let horizon = physics::stopping_horizon_m(vehicle, ctx.config);
    if let Some(light_id) = signals::halting_light(vehicle, ctx.intersections, horizon) {
        vehicle.waiting_at_light = true;
        vehicle.held_by = Some(light_id);
        vehicle.current_speed = 0.0;
        return physics::ensure_finite(vehicle);
    }

    physics::integrate_position(vehicle, ctx.dt);
    physics::ensure_finite(vehicle)
}

/// Phase 5: aggregates and per-intersection waits.
fn phase_metrics(state: &mut SimulationState) -> Result<(), PhaseError> {
    let fresh = metrics::aggregate(&state.vehicles, state.metrics.vehicles_completed);
    if !fresh.average_speed.is_finite() {
        return Err(PhaseError::NonFiniteMetric {
            field: "average_speed",
        });
    }
    if !fresh.total_wait_time.is_finite() {
        return Err(PhaseError::NonFiniteMetric {
            field: "total_wait_time",
        });
    }
    state.metrics = fresh;
    metrics::update_intersection_waits(&mut state.intersections, &state.vehicles);
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use chrono::Utc;
    use metroflow_types::{Coordinates, LightPhase};

    use super::*;
    use crate::incidents::IncidentRequest;
    use crate::population::{AlwaysSpawn, NeverSpawn};
    use crate::signals::{IntersectionRequest, LightRequest, PhaseDurations};

    fn seeded_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.simulation.seed = Some(42);
        config
    }

    fn state() -> SimulationState {
        SimulationState::new(&seeded_config())
    }

    fn spawn_one(state: &mut SimulationState) -> VehicleId {
        run_tick(state, &mut AlwaysSpawn, None).unwrap().spawned.unwrap()
    }

    fn vehicle_mut(state: &mut SimulationState, id: VehicleId) -> &mut Vehicle {
        state.vehicles.iter_mut().find(|v| v.id == id).unwrap()
    }

    #[test]
    fn ticks_advance_by_one_with_monotonic_time() {
        let mut state = state();
        let mut last_time = state.clock.timestamp();
        for expected in 1..=20 {
            let report = run_tick(&mut state, &mut NeverSpawn, None).unwrap();
            assert_eq!(report.tick, expected);
            assert!(state.clock.timestamp() >= last_time);
            last_time = state.clock.timestamp();
        }
    }

    #[test]
    fn spawning_saturates_at_max_vehicles() {
        let mut config = seeded_config();
        config.simulation.max_vehicles = 5;
        config.simulation.spawn_rate = 1.0;
        let mut state = SimulationState::new(&config);
        for _ in 0..20 {
            run_tick(&mut state, &mut AlwaysSpawn, None).unwrap();
            assert!(state.vehicles.len() <= 5);
        }
        assert_eq!(state.vehicles.len(), 5);
        assert_eq!(state.metrics.total_vehicles, 5);
    }

    #[test]
    fn lone_vehicle_reaches_cruise_speed() {
        let mut state = state();
        let id = spawn_one(&mut state);
        {
            let v = vehicle_mut(&mut state, id);
            v.driver_profile = metroflow_types::DriverProfile::Normal;
            v.cruise_speed = 50.0;
            v.current_speed = 0.0;
        }
        for _ in 0..100 {
            run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        }
        assert!(vehicle_mut(&mut state, id).current_speed >= 45.0);
    }

    #[test]
    fn closure_stops_vehicle_inside_radius() {
        let mut state = state();
        let id = spawn_one(&mut state);
        let position = vehicle_mut(&mut state, id).position;
        state.incidents.push(
            IncidentRequest {
                category: "closure".to_owned(),
                location: position,
                description: None,
                severity: 5,
                end_time: None,
                affected_segments: Vec::new(),
            }
            .into_incident(Utc::now())
            .unwrap(),
        );
        run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        let v = vehicle_mut(&mut state, id);
        assert!(v.target_speed < 1.0, "target {}", v.target_speed);
        assert!(v.cruise_speed > 30.0);
    }

    #[test]
    fn caps_are_lifted_once_the_cause_is_gone() {
        let mut state = state();
        let id = spawn_one(&mut state);
        let position = vehicle_mut(&mut state, id).position;
        let incident = IncidentRequest {
            category: "accident".to_owned(),
            location: position,
            description: None,
            severity: 3,
            end_time: None,
            affected_segments: Vec::new(),
        }
        .into_incident(Utc::now())
        .unwrap();
        let incident_id = incident.id;
        state.incidents.push(incident);
        run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        let capped = vehicle_mut(&mut state, id).target_speed;

        assert!(incidents::remove(&mut state.incidents, incident_id));
        run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        let v = vehicle_mut(&mut state, id);
        assert!(v.target_speed > capped);
        assert_eq!(v.target_speed, v.cruise_speed);
    }

    #[test]
    fn vehicle_stops_at_red_light_ahead_and_resumes_on_green() {
        let mut state = state();
        let id = spawn_one(&mut state);
        let start = Coordinates::new(40.7128, -74.0060);
        {
            let v = vehicle_mut(&mut state, id);
            v.position = start;
            v.heading = 0.0;
            v.current_segment_id = None;
        }
        let intersection = signals::build_intersection(IntersectionRequest {
            location: Coordinates::new(start.lat + 0.00005, start.lng),
            name: None,
            durations: PhaseDurations {
                green: 30,
                yellow: 5,
                red: 2,
            },
            connected_segment_ids: Vec::new(),
        })
        .unwrap();
        state.intersections.push(intersection);

        run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        {
            let v = vehicle_mut(&mut state, id);
            assert!(v.waiting_at_light);
            assert_eq!(v.current_speed, 0.0);
            assert!(v.held_by.is_some());
        }

        // Red lasts 2 s: 20 ticks at 100 ms.
        for _ in 0..25 {
            run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        }
        assert_eq!(state.intersections[0].traffic_lights[0].current_phase, LightPhase::Green);
        let v = vehicle_mut(&mut state, id);
        assert!(!v.waiting_at_light);
        assert!(v.wait_time_seconds > 1.0);
        assert!(v.current_speed > 0.0);
    }

    #[test]
    fn second_catch_all_light_does_not_hold_a_released_vehicle() {
        let mut state = state();
        let id = spawn_one(&mut state);
        let start = Coordinates::new(40.7128, -74.0060);
        {
            let v = vehicle_mut(&mut state, id);
            v.position = start;
            v.heading = 0.0;
            v.current_segment_id = None;
        }
        let intersection = signals::build_intersection(IntersectionRequest {
            location: Coordinates::new(start.lat + 0.00005, start.lng),
            name: None,
            durations: PhaseDurations {
                green: 30,
                yellow: 5,
                red: 2,
            },
            connected_segment_ids: Vec::new(),
        })
        .unwrap();
        let intersection_id = intersection.id;
        state.intersections.push(intersection);
        // Yellow for 1 s, then red for 30 s: red when the first light turns green.
        signals::add_light(
            &mut state.intersections,
            intersection_id,
            LightRequest {
                location: None,
                durations: PhaseDurations {
                    green: 30,
                    yellow: 1,
                    red: 30,
                },
                initial_phase: LightPhase::Yellow,
                controlled_segment_ids: Vec::new(),
            },
        )
        .unwrap();

        run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        assert!(vehicle_mut(&mut state, id).waiting_at_light);

        for _ in 0..40 {
            run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        }
        let lights = &state.intersections[0].traffic_lights;
        assert_eq!(lights[0].current_phase, LightPhase::Green);
        assert_eq!(lights[1].current_phase, LightPhase::Red);
        let v = vehicle_mut(&mut state, id);
        assert!(!v.waiting_at_light);
        assert!(v.current_speed > 0.0);
        assert!(v.position.lat > start.lat);
    }

    #[test]
    fn non_finite_vehicle_is_evicted_alone() {
        let mut state = state();
        let bad = spawn_one(&mut state);
        let good = spawn_one(&mut state);
        vehicle_mut(&mut state, bad).wait_time_seconds = f64::INFINITY;

        let report = run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        assert_eq!(report.evicted, vec![bad]);
        assert_eq!(state.vehicles.len(), 1);
        assert_eq!(state.vehicles[0].id, good);
    }

    #[test]
    fn invalid_spawn_skips_only_that_phase() {
        let mut config = seeded_config();
        config.area.center = Coordinates::new(90.0, 0.0);
        let mut state = SimulationState::new(&config);
        let mut skipped = 0;
        for _ in 0..40 {
            let report = run_tick(&mut state, &mut AlwaysSpawn, None).unwrap();
            if let Some(s) = report.skipped.first() {
                assert_eq!(s.phase, Phase::Spawn);
                skipped += 1;
            }
        }
        assert!(skipped > 0);
        assert_eq!(state.clock.tick(), 40);
    }

    #[test]
    fn despawn_counts_completed_vehicles() {
        let mut config = seeded_config();
        config.area.bounds = Some(BoundingBox {
            north: 40.7228,
            south: 40.7028,
            east: -73.9960,
            west: -74.0160,
        });
        let mut state = SimulationState::new(&config);
        let id = spawn_one(&mut state);
        vehicle_mut(&mut state, id).position = Coordinates::new(41.0, -74.0);

        let report = run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        assert_eq!(report.despawned, 1);
        assert_eq!(state.metrics.vehicles_completed, 1);
        assert!(state.vehicles.is_empty());

        run_tick(&mut state, &mut NeverSpawn, None).unwrap();
        assert_eq!(state.metrics.vehicles_completed, 1);
    }

    #[test]
    fn pending_flow_retunes_spawn_rate() {
        let mut state = state();
        let flow = TrafficFlowData::from_segments(
            Vec::new(),
            BoundingBox {
                north: 41.0,
                south: 40.0,
                east: -73.0,
                west: -75.0,
            },
            Utc::now(),
            "test",
        );
        run_tick(&mut state, &mut NeverSpawn, Some(flow)).unwrap();
        assert!((state.config.spawn_rate - 0.3).abs() < 1e-12);
        assert!(state.flow.is_some());
        assert!(state.bounds().is_some());
    }

    #[test]
    fn snapshot_flattens_lights() {
        let mut state = state();
        for _ in 0..2 {
            state.intersections.push(
                signals::build_intersection(IntersectionRequest {
                    location: Coordinates::new(40.7, -74.0),
                    name: None,
                    durations: PhaseDurations::default(),
                    connected_segment_ids: Vec::new(),
                })
                .unwrap(),
            );
        }
        let snapshot = state.snapshot();
        assert_eq!(snapshot.intersections.len(), 2);
        assert_eq!(snapshot.traffic_lights.len(), 2);
        assert_eq!(snapshot.tick, 0);
    }
}
