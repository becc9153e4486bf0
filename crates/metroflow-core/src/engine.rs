//! The [`Engine`] handle: lifecycle, snapshot broadcast, and every external
//! mutation of the running simulation.
//!
//! An engine is an explicitly constructed value. Clones share the same
//! simulation, so the host can hand one to each caller. The simulation
//! state sits behind a [`tokio::sync::Mutex`] that a tick holds from start
//! to finish, which serializes every external mutation strictly between
//! ticks. Traffic snapshots bypass the lock: they are parked in a pending
//! slot and applied by the next tick, before spawning.
//!
//! Every tick publishes a [`SimulationSnapshot`] on a bounded broadcast
//! channel. A subscriber that falls behind loses the oldest snapshots and
//! sees [`broadcast::error::RecvError::Lagged`]; the tick loop never waits
//! for subscribers.

use std::sync::Arc;

use chrono::Utc;
use metroflow_types::{
    EmissionsEstimate, IncidentId, IntersectionId, IntersectionReport, SimulationSnapshot,
    TrafficFlowData, TrafficLightId, TrafficMetrics,
};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ConfigError, EngineConfig};
use crate::geo::{self, GeoError};
use crate::incidents::{self, IncidentError, IncidentRequest};
use crate::metrics::{self, DashboardContext};
use crate::operator::ControlState;
use crate::population::{BernoulliGate, SpawnGate};
use crate::runner::{self, LoopSummary};
use crate::signals::{self, IntersectionRequest, LightRequest, SignalError, TimingAdjustment};
use crate::tick::{self, SimulationState, TickError, TickReport};

/// Errors returned by [`Engine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration was rejected. The engine did not start.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called while the loop is already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// An intersection or light request was rejected.
    #[error("traffic control error: {0}")]
    Signal(#[from] SignalError),

    /// An incident request was rejected.
    #[error("incident error: {0}")]
    Incident(#[from] IncidentError),

    /// A traffic snapshot carried an invalid bounding box.
    #[error("invalid traffic snapshot: {0}")]
    Geo(#[from] GeoError),

    /// No intersection has this ID.
    #[error("intersection not found: {0}")]
    UnknownIntersection(IntersectionId),
}

/// Everything guarded by the tick lock.
struct EngineCore {
    config: EngineConfig,
    state: SimulationState,
    gate: Box<dyn SpawnGate>,
}

struct Shared {
    core: Mutex<EngineCore>,
    control: ControlState,
    snapshots: broadcast::Sender<Arc<SimulationSnapshot>>,
}

/// Cloneable handle to one simulation.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.is_running())
            .field("subscribers", &self.shared.snapshots.receiver_count())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create a stopped engine with Bernoulli spawn trials.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_spawn_gate(config, BernoulliGate)
    }

    /// Create a stopped engine with a custom spawn gate.
    pub fn with_spawn_gate(config: EngineConfig, gate: impl SpawnGate + 'static) -> Self {
        let (snapshots, _) = broadcast::channel(config.broadcast.capacity.max(1));
        let control = ControlState::new(config.simulation.tick_interval_ms);
        let state = SimulationState::new(&config);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(EngineCore {
                    config,
                    state,
                    gate: Box::new(gate),
                }),
                control,
                snapshots,
            }),
        }
    }

    pub(crate) fn control(&self) -> &ControlState {
        &self.shared.control
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Validate the configuration and spawn the tick loop.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] when the configuration is invalid, and
    /// [`EngineError::AlreadyRunning`] when a loop is already active. The
    /// engine stays stopped in the first case.
    pub async fn start(&self) -> Result<JoinHandle<LoopSummary>, EngineError> {
        {
            let mut core = self.shared.core.lock().await;
            let mut validated = core.config.clone();
            validated.validate()?;
            core.state.config.profile_weights = validated.simulation.profile_weights;
            core.config = validated;
        }
        if !self.shared.control.try_start() {
            return Err(EngineError::AlreadyRunning);
        }
        info!("engine started");
        Ok(tokio::spawn(runner::run_loop(self.clone())))
    }

    /// Ask the loop to stop after the tick in progress. Idempotent.
    pub fn stop(&self) {
        if self.is_running() {
            info!("engine stop requested");
        }
        self.shared.control.request_stop();
    }

    /// Whether the tick loop is active.
    pub fn is_running(&self) -> bool {
        self.shared.control.is_running()
    }

    /// Replace the simulation with an empty one built from the current
    /// configuration. Any traffic snapshot not yet applied is dropped.
    pub async fn reset(&self) {
        let mut core = self.shared.core.lock().await;
        core.state = SimulationState::new(&core.config);
        let _ = self.shared.control.take_flow();
        info!("simulation reset");
    }

    /// Execute one tick and publish its snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] when the tick could not run at all.
    pub async fn step(&self) -> Result<TickReport, TickError> {
        let (report, snapshot) = {
            let mut core = self.shared.core.lock().await;
            let pending = self.shared.control.take_flow();
            let EngineCore { state, gate, .. } = &mut *core;
            let report = tick::run_tick(state, gate.as_mut(), pending)?;
            (report, Arc::new(state.snapshot()))
        };
        if self.shared.snapshots.send(snapshot).is_err() {
            debug!(tick = report.tick, "no snapshot subscribers");
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Snapshots and configuration
    // -----------------------------------------------------------------------

    /// Receive a snapshot after every tick.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SimulationSnapshot>> {
        self.shared.snapshots.subscribe()
    }

    /// Snapshot of the current state.
    pub async fn snapshot(&self) -> SimulationSnapshot {
        self.shared.core.lock().await.state.snapshot()
    }

    /// The active configuration.
    pub async fn config(&self) -> EngineConfig {
        self.shared.core.lock().await.config.clone()
    }

    /// Replace the whole configuration. Vehicles, lights, and incidents are
    /// kept; simulation and area parameters apply from the next tick.
    ///
    /// The broadcast capacity is fixed at construction and is not changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the new configuration is invalid.
    pub async fn replace_config(&self, mut config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        let mut core = self.shared.core.lock().await;
        core.state.config = config.simulation.clone();
        core.state.area = config.area;
        core.state.clock.set_tick_interval_ms(config.simulation.tick_interval_ms);
        self.shared.control.set_tick_interval_ms(config.simulation.tick_interval_ms);
        core.config = config;
        info!(tick_interval_ms = core.config.simulation.tick_interval_ms, "configuration replaced");
        Ok(())
    }

    /// Queue a traffic snapshot for the next tick. Never waits for a tick.
    ///
    /// A newer snapshot replaces one that has not been applied yet.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Geo`] when the snapshot's bounding box is
    /// invalid.
    pub fn ingest_traffic_flow(&self, flow: TrafficFlowData) -> Result<(), EngineError> {
        geo::validate_bounding_box(&flow.bounding_box)?;
        debug!(source = %flow.source, segments = flow.total_segments, "traffic flow queued");
        self.shared.control.offer_flow(flow);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Traffic control
    // -----------------------------------------------------------------------

    /// Create an intersection with one RED light.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Signal`] for invalid locations or durations.
    pub async fn add_intersection(&self, request: IntersectionRequest) -> Result<IntersectionId, EngineError> {
        let intersection = signals::build_intersection(request)?;
        let id = intersection.id;
        info!(intersection_id = %id, name = ?intersection.name, "intersection added");
        self.shared.core.lock().await.state.intersections.push(intersection);
        Ok(id)
    }

    /// Attach another light to an existing intersection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Signal`] for an unknown intersection or an
    /// invalid request.
    pub async fn add_traffic_light(
        &self,
        intersection_id: IntersectionId,
        request: LightRequest,
    ) -> Result<TrafficLightId, EngineError> {
        let mut core = self.shared.core.lock().await;
        let id = signals::add_light(&mut core.state.intersections, intersection_id, request)?;
        info!(%intersection_id, light_id = %id, "traffic light added");
        Ok(id)
    }

    /// Change the durations of one light.
    ///
    /// Returns `Ok(false)` when no light has that ID.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Signal`] when a supplied duration is zero.
    pub async fn adjust_light_timing(
        &self,
        light_id: TrafficLightId,
        adjustment: TimingAdjustment,
    ) -> Result<bool, EngineError> {
        let mut core = self.shared.core.lock().await;
        let found = signals::adjust_timing(&mut core.state.intersections, light_id, adjustment)?;
        if found {
            info!(%light_id, ?adjustment, "light timing adjusted");
        } else {
            debug!(%light_id, "timing adjustment for unknown light");
        }
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Incidents
    // -----------------------------------------------------------------------

    /// Register an incident. Its effect applies from the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Incident`] for an invalid severity or location.
    pub async fn add_incident(&self, request: IncidentRequest) -> Result<IncidentId, EngineError> {
        let incident = request.into_incident(Utc::now())?;
        let id = incident.id;
        info!(incident_id = %id, category = ?incident.category, severity = incident.severity, "incident added");
        self.shared.core.lock().await.state.incidents.push(incident);
        Ok(id)
    }

    /// Remove an incident. Returns whether it existed.
    pub async fn remove_incident(&self, id: IncidentId) -> bool {
        let removed = incidents::remove(&mut self.shared.core.lock().await.state.incidents, id);
        if removed {
            info!(incident_id = %id, "incident removed");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Hourly emissions estimate from the latest metrics.
    pub async fn calculate_emissions(&self) -> EmissionsEstimate {
        metrics::calculate_emissions(&self.shared.core.lock().await.state.metrics)
    }

    /// Dashboard indicators from the latest tick.
    pub async fn traffic_metrics(&self) -> TrafficMetrics {
        let core = self.shared.core.lock().await;
        let state = &core.state;
        metrics::traffic_metrics(
            &state.metrics,
            &state.vehicles,
            DashboardContext {
                timestamp: state.clock.timestamp(),
                elapsed_minutes: state.clock.elapsed_minutes(),
                active_incidents: state.incidents.len(),
            },
        )
    }

    /// Live indicators for one intersection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownIntersection`] when no intersection has
    /// that ID.
    pub async fn intersection_report(&self, id: IntersectionId) -> Result<IntersectionReport, EngineError> {
        let core = self.shared.core.lock().await;
        let intersection = core
            .state
            .intersections
            .iter()
            .find(|i| i.id == id)
            .ok_or(EngineError::UnknownIntersection(id))?;
        Ok(metrics::intersection_report(intersection, &core.state.vehicles))
    }
}
