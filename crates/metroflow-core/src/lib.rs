//! Tick engine, vehicle physics, traffic control, and metrics for the
//! Metroflow traffic simulation.
//!
//! The engine advances a population of vehicles through fixed-length ticks.
//! Each tick spawns, updates lights, moves vehicles under incident and
//! following-distance constraints, despawns vehicles that left the area,
//! recomputes metrics, and publishes a snapshot to subscribers.
//!
//! # Modules
//!
//! - [`geo`] -- Distances, bearings, and coordinate validation.
//! - [`config`] -- Configuration loading from `metroflow-config.yaml`.
//! - [`clock`] -- Tick counter and monotonic tick timestamps.
//! - [`population`] -- Spawning, profile selection, despawn, retargeting.
//! - [`physics`] -- Speed convergence and position integration.
//! - [`signals`] -- Intersections and traffic-light state machines.
//! - [`incidents`] -- Incident registration and speed ceilings.
//! - [`interaction`] -- Following-distance caps between vehicles.
//! - [`metrics`] -- Aggregates, dashboard indicators, emissions.
//! - [`tick`] -- The ordered phase sequence of one tick.
//! - [`operator`] -- Lifecycle flags and the pending traffic snapshot slot.
//! - [`runner`] -- The async tick loop.
//! - [`engine`] -- The [`Engine`] handle.
//!
//! [`Engine`]: engine::Engine

pub mod clock;
pub mod config;
pub mod engine;
pub mod geo;
pub mod incidents;
pub mod interaction;
pub mod metrics;
pub mod operator;
pub mod physics;
pub mod population;
pub mod runner;
pub mod signals;
pub mod tick;
