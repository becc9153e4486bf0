//! Configuration loading and typed config structures for the Metroflow engine.
//!
//! The canonical configuration lives in `metroflow-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure, a loader that reads the file and applies environment
//! overrides, and validation that runs before the engine is allowed to start.

use std::path::Path;

use metroflow_types::{BoundingBox, Coordinates, DriverProfile};
use serde::{Deserialize, Serialize};

use crate::geo::{self, GeoError};
use crate::incidents::IncidentRequest;
use crate::signals::IntersectionRequest;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A field holds a value the engine cannot run with.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configured simulation area is not a valid region.
    #[error("invalid simulation area: {0}")]
    Area(#[from] GeoError),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `metroflow-config.yaml`. Every section is
/// optional and falls back to the documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tick timing, population limits, and vehicle dynamics.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Spawn reference point and despawn bounds.
    #[serde(default)]
    pub area: AreaConfig,

    /// Snapshot broadcast channel settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Intersections created when the host starts.
    #[serde(default)]
    pub intersections: Vec<IntersectionRequest>,

    /// Incidents registered when the host starts.
    #[serde(default)]
    pub incidents: Vec<IncidentRequest>,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values after parsing:
    /// - `METROFLOW_TICK_INTERVAL_MS` overrides `simulation.tick_interval_ms`
    /// - `METROFLOW_MAX_VEHICLES` overrides `simulation.max_vehicles`
    /// - `METROFLOW_SPAWN_RATE` overrides `simulation.spawn_rate`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.simulation.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Validate every section, normalizing profile weights in place.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        self.area.validate()?;
        if self.broadcast.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "broadcast.capacity",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Simulation timing, population, and vehicle-dynamics parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Real-time milliseconds per tick. Also the simulated step length.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Spawning stops while this many vehicles are active.
    #[serde(default = "default_max_vehicles")]
    pub max_vehicles: u32,

    /// Expected spawns per second while below the vehicle limit.
    #[serde(default = "default_spawn_rate")]
    pub spawn_rate: f64,

    /// Base acceleration, m/s².
    #[serde(default = "default_base_acceleration")]
    pub base_acceleration: f64,

    /// Base deceleration, m/s². Also used for braking distance.
    #[serde(default = "default_base_deceleration")]
    pub base_deceleration: f64,

    /// Closest allowed gap between two vehicles, meters.
    #[serde(default = "default_min_following_distance")]
    pub min_following_distance: f64,

    /// Relative spread applied when retargeting speeds from observed traffic.
    #[serde(default = "default_speed_variance")]
    pub speed_variance: f64,

    /// Categorical weights for driver-profile selection.
    #[serde(default)]
    pub profile_weights: ProfileWeights,

    /// Seed for the engine RNG. Unset means seeded from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SimulationConfig {
    /// Override simulation fields with environment variables when set.
    ///
    /// Values that fail to parse are ignored with a warning so a bad
    /// deployment variable never replaces a working YAML value.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(&|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`, keyed by environment variable
    /// name.
    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(val) = override_value::<u64>(lookup, "METROFLOW_TICK_INTERVAL_MS") {
            self.tick_interval_ms = val;
        }
        if let Some(val) = override_value::<u32>(lookup, "METROFLOW_MAX_VEHICLES") {
            self.max_vehicles = val;
        }
        if let Some(val) = override_value::<f64>(lookup, "METROFLOW_SPAWN_RATE") {
            self.spawn_rate = val;
        }
    }

    /// Check every field and normalize the profile weights to sum to 1.0.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "simulation.tick_interval_ms",
                reason: "must be positive".to_owned(),
            });
        }
        if !self.spawn_rate.is_finite() || self.spawn_rate < 0.0 {
            return Err(ConfigError::Invalid {
                field: "simulation.spawn_rate",
                reason: format!("{} is not a non-negative number", self.spawn_rate),
            });
        }
        require_positive("simulation.base_acceleration", self.base_acceleration)?;
        require_positive("simulation.base_deceleration", self.base_deceleration)?;
        if !self.min_following_distance.is_finite() || self.min_following_distance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "simulation.min_following_distance",
                reason: format!("{} is not a non-negative distance", self.min_following_distance),
            });
        }
        if !(0.0..1.0).contains(&self.speed_variance) {
            return Err(ConfigError::Invalid {
                field: "simulation.speed_variance",
                reason: format!("{} is outside [0, 1)", self.speed_variance),
            });
        }
        self.profile_weights = self.profile_weights.normalized()?;
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_vehicles: default_max_vehicles(),
            spawn_rate: default_spawn_rate(),
            base_acceleration: default_base_acceleration(),
            base_deceleration: default_base_deceleration(),
            min_following_distance: default_min_following_distance(),
            speed_variance: default_speed_variance(),
            profile_weights: ProfileWeights::default(),
            seed: None,
        }
    }
}

/// Driver-profile weight table, one weight per profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileWeights {
    /// Weight of [`DriverProfile::Aggressive`].
    #[serde(default = "default_weight_aggressive")]
    pub aggressive: f64,
    /// Weight of [`DriverProfile::Normal`].
    #[serde(default = "default_weight_normal")]
    pub normal: f64,
    /// Weight of [`DriverProfile::Cautious`].
    #[serde(default = "default_weight_cautious")]
    pub cautious: f64,
    /// Weight of [`DriverProfile::Learner`].
    #[serde(default = "default_weight_learner")]
    pub learner: f64,
}

impl ProfileWeights {
    /// Weight assigned to `profile`.
    pub const fn weight(&self, profile: DriverProfile) -> f64 {
        match profile {
            DriverProfile::Aggressive => self.aggressive,
            DriverProfile::Normal => self.normal,
            DriverProfile::Cautious => self.cautious,
            DriverProfile::Learner => self.learner,
        }
    }

    /// Sum of all four weights.
    pub fn total(&self) -> f64 {
        DriverProfile::ALL.iter().map(|p| self.weight(*p)).sum()
    }

    /// Return a copy scaled so the weights sum to exactly 1.0.
    pub fn normalized(&self) -> Result<Self, ConfigError> {
        if DriverProfile::ALL
            .iter()
            .any(|p| !self.weight(*p).is_finite() || self.weight(*p) < 0.0)
        {
            return Err(ConfigError::Invalid {
                field: "simulation.profile_weights",
                reason: "weights must be finite and non-negative".to_owned(),
            });
        }
        let total = self.total();
        if total <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "simulation.profile_weights",
                reason: "at least one weight must be positive".to_owned(),
            });
        }
        Ok(Self {
            aggressive: self.aggressive / total,
            normal: self.normal / total,
            cautious: self.cautious / total,
            learner: self.learner / total,
        })
    }
}

impl Default for ProfileWeights {
    fn default() -> Self {
        Self {
            aggressive: default_weight_aggressive(),
            normal: default_weight_normal(),
            cautious: default_weight_cautious(),
            learner: default_weight_learner(),
        }
    }
}

/// Where vehicles appear and where they leave the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaConfig {
    /// Reference point for synthetic edge spawns.
    #[serde(default = "default_center")]
    pub center: Coordinates,

    /// Distance of the synthetic spawn edges from `center`, degrees.
    #[serde(default = "default_spawn_offset")]
    pub spawn_offset: f64,

    /// Margin added around the despawn bounds, degrees.
    #[serde(default = "default_bounds_margin")]
    pub bounds_margin: f64,

    /// Despawn bounds used until a traffic-flow snapshot supplies its own.
    /// With neither, vehicles are never despawned.
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
}

impl AreaConfig {
    /// Validate the reference point, offsets, and optional bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        geo::validate_coordinates(self.center, "area.center")?;
        require_positive("area.spawn_offset", self.spawn_offset)?;
        if !self.bounds_margin.is_finite() || self.bounds_margin < 0.0 {
            return Err(ConfigError::Invalid {
                field: "area.bounds_margin",
                reason: format!("{} is not a non-negative margin", self.bounds_margin),
            });
        }
        if let Some(bounds) = &self.bounds {
            geo::validate_bounding_box(bounds)?;
        }
        Ok(())
    }
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            center: default_center(),
            spawn_offset: default_spawn_offset(),
            bounds_margin: default_bounds_margin(),
            bounds: None,
        }
    }
}

/// Snapshot broadcast channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Snapshots buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_broadcast_capacity")]
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: default_broadcast_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} must be a positive number"),
        })
    }
}

fn override_value<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_max_vehicles() -> u32 {
    500
}

const fn default_spawn_rate() -> f64 {
    0.5
}

const fn default_base_acceleration() -> f64 {
    2.0
}

const fn default_base_deceleration() -> f64 {
    4.0
}

const fn default_min_following_distance() -> f64 {
    5.0
}

const fn default_speed_variance() -> f64 {
    0.1
}

const fn default_weight_aggressive() -> f64 {
    0.15
}

const fn default_weight_normal() -> f64 {
    0.60
}

const fn default_weight_cautious() -> f64 {
    0.20
}

const fn default_weight_learner() -> f64 {
    0.05
}

const fn default_center() -> Coordinates {
    Coordinates::new(40.7128, -74.0060)
}

const fn default_spawn_offset() -> f64 {
    0.01
}

const fn default_bounds_margin() -> f64 {
    0.005
}

const fn default_broadcast_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_owned()
}
