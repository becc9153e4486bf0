//! Enumeration types for the Metroflow simulation.
//!
//! Vehicle classes, driver profiles, traffic-light phases, incident
//! categories, and road-segment congestion levels. All variants serialize
//! in `snake_case` to match the traffic-data provider's vocabulary.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

/// The physical class of a simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum VehicleClass {
    /// Private passenger car.
    Car,
    /// Goods vehicle.
    Truck,
    /// Two-wheeled motor vehicle.
    Motorcycle,
    /// Public transit bus.
    Bus,
    /// Emergency-service vehicle. Never produced by random spawning.
    Emergency,
}

/// Behavioral category of the driver.
///
/// The profile scales target speed and acceleration/deceleration rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DriverProfile {
    /// Faster cruising, harder acceleration.
    Aggressive,
    /// Baseline behavior.
    Normal,
    /// Slower cruising, gentler acceleration.
    Cautious,
    /// Slowest cruising and reactions.
    Learner,
}

impl DriverProfile {
    /// All profiles in declaration order.
    pub const ALL: [Self; 4] = [Self::Aggressive, Self::Normal, Self::Cautious, Self::Learner];

    /// Multiplier applied to the base cruising speed.
    pub const fn speed_multiplier(self) -> f64 {
        match self {
            Self::Aggressive => 1.2,
            Self::Normal => 1.0,
            Self::Cautious => 0.85,
            Self::Learner => 0.7,
        }
    }

    /// Multiplier applied to both acceleration and deceleration rates.
    pub const fn acceleration_multiplier(self) -> f64 {
        match self {
            Self::Aggressive => 1.3,
            Self::Normal => 1.0,
            Self::Cautious => 0.7,
            Self::Learner => 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Traffic control
// ---------------------------------------------------------------------------

/// Phase of a traffic light. The cycle is strictly Red -> Green -> Yellow -> Red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum LightPhase {
    /// Stop.
    Red,
    /// Proceed.
    Green,
    /// Clear the intersection.
    Yellow,
}

impl LightPhase {
    /// The phase that follows this one in the cycle.
    pub const fn next(self) -> Self {
        match self {
            Self::Red => Self::Green,
            Self::Green => Self::Yellow,
            Self::Yellow => Self::Red,
        }
    }

    /// Whether vehicles facing this phase must halt.
    pub const fn halts_traffic(self) -> bool {
        matches!(self, Self::Red | Self::Yellow)
    }
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// Category of a traffic incident.
///
/// The category selects the influence radius and maximum speed reduction
/// an incident exerts on nearby vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum IncidentCategory {
    /// Collision blocking part of the road.
    Accident,
    /// Road works.
    Construction,
    /// Full road closure.
    Closure,
    /// Generic slowdown.
    Slowdown,
    /// Planned event (concert, parade, match).
    Event,
    /// Any category the engine has no specific model for.
    Other,
}

impl IncidentCategory {
    /// Parse a free-form category label, case-insensitively.
    ///
    /// Unrecognized labels map to [`IncidentCategory::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "accident" => Self::Accident,
            "construction" => Self::Construction,
            "closure" => Self::Closure,
            "slowdown" => Self::Slowdown,
            "event" => Self::Event,
            _ => Self::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Road segments
// ---------------------------------------------------------------------------

/// Congestion classification of a road segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CongestionLevel {
    /// No delays (speed ratio >= 0.9).
    FreeFlow,
    /// Minor delays (speed ratio >= 0.7).
    Light,
    /// Noticeable delays (speed ratio >= 0.5).
    Moderate,
    /// Significant delays (speed ratio >= 0.25).
    Heavy,
    /// Standstill or near standstill.
    Severe,
}

impl CongestionLevel {
    /// Classify a segment from its current/free-flow speed ratio.
    pub fn from_speed_ratio(speed_ratio: f64) -> Self {
        if speed_ratio >= 0.9 {
            Self::FreeFlow
        } else if speed_ratio >= 0.7 {
            Self::Light
        } else if speed_ratio >= 0.5 {
            Self::Moderate
        } else if speed_ratio >= 0.25 {
            Self::Heavy
        } else {
            Self::Severe
        }
    }

    /// Whether this level counts as congested for aggregate statistics.
    pub const fn is_congested(self) -> bool {
        matches!(self, Self::Heavy | Self::Severe)
    }
}
