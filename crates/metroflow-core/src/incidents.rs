//! Incident field: how active incidents slow down nearby vehicles.
//!
//! Each category has an influence radius (in degrees) and a maximum speed
//! reduction. Inside the radius the reduction falls off linearly from full
//! strength at the incident to nothing at the edge. The effect is evaluated
//! per vehicle on every tick; incidents never expire on their own.

use chrono::{DateTime, Utc};
use metroflow_types::{Coordinates, Incident, IncidentCategory, IncidentId};
use serde::{Deserialize, Serialize};

use crate::geo::{self, GeoError};

/// Lowest accepted severity.
pub const MIN_SEVERITY: u8 = 1;

/// Highest accepted severity.
pub const MAX_SEVERITY: u8 = 5;

/// Errors raised when registering an incident.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IncidentError {
    /// Severity outside `1..=5`.
    #[error("severity {0} out of range (1-5)")]
    Severity(u8),

    /// The incident location is not a valid coordinate.
    #[error("invalid incident location: {0}")]
    Location(#[from] GeoError),
}

/// Request to register an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRequest {
    /// Category label, matched case-insensitively. Unknown labels become `other`.
    pub category: String,
    /// Where the incident is.
    pub location: Coordinates,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Severity, 1 (minor) to 5 (major).
    #[serde(default = "default_severity")]
    pub severity: u8,
    /// Expected end. Advisory only.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Segments the data source reports as affected.
    #[serde(default)]
    pub affected_segments: Vec<String>,
}

impl IncidentRequest {
    /// Validate the request and build an incident starting now.
    pub fn into_incident(self, now: DateTime<Utc>) -> Result<Incident, IncidentError> {
        if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&self.severity) {
            return Err(IncidentError::Severity(self.severity));
        }
        geo::validate_coordinates(self.location, "incident location")?;
        Ok(Incident {
            id: IncidentId::new(),
            category: IncidentCategory::from_label(&self.category),
            location: self.location,
            description: self.description,
            severity: self.severity,
            start_time: now,
            end_time: self.end_time,
            affected_segments: self.affected_segments,
        })
    }
}

/// Influence radius of a category, degrees.
pub const fn influence_radius(category: IncidentCategory) -> f64 {
    match category {
        IncidentCategory::Accident | IncidentCategory::Event | IncidentCategory::Other => 0.002,
        IncidentCategory::Construction => 0.003,
        IncidentCategory::Closure => 0.005,
        IncidentCategory::Slowdown => 0.001,
    }
}

/// Maximum fractional speed reduction of a category.
pub const fn max_reduction(category: IncidentCategory) -> f64 {
    match category {
        IncidentCategory::Accident => 0.7,
        IncidentCategory::Construction | IncidentCategory::Other => 0.5,
        IncidentCategory::Closure => 1.0,
        IncidentCategory::Slowdown => 0.3,
        IncidentCategory::Event => 0.6,
    }
}

/// Reduction one incident exerts at `position`, in `[0, 1]`.
pub fn reduction_at(incident: &Incident, position: Coordinates) -> f64 {
    let radius = influence_radius(incident.category);
    let distance = geo::degree_distance(position, incident.location);
    if !distance.is_finite() || distance >= radius {
        return 0.0;
    }
    let falloff = 1.0 - distance / radius;
    (max_reduction(incident.category) * falloff).clamp(0.0, 1.0)
}

/// Most restrictive speed ceiling any incident imposes at `position`.
///
/// `None` when no incident reaches the position.
pub fn speed_ceiling(incidents: &[Incident], position: Coordinates, target_speed: f64) -> Option<f64> {
    incidents
        .iter()
        .map(|incident| reduction_at(incident, position))
        .filter(|reduction| *reduction > 0.0)
        .map(|reduction| target_speed * (1.0 - reduction))
        .reduce(f64::min)
}

/// Remove the incident with `id`. Returns whether one was removed.
pub fn remove(incidents: &mut Vec<Incident>, id: IncidentId) -> bool {
    let before = incidents.len();
    incidents.retain(|i| i.id != id);
    incidents.len() != before
}

const fn default_severity() -> u8 {
    3
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const SITE: Coordinates = Coordinates::new(40.7128, -74.0060);

    fn incident(category: &str) -> Incident {
        IncidentRequest {
            category: category.to_owned(),
            location: SITE,
            description: None,
            severity: 3,
            end_time: None,
            affected_segments: Vec::new(),
        }
        .into_incident(Utc::now())
        .unwrap()
    }

    #[test]
    fn closure_drives_ceiling_to_zero_at_center() {
        let incidents = vec![incident("closure")];
        let ceiling = speed_ceiling(&incidents, SITE, 80.0).unwrap();
        assert!(ceiling.abs() < 1e-9);
    }

    #[test]
    fn effect_falls_off_linearly() {
        let accident = incident("accident");
        let halfway = Coordinates::new(SITE.lat + 0.001, SITE.lng);
        assert!((reduction_at(&accident, halfway) - 0.35).abs() < 1e-9);
        let edge = Coordinates::new(SITE.lat + 0.0021, SITE.lng);
        assert_eq!(reduction_at(&accident, edge), 0.0);
    }

    #[test]
    fn most_restrictive_incident_wins() {
        let incidents = vec![incident("slowdown"), incident("accident")];
        let ceiling = speed_ceiling(&incidents, SITE, 50.0).unwrap();
        assert!((ceiling - 15.0).abs() < 1e-9);
    }

    #[test]
    fn no_ceiling_outside_every_radius() {
        let incidents = vec![incident("construction")];
        let far = Coordinates::new(SITE.lat + 0.01, SITE.lng);
        assert!(speed_ceiling(&incidents, far, 50.0).is_none());
        assert!(speed_ceiling(&[], SITE, 50.0).is_none());
    }

    #[test]
    fn unknown_category_uses_moderate_defaults() {
        let flood = incident("Flood");
        assert_eq!(flood.category, IncidentCategory::Other);
        assert_eq!(reduction_at(&flood, SITE), 0.5);
    }

    #[test]
    fn severity_out_of_range_is_rejected() {
        let request = IncidentRequest {
            category: "accident".to_owned(),
            location: SITE,
            description: None,
            severity: 9,
            end_time: None,
            affected_segments: Vec::new(),
        };
        assert_eq!(request.into_incident(Utc::now()), Err(IncidentError::Severity(9)));
    }

    #[test]
    fn removal_reports_whether_found() {
        let first = incident("event");
        let id = first.id;
        let mut incidents = vec![first];
        assert!(!remove(&mut incidents, IncidentId::new()));
        assert!(remove(&mut incidents, id));
        assert!(incidents.is_empty());
    }
}
