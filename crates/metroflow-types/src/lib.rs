//! Shared type definitions for the Metroflow traffic simulation.
//!
//! This crate is the single source of truth for the data model exchanged
//! between the engine and its consumers. Types flow downstream to
//! `TypeScript` via `ts-rs` for dashboard clients.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for engine-owned entities
//! - [`enums`] -- Vehicle classes, driver profiles, light phases, incident
//!   categories, congestion levels
//! - [`structs`] -- Entities, the traffic-flow snapshot, and engine output

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{CongestionLevel, DriverProfile, IncidentCategory, LightPhase, VehicleClass};
pub use ids::{IncidentId, IntersectionId, TrafficLightId, VehicleId};
pub use structs::{
    BoundingBox, Coordinates, EmissionsEstimate, Incident, Intersection, IntersectionReport,
    RoadSegment, SimulationMetrics, SimulationSnapshot, TrafficFlowData, TrafficLight,
    TrafficMetrics, Vehicle,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for dashboard consumers.

    #[test]
    fn export_bindings() {
        // ts-rs writes bindings for every type marked #[ts(export)] into
        // `bindings/` relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::VehicleId::export_all();
        let _ = crate::ids::TrafficLightId::export_all();
        let _ = crate::ids::IntersectionId::export_all();
        let _ = crate::ids::IncidentId::export_all();

        // Enums
        let _ = crate::enums::VehicleClass::export_all();
        let _ = crate::enums::DriverProfile::export_all();
        let _ = crate::enums::LightPhase::export_all();
        let _ = crate::enums::IncidentCategory::export_all();
        let _ = crate::enums::CongestionLevel::export_all();

        // Structs
        let _ = crate::structs::Coordinates::export_all();
        let _ = crate::structs::BoundingBox::export_all();
        let _ = crate::structs::Vehicle::export_all();
        let _ = crate::structs::TrafficLight::export_all();
        let _ = crate::structs::Intersection::export_all();
        let _ = crate::structs::Incident::export_all();
        let _ = crate::structs::RoadSegment::export_all();
        let _ = crate::structs::TrafficFlowData::export_all();
        let _ = crate::structs::SimulationMetrics::export_all();
        let _ = crate::structs::SimulationSnapshot::export_all();
        let _ = crate::structs::EmissionsEstimate::export_all();
        let _ = crate::structs::TrafficMetrics::export_all();
        let _ = crate::structs::IntersectionReport::export_all();
    }
}
