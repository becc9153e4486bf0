//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every engine-owned entity has a strongly-typed ID so that a light ID can
//! never be passed where an incident ID is expected. All IDs use UUID v7
//! (time-ordered), which keeps snapshot listings roughly in creation order.
//!
//! Road segments are identified by the external traffic-data provider, so
//! segment references stay plain strings and are not wrapped here.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a simulated vehicle.
    VehicleId
}

define_id! {
    /// Unique identifier for a traffic light.
    TrafficLightId
}

define_id! {
    /// Unique identifier for an intersection.
    IntersectionId
}

define_id! {
    /// Unique identifier for a traffic incident.
    IncidentId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = VehicleId::new();
        let b = VehicleId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = TrafficLightId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }

    #[test]
    fn id_roundtrips_through_uuid() {
        let id = IncidentId::new();
        let raw: Uuid = id.into();
        assert_eq!(IncidentId::from(raw), id);
    }

    #[test]
    fn id_serializes_as_bare_uuid() {
        let id = IntersectionId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", id.0));
    }
}
