//! Interaction resolver: following-distance speed caps between vehicles.
//!
//! Two mechanisms run before physics integration, both against a snapshot
//! of vehicle kinematics taken at the start of the vehicle phase so the
//! result does not depend on update order:
//!
//! - **Time headway**: a vehicle keeps a 2-second gap to the nearest leader
//!   ahead of it, capping its target at 90% of the leader's speed when the
//!   gap is violated.
//! - **Close proximity**: any two similarly-headed vehicles closer than the
//!   minimum following distance cap the follower the same way.
//!
//! The proximity pass is a plain O(n²) scan over active vehicles.

use std::collections::HashMap;

use metroflow_types::{Coordinates, Vehicle, VehicleId};

use crate::geo;
use crate::physics::KMH_PER_MS;

/// Leaders farther away than this are ignored by the headway check, meters.
pub const HEADWAY_LOOKAHEAD_M: f64 = 200.0;

/// Target time gap to the vehicle ahead, seconds.
pub const HEADWAY_SECONDS: f64 = 2.0;

/// Widest heading or bearing difference treated as "same direction", degrees.
pub const SAME_DIRECTION_DEG: f64 = 45.0;

/// Fraction of the leader's speed a follower is capped at.
pub const FOLLOW_SPEED_FACTOR: f64 = 0.9;

/// Kinematic state of one vehicle at the start of the vehicle phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    /// Vehicle ID.
    pub id: VehicleId,
    /// Position.
    pub position: Coordinates,
    /// Heading, degrees.
    pub heading: f64,
    /// Current speed, km/h.
    pub speed: f64,
}

impl From<&Vehicle> for Kinematics {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            id: vehicle.id,
            position: vehicle.position,
            heading: vehicle.heading,
            speed: vehicle.current_speed,
        }
    }
}

/// Capture the kinematics of every vehicle.
pub fn snapshot(vehicles: &[Vehicle]) -> Vec<Kinematics> {
    vehicles.iter().map(Kinematics::from).collect()
}

/// Speed cap from the nearest leader ahead of `vehicle`, if the 2-second
/// gap (never less than `min_following_distance`) is violated.
pub fn headway_cap(vehicle: &Kinematics, others: &[Kinematics], min_following_distance: f64) -> Option<f64> {
    let leader = others
        .iter()
        .filter(|other| other.id != vehicle.id)
        .filter(|other| geo::forward_projection(vehicle.position, vehicle.heading, other.position) > 0.0)
        .filter(|other| {
            let bearing = geo::bearing_deg(vehicle.position, other.position);
            geo::heading_difference(bearing, vehicle.heading) <= SAME_DIRECTION_DEG
        })
        .map(|other| (other, geo::distance_m(vehicle.position, other.position)))
        .filter(|(_, gap)| *gap <= HEADWAY_LOOKAHEAD_M)
        .min_by(|a, b| a.1.total_cmp(&b.1))?;

    let (leader, gap) = leader;
    let safe_gap = (vehicle.speed / KMH_PER_MS * HEADWAY_SECONDS).max(min_following_distance);
    (gap < safe_gap).then(|| leader.speed * FOLLOW_SPEED_FACTOR)
}

/// Whether `a` sits behind `b` relative to `b`'s heading.
pub fn is_behind(a: &Kinematics, b: &Kinematics) -> bool {
    geo::forward_projection(b.position, b.heading, a.position) < 0.0
}

/// Follower caps from every too-close, similarly-headed pair.
///
/// A follower involved in several pairs keeps the lowest cap.
pub fn proximity_caps(vehicles: &[Kinematics], min_following_distance: f64) -> HashMap<VehicleId, f64> {
    let mut caps: HashMap<VehicleId, f64> = HashMap::new();
    for (index, first) in vehicles.iter().enumerate() {
        for second in vehicles.iter().skip(index.saturating_add(1)) {
            if geo::distance_m(first.position, second.position) >= min_following_distance {
                continue;
            }
            if geo::heading_difference(first.heading, second.heading) >= SAME_DIRECTION_DEG {
                continue;
            }
            let (follower, leader) = if is_behind(first, second) {
                (first, second)
            } else {
                (second, first)
            };
            let cap = leader.speed * FOLLOW_SPEED_FACTOR;
            caps.entry(follower.id)
                .and_modify(|existing| *existing = existing.min(cap))
                .or_insert(cap);
        }
    }
    caps
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const ORIGIN: Coordinates = Coordinates::new(40.7128, -74.0060);

    fn at(lat_offset: f64, heading: f64, speed: f64) -> Kinematics {
        Kinematics {
            id: VehicleId::new(),
            position: Coordinates::new(ORIGIN.lat + lat_offset, ORIGIN.lng),
            heading,
            speed,
        }
    }

    #[test]
    fn close_leader_caps_follower() {
        // 2 s at 50 km/h is ~28 m; leader is ~11 m ahead.
        let follower = at(0.0, 0.0, 50.0);
        let leader = at(0.0001, 0.0, 20.0);
        let cap = headway_cap(&follower, &[follower, leader], 5.0).unwrap();
        assert!((cap - 18.0).abs() < 1e-9);
    }

    #[test]
    fn distant_or_behind_vehicles_do_not_cap() {
        let follower = at(0.0, 0.0, 50.0);
        let far_ahead = at(0.001, 0.0, 20.0);
        let behind = at(-0.0001, 0.0, 20.0);
        assert!(headway_cap(&follower, &[far_ahead, behind], 5.0).is_none());
    }

    #[test]
    fn leader_outside_cone_is_ignored() {
        let follower = at(0.0, 90.0, 50.0);
        // Directly north while facing east: outside ±45°.
        let north = at(0.0001, 90.0, 10.0);
        assert!(headway_cap(&follower, &[north], 5.0).is_none());
    }

    #[test]
    fn nearest_leader_wins() {
        let follower = at(0.0, 0.0, 80.0);
        let near = at(0.0001, 0.0, 30.0);
        let farther = at(0.0002, 0.0, 5.0);
        let cap = headway_cap(&follower, &[farther, near], 5.0).unwrap();
        assert!((cap - 27.0).abs() < 1e-9);
    }

    #[test]
    fn proximity_caps_the_vehicle_behind() {
        let back = at(0.0, 0.0, 30.0);
        let front = at(0.00002, 0.0, 10.0);
        let caps = proximity_caps(&[front, back], 5.0);
        assert_eq!(caps.len(), 1);
        assert!((caps[&back.id] - 9.0).abs() < 1e-9);
    }

    #[test]
    fn opposite_headings_do_not_interact() {
        let a = at(0.0, 0.0, 30.0);
        let b = at(0.00002, 180.0, 10.0);
        assert!(proximity_caps(&[a, b], 5.0).is_empty());
    }

    #[test]
    fn headings_across_north_count_as_same_direction() {
        let back = at(0.0, 355.0, 30.0);
        let front = at(0.00002, 5.0, 10.0);
        let caps = proximity_caps(&[back, front], 5.0);
        assert!(caps.contains_key(&back.id));
    }
}
