//! Per-vehicle kinematics: speed convergence and position integration.
//!
//! Speeds are km/h and rates m/s². A rate is turned into a per-tick speed
//! change as `rate * dt * 3.6`, so one tick can never move a vehicle's
//! speed further than its profile-scaled acceleration or deceleration allows.

use metroflow_types::{Vehicle, VehicleId};

use crate::config::SimulationConfig;
use crate::geo;

/// km/h per m/s.
pub const KMH_PER_MS: f64 = 3.6;

/// Extra distance added to the braking distance when looking for lights, meters.
pub const STOP_BUFFER_M: f64 = 10.0;

/// Speed at which acceleration attenuation reaches its full 30%, km/h.
const ATTENUATION_REFERENCE_KMH: f64 = 120.0;

/// Errors raised while updating a single vehicle. The vehicle is evicted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VehicleError {
    /// A kinematic field became NaN or infinite.
    #[error("vehicle {vehicle_id}: {field} is not finite")]
    NonFinite {
        /// The vehicle that failed.
        vehicle_id: VehicleId,
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Fraction of full acceleration available at `speed` km/h.
pub fn acceleration_attenuation(speed: f64) -> f64 {
    (1.0 - (speed / ATTENUATION_REFERENCE_KMH) * 0.3).max(0.1)
}

/// Largest per-tick speed increase and decrease for `vehicle`, km/h.
pub fn speed_change_limits(vehicle: &Vehicle, dt: f64, config: &SimulationConfig) -> (f64, f64) {
    let modifier = vehicle.driver_profile.acceleration_multiplier();
    let up = config.base_acceleration
        * modifier
        * acceleration_attenuation(vehicle.current_speed)
        * dt
        * KMH_PER_MS;
    let down = config.base_deceleration * modifier * dt * KMH_PER_MS;
    (up, down)
}

/// Move `current_speed` toward `target_speed` by at most one tick's worth of
/// acceleration or deceleration, never overshooting the target.
pub fn approach_target(vehicle: &mut Vehicle, dt: f64, config: &SimulationConfig) {
    let target = vehicle.target_speed.max(0.0);
    let (up, down) = speed_change_limits(vehicle, dt, config);
    let speed = vehicle.current_speed;

    vehicle.current_speed = if target > speed {
        (speed + up).min(target)
    } else if target < speed {
        (speed - down).max(target)
    } else {
        speed
    }
    .max(0.0);
}

/// Distance needed to stop from `speed_kmh` at `deceleration` m/s², meters.
pub fn braking_distance_m(speed_kmh: f64, deceleration: f64) -> f64 {
    if deceleration <= 0.0 {
        return f64::INFINITY;
    }
    speed_kmh * speed_kmh / (2.0 * deceleration * KMH_PER_MS)
}

/// Distance within which a halting light stops the vehicle, meters.
pub fn stopping_horizon_m(vehicle: &Vehicle, config: &SimulationConfig) -> f64 {
    braking_distance_m(vehicle.current_speed, config.base_deceleration) + STOP_BUFFER_M
}

/// Advance the vehicle along its heading for one tick.
pub fn integrate_position(vehicle: &mut Vehicle, dt: f64) {
    let distance_km = vehicle.current_speed * dt / 3600.0;
    vehicle.position = geo::advance(vehicle.position, vehicle.heading, distance_km);
}

/// Reject vehicles whose kinematic state is no longer a number.
pub fn ensure_finite(vehicle: &Vehicle) -> Result<(), VehicleError> {
    let checks = [
        ("position", vehicle.position.is_finite()),
        ("heading", vehicle.heading.is_finite()),
        ("current_speed", vehicle.current_speed.is_finite()),
        ("target_speed", vehicle.target_speed.is_finite()),
        ("wait_time_seconds", vehicle.wait_time_seconds.is_finite()),
    ];
    match checks.into_iter().find(|(_, ok)| !ok) {
        Some((field, _)) => Err(VehicleError::NonFinite {
            vehicle_id: vehicle.id,
            field,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use metroflow_types::{Coordinates, DriverProfile, VehicleClass};

    use super::*;

    fn vehicle(profile: DriverProfile, speed: f64, target: f64) -> Vehicle {
        Vehicle {
            id: VehicleId::new(),
            vehicle_class: VehicleClass::Car,
            driver_profile: profile,
            position: Coordinates::new(40.7128, -74.0060),
            heading: 0.0,
            current_speed: speed,
            target_speed: target,
            cruise_speed: target,
            current_segment_id: None,
            waiting_at_light: false,
            held_by: None,
            wait_time_seconds: 0.0,
        }
    }

    #[test]
    fn attenuation_floor_and_shape() {
        assert_eq!(acceleration_attenuation(0.0), 1.0);
        assert!((acceleration_attenuation(120.0) - 0.7).abs() < 1e-12);
        assert_eq!(acceleration_attenuation(1000.0), 0.1);
    }

    #[test]
    fn normal_driver_reaches_45_kmh_within_100_ticks() {
        let config = SimulationConfig::default();
        let mut v = vehicle(DriverProfile::Normal, 0.0, 50.0);
        let mut ticks = 0;
        while v.current_speed < 45.0 && ticks < 100 {
            approach_target(&mut v, 0.1, &config);
            ticks += 1;
        }
        assert!(v.current_speed >= 45.0, "only {} after {ticks} ticks", v.current_speed);
    }

    #[test]
    fn speed_never_overshoots_target() {
        let config = SimulationConfig::default();
        let mut v = vehicle(DriverProfile::Aggressive, 59.9, 60.0);
        approach_target(&mut v, 0.1, &config);
        assert_eq!(v.current_speed, 60.0);

        let mut slowing = vehicle(DriverProfile::Normal, 10.1, 10.0);
        approach_target(&mut slowing, 0.1, &config);
        assert_eq!(slowing.current_speed, 10.0);
    }

    #[test]
    fn deceleration_is_bounded_per_tick() {
        let config = SimulationConfig::default();
        let mut v = vehicle(DriverProfile::Learner, 50.0, 0.0);
        approach_target(&mut v, 0.1, &config);
        // 4.0 m/s² * 0.5 * 0.1 s * 3.6
        assert!((v.current_speed - (50.0 - 0.72)).abs() < 1e-9);
    }

    #[test]
    fn negative_target_still_leaves_speed_non_negative() {
        let config = SimulationConfig::default();
        let mut v = vehicle(DriverProfile::Aggressive, 0.5, -10.0);
        approach_target(&mut v, 1.0, &config);
        assert_eq!(v.current_speed, 0.0);
    }

    #[test]
    fn braking_distance_formula() {
        // 36 km/h at 4 m/s²
        let d = braking_distance_m(36.0, 4.0);
        assert!((d - 1296.0 / 28.8).abs() < 1e-9);
        assert_eq!(braking_distance_m(0.0, 4.0), 0.0);
    }

    #[test]
    fn integration_moves_along_heading() {
        let mut v = vehicle(DriverProfile::Normal, 36.0, 36.0);
        let start = v.position;
        integrate_position(&mut v, 1.0);
        assert!(v.position.lat > start.lat);
        assert!((v.position.lng - start.lng).abs() < 1e-12);
        // 10 m north
        assert!((geo::distance_m(start, v.position) - 10.0).abs() < 0.1);
    }

    #[test]
    fn non_finite_state_is_reported() {
        let mut v = vehicle(DriverProfile::Normal, 0.0, 50.0);
        assert!(ensure_finite(&v).is_ok());
        v.current_speed = f64::NAN;
        assert!(matches!(
            ensure_finite(&v),
            Err(VehicleError::NonFinite {
                field: "current_speed",
                ..
            })
        ));
    }
}
