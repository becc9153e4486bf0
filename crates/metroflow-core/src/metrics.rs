//! Metrics aggregator: per-tick statistics, dashboard indicators, and the
//! emissions estimate.

use chrono::{DateTime, Utc};
use metroflow_types::{
    EmissionsEstimate, Intersection, IntersectionReport, SimulationMetrics, TrafficMetrics, Vehicle,
};

use crate::geo;
use crate::signals::QUEUE_RADIUS_M;

/// Speed with the lowest emissions per km, km/h.
pub const OPTIMAL_SPEED_KMH: f64 = 60.0;

/// Speed proxy used when vehicles exist but none is moving, km/h.
const STANDSTILL_SPEED_PROXY_KMH: f64 = 30.0;

/// CO2 emitted per km at optimal speed, kg.
const CO2_KG_PER_KM: f64 = 0.12;

/// Fuel burned per km at optimal speed, liters.
const FUEL_L_PER_KM: f64 = 0.08;

/// NOx emitted per km at optimal speed, grams.
const NOX_G_PER_KM: f64 = 0.5;

/// Radius of an intersection report's "nearby" count, meters.
pub const REPORT_RADIUS_M: f64 = 100.0;

/// Recompute the aggregate statistics from the active vehicles.
pub fn aggregate(vehicles: &[Vehicle], vehicles_completed: u64) -> SimulationMetrics {
    let total_wait_time = vehicles.iter().map(|v| v.wait_time_seconds).sum();
    SimulationMetrics {
        total_vehicles: u32::try_from(vehicles.len()).unwrap_or(u32::MAX),
        average_speed: mean(vehicles.iter().map(|v| v.current_speed)),
        total_wait_time,
        vehicles_completed,
    }
}

/// Mean wait of halted vehicles within [`QUEUE_RADIUS_M`] of `intersection`.
///
/// Zero when nobody is waiting there.
pub fn intersection_wait(intersection: &Intersection, vehicles: &[Vehicle]) -> f64 {
    mean(
        vehicles
            .iter()
            .filter(|v| {
                v.waiting_at_light && geo::distance_m(v.position, intersection.location) <= QUEUE_RADIUS_M
            })
            .map(|v| v.wait_time_seconds),
    )
}

/// Refresh every intersection's average wait.
pub fn update_intersection_waits(intersections: &mut [Intersection], vehicles: &[Vehicle]) {
    for intersection in intersections.iter_mut() {
        intersection.average_wait_time = intersection_wait(intersection, vehicles);
    }
}

/// Hourly emissions estimate for the current traffic state.
///
/// Emission factors grow with the relative distance of the average speed
/// from [`OPTIMAL_SPEED_KMH`], and the average speed stands in for the
/// distance each vehicle covers per hour.
pub fn calculate_emissions(metrics: &SimulationMetrics) -> EmissionsEstimate {
    if metrics.total_vehicles == 0 {
        return EmissionsEstimate::default();
    }
    let count = f64::from(metrics.total_vehicles);
    let avg_speed = if metrics.average_speed > 0.0 {
        metrics.average_speed
    } else {
        STANDSTILL_SPEED_PROXY_KMH
    };
    let deviation = 1.0 + (avg_speed - OPTIMAL_SPEED_KMH).abs() / OPTIMAL_SPEED_KMH;
    let km_per_hour = avg_speed * count;

    let co2 = CO2_KG_PER_KM * deviation * km_per_hour;
    let fuel = FUEL_L_PER_KM * deviation * km_per_hour;
    let nox = NOX_G_PER_KM * deviation * km_per_hour;

    EmissionsEstimate {
        co2_kg_per_hour: co2,
        nox_grams_per_hour: nox,
        fuel_liters_per_hour: fuel,
        avg_co2_per_vehicle: co2 / count,
        avg_fuel_per_vehicle: fuel / count,
    }
}

/// 0 at or above [`OPTIMAL_SPEED_KMH`], 1 at standstill.
pub fn congestion_index(average_speed: f64) -> f64 {
    (1.0 - average_speed / OPTIMAL_SPEED_KMH).clamp(0.0, 1.0)
}

/// Inputs for [`traffic_metrics`] that do not come from the vehicle set.
#[derive(Debug, Clone, Copy)]
pub struct DashboardContext {
    /// Time of the latest tick.
    pub timestamp: DateTime<Utc>,
    /// Simulated minutes since tick 0.
    pub elapsed_minutes: f64,
    /// Active incident count.
    pub active_incidents: usize,
}

/// Dashboard indicators derived from the latest tick.
pub fn traffic_metrics(
    metrics: &SimulationMetrics,
    vehicles: &[Vehicle],
    context: DashboardContext,
) -> TrafficMetrics {
    let active = f64::from(metrics.total_vehicles);
    let waiting = vehicles.iter().filter(|v| v.waiting_at_light).count();
    TrafficMetrics {
        timestamp: context.timestamp,
        average_speed: metrics.average_speed,
        vehicles_per_minute: active / context.elapsed_minutes.max(1.0),
        congestion_index: congestion_index(metrics.average_speed),
        average_wait_time: metrics.total_wait_time / active.max(1.0),
        total_active_vehicles: metrics.total_vehicles,
        vehicles_waiting: u32::try_from(waiting).unwrap_or(u32::MAX),
        active_incidents: u32::try_from(context.active_incidents).unwrap_or(u32::MAX),
        emissions: calculate_emissions(metrics),
    }
}

/// Live indicators for one intersection.
pub fn intersection_report(intersection: &Intersection, vehicles: &[Vehicle]) -> IntersectionReport {
    let nearby: Vec<&Vehicle> = vehicles
        .iter()
        .filter(|v| geo::distance_m(v.position, intersection.location) < REPORT_RADIUS_M)
        .collect();
    let waiting = nearby.iter().filter(|v| v.waiting_at_light).count();
    IntersectionReport {
        intersection: intersection.clone(),
        nearby_vehicles: u32::try_from(nearby.len()).unwrap_or(u32::MAX),
        waiting_vehicles: u32::try_from(waiting).unwrap_or(u32::MAX),
        average_wait_time: intersection_wait(intersection, vehicles),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_u32), |(sum, count), v| (sum + v, count.saturating_add(1)));
    if count == 0 { 0.0 } else { sum / f64::from(count) }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use metroflow_types::{Coordinates, DriverProfile, IntersectionId, VehicleClass, VehicleId};

    use super::*;

    const CENTER: Coordinates = Coordinates::new(40.7128, -74.0060);

    fn vehicle(speed: f64, waiting: bool, wait: f64, position: Coordinates) -> Vehicle {
        Vehicle {
            id: VehicleId::new(),
            vehicle_class: VehicleClass::Car,
            driver_profile: DriverProfile::Normal,
            position,
            heading: 0.0,
            current_speed: speed,
            target_speed: 50.0,
            cruise_speed: 50.0,
            current_segment_id: None,
            waiting_at_light: waiting,
            held_by: None,
            wait_time_seconds: wait,
        }
    }

    fn intersection() -> Intersection {
        Intersection {
            id: IntersectionId::new(),
            location: CENTER,
            name: None,
            traffic_lights: Vec::new(),
            connected_segment_ids: Vec::new(),
            average_wait_time: 0.0,
        }
    }

    #[test]
    fn empty_set_aggregates_to_zero() {
        let m = aggregate(&[], 4);
        assert_eq!(m.total_vehicles, 0);
        assert_eq!(m.average_speed, 0.0);
        assert_eq!(m.total_wait_time, 0.0);
        assert_eq!(m.vehicles_completed, 4);
    }

    #[test]
    fn aggregate_averages_speed_and_sums_wait() {
        let vehicles = vec![
            vehicle(40.0, false, 1.0, CENTER),
            vehicle(20.0, true, 3.0, CENTER),
        ];
        let m = aggregate(&vehicles, 0);
        assert_eq!(m.total_vehicles, 2);
        assert_eq!(m.average_speed, 30.0);
        assert_eq!(m.total_wait_time, 4.0);
    }

    #[test]
    fn emissions_empty_are_all_zero() {
        assert_eq!(calculate_emissions(&SimulationMetrics::default()), EmissionsEstimate::default());
    }

    #[test]
    fn emissions_at_optimal_speed() {
        let metrics = SimulationMetrics {
            total_vehicles: 10,
            average_speed: 60.0,
            total_wait_time: 0.0,
            vehicles_completed: 0,
        };
        let e = calculate_emissions(&metrics);
        // 0.12 kg/km * 60 km/h * 10 vehicles
        assert!((e.co2_kg_per_hour - 72.0).abs() < 1e-9);
        assert!((e.fuel_liters_per_hour - 48.0).abs() < 1e-9);
        assert!((e.nox_grams_per_hour - 300.0).abs() < 1e-9);
        assert!((e.avg_co2_per_vehicle - 7.2).abs() < 1e-9);
    }

    #[test]
    fn standstill_uses_speed_proxy() {
        let metrics = SimulationMetrics {
            total_vehicles: 1,
            average_speed: 0.0,
            total_wait_time: 0.0,
            vehicles_completed: 0,
        };
        let e = calculate_emissions(&metrics);
        // deviation 1.5 at 30 km/h
        assert!((e.co2_kg_per_hour - 0.12 * 1.5 * 30.0).abs() < 1e-9);
    }

    #[test]
    fn congestion_index_is_clamped() {
        assert_eq!(congestion_index(0.0), 1.0);
        assert_eq!(congestion_index(30.0), 0.5);
        assert_eq!(congestion_index(90.0), 0.0);
    }

    #[test]
    fn intersection_wait_counts_only_nearby_waiting() {
        let near = Coordinates::new(CENTER.lat + 0.0001, CENTER.lng);
        let far = Coordinates::new(CENTER.lat + 0.01, CENTER.lng);
        let vehicles = vec![
            vehicle(0.0, true, 10.0, near),
            vehicle(0.0, true, 20.0, near),
            vehicle(0.0, true, 99.0, far),
            vehicle(30.0, false, 50.0, near),
        ];
        let mut intersections = vec![intersection()];
        update_intersection_waits(&mut intersections, &vehicles);
        assert!(intersections.iter().all(|i| (i.average_wait_time - 15.0).abs() < 1e-9));

        update_intersection_waits(&mut intersections, &[]);
        assert!(intersections.iter().all(|i| i.average_wait_time == 0.0));
    }

    #[test]
    fn dashboard_metrics_from_state() {
        let vehicles = vec![
            vehicle(30.0, false, 0.0, CENTER),
            vehicle(0.0, true, 6.0, CENTER),
        ];
        let metrics = aggregate(&vehicles, 0);
        let dashboard = traffic_metrics(
            &metrics,
            &vehicles,
            DashboardContext {
                timestamp: Utc::now(),
                elapsed_minutes: 0.5,
                active_incidents: 3,
            },
        );
        assert_eq!(dashboard.vehicles_per_minute, 2.0);
        assert_eq!(dashboard.vehicles_waiting, 1);
        assert_eq!(dashboard.average_wait_time, 3.0);
        assert_eq!(dashboard.active_incidents, 3);
        assert!((dashboard.congestion_index - 0.75).abs() < 1e-9);
    }

    #[test]
    fn report_counts_nearby_vehicles() {
        let within = Coordinates::new(CENTER.lat + 0.0005, CENTER.lng);
        let outside = Coordinates::new(CENTER.lat + 0.002, CENTER.lng);
        let vehicles = vec![
            vehicle(0.0, true, 4.0, within),
            vehicle(20.0, false, 0.0, within),
            vehicle(0.0, true, 8.0, outside),
        ];
        let report = intersection_report(&intersection(), &vehicles);
        assert_eq!(report.nearby_vehicles, 2);
        assert_eq!(report.waiting_vehicles, 1);
        // The waiting vehicle is ~56 m away, outside the 50 m queue radius.
        assert_eq!(report.average_wait_time, 0.0);
    }
}
