//! Distance, bearing, and position-integration helpers.
//!
//! Every other engine module measures the world through these functions.
//! The model is deliberately flat: distances use an equirectangular
//! approximation, and movement integrates with 1 degree of latitude taken
//! as 111 km. Both are accurate to well under a percent at city scale.
//!
//! Arithmetic edge cases never raise. Near the poles the longitude scale
//! factor is floored, and integrated positions are clamped into the valid
//! coordinate ranges.

use metroflow_types::{BoundingBox, Coordinates};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Kilometers per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.0;

/// Smallest longitude scale factor used near the poles.
const MIN_COS_LAT: f64 = 1e-6;

/// Errors raised when validating externally supplied geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    /// A coordinate component is NaN or infinite.
    #[error("{field}: coordinate is not a finite number")]
    NotFinite {
        /// Name of the offending value.
        field: &'static str,
    },

    /// Latitude outside `[-90, 90]`.
    #[error("{field}: latitude {value} out of range (-90 to 90)")]
    LatitudeOutOfRange {
        /// Name of the offending value.
        field: &'static str,
        /// The rejected latitude.
        value: f64,
    },

    /// Longitude outside `[-180, 180]`.
    #[error("{field}: longitude {value} out of range (-180 to 180)")]
    LongitudeOutOfRange {
        /// Name of the offending value.
        field: &'static str,
        /// The rejected longitude.
        value: f64,
    },

    /// A bounding box whose edges are inverted or degenerate.
    #[error("bounding box: {reason}")]
    InvertedBox {
        /// What is wrong with the box.
        reason: &'static str,
    },
}

/// Approximate ground distance between two points, in meters.
///
/// Equirectangular projection around the mean latitude of the pair.
pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat_diff = (b.lat - a.lat).to_radians();
    let lng_diff = (b.lng - a.lng).to_radians();
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();

    let x = lng_diff * mean_lat.cos();
    let y = lat_diff;
    x.hypot(y) * EARTH_RADIUS_M
}

/// Planar distance between two points measured in raw degrees.
///
/// Incident influence radii are expressed in degrees and compared against
/// this value.
pub fn degree_distance(a: Coordinates, b: Coordinates) -> f64 {
    (b.lat - a.lat).hypot(b.lng - a.lng)
}

/// Initial bearing from `a` to `b` in degrees, `[0, 360)`.
pub fn bearing_deg(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos().mul_add(lat2.sin(), -(lat1.sin() * lat2.cos() * d_lng.cos()));
    normalize_heading(y.atan2(x).to_degrees())
}

/// Wrap any angle in degrees into `[0, 360)`.
pub fn normalize_heading(heading: f64) -> f64 {
    if !heading.is_finite() {
        return 0.0;
    }
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Smallest absolute angle between two headings, `[0, 180]`.
pub fn heading_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs().rem_euclid(360.0);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// Unit direction vector `(east, north)` for a compass heading.
pub fn heading_vector(heading: f64) -> (f64, f64) {
    let rad = heading.to_radians();
    (rad.sin(), rad.cos())
}

/// Project the offset from `origin` to `point` onto `heading`.
///
/// Positive means `point` lies ahead of `origin` when facing `heading`.
/// The result is in degree units and only its sign and ordering matter.
pub fn forward_projection(origin: Coordinates, heading: f64, point: Coordinates) -> f64 {
    let (east, north) = heading_vector(heading);
    let dx = point.lng - origin.lng;
    let dy = point.lat - origin.lat;
    dx.mul_add(east, dy * north)
}

/// Move `position` by `distance_km` along `heading` on a flat earth.
///
/// One degree of latitude is [`KM_PER_DEGREE`]; one degree of longitude is
/// that scaled by the cosine of the current latitude, floored so it never
/// collapses to zero at the poles. The result is clamped into valid ranges.
pub fn advance(position: Coordinates, heading: f64, distance_km: f64) -> Coordinates {
    let (east, north) = heading_vector(heading);
    let cos_lat = position.lat.to_radians().cos().abs().max(MIN_COS_LAT);

    let lat_change = distance_km * north / KM_PER_DEGREE;
    let lng_change = distance_km * east / (KM_PER_DEGREE * cos_lat);

    Coordinates::new(position.lat + lat_change, position.lng + lng_change).clamped()
}

/// Validate a single coordinate pair.
pub fn validate_coordinates(coord: Coordinates, field: &'static str) -> Result<(), GeoError> {
    if !coord.is_finite() {
        return Err(GeoError::NotFinite { field });
    }
    if coord.lat.abs() > 90.0 {
        return Err(GeoError::LatitudeOutOfRange {
            field,
            value: coord.lat,
        });
    }
    if coord.lng.abs() > 180.0 {
        return Err(GeoError::LongitudeOutOfRange {
            field,
            value: coord.lng,
        });
    }
    Ok(())
}

/// Validate a bounding box: finite, in range, north above south, east of west.
pub fn validate_bounding_box(bbox: &BoundingBox) -> Result<(), GeoError> {
    validate_coordinates(Coordinates::new(bbox.north, bbox.east), "bounding box north-east")?;
    validate_coordinates(Coordinates::new(bbox.south, bbox.west), "bounding box south-west")?;
    if bbox.north <= bbox.south {
        return Err(GeoError::InvertedBox {
            reason: "north must be greater than south",
        });
    }
    if bbox.east <= bbox.west {
        return Err(GeoError::InvertedBox {
            reason: "east must be greater than west",
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    const NYC: Coordinates = Coordinates::new(40.7128, -74.0060);

    #[test]
    fn distance_of_one_thousandth_degree_latitude() {
        let north = Coordinates::new(NYC.lat + 0.001, NYC.lng);
        let d = distance_m(NYC, north);
        // 0.001 deg * (pi/180) * 6371 km ~= 111.2 m
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_for_same_point() {
        let other = Coordinates::new(40.72, -74.01);
        assert!((distance_m(NYC, other) - distance_m(other, NYC)).abs() < 1e-9);
        assert_eq!(distance_m(NYC, NYC), 0.0);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let north = Coordinates::new(NYC.lat + 0.01, NYC.lng);
        let east = Coordinates::new(NYC.lat, NYC.lng + 0.01);
        let south = Coordinates::new(NYC.lat - 0.01, NYC.lng);
        assert!(bearing_deg(NYC, north).abs() < 0.01);
        assert!((bearing_deg(NYC, east) - 90.0).abs() < 0.1);
        assert!((bearing_deg(NYC, south) - 180.0).abs() < 0.01);
    }

    #[test]
    fn heading_normalization() {
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(-90.0), 270.0);
        assert_eq!(normalize_heading(725.0), 5.0);
        assert_eq!(normalize_heading(f64::NAN), 0.0);
        assert!(normalize_heading(-1e-20) < 360.0);
    }

    #[test]
    fn heading_difference_wraps() {
        assert_eq!(heading_difference(350.0, 10.0), 20.0);
        assert_eq!(heading_difference(10.0, 350.0), 20.0);
        assert_eq!(heading_difference(0.0, 180.0), 180.0);
    }

    #[test]
    fn forward_projection_sign() {
        let ahead = Coordinates::new(NYC.lat + 0.001, NYC.lng);
        let behind = Coordinates::new(NYC.lat - 0.001, NYC.lng);
        assert!(forward_projection(NYC, 0.0, ahead) > 0.0);
        assert!(forward_projection(NYC, 0.0, behind) < 0.0);
    }

    #[test]
    fn advance_north_by_111_km_is_one_degree() {
        let moved = advance(Coordinates::new(0.0, 0.0), 0.0, 111.0);
        assert!((moved.lat - 1.0).abs() < 1e-9);
        assert!(moved.lng.abs() < 1e-9);
    }

    #[test]
    fn advance_near_pole_stays_finite_and_clamped() {
        let pole = Coordinates::new(90.0, 179.9);
        let moved = advance(pole, 90.0, 1.0);
        assert!(moved.is_finite());
        assert!(moved.lat <= 90.0 && moved.lng <= 180.0);
    }

    #[test]
    fn coordinate_validation() {
        assert!(validate_coordinates(NYC, "c").is_ok());
        assert!(matches!(
            validate_coordinates(Coordinates::new(91.0, 0.0), "c"),
            Err(GeoError::LatitudeOutOfRange { .. })
        ));
        assert!(matches!(
            validate_coordinates(Coordinates::new(0.0, -181.0), "c"),
            Err(GeoError::LongitudeOutOfRange { .. })
        ));
        assert!(matches!(
            validate_coordinates(Coordinates::new(f64::NAN, 0.0), "c"),
            Err(GeoError::NotFinite { .. })
        ));
    }

    #[test]
    fn bounding_box_validation() {
        let good = BoundingBox {
            north: 41.0,
            south: 40.0,
            east: -73.0,
            west: -75.0,
        };
        assert!(validate_bounding_box(&good).is_ok());

        let inverted = BoundingBox {
            north: 40.0,
            south: 41.0,
            ..good
        };
        assert!(matches!(
            validate_bounding_box(&inverted),
            Err(GeoError::InvertedBox { .. })
        ));
    }
}
