//! Scalar geodesy over `[longitude, latitude]` pairs in WGS84 degrees.
//!
//! Everything here works on the same `[lon, lat]` arrays the wire formats
//! use, so route geometries flow through untouched.

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude (and the conversion used for all
/// waypoint-offset math). Longitude is corrected by `cos(lat)` where the
/// shape of an exclusion circle matters.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Great-circle distance in meters between two `[lon, lat]` points.
pub fn haversine_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let lat1 = a[1].to_radians();
    let lat2 = b[1].to_radians();
    let dlat = (b[1] - a[1]).to_radians();
    let dlon = (b[0] - a[0]).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Initial bearing from `a` to `b` in degrees clockwise from north, in `[0, 360)`.
pub fn initial_bearing(a: [f64; 2], b: [f64; 2]) -> f64 {
    let lat1 = a[1].to_radians();
    let lat2 = b[1].to_radians();
    let dlon = (b[0] - a[0]).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Flat-earth distance in raw degrees. Only meaningful for comparing
/// candidates against each other over city-scale extents.
pub fn planar_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dlon = b[0] - a[0];
    let dlat = b[1] - a[1];
    (dlon * dlon + dlat * dlat).sqrt()
}

/// Unit vector perpendicular to `direction` (a `[dlon, dlat]` delta),
/// used as the side-step axis when placing avoidance waypoints.
///
/// A degenerate direction falls back to due east so callers always get a
/// usable axis.
pub fn perpendicular(direction: [f64; 2]) -> [f64; 2] {
    let magnitude = (direction[0] * direction[0] + direction[1] * direction[1]).sqrt();
    if magnitude == 0.0 {
        return [1.0, 0.0];
    }
    [direction[1] / magnitude, -direction[0] / magnitude]
}

/// Closed circular polygon of `vertices` points around `center`, radius in
/// meters. The first vertex is repeated at the end.
///
/// Latitude offset is `r / 111000`; longitude is additionally corrected by
/// `cos(lat)` so the circle keeps its shape away from the equator.
pub fn circular_polygon(center: [f64; 2], radius_meters: f64, vertices: usize) -> Vec<[f64; 2]> {
    let lat_offset = radius_meters / METERS_PER_DEGREE;
    let lon_offset = radius_meters / (METERS_PER_DEGREE * center[1].to_radians().cos());

    let mut coords = Vec::with_capacity(vertices + 1);
    for i in 0..vertices {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / vertices as f64;
        coords.push([
            center[0] + lon_offset * angle.cos(),
            center[1] + lat_offset * angle.sin(),
        ]);
    }
    coords.push(coords[0]);
    coords
}
