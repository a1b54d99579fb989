use geo_types::{Coord, LineString};

use crate::models::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Five decimal places, the precision used by directions backends.
const POLYLINE_PRECISION: u32 = 5;

#[derive(Debug, thiserror::Error)]
#[error("cannot encode polyline: {0}")]
pub struct PolylineError(String);

/// Decode a Google encoded polyline into coordinates.
///
/// Malformed input yields an empty path.
pub fn decode_polyline(encoded: &str) -> Vec<Coordinate> {
    match polyline::decode_polyline(encoded, POLYLINE_PRECISION) {
        Ok(line) => line
            .into_inner()
            .into_iter()
            .map(|c| Coordinate { lat: c.y, lon: c.x })
            .collect(),
        Err(err) => {
            tracing::warn!("malformed polyline of {} bytes: {err}", encoded.len());
            Vec::new()
        }
    }
}

/// Encode coordinates with five decimal places of precision. Coordinates
/// outside valid latitude/longitude ranges are rejected.
pub fn encode_polyline(path: &[Coordinate]) -> Result<String, PolylineError> {
    let line: LineString<f64> = path
        .iter()
        .map(|c| Coord { x: c.lon, y: c.lat })
        .collect();
    polyline::encode_coordinates(line, POLYLINE_PRECISION).map_err(|e| PolylineError(e.to_string()))
}

/// Great-circle distance in meters.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

pub fn path_distance_m(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Thin a polyline down to at most `max_points` by taking every
/// `len / max_points`-th point from the start. The final point is only kept
/// when the stride lands on it.
pub fn sample_route_points(points: &[Coordinate], max_points: usize) -> Vec<Coordinate> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    if max_points == 0 {
        return Vec::new();
    }

    let stride = points.len() / max_points;
    points
        .iter()
        .step_by(stride)
        .take(max_points)
        .copied()
        .collect()
}
