use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};

use crate::error::ExportError;
use crate::models::{CalculatedRoute, Coordinate};

/// Serialize a route's polyline as a single-track GPX 1.1 document, base64
/// encoded for embedding in JSON.
pub fn encode_route_as_gpx(route: &CalculatedRoute) -> Result<String, ExportError> {
    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("cleanroute".into()),
        ..Default::default()
    };
    let mut track = Track {
        name: Some(route.summary.clone()),
        ..Default::default()
    };

    let mut segment = TrackSegment::new();
    segment.points.extend(route.polyline.iter().map(to_waypoint));
    track.segments.push(segment);
    gpx.tracks.push(track);

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)?;
    Ok(BASE64.encode(buffer))
}

fn to_waypoint(coord: &Coordinate) -> Waypoint {
    Waypoint::new(Point::new(coord.lon, coord.lat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::fallback_routes;

    #[test]
    fn gpx_contains_route_points() {
        let routes = fallback_routes(Coordinate::new(48.85, 2.35), Coordinate::new(48.86, 2.36));
        let encoded = encode_route_as_gpx(&routes[1]).unwrap();
        let xml = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();

        let parsed = gpx::read(xml.as_bytes()).unwrap();
        assert_eq!(parsed.creator.as_deref(), Some("cleanroute"));
        let track = &parsed.tracks[0];
        assert_eq!(track.name.as_deref(), Some(routes[1].summary.as_str()));
        let points = &track.segments[0].points;
        assert_eq!(points.len(), routes[1].polyline.len());
        let first = points[0].point();
        assert!((first.y() - 48.85).abs() < 1e-9);
        assert!((first.x() - 2.35).abs() < 1e-9);
    }
}
