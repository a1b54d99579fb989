use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    geometry::{decode_polyline, encode_polyline, haversine_m},
    models::{BoundingBox, CalculatedRoute, Coordinate, RouteSegment, TravelMode},
};

pub const DEFAULT_DIRECTIONS_URL: &str =
    "https://routes.googleapis.com/directions/v2:computeRoutes";

const FIELD_MASK: &str = "routes.distanceMeters,routes.duration,routes.polyline.encodedPolyline,\
routes.description,routes.legs.distanceMeters,routes.legs.duration,\
routes.legs.polyline.encodedPolyline,routes.legs.steps.navigationInstruction.instructions";

/// Degrees added to (or removed from) the midpoint of the fallback detours.
const FALLBACK_DETOUR_OFFSET: f64 = 0.005;

#[derive(Debug, Clone, Copy)]
pub struct DirectionsRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub travel_mode: TravelMode,
    pub alternatives: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("directions backend is not configured")]
    NotConfigured,
    #[error("directions request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("directions backend answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("directions response is malformed: {0}")]
    Malformed(String),
    #[error("directions response contains no routes")]
    NoRoutes,
}

/// Source of candidate routes between two points.
///
/// Errors are expected to be recovered by the caller (see
/// [`fallback_routes`]); implementations should not retry internally.
pub trait DirectionsProvider: Send + Sync {
    fn fetch_routes(
        &self,
        request: &DirectionsRequest,
    ) -> impl Future<Output = Result<Vec<CalculatedRoute>, RoutingError>> + Send;
}

/// Client for a computeRoutes-style HTTP directions backend.
#[derive(Clone)]
pub struct DirectionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl DirectionsClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RoutingError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// Client without credentials; every request fails with `NotConfigured`.
    pub fn offline() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: String::new(),
            api_key: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl DirectionsProvider for DirectionsClient {
    async fn fetch_routes(
        &self,
        request: &DirectionsRequest,
    ) -> Result<Vec<CalculatedRoute>, RoutingError> {
        let api_key = self.api_key.as_deref().ok_or(RoutingError::NotConfigured)?;

        let body = ComputeRoutesBody {
            origin: ApiWaypoint::from(request.origin),
            destination: ApiWaypoint::from(request.destination),
            travel_mode: travel_mode_name(request.travel_mode),
            compute_alternative_routes: request.alternatives,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoutingError::Status(status));
        }

        let bytes = response.bytes().await?;
        let payload: ComputeRoutesResponse = serde_json::from_slice(&bytes)
            .map_err(|err| RoutingError::Malformed(err.to_string()))?;

        let mut routes = routes_from_response(payload)?;
        if !request.alternatives {
            routes.truncate(1);
        }
        tracing::debug!("directions backend returned {} routes", routes.len());
        Ok(routes)
    }
}

fn travel_mode_name(mode: TravelMode) -> &'static str {
    match mode {
        TravelMode::Driving => "DRIVE",
        TravelMode::Walking => "WALK",
        TravelMode::Bicycling => "BICYCLE",
        TravelMode::Transit => "TRANSIT",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoutesBody {
    origin: ApiWaypoint,
    destination: ApiWaypoint,
    travel_mode: &'static str,
    compute_alternative_routes: bool,
}

#[derive(Debug, Serialize)]
struct ApiWaypoint {
    location: ApiLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiLocation {
    lat_lng: ApiLatLng,
}

#[derive(Debug, Serialize)]
struct ApiLatLng {
    latitude: f64,
    longitude: f64,
}

impl From<Coordinate> for ApiWaypoint {
    fn from(coord: Coordinate) -> Self {
        Self {
            location: ApiLocation {
                lat_lng: ApiLatLng {
                    latitude: coord.lat,
                    longitude: coord.lon,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ComputeRoutesResponse {
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRoute {
    #[serde(default)]
    distance_meters: f64,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    polyline: Option<ApiPolyline>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPolyline {
    encoded_polyline: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiLeg {
    #[serde(default)]
    distance_meters: f64,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    polyline: Option<ApiPolyline>,
    #[serde(default)]
    steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiStep {
    #[serde(default)]
    navigation_instruction: Option<ApiInstruction>,
}

#[derive(Debug, Deserialize)]
struct ApiInstruction {
    #[serde(default)]
    instructions: String,
}

/// Convert a directions payload into routes. A route without a decodable
/// polyline or with an unreadable duration rejects the whole payload.
pub fn routes_from_response(
    payload: ComputeRoutesResponse,
) -> Result<Vec<CalculatedRoute>, RoutingError> {
    if payload.routes.is_empty() {
        return Err(RoutingError::NoRoutes);
    }
    payload
        .routes
        .into_iter()
        .enumerate()
        .map(|(index, route)| route_from_api(index, route))
        .collect()
}

fn route_from_api(index: usize, route: ApiRoute) -> Result<CalculatedRoute, RoutingError> {
    let encoded_polyline = route
        .polyline
        .map(|p| p.encoded_polyline)
        .ok_or_else(|| RoutingError::Malformed(format!("route {index} has no polyline")))?;
    let polyline = decode_polyline(&encoded_polyline);
    let bounds = BoundingBox::enclosing(&polyline)
        .ok_or_else(|| RoutingError::Malformed(format!("route {index} has an empty polyline")))?;
    let duration_s = parse_duration(route.duration.as_deref())?;

    let segments = if route.legs.is_empty() {
        vec![RouteSegment {
            points: polyline.clone(),
            distance_m: route.distance_meters,
            duration_s,
            steps: Vec::new(),
        }]
    } else {
        route
            .legs
            .into_iter()
            .map(|leg| {
                Ok(RouteSegment {
                    points: leg
                        .polyline
                        .map(|p| decode_polyline(&p.encoded_polyline))
                        .unwrap_or_default(),
                    distance_m: leg.distance_meters,
                    duration_s: parse_duration(leg.duration.as_deref())?,
                    steps: leg
                        .steps
                        .into_iter()
                        .filter_map(|step| step.navigation_instruction)
                        .map(|instruction| instruction.instructions)
                        .filter(|text| !text.is_empty())
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, RoutingError>>()?
    };

    Ok(CalculatedRoute {
        id: format!("route-{index}"),
        segments,
        distance_m: route.distance_meters,
        duration_s,
        bounds,
        polyline,
        encoded_polyline,
        summary: route
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Route {}", index + 1)),
    })
}

/// Parse a protobuf-style duration such as `"845s"` or `"12.5s"`.
/// A missing duration counts as zero.
pub fn parse_duration(raw: Option<&str>) -> Result<u64, RoutingError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    let seconds: f64 = raw
        .trim()
        .strip_suffix('s')
        .and_then(|n| n.parse().ok())
        .filter(|s: &f64| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| RoutingError::Malformed(format!("invalid duration {raw:?}")))?;
    Ok(seconds.round() as u64)
}

/// Three synthetic candidates used whenever the directions backend cannot
/// answer: a straight line and two detours through a shifted midpoint.
pub fn fallback_routes(origin: Coordinate, destination: Coordinate) -> Vec<CalculatedRoute> {
    let direct_m = haversine_m(origin, destination);
    let midpoint = origin.interpolate(destination, 0.5);

    vec![
        synthetic_route(
            "fallback-direct",
            "Direct Route",
            vec![origin, destination],
            direct_m,
            720,
        ),
        synthetic_route(
            "fallback-north",
            "Northern Route",
            vec![
                origin,
                midpoint.offset(FALLBACK_DETOUR_OFFSET, FALLBACK_DETOUR_OFFSET),
                destination,
            ],
            direct_m * 1.2,
            900,
        ),
        synthetic_route(
            "fallback-south",
            "Southern Route",
            vec![
                origin,
                midpoint.offset(-FALLBACK_DETOUR_OFFSET, -FALLBACK_DETOUR_OFFSET),
                destination,
            ],
            direct_m * 1.15,
            840,
        ),
    ]
}

fn synthetic_route(
    id: &str,
    summary: &str,
    points: Vec<Coordinate>,
    distance_m: f64,
    duration_s: u64,
) -> CalculatedRoute {
    // points always holds origin and destination
    let bounds = BoundingBox::enclosing(&points).unwrap_or(BoundingBox {
        northeast: points[0],
        southwest: points[0],
    });
    let encoded_polyline = encode_polyline(&points).unwrap_or_else(|err| {
        tracing::warn!("{id}: {err}, leaving encoded polyline empty");
        String::new()
    });
    CalculatedRoute {
        id: id.to_string(),
        segments: vec![RouteSegment {
            points: points.clone(),
            distance_m,
            duration_s,
            steps: vec![
                format!("Head towards destination via {summary}"),
                "Arrive at destination".to_string(),
            ],
        }],
        distance_m,
        duration_s,
        bounds,
        encoded_polyline,
        polyline: points,
        summary: summary.to_string(),
    }
}
