use std::{net::SocketAddr, time::Duration};

use axum::{
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use cleanroute::{
    directions::{DirectionsClient, DirectionsProvider, DirectionsRequest, RoutingError},
    models::{Coordinate, TravelMode},
};
use serde_json::{json, Value};

async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> DirectionsClient {
    DirectionsClient::new(
        format!("http://{addr}/directions"),
        Some("test-key".into()),
        Duration::from_secs(2),
    )
    .unwrap()
}

fn request(alternatives: bool) -> DirectionsRequest {
    DirectionsRequest {
        origin: Coordinate::new(38.5, -120.2),
        destination: Coordinate::new(43.252, -126.453),
        travel_mode: TravelMode::Walking,
        alternatives,
    }
}

fn two_routes() -> Value {
    json!({
        "routes": [
            {
                "distanceMeters": 1200.0,
                "duration": "845s",
                "description": "Main St",
                "polyline": {"encodedPolyline": "_p~iF~ps|U_ulLnnqC_mqNvxq`@"},
                "legs": [{
                    "distanceMeters": 1200.0,
                    "duration": "845s",
                    "polyline": {"encodedPolyline": "_p~iF~ps|U_ulLnnqC_mqNvxq`@"},
                    "steps": [
                        {"navigationInstruction": {"instructions": "Head north"}},
                        {"navigationInstruction": {"instructions": "Turn left"}}
                    ]
                }]
            },
            {
                "distanceMeters": 1500.0,
                "duration": "960s",
                "polyline": {"encodedPolyline": "_p~iF~ps|U_ulLnnqC"}
            }
        ]
    })
}

async fn directions(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("x-goog-api-key")
        .is_some_and(|key| key == "test-key");
    let masked = headers.contains_key("x-goog-fieldmask");
    if !authorized || !masked {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "denied"})));
    }
    if body["travelMode"] != "WALK"
        || body["origin"]["location"]["latLng"]["latitude"] != 38.5
    {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "bad body"})));
    }
    (StatusCode::OK, Json(two_routes()))
}

#[tokio::test]
async fn parses_routes_from_backend() {
    let addr = spawn_backend(Router::new().route("/directions", post(directions))).await;
    let routes = client(addr).fetch_routes(&request(true)).await.unwrap();

    assert_eq!(routes.len(), 2);
    let first = &routes[0];
    assert_eq!(first.id, "route-0");
    assert_eq!(first.summary, "Main St");
    assert_eq!(first.duration_s, 845);
    assert_eq!(first.polyline.len(), 3);
    assert_eq!(first.segments.len(), 1);
    assert_eq!(first.segments[0].steps, vec!["Head north", "Turn left"]);
    assert_eq!(routes[1].summary, "Route 2");
    assert_eq!(routes[1].polyline.len(), 2);
}

#[tokio::test]
async fn single_route_when_alternatives_disabled() {
    let addr = spawn_backend(Router::new().route("/directions", post(directions))).await;
    let routes = client(addr).fetch_routes(&request(false)).await.unwrap();
    assert_eq!(routes.len(), 1);
}

#[tokio::test]
async fn wrong_key_surfaces_status() {
    let addr = spawn_backend(Router::new().route("/directions", post(directions))).await;
    let client = DirectionsClient::new(
        format!("http://{addr}/directions"),
        Some("other".into()),
        Duration::from_secs(2),
    )
    .unwrap();
    let err = client.fetch_routes(&request(true)).await.unwrap_err();
    assert!(matches!(err, RoutingError::Status(StatusCode::FORBIDDEN)));
}

#[tokio::test]
async fn server_error_surfaces_status() {
    let app = Router::new().route(
        "/directions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let addr = spawn_backend(app).await;
    let err = client(addr).fetch_routes(&request(true)).await.unwrap_err();
    assert!(matches!(
        err,
        RoutingError::Status(StatusCode::INTERNAL_SERVER_ERROR)
    ));
}

#[tokio::test]
async fn empty_route_list_is_an_error() {
    let app = Router::new().route("/directions", post(|| async { Json(json!({})) }));
    let addr = spawn_backend(app).await;
    let err = client(addr).fetch_routes(&request(true)).await.unwrap_err();
    assert!(matches!(err, RoutingError::NoRoutes));
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let app = Router::new().route("/directions", post(|| async { "<html>nope</html>" }));
    let addr = spawn_backend(app).await;
    let err = client(addr).fetch_routes(&request(true)).await.unwrap_err();
    assert!(matches!(err, RoutingError::Malformed(_)));
}

#[tokio::test]
async fn offline_client_is_not_configured() {
    let client = DirectionsClient::offline();
    assert!(!client.is_configured());
    let err = client.fetch_routes(&request(true)).await.unwrap_err();
    assert!(matches!(err, RoutingError::NotConfigured));
}
