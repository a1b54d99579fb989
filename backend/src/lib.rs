pub mod aqi;
pub mod clock;
pub mod config;
pub mod directions;
pub mod error;
pub mod exposure;
pub mod fanout;
pub mod geometry;
pub mod gpx_export;
pub mod heatmap;
pub mod models;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::aqi::{category_for, color_for, AqiEstimator, RandomSource, SyntheticAqiEstimator};
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::directions::{DirectionsClient, DirectionsRequest, RoutingError};
use crate::error::AppError;
use crate::exposure::RouteExposureScorer;
use crate::gpx_export::encode_route_as_gpx;
use crate::heatmap::{
    filter_by_range, find_hotspots, get_config, region_average, route_exposure_from_grid,
    HeatmapGenerator,
};
use crate::models::{
    AqiReading, Coordinate, ForecastRequest, ForecastResponse, GridExposureRequest,
    GridExposureResponse, HeatmapConfig, HeatmapLevel, HeatmapRequest, HeatmapResponse,
    PollutionLevel, RouteWithAqi, RoutesRequest, RoutesResponse, ScoreRoutesRequest, TimeFilter,
};

pub type Scorer = RouteExposureScorer<SyntheticAqiEstimator, DirectionsClient>;

#[derive(Clone)]
pub struct AppState {
    pub scorer: Arc<Scorer>,
    pub heatmap: Arc<HeatmapGenerator<SyntheticAqiEstimator>>,
    pub estimator: SyntheticAqiEstimator,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RoutingError> {
        let directions = DirectionsClient::new(
            config.directions_url.clone(),
            config.directions_api_key.clone(),
            config.directions_timeout,
        )?;
        Ok(Self::with_directions(config, directions, random, clock))
    }

    pub fn with_directions(
        config: &ServerConfig,
        directions: DirectionsClient,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let estimator = SyntheticAqiEstimator::new(random.clone());
        let scorer = RouteExposureScorer::new(estimator.clone(), directions, random, config.limits);
        let heatmap =
            HeatmapGenerator::new(estimator.clone(), clock, config.limits, config.heatmap);
        Self {
            scorer: Arc::new(scorer),
            heatmap: Arc::new(heatmap),
            estimator,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/routes", post(routes_handler))
        .route("/api/routes/score", post(score_routes_handler))
        .route("/api/heatmap", post(heatmap_handler))
        .route("/api/heatmap/forecast", post(forecast_handler))
        .route("/api/heatmap/exposure", post(grid_exposure_handler))
        .route("/api/heatmap/config/:level", get(heatmap_config_handler))
        .route("/api/aqi", get(aqi_handler))
        .with_state(state)
}

/// Token cancelled when the handler future is dropped, i.e. when the client
/// goes away mid-request.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

fn ensure_valid(name: &str, coord: Coordinate) -> Result<(), AppError> {
    if coord.is_valid() {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "{name} ({}, {}) is outside valid latitude/longitude ranges",
            coord.lat, coord.lon
        )))
    }
}

async fn routes_handler(
    State(state): State<AppState>,
    Json(req): Json<RoutesRequest>,
) -> Result<Json<RoutesResponse>, AppError> {
    ensure_valid("origin", req.origin)?;
    ensure_valid("destination", req.destination)?;
    let (cancel, _guard) = request_token();

    let request = DirectionsRequest {
        origin: req.origin,
        destination: req.destination,
        travel_mode: req.travel_mode,
        alternatives: req.alternatives,
    };
    let route_set = state.scorer.calculate_routes(&request).await;
    let routes = state.scorer.process_batch(route_set.routes, &cancel).await?;

    let safest_gpx_base64 = routes
        .iter()
        .find(|r| r.is_safest)
        .map(|r| encode_route_as_gpx(&r.route))
        .transpose()?;

    tracing::info!(
        "ranked {} routes from {:?} source",
        routes.len(),
        route_set.source
    );
    Ok(Json(RoutesResponse {
        routes,
        source: route_set.source,
        safest_gpx_base64,
    }))
}

async fn score_routes_handler(
    State(state): State<AppState>,
    Json(req): Json<ScoreRoutesRequest>,
) -> Result<Json<Vec<RouteWithAqi>>, AppError> {
    let (cancel, _guard) = request_token();
    let routes = state.scorer.process_batch(req.routes, &cancel).await?;
    Ok(Json(routes))
}

async fn heatmap_handler(
    State(state): State<AppState>,
    Json(req): Json<HeatmapRequest>,
) -> Result<Json<HeatmapResponse>, AppError> {
    let min_aqi = req.min_aqi.unwrap_or(0);
    let max_aqi = req.max_aqi.unwrap_or(u32::MAX);
    if min_aqi > max_aqi {
        return Err(AppError::BadRequest(format!(
            "min_aqi {min_aqi} is greater than max_aqi {max_aqi}"
        )));
    }
    let time = match (req.time, req.ignore_time) {
        (Some(time), _) => Some(validate_time(time)?),
        (None, true) => None,
        (None, false) => Some(state.heatmap.current_time_filter()),
    };
    let (cancel, _guard) = request_token();

    let grid = state
        .heatmap
        .generate_grid(&req.bounds, req.grid_size, time, &cancel)
        .await?;
    let average_aqi = region_average(&grid);
    let hotspots = find_hotspots(&grid, req.hotspot_threshold);
    let points = if req.min_aqi.is_some() || req.max_aqi.is_some() {
        filter_by_range(&grid, min_aqi, max_aqi)
    } else {
        grid
    };

    Ok(Json(HeatmapResponse {
        points,
        config: get_config(req.level),
        average_aqi,
        hotspots,
    }))
}

async fn forecast_handler(
    State(state): State<AppState>,
    Json(req): Json<ForecastRequest>,
) -> Result<Json<ForecastResponse>, AppError> {
    let (cancel, _guard) = request_token();
    let frames = state
        .heatmap
        .generate_forecast(&req.bounds, req.hours, req.grid_size, &cancel)
        .await?;
    Ok(Json(ForecastResponse { frames }))
}

async fn grid_exposure_handler(
    Json(req): Json<GridExposureRequest>,
) -> Result<Json<GridExposureResponse>, AppError> {
    if !req.proximity_threshold.is_finite() || req.proximity_threshold < 0.0 {
        return Err(AppError::BadRequest(format!(
            "proximity_threshold must be a non-negative number, got {}",
            req.proximity_threshold
        )));
    }
    let exposure_score = route_exposure_from_grid(&req.route, &req.grid, req.proximity_threshold);
    Ok(Json(GridExposureResponse {
        exposure_score,
        pollution_level: PollutionLevel::from_score(exposure_score),
    }))
}

async fn heatmap_config_handler(Path(level): Path<HeatmapLevel>) -> Json<HeatmapConfig> {
    Json(get_config(level))
}

#[derive(Debug, Deserialize)]
struct AqiQuery {
    lat: f64,
    lon: f64,
    hour: Option<u32>,
    day: Option<u32>,
    month: Option<u32>,
}

async fn aqi_handler(
    State(state): State<AppState>,
    Query(query): Query<AqiQuery>,
) -> Result<Json<AqiReading>, AppError> {
    let location = Coordinate::new(query.lat, query.lon);
    let time = match (query.hour, query.day, query.month) {
        (Some(hour), Some(day), Some(month)) => Some(validate_time(TimeFilter { hour, day, month })?),
        _ => None,
    };
    let aqi = state.estimator.estimate(location, time).await?;
    Ok(Json(AqiReading {
        location,
        aqi,
        category: category_for(aqi),
        color: color_for(aqi).to_string(),
    }))
}

fn validate_time(time: TimeFilter) -> Result<TimeFilter, AppError> {
    if time.hour > 23 || time.day > 6 || !(1..=12).contains(&time.month) {
        return Err(AppError::BadRequest(format!(
            "time filter out of range: hour {}, day {}, month {}",
            time.hour, time.day, time.month
        )));
    }
    Ok(time)
}
