use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeDelta, Utc};
use kdtree::{distance::squared_euclidean, KdTree};
use lru::LruCache;
use tokio_util::sync::CancellationToken;

use crate::{
    aqi::AqiEstimator,
    clock::Clock,
    fanout::{estimate_all, Cancelled, FanOutLimits},
    models::{
        AqiHeatmapPoint, BoundingBox, Coordinate, ForecastFrame, HeatmapConfig, HeatmapLevel,
        TimeFilter, MAX_AQI_INTENSITY,
    },
};

/// Exposure reported when no route point is near any grid point.
pub const NEUTRAL_EXPOSURE: u32 = 50;
pub const DEFAULT_PROXIMITY_THRESHOLD: f64 = 0.001;
pub const DEFAULT_HOTSPOT_THRESHOLD: u32 = 100;
pub const MAX_FORECAST_HOURS: u32 = 48;

#[derive(Debug, thiserror::Error)]
pub enum HeatmapError {
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("grid size must be between 1 and {max}, got {got}")]
    InvalidGridSize { got: u32, max: u32 },
    #[error("forecast must cover 1 to {max} hours, got {got}")]
    InvalidForecastHours { got: u32, max: u32 },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone, Copy)]
pub struct HeatmapSettings {
    pub max_grid_size: u32,
    /// Zero disables the grid cache.
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            max_grid_size: 100,
            cache_capacity: 32,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Bounds are keyed on their exact bit patterns: cached points must lie on
/// the lattice of the requested box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GridKey {
    bounds: [u64; 4],
    grid_size: u32,
    time: Option<TimeFilter>,
}

impl GridKey {
    fn new(bounds: &BoundingBox, grid_size: u32, time: Option<TimeFilter>) -> Self {
        Self {
            bounds: [
                bounds.northeast.lat.to_bits(),
                bounds.northeast.lon.to_bits(),
                bounds.southwest.lat.to_bits(),
                bounds.southwest.lon.to_bits(),
            ],
            grid_size,
            time,
        }
    }
}

struct GridCache {
    entries: Mutex<LruCache<GridKey, (Instant, Vec<AqiHeatmapPoint>)>>,
    ttl: Duration,
}

impl GridCache {
    fn get(&self, key: &GridKey) -> Option<Vec<AqiHeatmapPoint>> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((stored_at, grid)) if stored_at.elapsed() <= self.ttl => Some(grid.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: GridKey, grid: Vec<AqiHeatmapPoint>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key, (Instant::now(), grid));
        }
    }
}

/// Builds AQI grids over a bounding box.
pub struct HeatmapGenerator<E> {
    estimator: E,
    clock: Arc<dyn Clock>,
    limits: FanOutLimits,
    max_grid_size: u32,
    cache: Option<GridCache>,
}

impl<E: AqiEstimator> HeatmapGenerator<E> {
    pub fn new(
        estimator: E,
        clock: Arc<dyn Clock>,
        limits: FanOutLimits,
        settings: HeatmapSettings,
    ) -> Self {
        let cache = NonZeroUsize::new(settings.cache_capacity).map(|capacity| GridCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: settings.cache_ttl,
        });
        Self {
            estimator,
            clock,
            limits,
            max_grid_size: settings.max_grid_size,
            cache,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn current_time_filter(&self) -> TimeFilter {
        TimeFilter::from_datetime(&self.clock.now())
    }

    /// Sample the estimator on a `(grid_size + 1)²` lattice over `bounds`,
    /// row-major from the south-west corner (latitude outer, longitude inner).
    ///
    /// Cells whose estimate fails or times out are left out.
    pub async fn generate_grid(
        &self,
        bounds: &BoundingBox,
        grid_size: u32,
        time: Option<TimeFilter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AqiHeatmapPoint>, HeatmapError> {
        validate_bounds(bounds)?;
        self.validate_grid_size(grid_size)?;

        let key = GridKey::new(bounds, grid_size, time);
        if let Some(grid) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            tracing::debug!("heatmap cache hit for {grid_size}x{grid_size} grid");
            return Ok(grid);
        }

        let coords = grid_coordinates(bounds, grid_size);
        let samples = estimate_all(&self.estimator, &coords, time, self.limits, cancel).await?;
        let timestamp = self.clock.now();

        let mut failed = 0usize;
        let grid: Vec<AqiHeatmapPoint> = samples
            .into_iter()
            .filter_map(|sample| match sample.outcome {
                Ok(aqi) => Some(heatmap_point(sample.coord, aqi, timestamp)),
                Err(_) => {
                    failed += 1;
                    None
                }
            })
            .collect();

        tracing::debug!(
            "generated heatmap grid: {} of {} cells, {} failed, average AQI {}",
            grid.len(),
            coords.len(),
            failed,
            region_average(&grid)
        );

        if let Some(cache) = &self.cache {
            if grid.len() == coords.len() {
                cache.put(key, grid.clone());
            }
        }
        Ok(grid)
    }

    /// One grid per hour from now, each modulated by that hour's time filter.
    pub async fn generate_forecast(
        &self,
        bounds: &BoundingBox,
        hours: u32,
        grid_size: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<ForecastFrame>, HeatmapError> {
        validate_bounds(bounds)?;
        self.validate_grid_size(grid_size)?;
        if hours == 0 || hours > MAX_FORECAST_HOURS {
            return Err(HeatmapError::InvalidForecastHours {
                got: hours,
                max: MAX_FORECAST_HOURS,
            });
        }

        let start = self.clock.now();
        let mut frames = Vec::with_capacity(hours as usize);
        for hour_offset in 0..hours {
            let at = start + TimeDelta::hours(i64::from(hour_offset));
            let time = TimeFilter::from_datetime(&at);
            let points = self
                .generate_grid(bounds, grid_size, Some(time), cancel)
                .await?;
            frames.push(ForecastFrame {
                hour_offset,
                time,
                points,
            });
        }
        tracing::debug!("generated {hours}-hour heatmap forecast");
        Ok(frames)
    }

    fn validate_grid_size(&self, grid_size: u32) -> Result<(), HeatmapError> {
        if grid_size == 0 || grid_size > self.max_grid_size {
            return Err(HeatmapError::InvalidGridSize {
                got: grid_size,
                max: self.max_grid_size,
            });
        }
        Ok(())
    }
}

pub fn validate_bounds(bounds: &BoundingBox) -> Result<(), HeatmapError> {
    for (name, corner) in [("northeast", bounds.northeast), ("southwest", bounds.southwest)] {
        if !corner.is_valid() {
            return Err(HeatmapError::InvalidBounds(format!(
                "{name} corner ({}, {}) is outside valid latitude/longitude ranges",
                corner.lat, corner.lon
            )));
        }
    }
    if bounds.northeast.lat < bounds.southwest.lat {
        return Err(HeatmapError::InvalidBounds(format!(
            "northeast latitude {} is south of southwest latitude {}",
            bounds.northeast.lat, bounds.southwest.lat
        )));
    }
    if bounds.northeast.lon < bounds.southwest.lon {
        return Err(HeatmapError::InvalidBounds(format!(
            "northeast longitude {} is west of southwest longitude {}",
            bounds.northeast.lon, bounds.southwest.lon
        )));
    }
    Ok(())
}

fn grid_coordinates(bounds: &BoundingBox, grid_size: u32) -> Vec<Coordinate> {
    let sw = bounds.southwest;
    let steps = f64::from(grid_size);
    let lat_step = (bounds.northeast.lat - sw.lat) / steps;
    let lon_step = (bounds.northeast.lon - sw.lon) / steps;

    let side = grid_size as usize + 1;
    let mut coords = Vec::with_capacity(side * side);
    for i in 0..=grid_size {
        let lat = sw.lat + f64::from(i) * lat_step;
        for j in 0..=grid_size {
            coords.push(Coordinate {
                lat,
                lon: sw.lon + f64::from(j) * lon_step,
            });
        }
    }
    coords
}

fn heatmap_point(location: Coordinate, aqi: u32, timestamp: DateTime<Utc>) -> AqiHeatmapPoint {
    AqiHeatmapPoint {
        location,
        aqi,
        intensity: (f64::from(aqi) / MAX_AQI_INTENSITY).min(1.0),
        timestamp,
    }
}

/// Points with `min_aqi <= aqi <= max_aqi`, in grid order.
pub fn filter_by_range(grid: &[AqiHeatmapPoint], min_aqi: u32, max_aqi: u32) -> Vec<AqiHeatmapPoint> {
    grid.iter()
        .filter(|p| p.aqi >= min_aqi && p.aqi <= max_aqi)
        .cloned()
        .collect()
}

/// Points with `aqi >= threshold`, worst first.
pub fn find_hotspots(grid: &[AqiHeatmapPoint], threshold: u32) -> Vec<AqiHeatmapPoint> {
    let mut hotspots: Vec<AqiHeatmapPoint> =
        grid.iter().filter(|p| p.aqi >= threshold).cloned().collect();
    hotspots.sort_by(|a, b| b.aqi.cmp(&a.aqi));
    hotspots
}

/// Rounded mean AQI; 0 for an empty grid.
pub fn region_average(grid: &[AqiHeatmapPoint]) -> u32 {
    if grid.is_empty() {
        return 0;
    }
    let total: f64 = grid.iter().map(|p| f64::from(p.aqi)).sum();
    (total / grid.len() as f64).round() as u32
}

/// Exposure along `route` read from a precomputed grid.
///
/// Each route point averages the AQI of grid points within `threshold`
/// degrees (planar distance on raw lat/lon, not geodesic). The result is the
/// rounded mean of those per-point averages over route points that had any
/// neighbour, or [`NEUTRAL_EXPOSURE`] if none did.
pub fn route_exposure_from_grid(
    route: &[Coordinate],
    grid: &[AqiHeatmapPoint],
    threshold: f64,
) -> u32 {
    if route.is_empty() || grid.is_empty() || !(threshold >= 0.0) {
        return NEUTRAL_EXPOSURE;
    }

    // Identical locations are merged before indexing; the tree cannot split
    // a bucket of equal points.
    let mut merged: HashMap<(u64, u64), (Coordinate, f64, u32)> = HashMap::new();
    for p in grid {
        let entry = merged
            .entry((p.location.lat.to_bits(), p.location.lon.to_bits()))
            .or_insert((p.location, 0.0, 0));
        entry.1 += f64::from(p.aqi);
        entry.2 += 1;
    }

    let mut index: KdTree<f64, (f64, u32), [f64; 2]> = KdTree::new(2);
    for (location, sum, count) in merged.into_values() {
        if let Err(err) = index.add([location.lat, location.lon], (sum, count)) {
            tracing::debug!("skipping grid point {location:?}: {err:?}");
        }
    }

    let radius = threshold * threshold;
    let mut total = 0.0;
    let mut matched = 0usize;
    for coord in route {
        let Ok(neighbours) = index.within(&[coord.lat, coord.lon], radius, &squared_euclidean)
        else {
            continue;
        };
        let (sum, count) = neighbours
            .iter()
            .fold((0.0, 0u32), |(sum, count), (_, (s, c))| (sum + s, count + c));
        if count == 0 {
            continue;
        }
        total += sum / f64::from(count);
        matched += 1;
    }

    if matched == 0 {
        return NEUTRAL_EXPOSURE;
    }
    (total / matched as f64).round() as u32
}

/// Display preset for a heatmap layer. Only opacity and radius vary.
pub fn get_config(level: HeatmapLevel) -> HeatmapConfig {
    let config = HeatmapConfig::default();
    match level {
        HeatmapLevel::Low => HeatmapConfig {
            opacity: 0.5,
            radius: 30,
            ..config
        },
        HeatmapLevel::Medium => config,
        HeatmapLevel::High => HeatmapConfig {
            opacity: 0.9,
            radius: 70,
            ..config
        },
    }
}
