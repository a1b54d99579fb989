use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }

    pub fn offset(self, dlat: f64, dlon: f64) -> Self {
        Self {
            lat: self.lat + dlat,
            lon: self.lon + dlon,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Rectangular region described by its north-east and south-west corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub northeast: Coordinate,
    pub southwest: Coordinate,
}

impl BoundingBox {
    /// Smallest box containing every point. `None` for an empty slice.
    pub fn enclosing(points: &[Coordinate]) -> Option<Self> {
        let first = points.first()?;
        let mut northeast = *first;
        let mut southwest = *first;
        for p in &points[1..] {
            northeast.lat = northeast.lat.max(p.lat);
            northeast.lon = northeast.lon.max(p.lon);
            southwest.lat = southwest.lat.min(p.lat);
            southwest.lon = southwest.lon.min(p.lon);
        }
        Some(Self {
            northeast,
            southwest,
        })
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.lat >= self.southwest.lat
            && coord.lat <= self.northeast.lat
            && coord.lon >= self.southwest.lon
            && coord.lon <= self.northeast.lon
    }

    pub fn is_ordered(&self) -> bool {
        self.northeast.lat >= self.southwest.lat && self.northeast.lon >= self.southwest.lon
    }
}

/// Hour, weekday and month used to modulate AQI estimates.
///
/// `day` counts from Sunday (0) to Saturday (6); `month` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeFilter {
    pub hour: u32,
    pub day: u32,
    pub month: u32,
}

impl TimeFilter {
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            hour: at.hour(),
            day: at.weekday().num_days_from_sunday(),
            month: at.month(),
        }
    }

    pub fn is_rush_hour(&self) -> bool {
        (7..=9).contains(&self.hour) || (17..=19).contains(&self.hour)
    }

    pub fn is_weekend(&self) -> bool {
        self.day == 0 || self.day == 6
    }

    pub fn is_winter(&self) -> bool {
        self.month >= 11 || self.month <= 2
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Bicycling,
    Transit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub points: Vec<Coordinate>,
    pub distance_m: f64,
    pub duration_s: u64,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedRoute {
    pub id: String,
    pub segments: Vec<RouteSegment>,
    pub distance_m: f64,
    pub duration_s: u64,
    pub bounds: BoundingBox,
    pub polyline: Vec<Coordinate>,
    #[serde(default)]
    pub encoded_polyline: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollutionLevel {
    Low,
    Moderate,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl PollutionLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s < 30 => Self::Low,
            s if s < 50 => Self::Moderate,
            s if s < 70 => Self::High,
            _ => Self::VeryHigh,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Moderate => "Moderate",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteWithAqi {
    #[serde(flatten)]
    pub route: CalculatedRoute,
    pub exposure_score: u32,
    pub pollution_level: PollutionLevel,
    pub aqi_along_route: Vec<u32>,
    pub is_safest: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqiHeatmapPoint {
    pub location: Coordinate,
    pub aqi: u32,
    pub intensity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitive => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapGradient {
    pub colors: Vec<String>,
    pub start_points: Vec<f64>,
    pub color_map_size: u32,
}

/// Rendering parameters handed to the map layer alongside the points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapConfig {
    pub radius: u32,
    pub opacity: f64,
    pub max_intensity: f64,
    pub gradient: HeatmapGradient,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            radius: 50,
            opacity: 0.7,
            max_intensity: MAX_AQI_INTENSITY,
            gradient: HeatmapGradient {
                colors: ["#00E400", "#FFFF00", "#FF7E00", "#FF0000", "#8F3F97", "#7E0023"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                start_points: vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0],
                color_map_size: 256,
            },
        }
    }
}

/// AQI value that maps to full heatmap intensity.
pub const MAX_AQI_INTENSITY: f64 = 150.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    #[serde(default)]
    pub travel_mode: TravelMode,
    #[serde(default = "default_alternatives")]
    pub alternatives: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Directions,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesResponse {
    pub routes: Vec<RouteWithAqi>,
    pub source: RouteSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safest_gpx_base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRoutesRequest {
    pub routes: Vec<CalculatedRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapRequest {
    pub bounds: BoundingBox,
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    #[serde(default)]
    pub time: Option<TimeFilter>,
    /// Skip the current-time modulation when no explicit `time` is given.
    #[serde(default)]
    pub ignore_time: bool,
    #[serde(default)]
    pub min_aqi: Option<u32>,
    #[serde(default)]
    pub max_aqi: Option<u32>,
    #[serde(default = "default_hotspot_threshold")]
    pub hotspot_threshold: u32,
    #[serde(default)]
    pub level: HeatmapLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapResponse {
    pub points: Vec<AqiHeatmapPoint>,
    pub config: HeatmapConfig,
    pub average_aqi: u32,
    pub hotspots: Vec<AqiHeatmapPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub bounds: BoundingBox,
    #[serde(default = "default_forecast_hours")]
    pub hours: u32,
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastFrame {
    pub hour_offset: u32,
    pub time: TimeFilter,
    pub points: Vec<AqiHeatmapPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub frames: Vec<ForecastFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridExposureRequest {
    pub route: Vec<Coordinate>,
    pub grid: Vec<AqiHeatmapPoint>,
    #[serde(default = "default_proximity_threshold")]
    pub proximity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridExposureResponse {
    pub exposure_score: u32,
    pub pollution_level: PollutionLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AqiReading {
    pub location: Coordinate,
    pub aqi: u32,
    pub category: AqiCategory,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

pub fn default_alternatives() -> bool {
    true
}

pub fn default_grid_size() -> u32 {
    20
}

pub fn default_hotspot_threshold() -> u32 {
    100
}

pub fn default_forecast_hours() -> u32 {
    6
}

pub fn default_proximity_threshold() -> f64 {
    0.001
}
