pub use shared::{
    AqiCategory, AqiHeatmapPoint, AqiReading, ApiError, BoundingBox, CalculatedRoute, Coordinate,
    ForecastFrame, ForecastRequest, ForecastResponse, GridExposureRequest, GridExposureResponse,
    HeatmapConfig, HeatmapGradient, HeatmapLevel, HeatmapRequest, HeatmapResponse, PollutionLevel,
    RouteSegment, RouteSource, RouteWithAqi, RoutesRequest, RoutesResponse, ScoreRoutesRequest,
    TimeFilter, TravelMode, MAX_AQI_INTENSITY,
};
