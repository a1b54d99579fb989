use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    aqi::{AqiEstimator, RandomSource},
    directions::{fallback_routes, DirectionsProvider, DirectionsRequest},
    fanout::{estimate_all, Cancelled, FanOutLimits, SampleError},
    geometry::sample_route_points,
    models::{CalculatedRoute, PollutionLevel, RouteSource, RouteWithAqi},
};

/// Points sampled along a route for its exposure score.
pub const EXPOSURE_SAMPLE_POINTS: usize = 10;
/// Points sampled along a route for its charted AQI series.
pub const SERIES_SAMPLE_POINTS: usize = 20;
/// Range of the randomized score used when estimation fails.
const FALLBACK_SCORE_RANGE: (f64, f64) = (20.0, 80.0);

#[derive(Debug, Clone)]
pub struct RouteSet {
    pub routes: Vec<CalculatedRoute>,
    pub source: RouteSource,
}

/// Scores candidate routes by the air quality along them.
pub struct RouteExposureScorer<E, D> {
    estimator: E,
    directions: D,
    random: Arc<dyn RandomSource>,
    limits: FanOutLimits,
}

impl<E: AqiEstimator, D: DirectionsProvider> RouteExposureScorer<E, D> {
    pub fn new(
        estimator: E,
        directions: D,
        random: Arc<dyn RandomSource>,
        limits: FanOutLimits,
    ) -> Self {
        Self {
            estimator,
            directions,
            random,
            limits,
        }
    }

    /// Ask the directions backend for candidates, falling back to the three
    /// synthetic routes on any failure.
    pub async fn calculate_routes(&self, request: &DirectionsRequest) -> RouteSet {
        match self.directions.fetch_routes(request).await {
            Ok(routes) if !routes.is_empty() => RouteSet {
                routes,
                source: RouteSource::Directions,
            },
            Ok(_) => {
                tracing::warn!("directions backend returned no routes, using fallback routes");
                self.fallback(request)
            }
            Err(err) => {
                tracing::warn!("directions unavailable ({err}), using fallback routes");
                self.fallback(request)
            }
        }
    }

    fn fallback(&self, request: &DirectionsRequest) -> RouteSet {
        RouteSet {
            routes: fallback_routes(request.origin, request.destination),
            source: RouteSource::Fallback,
        }
    }

    /// Rounded mean AQI over up to [`EXPOSURE_SAMPLE_POINTS`] route points.
    ///
    /// Timed-out samples are left out of the mean. An estimator error, or no
    /// usable sample at all, yields a random score in 20..=80 instead.
    pub async fn score_route(
        &self,
        route: &CalculatedRoute,
        cancel: &CancellationToken,
    ) -> Result<u32, Cancelled> {
        let points = sample_route_points(&route.polyline, EXPOSURE_SAMPLE_POINTS);
        let samples = estimate_all(&self.estimator, &points, None, self.limits, cancel).await?;

        let mut total = 0.0;
        let mut count = 0usize;
        for sample in &samples {
            match &sample.outcome {
                Ok(aqi) => {
                    total += f64::from(*aqi);
                    count += 1;
                }
                Err(SampleError::TimedOut(after)) => {
                    tracing::debug!(
                        "route {}: sample {} timed out after {:?}",
                        route.id,
                        sample.index,
                        after
                    );
                }
                Err(SampleError::Estimate(err)) => {
                    tracing::warn!(
                        "route {}: estimate failed at sample {} ({err}), using fallback score",
                        route.id,
                        sample.index
                    );
                    return Ok(self.fallback_score());
                }
            }
        }

        if count == 0 {
            tracing::warn!(
                "route {}: no usable AQI samples, using fallback score",
                route.id
            );
            return Ok(self.fallback_score());
        }

        Ok((total / count as f64).round() as u32)
    }

    /// AQI at up to [`SERIES_SAMPLE_POINTS`] route points, in route order.
    /// Failed samples are skipped.
    pub async fn aqi_series(
        &self,
        route: &CalculatedRoute,
        cancel: &CancellationToken,
    ) -> Result<Vec<u32>, Cancelled> {
        let points = sample_route_points(&route.polyline, SERIES_SAMPLE_POINTS);
        let samples = estimate_all(&self.estimator, &points, None, self.limits, cancel).await?;
        let requested = points.len();
        let series: Vec<u32> = samples
            .into_iter()
            .filter_map(|sample| sample.outcome.ok())
            .collect();
        if series.len() < requested {
            tracing::debug!(
                "route {}: AQI series has {}/{} samples",
                route.id,
                series.len(),
                requested
            );
        }
        Ok(series)
    }

    /// Score every route, flag the single cleanest one, and sort ascending by
    /// exposure. Ties for cleanest go to the earliest route in `routes`.
    pub async fn process_batch(
        &self,
        routes: Vec<CalculatedRoute>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RouteWithAqi>, Cancelled> {
        let mut scored = Vec::with_capacity(routes.len());
        for route in routes {
            let (exposure_score, aqi_along_route) = futures::try_join!(
                self.score_route(&route, cancel),
                self.aqi_series(&route, cancel)
            )?;
            scored.push(RouteWithAqi {
                route,
                exposure_score,
                pollution_level: PollutionLevel::from_score(exposure_score),
                aqi_along_route,
                is_safest: false,
            });
        }

        mark_safest(&mut scored);
        scored.sort_by_key(|r| r.exposure_score);

        tracing::debug!(
            "scored {} routes: {:?}",
            scored.len(),
            scored
                .iter()
                .map(|r| (r.route.id.as_str(), r.exposure_score))
                .collect::<Vec<_>>()
        );
        Ok(scored)
    }

    fn fallback_score(&self) -> u32 {
        let (lo, hi) = FALLBACK_SCORE_RANGE;
        self.random.next(lo, hi).round() as u32
    }
}

fn mark_safest(routes: &mut [RouteWithAqi]) {
    // min_by_key keeps the first of equal minima
    if let Some(safest) = routes.iter_mut().min_by_key(|r| r.exposure_score) {
        safest.is_safest = true;
    }
}

pub fn format_distance(meters: f64) -> String {
    let rounded = meters.round();
    if rounded < 1000.0 {
        format!("{rounded} m")
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

pub fn format_duration(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    if minutes < 60 {
        format!("{minutes} min")
    } else {
        format!("{}h {}min", minutes / 60, minutes % 60)
    }
}
