use std::{cmp::Ordering, future::Future, sync::Arc};

use rand::Rng;

use crate::models::{AqiCategory, Coordinate, TimeFilter};

pub const AQI_FLOOR: f64 = 10.0;
pub const AQI_CEILING: f64 = 150.0;
const BASE_AQI: f64 = 50.0;
const INDUSTRIAL_THRESHOLD: f64 = 0.7;
const NOISE_AMPLITUDE: f64 = 5.0;

/// Source of uniform noise, injectable so estimates can be pinned in tests.
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[lo, hi)`. Returns `lo` when the range is empty.
    fn next(&self, lo: f64, hi: f64) -> f64;
}

/// Thread-local uniform generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next(&self, lo: f64, hi: f64) -> f64 {
        match lo.partial_cmp(&hi) {
            Some(Ordering::Less) => rand::rng().random_range(lo..hi),
            _ => lo,
        }
    }
}

/// Always yields the same value, clamped into the requested range.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next(&self, lo: f64, hi: f64) -> f64 {
        self.0.max(lo).min(hi)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("coordinate ({lat}, {lon}) is outside valid latitude/longitude ranges")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("air quality source unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable AQI source used by both the route scorer and the heatmap.
///
/// Implementations may suspend (a real sensor feed is a network call); the
/// pipelines bound every call with a timeout.
pub trait AqiEstimator: Send + Sync + 'static {
    fn estimate(
        &self,
        coord: Coordinate,
        time: Option<TimeFilter>,
    ) -> impl Future<Output = Result<u32, EstimateError>> + Send;
}

/// Synthetic pollution surface built from geographic harmonics.
///
/// # Model
/// ```text
/// base  = 50
/// base += sin(lat·50)·cos(lon·50) · 20           urban pattern
/// base += 30 if sin(lat·100)·sin(lon·100) > 0.7   industrial pockets
/// base += |sin(lat·200)|·|cos(lon·200)| · 15     traffic
/// base += 15 rush hour, -10 weekend, +10 winter  (only with a time filter)
/// base += uniform(-5, 5)                          sensor noise
/// aqi   = round(clamp(base, 10, 150))
/// ```
/// Angles are the raw degree values fed to `sin`/`cos` as radians. The model
/// is a stand-in for a real feed, not a physical simulation.
#[derive(Clone)]
pub struct SyntheticAqiEstimator {
    random: Arc<dyn RandomSource>,
}

impl SyntheticAqiEstimator {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }
}

impl Default for SyntheticAqiEstimator {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRandom))
    }
}

impl AqiEstimator for SyntheticAqiEstimator {
    async fn estimate(
        &self,
        coord: Coordinate,
        time: Option<TimeFilter>,
    ) -> Result<u32, EstimateError> {
        if !coord.is_valid() {
            return Err(EstimateError::InvalidCoordinate {
                lat: coord.lat,
                lon: coord.lon,
            });
        }
        Ok(estimate_aqi(coord, time.as_ref(), self.random.as_ref()))
    }
}

pub fn estimate_aqi(coord: Coordinate, time: Option<&TimeFilter>, random: &dyn RandomSource) -> u32 {
    let mut base = BASE_AQI;

    let urban = (coord.lat * 50.0).sin() * (coord.lon * 50.0).cos();
    base += urban * 20.0;

    let industrial = (coord.lat * 100.0).sin() * (coord.lon * 100.0).sin();
    if industrial > INDUSTRIAL_THRESHOLD {
        base += 30.0;
    }

    let traffic = (coord.lat * 200.0).sin().abs() * (coord.lon * 200.0).cos().abs();
    base += traffic * 15.0;

    if let Some(time) = time {
        if time.is_rush_hour() {
            base += 15.0;
        }
        if time.is_weekend() {
            base -= 10.0;
        }
        if time.is_winter() {
            base += 10.0;
        }
    }

    base += random.next(-NOISE_AMPLITUDE, NOISE_AMPLITUDE);

    // max/min rather than clamp: a NaN base collapses to the floor
    base.max(AQI_FLOOR).min(AQI_CEILING).round() as u32
}

pub fn category_for(aqi: u32) -> AqiCategory {
    match aqi {
        0..=50 => AqiCategory::Good,
        51..=100 => AqiCategory::Moderate,
        101..=150 => AqiCategory::UnhealthyForSensitive,
        151..=200 => AqiCategory::Unhealthy,
        201..=300 => AqiCategory::VeryUnhealthy,
        _ => AqiCategory::Hazardous,
    }
}

pub fn color_for(aqi: u32) -> &'static str {
    match category_for(aqi) {
        AqiCategory::Good => "#00E400",
        AqiCategory::Moderate => "#FFFF00",
        AqiCategory::UnhealthyForSensitive => "#FF7E00",
        AqiCategory::Unhealthy => "#FF0000",
        AqiCategory::VeryUnhealthy => "#8F3F97",
        AqiCategory::Hazardous => "#7E0023",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARIS: Coordinate = Coordinate {
        lat: 48.8566,
        lon: 2.3522,
    };

    fn pinned(coord: Coordinate, time: Option<TimeFilter>) -> u32 {
        estimate_aqi(coord, time.as_ref(), &FixedRandom(0.0))
    }

    fn at(hour: u32, day: u32, month: u32) -> Option<TimeFilter> {
        Some(TimeFilter { hour, day, month })
    }

    #[test]
    fn origin_is_base_value() {
        assert_eq!(pinned(Coordinate::new(0.0, 0.0), None), 50);
    }

    #[test]
    fn known_locations() {
        assert_eq!(pinned(PARIS, None), 62);
        assert_eq!(pinned(Coordinate::new(51.5074, -0.1278), None), 39);
        assert_eq!(pinned(Coordinate::new(1.0, 0.0), None), 58);
    }

    #[test]
    fn industrial_pocket_adds_thirty() {
        assert_eq!(pinned(Coordinate::new(0.009, 0.016), None), 101);
    }

    #[test]
    fn time_modulation() {
        let origin = Coordinate::new(0.0, 0.0);
        // Wednesday noon in June: no modulation
        assert_eq!(pinned(origin, at(12, 3, 6)), 50);
        assert_eq!(pinned(origin, at(8, 3, 6)), 65);
        assert_eq!(pinned(origin, at(18, 3, 6)), 65);
        assert_eq!(pinned(origin, at(12, 0, 6)), 40);
        assert_eq!(pinned(origin, at(12, 6, 6)), 40);
        assert_eq!(pinned(origin, at(12, 3, 12)), 60);
        assert_eq!(pinned(origin, at(8, 6, 1)), 65);
        assert_eq!(pinned(PARIS, at(8, 2, 12)), 87);
    }

    #[test]
    fn noise_is_bounded_by_source() {
        let origin = Coordinate::new(0.0, 0.0);
        assert_eq!(estimate_aqi(origin, None, &FixedRandom(5.0)), 55);
        assert_eq!(estimate_aqi(origin, None, &FixedRandom(-5.0)), 45);
        // Out-of-range pins are clamped by the source
        assert_eq!(estimate_aqi(origin, None, &FixedRandom(100.0)), 55);
    }

    #[test]
    fn non_finite_coordinates_collapse_to_floor() {
        assert_eq!(pinned(Coordinate::new(f64::NAN, 0.0), None), 10);
    }

    #[tokio::test]
    async fn estimator_rejects_invalid_coordinates() {
        let estimator = SyntheticAqiEstimator::new(Arc::new(FixedRandom(0.0)));
        let err = estimator
            .estimate(Coordinate::new(91.0, 0.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EstimateError::InvalidCoordinate { .. }));
        assert_eq!(estimator.estimate(PARIS, None).await.unwrap(), 62);
    }

    #[test]
    fn thread_random_stays_in_range() {
        let random = ThreadRandom;
        for _ in 0..1_000 {
            let v = random.next(-5.0, 5.0);
            assert!((-5.0..5.0).contains(&v));
        }
        assert_eq!(random.next(3.0, 3.0), 3.0);
    }

    #[test]
    fn categories_follow_epa_breakpoints() {
        assert_eq!(category_for(0), AqiCategory::Good);
        assert_eq!(category_for(50), AqiCategory::Good);
        assert_eq!(category_for(51), AqiCategory::Moderate);
        assert_eq!(category_for(100), AqiCategory::Moderate);
        assert_eq!(category_for(101), AqiCategory::UnhealthyForSensitive);
        assert_eq!(category_for(150), AqiCategory::UnhealthyForSensitive);
        assert_eq!(category_for(200), AqiCategory::Unhealthy);
        assert_eq!(category_for(300), AqiCategory::VeryUnhealthy);
        assert_eq!(category_for(301), AqiCategory::Hazardous);
    }

    #[test]
    fn colors_follow_categories() {
        assert_eq!(color_for(42), "#00E400");
        assert_eq!(color_for(75), "#FFFF00");
        assert_eq!(color_for(120), "#FF7E00");
        assert_eq!(color_for(180), "#FF0000");
        assert_eq!(color_for(250), "#8F3F97");
        assert_eq!(color_for(400), "#7E0023");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn any_time() -> impl Strategy<Value = Option<TimeFilter>> {
            prop::option::of((0u32..24, 0u32..7, 1u32..=12).prop_map(|(hour, day, month)| {
                TimeFilter { hour, day, month }
            }))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(10_000))]

            #[test]
            fn prop_estimate_within_bounds(
                lat in -90.0..=90.0f64,
                lon in -180.0..=180.0f64,
                time in any_time(),
            ) {
                let aqi = estimate_aqi(Coordinate::new(lat, lon), time.as_ref(), &ThreadRandom);
                prop_assert!((10..=150).contains(&aqi));
            }
        }
    }
}
