use std::time::Duration;

use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    aqi::{AqiEstimator, EstimateError},
    models::{Coordinate, TimeFilter},
};

/// Bounds applied to every batch of estimator calls.
#[derive(Debug, Clone, Copy)]
pub struct FanOutLimits {
    /// Maximum estimator calls in flight at once.
    pub concurrency: usize,
    /// Budget for a single estimate before the sample is dropped.
    pub per_call_timeout: Duration,
    /// Budget for the whole batch; samples not finished by then are dropped.
    pub deadline: Duration,
}

impl Default for FanOutLimits {
    fn default() -> Self {
        Self {
            concurrency: 16,
            per_call_timeout: Duration::from_millis(250),
            deadline: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    #[error("estimate timed out after {0:?}")]
    TimedOut(Duration),
}

/// The caller abandoned the request; no partial result is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;

#[derive(Debug)]
pub struct Sample {
    pub index: usize,
    pub coord: Coordinate,
    pub outcome: Result<u32, SampleError>,
}

/// Estimate AQI at every coordinate with bounded concurrency.
///
/// Samples come back in input order. Each call is limited by
/// `per_call_timeout`; a timed-out call yields `SampleError::TimedOut`. When
/// `deadline` expires the in-flight calls are dropped and only the samples
/// collected so far are returned. Cancelling `cancel` drops everything and
/// returns `Cancelled`.
pub async fn estimate_all<E: AqiEstimator>(
    estimator: &E,
    coords: &[Coordinate],
    time: Option<TimeFilter>,
    limits: FanOutLimits,
    cancel: &CancellationToken,
) -> Result<Vec<Sample>, Cancelled> {
    let per_call_timeout = limits.per_call_timeout;
    let samples = stream::iter(coords.iter().copied().enumerate())
        .map(|(index, coord)| async move {
            let outcome =
                match tokio::time::timeout(per_call_timeout, estimator.estimate(coord, time)).await
                {
                    Ok(Ok(aqi)) => Ok(aqi),
                    Ok(Err(err)) => Err(SampleError::Estimate(err)),
                    Err(_) => Err(SampleError::TimedOut(per_call_timeout)),
                };
            Sample {
                index,
                coord,
                outcome,
            }
        })
        .buffered(limits.concurrency.max(1));
    let mut samples = std::pin::pin!(samples);
    let mut deadline = std::pin::pin!(tokio::time::sleep(limits.deadline));
    let mut collected = Vec::with_capacity(coords.len());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(
                    "estimate batch cancelled after {}/{} samples",
                    collected.len(),
                    coords.len()
                );
                return Err(Cancelled);
            }
            _ = &mut deadline => {
                tracing::warn!(
                    "estimate batch hit its {:?} deadline with {}/{} samples",
                    limits.deadline,
                    collected.len(),
                    coords.len()
                );
                break;
            }
            next = samples.next() => match next {
                Some(sample) => collected.push(sample),
                None => break,
            },
        }
    }

    Ok(collected)
}
