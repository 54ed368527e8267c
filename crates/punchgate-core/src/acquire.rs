//! Best-fix geolocation acquisition.
//!
//! Consumer positioning is noisy and slow to converge, so one acquisition
//! samples continuously for a bounded window and keeps the most accurate fix.
//! A sample that already meets the desired accuracy ends the window early.

use crate::config::GeoPolicy;
use punchgate_hw::{GeoProvider, PermissionState, PositionFix, WatchError, WatchOptions};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout_at, Instant};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("location is not supported on this device")]
    Unavailable,
    #[error("location permission denied")]
    Blocked,
    #[error("no position fix within the time limit")]
    Timeout,
    #[error("position sampling failed: {0}")]
    Failed(String),
}

impl From<WatchError> for AcquireError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::PermissionDenied => AcquireError::Blocked,
            other => AcquireError::Failed(other.to_string()),
        }
    }
}

/// Parameters for one acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireOptions {
    pub desired_accuracy_m: f64,
    pub soft_window: Duration,
    pub hard_timeout: Duration,
    pub sample_timeout: Duration,
}

impl From<&GeoPolicy> for AcquireOptions {
    fn from(policy: &GeoPolicy) -> Self {
        Self {
            desired_accuracy_m: policy.desired_accuracy_m,
            soft_window: policy.soft_window(),
            hard_timeout: policy.hard_timeout(),
            sample_timeout: Duration::from_millis(policy.sample_timeout_ms),
        }
    }
}

/// Sample the provider and return the most accurate fix obtained.
///
/// Resolution order:
/// - platform without location: `Unavailable`
/// - permission already denied: `Blocked`
/// - sample within desired accuracy: that sample, immediately
/// - soft window or hard timeout elapsed: best so far, else `Timeout`
/// - sampling error: best so far, else the error's kind
///
/// The watch is cleared on every path, including when the returned future is
/// dropped before completion.
pub async fn acquire_best_fix(
    provider: &dyn GeoProvider,
    opts: &AcquireOptions,
) -> Result<PositionFix, AcquireError> {
    if !provider.is_available() {
        return Err(AcquireError::Unavailable);
    }

    let hard_deadline = Instant::now() + opts.hard_timeout;

    match timeout_at(hard_deadline, provider.permission()).await {
        Ok(PermissionState::Denied) => {
            tracing::info!("location permission already denied");
            return Err(AcquireError::Blocked);
        }
        Ok(_) => {}
        Err(_) => {
            tracing::warn!("permission query outlived the hard timeout");
            return Err(AcquireError::Timeout);
        }
    }

    let soft_deadline = (Instant::now() + opts.soft_window).min(hard_deadline);
    let mut watch = provider.watch(WatchOptions {
        high_accuracy: true,
        maximum_age_ms: 0,
        timeout_ms: opts.sample_timeout.min(opts.hard_timeout).as_millis() as u64,
    })?;

    let soft = sleep_until(soft_deadline);
    let hard = sleep_until(hard_deadline);
    tokio::pin!(soft);
    tokio::pin!(hard);

    let mut best: Option<PositionFix> = None;
    let mut samples = 0usize;
    let mut sampling = true;

    let outcome = loop {
        tokio::select! {
            biased;
            event = watch.next(), if sampling => match event {
                Some(Ok(fix)) => {
                    samples += 1;
                    let accuracy = fix.ranking_accuracy();
                    if best.map_or(true, |b| accuracy < b.ranking_accuracy()) {
                        best = Some(fix);
                    }
                    tracing::debug!(accuracy_m = fix.accuracy_m, samples, "position sample");
                    if accuracy <= opts.desired_accuracy_m {
                        break Ok(fix);
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, has_best = best.is_some(), "position sampling error");
                    break best.ok_or_else(|| AcquireError::from(err));
                }
                None => {
                    tracing::debug!(samples, "position provider stopped sending");
                    sampling = false;
                }
            },
            _ = &mut soft => {
                tracing::debug!(samples, has_best = best.is_some(), "soft window elapsed");
                break best.ok_or(AcquireError::Timeout);
            }
            _ = &mut hard => {
                tracing::debug!(samples, has_best = best.is_some(), "hard timeout elapsed");
                break best.ok_or(AcquireError::Timeout);
            }
        }
    };

    watch.clear();

    match &outcome {
        Ok(fix) => tracing::info!(accuracy_m = fix.accuracy_m, samples, "position fix acquired"),
        Err(err) => tracing::info!(error = %err, samples, "position acquisition failed"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fix_at, ScriptedGeo};

    fn opts() -> AcquireOptions {
        AcquireOptions {
            desired_accuracy_m: 25.0,
            soft_window: Duration::from_millis(12_000),
            hard_timeout: Duration::from_millis(40_000),
            sample_timeout: Duration::from_millis(12_000),
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_fails_immediately() {
        let geo = ScriptedGeo::unavailable();
        let err = acquire_best_fix(&geo, &opts()).await.unwrap_err();
        assert_eq!(err, AcquireError::Unavailable);
        assert_eq!(geo.watches_started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_permission_skips_sampling() {
        let geo = ScriptedGeo::new(vec![]).with_permission(PermissionState::Denied);
        let err = acquire_best_fix(&geo, &opts()).await.unwrap_err();
        assert_eq!(err, AcquireError::Blocked);
        assert_eq!(geo.watches_started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_exit_on_desired_accuracy() {
        let geo = ScriptedGeo::new(vec![
            (ms(500), Ok(fix_at(13.7, 100.5, 80.0))),
            (ms(500), Ok(fix_at(13.7, 100.5, 20.0))),
            (ms(500), Ok(fix_at(13.7, 100.5, 5.0))),
        ]);
        let start = Instant::now();
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert_eq!(fix.accuracy_m, 20.0);
        assert_eq!(start.elapsed(), ms(1000));
        assert_eq!(geo.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_window_returns_best_so_far() {
        let geo = ScriptedGeo::new(vec![
            (ms(1000), Ok(fix_at(0.0, 0.0, 120.0))),
            (ms(1000), Ok(fix_at(0.0, 0.0, 60.0))),
            (ms(1000), Ok(fix_at(0.0, 0.0, 90.0))),
        ]);
        let start = Instant::now();
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert_eq!(fix.accuracy_m, 60.0);
        assert_eq!(start.elapsed(), ms(12_000));
        assert_eq!(geo.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_window_without_samples_times_out() {
        let geo = ScriptedGeo::new(vec![]);
        let start = Instant::now();
        let err = acquire_best_fix(&geo, &opts()).await.unwrap_err();
        assert_eq!(err, AcquireError::Timeout);
        assert_eq!(start.elapsed(), ms(12_000));
        assert_eq!(geo.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_bounds_a_stalled_permission_query() {
        let geo = ScriptedGeo::new(vec![]).with_permission_delay(ms(120_000));
        let start = Instant::now();
        let err = acquire_best_fix(&geo, &opts()).await.unwrap_err();
        assert_eq!(err, AcquireError::Timeout);
        assert_eq!(start.elapsed(), ms(40_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_window_clamped_to_hard_deadline() {
        // Permission takes most of the hard budget; the soft window must not
        // push resolution past the hard deadline.
        let geo = ScriptedGeo::new(vec![(ms(100), Ok(fix_at(0.0, 0.0, 70.0)))])
            .with_permission_delay(ms(35_000));
        let start = Instant::now();
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert_eq!(fix.accuracy_m, 70.0);
        assert_eq!(start.elapsed(), ms(40_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_with_best_resolves_best() {
        let geo = ScriptedGeo::new(vec![
            (ms(300), Ok(fix_at(0.0, 0.0, 150.0))),
            (ms(300), Err(WatchError::PositionUnavailable("lost signal".into()))),
        ]);
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert_eq!(fix.accuracy_m, 150.0);
        assert_eq!(geo.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_without_best_maps_kind() {
        let geo = ScriptedGeo::new(vec![(ms(300), Err(WatchError::PermissionDenied))]);
        assert_eq!(acquire_best_fix(&geo, &opts()).await.unwrap_err(), AcquireError::Blocked);

        let geo = ScriptedGeo::new(vec![(ms(300), Err(WatchError::Timeout))]);
        assert!(matches!(
            acquire_best_fix(&geo, &opts()).await.unwrap_err(),
            AcquireError::Failed(_)
        ));
        assert_eq!(geo.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_start_failure() {
        let geo = ScriptedGeo::new(vec![]).with_watch_error(WatchError::PermissionDenied);
        assert_eq!(acquire_best_fix(&geo, &opts()).await.unwrap_err(), AcquireError::Blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_provider_waits_for_window() {
        let geo = ScriptedGeo::new(vec![(ms(200), Ok(fix_at(0.0, 0.0, 40.0)))]).closing();
        let start = Instant::now();
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert_eq!(fix.accuracy_m, 40.0);
        assert_eq!(start.elapsed(), ms(12_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_accuracy_never_beats_real_sample() {
        let geo = ScriptedGeo::new(vec![
            (ms(100), Ok(fix_at(1.0, 1.0, 90.0))),
            (ms(100), Ok(fix_at(2.0, 2.0, f64::NAN))),
        ]);
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert_eq!(fix.latitude, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_never_worse_than_earlier_samples() {
        let accuracies = [300.0, 45.0, 210.0, 44.9, 80.0, 45.0];
        let script = accuracies
            .iter()
            .map(|&a| (ms(700), Ok(fix_at(0.0, 0.0, a))))
            .collect();
        let geo = ScriptedGeo::new(script);
        let fix = acquire_best_fix(&geo, &opts()).await.unwrap();
        assert!(accuracies.iter().all(|&a| fix.accuracy_m <= a));
        assert_eq!(fix.accuracy_m, 44.9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_future_clears_the_watch() {
        let geo = ScriptedGeo::new(vec![(ms(60_000), Ok(fix_at(0.0, 0.0, 5.0)))]);
        let o = opts();
        let fut = acquire_best_fix(&geo, &o);
        let res = tokio::time::timeout(ms(1000), fut).await;
        assert!(res.is_err());
        assert_eq!(geo.watches_started(), 1);
        assert_eq!(geo.releases(), 1);
    }
}
