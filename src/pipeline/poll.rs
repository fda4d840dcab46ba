//! Status polling with an adaptive interval.
//!
//! ## Interval Estimate
//!
//! If a job reports `p` percent done after running for `elapsed`, and the
//! rate stays linear, the remaining time is `elapsed * (100 - p) / p`. We wait
//! half of that before asking again, clamped to [`MIN_WAIT`]..=[`MAX_WAIT`].
//! Without a usable percentage the configured fallback interval applies.
//!
//! Status fetch failures are retried after a fixed backoff until the retry
//! budget of consecutive failures is spent.

use crate::api::ConversionApi;
use crate::config::ConversionConfig;
use crate::error::CloudConvertError;
use crate::model::{StatusResponse, Step};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{debug, error};

/// Shortest wait between two status checks.
pub const MIN_WAIT: Duration = Duration::from_secs(1);

/// Longest wait between two status checks.
pub const MAX_WAIT: Duration = Duration::from_secs(60);

/// How a conversion is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait used when no progress information is available.
    pub fallback_interval: Duration,
    /// Consecutive failed status checks tolerated.
    pub max_status_retries: u32,
    /// Pause after a failed status check.
    pub retry_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

impl PollPolicy {
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self {
            fallback_interval: config.poll_interval,
            max_status_retries: config.max_status_retries,
            retry_backoff: config.status_retry_backoff,
        }
    }
}

/// Half the linearly extrapolated remaining time, clamped.
///
/// `percent` must lie in `(0, 100]`.
pub fn estimate_wait(elapsed: Duration, percent: f64) -> Duration {
    let secs = elapsed.as_secs_f64() * (100.0 - percent) / percent / 2.0;
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_WAIT)
        .clamp(MIN_WAIT, MAX_WAIT)
}

/// Wait before the next status check, given the latest snapshot and `now`.
pub fn next_wait(status: &StatusResponse, now: SystemTime, fallback: Duration) -> Duration {
    let Some(percent) = status.percent() else {
        return fallback;
    };
    if percent <= 0.0 || status.start_time <= 0 {
        return fallback;
    }
    let started = UNIX_EPOCH + Duration::from_secs(status.start_time as u64);
    let elapsed = now.duration_since(started).unwrap_or_default();
    let wait = estimate_wait(elapsed, percent);
    debug!(
        percent,
        start_time = status.start_time,
        elapsed_ms = elapsed.as_millis() as u64,
        wait_ms = wait.as_millis() as u64,
        "Estimated poll wait"
    );
    wait
}

/// Poll `process_url` until the job finishes or fails.
///
/// Returns the `finished` snapshot. A job in the `error` step yields
/// [`CloudConvertError::ConversionFailed`] with the remote message; running
/// out of status retries yields [`CloudConvertError::PollingAbandoned`].
pub async fn wait_for_completion(
    api: &dyn ConversionApi,
    process_url: &str,
    policy: &PollPolicy,
) -> Result<StatusResponse, CloudConvertError> {
    let mut failures = 0u32;
    loop {
        let status = match api.status(process_url).await {
            Ok(s) => {
                failures = 0;
                s
            }
            Err(e) => {
                failures += 1;
                error!(
                    "Status check {}/{} for {} failed: {}",
                    failures,
                    policy.max_status_retries.saturating_add(1),
                    process_url,
                    e
                );
                if failures > policy.max_status_retries {
                    return Err(CloudConvertError::PollingAbandoned {
                        url: process_url.to_string(),
                        attempts: failures,
                        last_error: e.to_string(),
                    });
                }
                sleep(policy.retry_backoff).await;
                continue;
            }
        };

        debug!("Process {} at step {}", process_url, status.step);
        match status.step {
            Step::Finished => return Ok(status),
            Step::Error => {
                let message = if status.message.trim().is_empty() {
                    "the service reported an error without a message".to_string()
                } else {
                    status.message
                };
                return Err(CloudConvertError::ConversionFailed { message });
            }
            _ => {}
        }

        let wait = next_wait(&status, SystemTime::now(), policy.fallback_interval);
        sleep(wait).await;
    }
}
