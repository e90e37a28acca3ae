//! Activity retry policy.
//!
//! Each attempt runs under its own timeout. Failed attempts back off
//! exponentially until the attempt budget is spent or the error is not
//! worth retrying.

use std::future::Future;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tracing::{debug, error, warn};

use report_types::WorkflowSettings;

use crate::error::WorkflowError;

/// Retry and timeout settings applied to every activity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Timeout of a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&WorkflowSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.backoff_multiplier,
            attempt_timeout: Duration::from_secs(settings.activity_timeout_secs),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// The closure receives the 1-based attempt number. The final error is
    /// wrapped in [`WorkflowError::Activity`] with the attempt count.
    pub async fn run<T, F, Fut>(&self, activity_id: &str, mut operation: F) -> Result<T, WorkflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let mut backoff = self.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(activity_id, attempt = attempts, "Starting activity attempt");

            let result = match tokio::time::timeout(self.attempt_timeout, operation(attempts)).await {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::Timeout(format!(
                    "{} attempt {} exceeded {:?}",
                    activity_id, attempts, self.attempt_timeout
                ))),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempts >= self.max_attempts {
                error!(activity_id, attempts, error = %err, "Activity failed");
                return Err(WorkflowError::Activity {
                    activity_id: activity_id.to_string(),
                    attempts,
                    source: Box::new(err),
                });
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        activity_id,
                        error = %err,
                        retry_in_ms = delay.as_millis(),
                        "Activity attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(WorkflowError::Activity {
                        activity_id: activity_id.to_string(),
                        attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}
