//! Polling waits with backoff and cancellation support.
//!
//! Every wait in the lifecycle (launch running-state, spot fulfillment,
//! instance status checks, runner registration) goes through [`wait_until`],
//! so the delay schedule, deadline accounting, and cancellation handling
//! live in one place.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay schedule and overall deadline for a polling wait.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timing out
    pub timeout: Duration,
    /// Add jitter to the delays
    pub jitter: bool,
}

impl WaitConfig {
    /// Exponential backoff between `initial` and `max`, bounded by `timeout`.
    pub fn backoff(initial: Duration, max: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            timeout,
            jitter: true,
        }
    }

    /// Fixed polling interval, bounded by `timeout`.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: interval,
            timeout,
            jitter: false,
        }
    }
}

/// Why a wait ended without the condition being met.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for {what} after {timeout:?} ({attempts} attempts)")]
    Timeout {
        what: String,
        timeout: Duration,
        attempts: u32,
    },

    #[error("wait for {what} cancelled")]
    Cancelled { what: String },

    #[error("check failed while waiting for {what}")]
    Check {
        what: String,
        #[source]
        source: anyhow::Error,
    },
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled { .. })
    }
}

/// Poll `check` until it yields a value, the deadline passes, or the wait is
/// cancelled.
///
/// `check` returns `Ok(Some(v))` when the condition holds, `Ok(None)` to poll
/// again after the next delay, and `Err` to abort the wait.
pub async fn wait_until<F, Fut, T>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    what: &str,
    check: F,
) -> Result<T, WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let start = tokio::time::Instant::now();
    let mut attempts = 0u32;

    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0);
    if config.jitter {
        builder = builder.with_jitter();
    }
    let mut delays = builder.build().into_iter();

    loop {
        attempts += 1;

        // Check cancellation before each attempt
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(WaitError::Cancelled {
                    what: what.to_string(),
                });
            }
        }

        if start.elapsed() >= config.timeout {
            return Err(WaitError::Timeout {
                what: what.to_string(),
                timeout: config.timeout,
                attempts,
            });
        }

        match check().await {
            Ok(Some(value)) => {
                debug!(what, attempts, "condition met");
                return Ok(value);
            }
            Ok(None) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                debug!(
                    what,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "not ready, polling again"
                );

                // Sleep with cancellation support
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        match cancel {
                            Some(token) => token.cancelled().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        return Err(WaitError::Cancelled {
                            what: what.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                warn!(what, error = ?e, "check failed");
                return Err(WaitError::Check {
                    what: what.to_string(),
                    source: e,
                });
            }
        }
    }
}
