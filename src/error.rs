//! Typed errors for the runner lifecycle.
//!
//! Client modules (`aws`, `github`) return `anyhow::Result` with context on
//! every external call; the orchestration layers wrap those into the enums
//! here so callers can distinguish configuration mistakes, provisioning
//! failures, readiness failures, and partial teardowns.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::wait::WaitError;

/// Configuration problems, surfaced before any external call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown provisioning mode: {0:?}")]
    UnknownMode(String),

    #[error("invalid repository reference: {0:?} (expected owner/repo)")]
    InvalidRepository(String),

    #[error("invalid resource tags JSON")]
    InvalidResourceTags(#[source] serde_json::Error),
}

/// Launch failures, surfaced after at most one spot-to-on-demand fallback.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no spot price data for {instance_type} in {region} over the lookback window")]
    NoPriceData {
        instance_type: String,
        region: String,
    },

    #[error("spot request {request_id} not fulfilled: {reason}")]
    SpotUnfulfilled { request_id: String, reason: String },

    #[error("{operation} failed")]
    LaunchFailed {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Readiness failures, naming the condition that was not met.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("instance {instance_id} did not pass status checks")]
    InstanceHealth {
        instance_id: String,
        #[source]
        source: WaitError,
    },

    #[error("runner {label} did not come online")]
    Registration {
        label: String,
        #[source]
        source: WaitError,
    },

    #[error("readiness wait exceeded {timeout:?}")]
    DeadlineExceeded { timeout: Duration },

    #[error("readiness wait cancelled")]
    Cancelled,
}

/// One failed half of a teardown.
#[derive(Debug, Error)]
pub enum TeardownIssue {
    #[error("failed to terminate instance {instance_id}")]
    Terminate {
        instance_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no runner named {label} is registered")]
    RunnerNotFound { label: String },

    #[error("failed to deregister runner {label}")]
    Deregister {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out releasing {what} after {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("release of {what} cancelled")]
    Cancelled { what: String },
}

/// Aggregate of every failed release in a teardown.
///
/// Both releases are always attempted; a partial teardown (one resource
/// released, one not) is reported here, never treated as success.
#[derive(Debug)]
pub struct TeardownError {
    pub issues: Vec<TeardownIssue>,
}

impl TeardownError {
    /// True if the instance-termination half failed.
    pub fn instance_failed(&self) -> bool {
        self.issues.iter().any(|i| match i {
            TeardownIssue::Terminate { .. } => true,
            TeardownIssue::Timeout { what, .. } | TeardownIssue::Cancelled { what } => {
                what.starts_with("instance")
            }
            _ => false,
        })
    }

    /// True if the runner half failed because no runner matched the label.
    pub fn runner_not_found(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, TeardownIssue::RunnerNotFound { .. }))
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "teardown incomplete, {} of 2 release operations failed: ",
            self.issues.len()
        )?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// Top-level lifecycle failure.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to issue a runner registration token")]
    TokenIssuance(#[source] anyhow::Error),

    #[error("failed to render the boot payload")]
    BootPayload(#[source] anyhow::Error),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("no instance recorded for this runner; nothing to tear down")]
    NoInstance,
}
