//! Dual readiness wait: instance status checks and runner registration.
//!
//! The two conditions progress at their own pace under one shared deadline.
//! This is a two-of-two join with eager abort, not a race: success requires
//! both watchers, and the first failure cancels the sibling immediately.

use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aws::Ec2Operations;
use crate::error::ReadinessError;
use crate::github::RunnerRegistry;
use crate::join::try_join_eager;
use crate::wait::{wait_until, WaitConfig, WaitError};

/// Shared deadline for both readiness conditions (8 minutes)
const READY_TIMEOUT: Duration = Duration::from_secs(480);

/// Fixed interval for the registration watcher
const REGISTRATION_POLL: Duration = Duration::from_secs(10);

/// Poll delays for the instance status watcher
const HEALTH_POLL_INITIAL: Duration = Duration::from_secs(5);
const HEALTH_POLL_MAX: Duration = Duration::from_secs(30);

/// Backstop past the watcher deadlines, so a hung probe call cannot hang
/// the caller.
const DEADLINE_GRACE: Duration = Duration::from_secs(15);

/// Waits for an instance to pass status checks and its runner to come
/// online.
pub struct ReadinessCoordinator<'a, E, G> {
    ec2: &'a E,
    registry: &'a G,
    timeout: Duration,
}

impl<'a, E, G> ReadinessCoordinator<'a, E, G>
where
    E: Ec2Operations,
    G: RunnerRegistry,
{
    pub fn new(ec2: &'a E, registry: &'a G) -> Self {
        Self {
            ec2,
            registry,
            timeout: READY_TIMEOUT,
        }
    }

    /// Wait until both the instance and the runner registration are ready.
    ///
    /// Returns the first watcher failure, after cancelling the sibling.
    pub async fn await_ready(
        &self,
        instance_id: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReadinessError> {
        info!(
            instance_id = %instance_id,
            label = %label,
            "Waiting for instance status checks and runner registration"
        );

        let health = async {
            wait_until(
                WaitConfig::backoff(HEALTH_POLL_INITIAL, HEALTH_POLL_MAX, self.timeout),
                Some(cancel),
                &format!("instance {instance_id} status checks"),
                || async { Ok(self.ec2.instance_status_ok(instance_id).await?.then_some(())) },
            )
            .await
            .map_err(|source| match source {
                WaitError::Cancelled { .. } => ReadinessError::Cancelled,
                source => ReadinessError::InstanceHealth {
                    instance_id: instance_id.to_string(),
                    source,
                },
            })
        };

        let registration = async {
            wait_until(
                WaitConfig::fixed(REGISTRATION_POLL, self.timeout),
                Some(cancel),
                &format!("runner {label} online"),
                || async {
                    let runners = self.registry.list_runners().await?;
                    Ok(runners
                        .iter()
                        .find(|r| r.name == label && r.is_online())
                        .map(|_| ()))
                },
            )
            .await
            .map_err(|source| match source {
                WaitError::Cancelled { .. } => ReadinessError::Cancelled,
                source => ReadinessError::Registration {
                    label: label.to_string(),
                    source,
                },
            })
        };

        let watchers: Vec<LocalBoxFuture<'_, Result<(), ReadinessError>>> =
            vec![health.boxed_local(), registration.boxed_local()];

        tokio::select! {
            _ = cancel.cancelled() => Err(ReadinessError::Cancelled),
            joined = tokio::time::timeout(self.timeout + DEADLINE_GRACE, try_join_eager(watchers)) => {
                match joined {
                    Ok(Ok(_)) => {
                        info!(
                            instance_id = %instance_id,
                            label = %label,
                            "Instance healthy and runner online"
                        );
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ReadinessError::DeadlineExceeded {
                        timeout: self.timeout,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::MockEc2Operations;
    use crate::github::{MockRunnerRegistry, RunnerInfo};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn online_runner(name: &str) -> RunnerInfo {
        RunnerInfo {
            id: 42,
            name: name.to_string(),
            status: "online".to_string(),
        }
    }

    fn offline_runner(name: &str) -> RunnerInfo {
        RunnerInfo {
            id: 42,
            name: name.to_string(),
            status: "offline".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_when_both_conditions_hold() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_instance_status_ok().returning(|_| Ok(true));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .returning(|| Ok(vec![online_runner("ec2-runner-a")]));

        let coordinator = ReadinessCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        coordinator
            .await_ready("i-123", "ec2-runner-a", &cancel)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ready_when_conditions_complete_in_either_order() {
        // Health lags behind registration by several polls
        let health_calls = Arc::new(AtomicU32::new(0));
        let mut ec2 = MockEc2Operations::new();
        let calls = health_calls.clone();
        ec2.expect_instance_status_ok()
            .returning(move |_| Ok(calls.fetch_add(1, Ordering::SeqCst) >= 4));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .returning(|| Ok(vec![online_runner("ec2-runner-b")]));

        let coordinator = ReadinessCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        coordinator
            .await_ready("i-123", "ec2-runner-b", &cancel)
            .await
            .unwrap();
        assert!(health_calls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_failure_cancels_pending_health_watcher() {
        // Health never completes; the registration watcher errors quickly
        let health_calls = Arc::new(AtomicU32::new(0));
        let mut ec2 = MockEc2Operations::new();
        let calls = health_calls.clone();
        ec2.expect_instance_status_ok().returning(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        });

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .returning(|| anyhow::bail!("listing exploded"));

        let coordinator = ReadinessCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let err = coordinator
            .await_ready("i-123", "ec2-runner-c", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ReadinessError::Registration { label, .. } if label == "ec2-runner-c"
        ));
        // Returned at the registration failure, not at the shared deadline
        assert!(start.elapsed() < Duration::from_secs(60));

        // The health watcher was dropped with the join: no further polls
        let polls_at_failure = health_calls.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(health_calls.load(Ordering::SeqCst), polls_at_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_runner_times_out_with_registration_error() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_instance_status_ok().returning(|_| Ok(true));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .returning(|| Ok(vec![offline_runner("ec2-runner-d")]));

        let coordinator = ReadinessCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        let err = coordinator
            .await_ready("i-123", "ec2-runner-d", &cancel)
            .await
            .unwrap_err();

        match err {
            ReadinessError::Registration { label, source } => {
                assert_eq!(label, "ec2-runner-d");
                assert!(source.is_timeout());
            }
            other => panic!("expected registration timeout, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_aborts_both_watchers() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_instance_status_ok().returning(|_| Ok(false));

        let mut registry = MockRunnerRegistry::new();
        registry.expect_list_runners().returning(|| Ok(Vec::new()));

        let coordinator = ReadinessCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            child.cancel();
        });

        let start = tokio::time::Instant::now();
        let err = coordinator
            .await_ready("i-123", "ec2-runner-e", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
