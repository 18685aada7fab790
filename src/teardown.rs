//! Dual release: instance termination and runner deregistration.
//!
//! Each half releases an independent resource, so both are always attempted
//! regardless of the other's outcome, and every failure is reported in the
//! aggregate. This is deliberately the opposite joining rule from the
//! readiness wait.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aws::Ec2Operations;
use crate::error::{TeardownError, TeardownIssue};
use crate::github::RunnerRegistry;
use crate::join::join_collect;

/// Shared deadline for both release operations (8 minutes)
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(480);

/// Releases the instance and the runner registration concurrently.
pub struct TeardownCoordinator<'a, E, G> {
    ec2: &'a E,
    registry: &'a G,
    timeout: Duration,
}

impl<'a, E, G> TeardownCoordinator<'a, E, G>
where
    E: Ec2Operations,
    G: RunnerRegistry,
{
    pub fn new(ec2: &'a E, registry: &'a G) -> Self {
        Self {
            ec2,
            registry,
            timeout: TEARDOWN_TIMEOUT,
        }
    }

    /// Release both resources, aggregating every failure.
    pub async fn teardown(
        &self,
        instance_id: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TeardownError> {
        info!(
            instance_id = %instance_id,
            label = %label,
            "Releasing instance and runner registration"
        );

        let terminate = self.bounded(format!("instance {instance_id}"), cancel, async {
            self.ec2
                .terminate_instance(instance_id)
                .await
                .map_err(|source| TeardownIssue::Terminate {
                    instance_id: instance_id.to_string(),
                    source,
                })?;
            info!(instance_id = %instance_id, "Instance termination requested");
            Ok(())
        });

        let deregister = self.bounded(format!("runner {label}"), cancel, async {
            let runners =
                self.registry
                    .list_runners()
                    .await
                    .map_err(|source| TeardownIssue::Deregister {
                        label: label.to_string(),
                        source,
                    })?;

            let Some(runner) = runners.iter().find(|r| r.name == label) else {
                return Err(TeardownIssue::RunnerNotFound {
                    label: label.to_string(),
                });
            };

            self.registry
                .remove_runner(runner.id)
                .await
                .map_err(|source| TeardownIssue::Deregister {
                    label: label.to_string(),
                    source,
                })?;
            info!(label = %label, runner_id = runner.id, "Runner deregistered");
            Ok(())
        });

        let results = join_collect(vec![terminate.boxed_local(), deregister.boxed_local()]).await;

        let issues: Vec<TeardownIssue> = results.into_iter().filter_map(Result::err).collect();
        if issues.is_empty() {
            info!(instance_id = %instance_id, label = %label, "Teardown complete");
            Ok(())
        } else {
            for issue in &issues {
                warn!(issue = %issue, "Release operation failed");
            }
            Err(TeardownError { issues })
        }
    }

    /// Bound one release operation by the shared deadline and cancellation.
    async fn bounded(
        &self,
        what: String,
        cancel: &CancellationToken,
        op: impl Future<Output = Result<(), TeardownIssue>>,
    ) -> Result<(), TeardownIssue> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TeardownIssue::Cancelled { what }),
            result = tokio::time::timeout(self.timeout, op) => match result {
                Ok(r) => r,
                Err(_) => Err(TeardownIssue::Timeout {
                    what,
                    timeout: self.timeout,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::MockEc2Operations;
    use crate::github::{MockRunnerRegistry, RunnerInfo};

    fn runner(id: u64, name: &str) -> RunnerInfo {
        RunnerInfo {
            id,
            name: name.to_string(),
            status: "online".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn releases_both_resources() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_terminate_instance()
            .times(1)
            .returning(|_| Ok(()));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .times(1)
            .returning(|| Ok(vec![runner(9, "ec2-runner-a")]));
        registry
            .expect_remove_runner()
            .times(1)
            .returning(|_| Ok(()));

        let coordinator = TeardownCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        coordinator
            .teardown("i-123", "ec2-runner-a", &cancel)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_termination_does_not_skip_deregistration() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_terminate_instance()
            .times(1)
            .returning(|_| anyhow::bail!("terminate refused"));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .times(1)
            .returning(|| Ok(vec![runner(9, "ec2-runner-b")]));
        registry
            .expect_remove_runner()
            .times(1)
            .returning(|_| Ok(()));

        let coordinator = TeardownCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        let err = coordinator
            .teardown("i-123", "ec2-runner-b", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.issues.len(), 1);
        assert!(err.instance_failed());
        assert!(!err.runner_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_runner_is_reported_but_termination_proceeds() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_terminate_instance()
            .times(1)
            .returning(|_| Ok(()));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .times(1)
            .returning(|| Ok(vec![runner(3, "some-other-runner")]));
        registry.expect_remove_runner().times(0);

        let coordinator = TeardownCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        let err = coordinator
            .teardown("i-123", "ec2-runner-c", &cancel)
            .await
            .unwrap_err();

        assert!(err.runner_not_found());
        assert!(!err.instance_failed());
        assert!(err.to_string().contains("ec2-runner-c"));
    }

    #[tokio::test(start_paused = true)]
    async fn both_failures_appear_in_the_aggregate() {
        let mut ec2 = MockEc2Operations::new();
        ec2.expect_terminate_instance()
            .times(1)
            .returning(|_| anyhow::bail!("terminate refused"));

        let mut registry = MockRunnerRegistry::new();
        registry
            .expect_list_runners()
            .times(1)
            .returning(|| anyhow::bail!("listing exploded"));

        let coordinator = TeardownCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        let err = coordinator
            .teardown("i-123", "ec2-runner-d", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.issues.len(), 2);
        assert!(err.to_string().contains("i-123"));
        assert!(err.to_string().contains("ec2-runner-d"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_release_times_out_instead_of_hanging_the_caller() {
        let ec2 = MockEc2Operations::new();
        let registry = MockRunnerRegistry::new();
        let coordinator = TeardownCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();

        let issue = coordinator
            .bounded(
                "instance i-123".to_string(),
                &cancel,
                std::future::pending(),
            )
            .await
            .unwrap_err();
        assert!(matches!(issue, TeardownIssue::Timeout { what, .. } if what.contains("i-123")));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_reported_per_half() {
        let ec2 = MockEc2Operations::new();
        let registry = MockRunnerRegistry::new();
        let coordinator = TeardownCoordinator::new(&ec2, &registry);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let issue = coordinator
            .bounded(
                "runner ec2-runner-f".to_string(),
                &cancel,
                std::future::pending(),
            )
            .await
            .unwrap_err();
        assert!(matches!(issue, TeardownIssue::Cancelled { what } if what.contains("ec2-runner-f")));
    }
}
