//! Launch execution: on-demand, spot, and the spot-to-on-demand fallback.
//!
//! The launcher is a dispatcher over the [`LaunchStrategy`] table. The
//! fallback is a single explicit branch from the spot path into the
//! on-demand path, so "at most one fallback attempt" holds structurally:
//! the on-demand path never dispatches back into spot.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aws::{Ec2Operations, InstanceRunState, ProvisioningSpec, SpotRequestState};
use crate::error::LaunchError;
use crate::policy::LaunchStrategy;
use crate::wait::{wait_until, WaitConfig, WaitError};

/// Deadline for an on-demand instance to reach `running` (6 minutes)
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(360);

/// Deadline for a spot request to be fulfilled (6 minutes)
const SPOT_FULFILLMENT_TIMEOUT: Duration = Duration::from_secs(360);

/// Poll delays for both launch waits
const POLL_INITIAL: Duration = Duration::from_secs(2);
const POLL_MAX: Duration = Duration::from_secs(15);

/// What a spot-fulfillment poll resolved to.
enum SpotProbe {
    Fulfilled(String),
    Dead(String),
}

/// Executes a launch strategy against EC2.
pub struct InstanceLauncher<'a, E> {
    ec2: &'a E,
    region: String,
}

impl<'a, E: Ec2Operations> InstanceLauncher<'a, E> {
    pub fn new(ec2: &'a E, region: &str) -> Self {
        Self {
            ec2,
            region: region.to_string(),
        }
    }

    /// Launch one instance per the strategy, returning its instance id.
    pub async fn launch(
        &self,
        spec: &ProvisioningSpec,
        strategy: LaunchStrategy,
        cancel: &CancellationToken,
    ) -> Result<String, LaunchError> {
        match strategy {
            LaunchStrategy::OnDemand => self.launch_on_demand(spec, cancel).await,
            LaunchStrategy::SpotOnly => self.launch_spot(spec, cancel).await,
            LaunchStrategy::SpotThenOnDemand => match self.launch_spot(spec, cancel).await {
                Err(LaunchError::SpotUnfulfilled { request_id, reason }) => {
                    warn!(
                        request_id = %request_id,
                        reason = %reason,
                        "Spot request unfulfilled, falling back to on-demand"
                    );
                    self.launch_on_demand(spec, cancel).await
                }
                other => other,
            },
        }
    }

    /// Submit an on-demand run request and wait for the instance to run.
    async fn launch_on_demand(
        &self,
        spec: &ProvisioningSpec,
        cancel: &CancellationToken,
    ) -> Result<String, LaunchError> {
        let instance_id = self
            .ec2
            .run_instance(spec.clone())
            .await
            .map_err(|source| LaunchError::LaunchFailed {
                operation: "on-demand launch",
                source,
            })?;

        let wait = wait_until(
            WaitConfig::backoff(POLL_INITIAL, POLL_MAX, LAUNCH_TIMEOUT),
            Some(cancel),
            &format!("instance {instance_id} running"),
            || async {
                match self.ec2.instance_run_state(&instance_id).await? {
                    InstanceRunState::Running => Ok(Some(())),
                    InstanceRunState::Pending => Ok(None),
                    InstanceRunState::Gone { state } => anyhow::bail!(
                        "instance {instance_id} entered state {state:?} while waiting for running"
                    ),
                }
            },
        )
        .await;

        match wait {
            Ok(()) => {
                info!(instance_id = %instance_id, "Instance is running");
                Ok(instance_id)
            }
            Err(source) => Err(LaunchError::LaunchFailed {
                operation: "wait for running state",
                source: source.into(),
            }),
        }
    }

    /// Submit a one-time spot request at the current price and wait for
    /// fulfillment.
    async fn launch_spot(
        &self,
        spec: &ProvisioningSpec,
        cancel: &CancellationToken,
    ) -> Result<String, LaunchError> {
        let price = self
            .ec2
            .latest_spot_price(&spec.instance_type)
            .await
            .map_err(|source| LaunchError::LaunchFailed {
                operation: "spot price lookup",
                source,
            })?;

        let Some(price) = price else {
            return Err(LaunchError::NoPriceData {
                instance_type: spec.instance_type.clone(),
                region: self.region.clone(),
            });
        };

        info!(
            instance_type = %spec.instance_type,
            price = %price,
            "Submitting one-time spot request at current price"
        );

        let request_id = self
            .ec2
            .request_spot_instance(spec.clone(), &price)
            .await
            .map_err(|source| LaunchError::LaunchFailed {
                operation: "spot request submission",
                source,
            })?;

        let wait = wait_until(
            WaitConfig::backoff(POLL_INITIAL, POLL_MAX, SPOT_FULFILLMENT_TIMEOUT),
            Some(cancel),
            &format!("spot request {request_id} fulfilled"),
            || async {
                Ok(match self.ec2.describe_spot_request(&request_id).await? {
                    SpotRequestState::Fulfilled { instance_id } => {
                        Some(SpotProbe::Fulfilled(instance_id))
                    }
                    SpotRequestState::Dead { reason } => Some(SpotProbe::Dead(reason)),
                    SpotRequestState::Pending => None,
                })
            },
        )
        .await;

        match wait {
            Ok(SpotProbe::Fulfilled(instance_id)) => {
                info!(
                    request_id = %request_id,
                    instance_id = %instance_id,
                    "Spot request fulfilled"
                );
                Ok(instance_id)
            }
            Ok(SpotProbe::Dead(reason)) => {
                self.cancel_spot_best_effort(&request_id).await;
                Err(LaunchError::SpotUnfulfilled { request_id, reason })
            }
            Err(err @ WaitError::Timeout { .. }) => {
                self.cancel_spot_best_effort(&request_id).await;
                Err(LaunchError::SpotUnfulfilled {
                    request_id,
                    reason: err.to_string(),
                })
            }
            Err(other) => {
                // Cancellation or a describe failure: the request is not
                // known to be dead, so release it before surfacing.
                self.cancel_spot_best_effort(&request_id).await;
                Err(LaunchError::LaunchFailed {
                    operation: "spot fulfillment wait",
                    source: other.into(),
                })
            }
        }
    }

    /// Cancel an unfulfilled spot request so it cannot fill after we have
    /// given up on it. Failure here is logged, not propagated.
    async fn cancel_spot_best_effort(&self, request_id: &str) {
        if let Err(e) = self.ec2.cancel_spot_request(request_id).await {
            warn!(
                request_id = %request_id,
                error = ?e,
                "Failed to cancel spot request; it may need manual cleanup"
            );
        }
    }
}
