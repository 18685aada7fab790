//! Runner lifecycle: token issuance, launch, readiness, teardown.
//!
//! The lifecycle threads exactly two pieces of state between phases: the
//! runner label (generated once at construction) and the instance id
//! (written once at launch). Nothing survives the process; EC2 and GitHub
//! are the systems of record.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::aws::{Ec2Operations, ProvisioningSpec};
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::github::RunnerRegistry;
use crate::launcher::InstanceLauncher;
use crate::readiness::ReadinessCoordinator;
use crate::teardown::TeardownCoordinator;
use crate::user_data::runner_bootstrap_script;

/// Where the lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    TokenIssued,
    Launching,
    AwaitingReady,
    Ready,
    TearingDown,
    Stopped,
    Errored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::TokenIssued => "token-issued",
            Phase::Launching => "launching",
            Phase::AwaitingReady => "awaiting-ready",
            Phase::Ready => "ready",
            Phase::TearingDown => "tearing-down",
            Phase::Stopped => "stopped",
            Phase::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Successful `start` result: the identifiers the workflow needs to target
/// the runner and later tear it down.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub label: String,
    pub instance_id: String,
}

/// Generate a fresh runner label.
pub fn generate_runner_label() -> String {
    format!("ec2-runner-{}", Uuid::new_v4().simple())
}

/// Drives one ephemeral runner from provisioning to teardown.
pub struct RunnerLifecycle<E, G> {
    ec2: E,
    registry: G,
    label: String,
    instance_id: Option<String>,
    phase: Phase,
}

impl<E, G> RunnerLifecycle<E, G>
where
    E: Ec2Operations,
    G: RunnerRegistry,
{
    /// New lifecycle with a freshly generated label, ready to `start`.
    pub fn new(ec2: E, registry: G) -> Self {
        Self {
            ec2,
            registry,
            label: generate_runner_label(),
            instance_id: None,
            phase: Phase::Idle,
        }
    }

    /// Lifecycle resumed around an already-provisioned runner, ready to
    /// `stop`.
    pub fn resume(
        ec2: E,
        registry: G,
        label: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            ec2,
            registry,
            label: label.into(),
            instance_id: Some(instance_id.into()),
            phase: Phase::Ready,
        }
    }

    /// Override the generated label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "Lifecycle transition");
        self.phase = next;
    }

    /// Provision an instance and wait until its runner is online.
    ///
    /// Any failure is terminal for this lifecycle; there is no whole-cycle
    /// retry. A failure after launch can leave a running instance behind,
    /// which is logged with the identifiers needed for manual cleanup.
    pub async fn start(
        &mut self,
        config: &RunnerConfig,
        cancel: &CancellationToken,
    ) -> Result<StartOutcome, RunnerError> {
        match self.run_start(config, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.transition(Phase::Errored);
                if let Some(instance_id) = &self.instance_id {
                    error!(
                        instance_id = %instance_id,
                        label = %self.label,
                        "Start failed after launch; the instance may still be running and require manual teardown"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_start(
        &mut self,
        config: &RunnerConfig,
        cancel: &CancellationToken,
    ) -> Result<StartOutcome, RunnerError> {
        info!(label = %self.label, mode = %config.provisioning_mode, "Starting runner");

        let token = self
            .registry
            .create_registration_token()
            .await
            .map_err(RunnerError::TokenIssuance)?;
        self.transition(Phase::TokenIssued);

        let user_data = runner_bootstrap_script(
            &config.github.registration_url(),
            token.expose(),
            &self.label,
        )
        .map_err(RunnerError::BootPayload)?;
        let spec = ProvisioningSpec::from_config(&config.ec2, &self.label, user_data);
        let strategy = config.provisioning_mode.strategy();

        self.transition(Phase::Launching);
        let launcher = InstanceLauncher::new(&self.ec2, &config.ec2.region);
        let instance_id = launcher.launch(&spec, strategy, cancel).await?;
        self.instance_id = Some(instance_id.clone());

        self.transition(Phase::AwaitingReady);
        ReadinessCoordinator::new(&self.ec2, &self.registry)
            .await_ready(&instance_id, &self.label, cancel)
            .await?;

        self.transition(Phase::Ready);
        info!(
            label = %self.label,
            instance_id = %instance_id,
            "Runner is ready"
        );

        Ok(StartOutcome {
            label: self.label.clone(),
            instance_id,
        })
    }

    /// Release the instance and the runner registration.
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<(), RunnerError> {
        let Some(instance_id) = self.instance_id.clone() else {
            return Err(RunnerError::NoInstance);
        };

        self.transition(Phase::TearingDown);
        let result = TeardownCoordinator::new(&self.ec2, &self.registry)
            .teardown(&instance_id, &self.label, cancel)
            .await;

        match result {
            Ok(()) => {
                self.transition(Phase::Stopped);
                info!(label = %self.label, instance_id = %instance_id, "Runner stopped");
                Ok(())
            }
            Err(e) => {
                self.transition(Phase::Errored);
                Err(e.into())
            }
        }
    }
}
