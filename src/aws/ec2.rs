//! EC2 instance and spot-request operations.

use anyhow::{Context, Result};
use aws_sdk_ec2::primitives::DateTime;
use aws_sdk_ec2::types::{
    IamInstanceProfileSpecification, InstanceStateName, InstanceType, RequestSpotLaunchSpecification,
    ResourceType, SpotInstanceState, SpotInstanceType, SummaryStatus, Tag, TagSpecification,
};
use aws_sdk_ec2::Client;
use base64::Engine;
use chrono::Utc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use super::context::AwsContext;
use super::error::classify_anyhow_error;
use super::types::{InstanceRunState, ProvisioningSpec, SpotRequestState};

/// Tag marking resources created by this tool
const TAG_MANAGED_BY: &str = "ec2-runner:managed-by";
const TAG_MANAGED_BY_VALUE: &str = "ec2-runner";

/// Tag recording creation time, for out-of-band orphan cleanup
const TAG_CREATED_AT: &str = "ec2-runner:created-at";

/// EC2 client for managing runner instances
pub struct Ec2Client {
    pub(crate) client: Client,
}

impl Ec2Client {
    /// Lookback window for spot price history (1 hour)
    const SPOT_PRICE_LOOKBACK_SECS: u64 = 3600;

    /// Create a new EC2 client (loads AWS config from the environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an EC2 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }

    fn parse_instance_type(instance_type: &str) -> Result<InstanceType> {
        instance_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid instance type: {}", instance_type))
    }

    fn encode_user_data(user_data: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(user_data.as_bytes())
    }

    /// Tag specification for a launched resource: the user-supplied tags
    /// plus a `Name` tag (the runner label) and the management tags.
    fn tag_specifications(resource_type: ResourceType, spec: &ProvisioningSpec) -> TagSpecification {
        let created_at = Utc::now().to_rfc3339();
        let mut builder = TagSpecification::builder()
            .resource_type(resource_type)
            .tags(Tag::builder().key("Name").value(&spec.label).build())
            .tags(
                Tag::builder()
                    .key(TAG_MANAGED_BY)
                    .value(TAG_MANAGED_BY_VALUE)
                    .build(),
            )
            .tags(Tag::builder().key(TAG_CREATED_AT).value(created_at).build());

        for tag in &spec.resource_tags {
            builder = builder.tags(Tag::builder().key(&tag.key).value(&tag.value).build());
        }

        builder.build()
    }

    /// Submit a RunInstances request for exactly one instance.
    pub async fn run_instance(&self, spec: ProvisioningSpec) -> Result<String> {
        let instance_type = Self::parse_instance_type(&spec.instance_type)?;

        info!(
            image_id = %spec.image_id,
            instance_type = %spec.instance_type,
            "Launching on-demand instance"
        );

        let mut request = self
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(instance_type)
            .min_count(1)
            .max_count(1)
            .user_data(Self::encode_user_data(&spec.user_data))
            .tag_specifications(Self::tag_specifications(ResourceType::Instance, &spec));

        if let Some(subnet) = &spec.subnet_id {
            request = request.subnet_id(subnet);
        }

        if let Some(sg) = &spec.security_group_id {
            request = request.security_group_ids(sg);
        }

        if let Some(profile) = &spec.iam_instance_profile {
            request = request.iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(profile)
                    .build(),
            );
        }

        let response = request
            .send()
            .await
            .context("Failed to launch on-demand instance")?;

        let instance_id = response
            .instances()
            .first()
            .context("No instance returned")?
            .instance_id()
            .context("No instance ID")?
            .to_string();

        info!(instance_id = %instance_id, "Instance launched");

        Ok(instance_id)
    }

    /// Most recent spot price for the instance type over the lookback window.
    ///
    /// Returns `None` when the window contains no price points.
    pub async fn latest_spot_price(&self, instance_type: &str) -> Result<Option<String>> {
        let instance_type = Self::parse_instance_type(instance_type)?;
        let now = SystemTime::now();
        let lookback = now - Duration::from_secs(Self::SPOT_PRICE_LOOKBACK_SECS);

        let response = self
            .client
            .describe_spot_price_history()
            .instance_types(instance_type)
            .product_descriptions("Linux/UNIX")
            .start_time(DateTime::from(lookback))
            .end_time(DateTime::from(now))
            .send()
            .await
            .context("Failed to describe spot price history")?;

        let price = response
            .spot_price_history()
            .first()
            .and_then(|p| p.spot_price())
            .map(|s| s.to_string());

        debug!(price = ?price, "Fetched spot price history");

        Ok(price)
    }

    /// Submit a one-time spot request at the given price ceiling.
    pub async fn request_spot_instance(
        &self,
        spec: ProvisioningSpec,
        max_price: &str,
    ) -> Result<String> {
        let instance_type = Self::parse_instance_type(&spec.instance_type)?;

        let mut launch_spec = RequestSpotLaunchSpecification::builder()
            .image_id(&spec.image_id)
            .instance_type(instance_type)
            .user_data(Self::encode_user_data(&spec.user_data));

        if let Some(subnet) = &spec.subnet_id {
            launch_spec = launch_spec.subnet_id(subnet);
        }

        if let Some(sg) = &spec.security_group_id {
            launch_spec = launch_spec.security_group_ids(sg);
        }

        if let Some(profile) = &spec.iam_instance_profile {
            launch_spec = launch_spec.iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(profile)
                    .build(),
            );
        }

        let response = self
            .client
            .request_spot_instances()
            .spot_price(max_price)
            .instance_count(1)
            .r#type(SpotInstanceType::OneTime)
            .launch_specification(launch_spec.build())
            .tag_specifications(Self::tag_specifications(
                ResourceType::SpotInstancesRequest,
                &spec,
            ))
            .send()
            .await
            .context("Failed to request spot instance")?;

        let request_id = response
            .spot_instance_requests()
            .first()
            .context("No spot instance request returned")?
            .spot_instance_request_id()
            .context("No spot request ID")?
            .to_string();

        info!(request_id = %request_id, max_price = %max_price, "Spot request submitted");

        Ok(request_id)
    }

    /// Current state of a spot request.
    pub async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequestState> {
        let response = self
            .client
            .describe_spot_instance_requests()
            .spot_instance_request_ids(request_id)
            .send()
            .await
            .context("Failed to describe spot instance request")?;

        let request = response
            .spot_instance_requests()
            .first()
            .context("Spot instance request not found")?;

        let status_code = request
            .status()
            .and_then(|s| s.code())
            .unwrap_or("unknown")
            .to_string();

        Ok(match request.state() {
            Some(SpotInstanceState::Open) | Some(SpotInstanceState::Active) => {
                match request.instance_id() {
                    Some(instance_id) => SpotRequestState::Fulfilled {
                        instance_id: instance_id.to_string(),
                    },
                    None => SpotRequestState::Pending,
                }
            }
            Some(SpotInstanceState::Closed)
            | Some(SpotInstanceState::Cancelled)
            | Some(SpotInstanceState::Failed) => SpotRequestState::Dead {
                reason: status_code,
            },
            _ => SpotRequestState::Pending,
        })
    }

    /// Cancel a spot request. An already-gone request counts as cancelled.
    pub async fn cancel_spot_request(&self, request_id: &str) -> Result<()> {
        match self
            .client
            .cancel_spot_instance_requests()
            .spot_instance_request_ids(request_id)
            .send()
            .await
        {
            Ok(_) => {
                info!(request_id = %request_id, "Spot request cancelled");
                Ok(())
            }
            Err(e) => {
                let err = anyhow::Error::from(e);
                if classify_anyhow_error(&err).is_not_found() {
                    debug!(request_id = %request_id, "Spot request already gone");
                    Ok(())
                } else {
                    Err(err.context("Failed to cancel spot request"))
                }
            }
        }
    }

    /// Current run state of an instance.
    pub async fn instance_run_state(&self, instance_id: &str) -> Result<InstanceRunState> {
        let response = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .context("Failed to describe instance")?;

        let instance = response
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .context("Instance not found")?;

        let state = instance
            .state()
            .and_then(|s| s.name())
            .unwrap_or(&InstanceStateName::Pending);

        Ok(match state {
            InstanceStateName::Running => InstanceRunState::Running,
            InstanceStateName::Pending => InstanceRunState::Pending,
            other => InstanceRunState::Gone {
                state: other.as_str().to_string(),
            },
        })
    }

    /// Whether the instance's status checks currently pass.
    pub async fn instance_status_ok(&self, instance_id: &str) -> Result<bool> {
        let response = self
            .client
            .describe_instance_status()
            .instance_ids(instance_id)
            .include_all_instances(true)
            .send()
            .await
            .context("Failed to describe instance status")?;

        let Some(status) = response.instance_statuses().first() else {
            return Ok(false);
        };

        let instance_ok = status
            .instance_status()
            .and_then(|s| s.status())
            .map(|s| *s == SummaryStatus::Ok)
            .unwrap_or(false);
        let system_ok = status
            .system_status()
            .and_then(|s| s.status())
            .map(|s| *s == SummaryStatus::Ok)
            .unwrap_or(false);

        Ok(instance_ok && system_ok)
    }

    /// Terminate an instance.
    pub async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        info!(instance_id = %instance_id, "Terminating instance");

        self.client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .context("Failed to terminate instance")?;

        Ok(())
    }
}

/// Trait for EC2 operations that can be mocked in tests.
///
/// Every method is a single request/response call; the polling loops live in
/// the orchestration layers, so tests can assert on call counts and drive
/// time with a paused clock.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait Ec2Operations: Send + Sync {
    /// Submit an on-demand run request for exactly one instance
    async fn run_instance(&self, spec: ProvisioningSpec) -> Result<String>;

    /// Most recent spot price over the lookback window, if any
    async fn latest_spot_price(&self, instance_type: &str) -> Result<Option<String>>;

    /// Submit a one-time spot request, returning the request id
    async fn request_spot_instance(&self, spec: ProvisioningSpec, max_price: &str)
        -> Result<String>;

    /// Probe a spot request's fulfillment state
    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequestState>;

    /// Cancel a spot request (idempotent for already-gone requests)
    async fn cancel_spot_request(&self, request_id: &str) -> Result<()>;

    /// Probe an instance's run state
    async fn instance_run_state(&self, instance_id: &str) -> Result<InstanceRunState>;

    /// Probe whether an instance's status checks pass
    async fn instance_status_ok(&self, instance_id: &str) -> Result<bool>;

    /// Terminate an instance
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
}

impl Ec2Operations for Ec2Client {
    async fn run_instance(&self, spec: ProvisioningSpec) -> Result<String> {
        Ec2Client::run_instance(self, spec).await
    }

    async fn latest_spot_price(&self, instance_type: &str) -> Result<Option<String>> {
        Ec2Client::latest_spot_price(self, instance_type).await
    }

    async fn request_spot_instance(
        &self,
        spec: ProvisioningSpec,
        max_price: &str,
    ) -> Result<String> {
        Ec2Client::request_spot_instance(self, spec, max_price).await
    }

    async fn describe_spot_request(&self, request_id: &str) -> Result<SpotRequestState> {
        Ec2Client::describe_spot_request(self, request_id).await
    }

    async fn cancel_spot_request(&self, request_id: &str) -> Result<()> {
        Ec2Client::cancel_spot_request(self, request_id).await
    }

    async fn instance_run_state(&self, instance_id: &str) -> Result<InstanceRunState> {
        Ec2Client::instance_run_state(self, instance_id).await
    }

    async fn instance_status_ok(&self, instance_id: &str) -> Result<bool> {
        Ec2Client::instance_status_ok(self, instance_id).await
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        Ec2Client::terminate_instance(self, instance_id).await
    }
}
