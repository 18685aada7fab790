//! Launch parameters and probe results shared by the EC2 client and the
//! orchestration layers.

use crate::config::{Ec2Config, ResourceTag};

/// Immutable launch parameters for one provisioning attempt.
///
/// Constructed once per launch and reused verbatim by the fallback path, so
/// a spot attempt and its on-demand fallback are guaranteed to describe the
/// same instance.
#[derive(Debug, Clone)]
pub struct ProvisioningSpec {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
    pub iam_instance_profile: Option<String>,
    pub resource_tags: Vec<ResourceTag>,
    /// Raw boot script; base64-encoded at submission time.
    pub user_data: String,
    /// Runner label, used for the `Name` tag.
    pub label: String,
}

impl ProvisioningSpec {
    pub fn from_config(ec2: &Ec2Config, label: &str, user_data: String) -> Self {
        Self {
            image_id: ec2.image_id.clone(),
            instance_type: ec2.instance_type.clone(),
            subnet_id: ec2.subnet_id.clone(),
            security_group_id: ec2.security_group_id.clone(),
            iam_instance_profile: ec2.iam_instance_profile.clone(),
            resource_tags: ec2.resource_tags.clone(),
            user_data,
            label: label.to_string(),
        }
    }
}

/// Where a spot request currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotRequestState {
    /// Still open, not yet matched to capacity
    Pending,
    /// Matched; the instance exists
    Fulfilled { instance_id: String },
    /// Closed, cancelled, or failed without fulfillment
    Dead { reason: String },
}

/// Where a launched instance currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRunState {
    Pending,
    Running,
    /// Any terminal or unexpected state while waiting for `running`
    Gone { state: String },
}
