//! AWS client modules.
//!
//! - `context`: shared SDK configuration loading
//! - `ec2`: instance and spot-request operations
//! - `error`: AWS error-code classification

pub mod context;
pub mod ec2;
pub mod error;
mod types;

pub use context::AwsContext;
pub use ec2::{Ec2Client, Ec2Operations};
pub use error::{classify_anyhow_error, classify_aws_error, AwsError};
pub use types::{InstanceRunState, ProvisioningSpec, SpotRequestState};

#[cfg(test)]
pub use ec2::MockEc2Operations;
