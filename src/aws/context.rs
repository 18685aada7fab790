//! Shared AWS configuration context.
//!
//! Loads the SDK configuration once and hands out service clients built from
//! the same config.

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Loaded AWS SDK configuration for a region.
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
}

impl AwsContext {
    /// Load AWS configuration for the specified region.
    ///
    /// Credentials and other SDK settings come from the environment, config
    /// files, and instance roles, in the SDK's usual resolution order.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            config: Arc::new(config),
        }
    }

    /// Create an EC2 client from this context.
    pub fn ec2_client(&self) -> aws_sdk_ec2::Client {
        aws_sdk_ec2::Client::new(&self.config)
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.config.region())
            .finish_non_exhaustive()
    }
}
