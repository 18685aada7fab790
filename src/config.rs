//! Immutable runner configuration.
//!
//! Built once from the process inputs and passed into each component; no
//! ambient or global configuration is read during orchestration.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::ProvisioningMode;

/// A GitHub repository reference, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    /// URL runners register against in repository scope.
    pub fn html_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }

    /// URL runners register against in organization scope.
    pub fn org_url(&self) -> String {
        format!("https://github.com/{}", self.owner)
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl FromStr for Repository {
    type Err = ConfigError;

    /// Accepts `owner/repo` or a full `https://github.com/owner/repo` URL,
    /// with an optional `.git` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .trim()
            .trim_start_matches("https://github.com/")
            .trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if valid_segment(owner) && valid_segment(name) => {
                Ok(Repository {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidRepository(s.to_string())),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One tag applied to launched AWS resources.
///
/// Deserialized from the `[{"Key": ..., "Value": ...}]` JSON form the AWS
/// consoles and CLIs use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceTag {
    pub key: String,
    pub value: String,
}

/// Parse the resource-tags input, an optional JSON array of key/value pairs.
pub fn parse_resource_tags(json: &str) -> Result<Vec<ResourceTag>, ConfigError> {
    serde_json::from_str(json).map_err(ConfigError::InvalidResourceTags)
}

/// GitHub API access and registration scope.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    pub repository: Repository,
    /// Register at organization scope instead of repository scope.
    pub org_runner: bool,
    /// API base URL, overridable for GitHub Enterprise.
    pub api_url: String,
}

impl GithubConfig {
    /// The URL the runner registers against, per the configured scope.
    pub fn registration_url(&self) -> String {
        if self.org_runner {
            self.repository.org_url()
        } else {
            self.repository.html_url()
        }
    }
}

/// EC2 launch parameters.
#[derive(Debug, Clone)]
pub struct Ec2Config {
    pub region: String,
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
    pub iam_instance_profile: Option<String>,
    pub resource_tags: Vec<ResourceTag>,
}

/// Everything a `start` needs, constructed once.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub github: GithubConfig,
    pub ec2: Ec2Config,
    pub provisioning_mode: ProvisioningMode,
}
