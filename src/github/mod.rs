//! GitHub Actions self-hosted runner registration client.
//!
//! Thin wrapper over the runner-registration endpoints, scope-sensitive to
//! organization vs repository registration. Orchestration code depends on
//! the [`RunnerRegistry`] trait so it can be tested against mocks.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GithubConfig;

/// Runner status reported by GitHub when the runner is connected.
const STATUS_ONLINE: &str = "online";

/// Short-lived credential used once to bootstrap runner self-registration.
///
/// The value is deliberately excluded from `Debug` output so it cannot leak
/// into logs.
#[derive(Clone)]
pub struct RegistrationToken(String);

impl RegistrationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for embedding into the boot payload.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegistrationToken(..)")
    }
}

/// One registered self-hosted runner.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerInfo {
    pub id: u64,
    pub name: String,
    pub status: String,
}

impl RunnerInfo {
    pub fn is_online(&self) -> bool {
        self.status == STATUS_ONLINE
    }
}

/// Trait for the runner registration operations, mockable in tests.
#[allow(async_fn_in_trait)] // Internal use only, Send+Sync bounds on trait are sufficient
#[cfg_attr(test, mockall::automock)]
pub trait RunnerRegistry: Send + Sync {
    /// Issue a registration token for the configured scope
    async fn create_registration_token(&self) -> Result<RegistrationToken>;

    /// List the self-hosted runners registered at the configured scope
    async fn list_runners(&self) -> Result<Vec<RunnerInfo>>;

    /// Remove a runner by id (idempotent for already-removed runners)
    async fn remove_runner(&self, runner_id: u64) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RunnersPage {
    runners: Vec<RunnerInfo>,
}

/// GitHub API client scoped to one repository or organization.
pub struct GithubClient {
    http: reqwest::Client,
    runners_root: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .context("GitHub token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("ec2-runner"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            runners_root: runners_root(
                &config.api_url,
                &config.repository.owner,
                &config.repository.name,
                config.org_runner,
            ),
        })
    }
}

/// Base URL for the runner endpoints at the configured scope.
fn runners_root(api_url: &str, owner: &str, repo: &str, org_runner: bool) -> String {
    let api_url = api_url.trim_end_matches('/');
    if org_runner {
        format!("{api_url}/orgs/{owner}/actions/runners")
    } else {
        format!("{api_url}/repos/{owner}/{repo}/actions/runners")
    }
}

impl RunnerRegistry for GithubClient {
    async fn create_registration_token(&self) -> Result<RegistrationToken> {
        let url = format!("{}/registration-token", self.runners_root);

        let response = self
            .http
            .post(&url)
            .send()
            .await
            .context("Failed to request a runner registration token")?
            .error_for_status()
            .context("GitHub rejected the registration token request")?;

        let body: TokenResponse = response
            .json()
            .await
            .context("Failed to parse registration token response")?;

        info!("Runner registration token issued");

        Ok(RegistrationToken::new(body.token))
    }

    async fn list_runners(&self) -> Result<Vec<RunnerInfo>> {
        let url = format!("{}?per_page=100", self.runners_root);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to list self-hosted runners")?
            .error_for_status()
            .context("GitHub rejected the runner listing request")?;

        let page: RunnersPage = response
            .json()
            .await
            .context("Failed to parse runner listing response")?;

        Ok(page.runners)
    }

    async fn remove_runner(&self, runner_id: u64) -> Result<()> {
        let url = format!("{}/{}", self.runners_root, runner_id);

        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .context("Failed to remove self-hosted runner")?;

        // A runner that is already gone counts as removed
        if response.status() == StatusCode::NOT_FOUND {
            debug!(runner_id, "Runner already removed");
            return Ok(());
        }

        response
            .error_for_status()
            .context("GitHub rejected the runner removal request")?;

        info!(runner_id, "Runner removed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_scope_endpoints() {
        assert_eq!(
            runners_root("https://api.github.com", "octocat", "hello-world", false),
            "https://api.github.com/repos/octocat/hello-world/actions/runners"
        );
    }

    #[test]
    fn org_scope_endpoints() {
        assert_eq!(
            runners_root("https://api.github.com/", "octocat", "hello-world", true),
            "https://api.github.com/orgs/octocat/actions/runners"
        );
    }

    #[test]
    fn registration_token_debug_is_redacted() {
        let token = RegistrationToken::new("super-secret");
        assert_eq!(format!("{token:?}"), "RegistrationToken(..)");
        assert_eq!(token.expose(), "super-secret");
    }

    #[test]
    fn runner_online_check_requires_online_status() {
        let mut runner = RunnerInfo {
            id: 7,
            name: "ec2-runner-x".to_string(),
            status: "offline".to_string(),
        };
        assert!(!runner.is_online());
        runner.status = "online".to_string();
        assert!(runner.is_online());
    }

    #[test]
    fn runner_listing_deserializes() {
        let page: RunnersPage = serde_json::from_str(
            r#"{
                "total_count": 1,
                "runners": [
                    {"id": 23, "name": "ec2-runner-abc", "os": "linux", "status": "online", "busy": false}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(page.runners.len(), 1);
        assert_eq!(page.runners[0].id, 23);
        assert!(page.runners[0].is_online());
    }
}
