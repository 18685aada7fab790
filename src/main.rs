//! ec2-runner: provision and tear down ephemeral GitHub Actions runners on
//! EC2.
//!
//! `start` emits the generated runner label and instance id as step outputs;
//! `stop` takes both back and releases the instance and the registration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ec2_runner::aws::{AwsContext, Ec2Client};
use ec2_runner::config::{
    parse_resource_tags, Ec2Config, GithubConfig, Repository, RunnerConfig,
};
use ec2_runner::error::{ConfigError, RunnerError};
use ec2_runner::github::GithubClient;
use ec2_runner::lifecycle::RunnerLifecycle;
use ec2_runner::policy::ProvisioningMode;

#[derive(Parser, Debug)]
#[command(name = "ec2-runner")]
#[command(about = "Ephemeral self-hosted GitHub Actions runners on AWS EC2")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// GitHub access arguments shared by both modes
#[derive(clap::Args, Debug)]
struct GithubArgs {
    /// GitHub token with self-hosted runner administration scope
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: String,

    /// Repository reference (owner/repo or full URL)
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: String,

    /// Register the runner at organization scope instead of repository scope
    #[arg(long)]
    org_runner: bool,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    github_api_url: String,
}

impl GithubArgs {
    fn into_config(self) -> Result<GithubConfig, ConfigError> {
        let repository: Repository = self.repository.parse()?;
        Ok(GithubConfig {
            token: self.github_token,
            repository,
            org_runner: self.org_runner,
            api_url: self.github_api_url,
        })
    }
}

/// Arguments for the start command
#[derive(clap::Args, Debug)]
struct StartArgs {
    #[command(flatten)]
    github: GithubArgs,

    /// AWS region to launch into
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// AMI to launch
    #[arg(long, env = "EC2_IMAGE_ID")]
    image_id: String,

    /// EC2 instance type (e.g., "c5.large")
    #[arg(long, env = "EC2_INSTANCE_TYPE")]
    instance_type: String,

    /// VPC subnet ID (uses the default VPC if not specified)
    #[arg(long)]
    subnet_id: Option<String>,

    /// Security group ID for the instance
    #[arg(long)]
    security_group_id: Option<String>,

    /// IAM instance profile name for the instance
    #[arg(long)]
    iam_instance_profile: Option<String>,

    /// Resource tags as a JSON array: [{"Key": "...", "Value": "..."}]
    #[arg(long)]
    resource_tags: Option<String>,

    /// Provisioning mode: None, SpotOnly, BestEffort, or MaxPerformance
    #[arg(long, default_value = "None")]
    provisioning_mode: String,
}

impl StartArgs {
    fn into_config(self) -> Result<RunnerConfig, ConfigError> {
        let provisioning_mode: ProvisioningMode = self.provisioning_mode.parse()?;
        let resource_tags = match &self.resource_tags {
            Some(json) => parse_resource_tags(json)?,
            None => Vec::new(),
        };
        let ec2 = Ec2Config {
            region: self.region,
            image_id: self.image_id,
            instance_type: self.instance_type,
            subnet_id: self.subnet_id,
            security_group_id: self.security_group_id,
            iam_instance_profile: self.iam_instance_profile,
            resource_tags,
        };
        Ok(RunnerConfig {
            github: self.github.into_config()?,
            ec2,
            provisioning_mode,
        })
    }
}

/// Arguments for the stop command
#[derive(clap::Args, Debug)]
struct StopArgs {
    #[command(flatten)]
    github: GithubArgs,

    /// AWS region the instance was launched into
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Instance id emitted by start
    #[arg(long, env = "EC2_INSTANCE_ID")]
    instance_id: String,

    /// Runner label emitted by start
    #[arg(long, env = "RUNNER_LABEL")]
    label: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision an instance and wait for its runner to come online
    Start(StartArgs),

    /// Tear down a previously provisioned runner
    Stop(StopArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    match args.command {
        Command::Start(start_args) => {
            let config = start_args.into_config().map_err(RunnerError::Config)?;

            let aws = AwsContext::new(&config.ec2.region).await;
            let ec2 = Ec2Client::from_context(&aws);
            let registry = GithubClient::new(&config.github)?;

            let mut lifecycle = RunnerLifecycle::new(ec2, registry);
            let outcome = lifecycle.start(&config, &cancel).await?;

            write_step_outputs(&[
                ("label", &outcome.label),
                ("ec2-instance-id", &outcome.instance_id),
            ])?;

            info!(
                label = %outcome.label,
                instance_id = %outcome.instance_id,
                "Runner provisioned"
            );
        }

        Command::Stop(stop_args) => {
            let github = stop_args.github.into_config().map_err(RunnerError::Config)?;

            let aws = AwsContext::new(&stop_args.region).await;
            let ec2 = Ec2Client::from_context(&aws);
            let registry = GithubClient::new(&github)?;

            let mut lifecycle =
                RunnerLifecycle::resume(ec2, registry, stop_args.label, stop_args.instance_id);
            lifecycle.stop(&cancel).await?;

            info!("Runner torn down");
        }
    }

    Ok(())
}

/// Cancel all in-flight waits when the process receives a termination
/// signal.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            warn!("Shutdown signal received, cancelling in-flight operations");
            cancel.cancel();
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Emit step outputs for the surrounding workflow.
///
/// Appends to `$GITHUB_OUTPUT` when running inside GitHub Actions, and
/// falls back to stdout otherwise.
fn write_step_outputs(outputs: &[(&str, &str)]) -> Result<()> {
    use std::io::Write;

    if let Ok(path) = std::env::var("GITHUB_OUTPUT") {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("Failed to open step output file {path}"))?;
        for (key, value) in outputs {
            writeln!(file, "{key}={value}").context("Failed to write step output")?;
        }
    } else {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        for (key, value) in outputs {
            let _ = writeln!(lock, "{key}={value}");
        }
    }

    Ok(())
}
