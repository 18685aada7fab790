//! ec2-runner - ephemeral self-hosted GitHub Actions runners on AWS EC2.
//!
//! `start` provisions one EC2 instance (spot or on-demand per the
//! provisioning mode, with a single spot-to-on-demand fallback), registers
//! it as a self-hosted runner, and waits until both the instance status
//! checks and the runner registration are ready. `stop` releases the
//! instance and the registration concurrently, reporting partial failures.

pub mod aws;
pub mod config;
pub mod error;
pub mod github;
pub mod join;
pub mod launcher;
pub mod lifecycle;
pub mod policy;
pub mod readiness;
pub mod teardown;
pub mod user_data;
pub mod wait;
