//! Boot payload for runner instances.
//!
//! Renders the user-data script that installs the GitHub Actions runner,
//! registers it with the issued token under the generated label, and starts
//! it. The launcher treats the rendered script as an opaque blob.

use anyhow::{bail, Result};

/// Actions runner release installed by the boot script.
const RUNNER_VERSION: &str = "2.313.0";

/// Validate that a value is safe for interpolation into a double-quoted
/// bash string.
///
/// Rejects characters that could break the quoting or enable injection
/// (`"`, `\`, `` ` ``, `$`, newlines).
fn validate_shell_input(value: &str, field: &str) -> Result<()> {
    const FORBIDDEN: &[char] = &['"', '\\', '`', '$', '\n', '\r'];
    if value.is_empty() {
        bail!("{field} cannot be empty");
    }
    if let Some(bad) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        bail!("{field} contains a character unsafe for shell interpolation: {bad:?}");
    }
    Ok(())
}

/// Render the boot script that registers and runs an Actions runner named
/// `label` against `registration_url`.
pub fn runner_bootstrap_script(registration_url: &str, token: &str, label: &str) -> Result<String> {
    validate_shell_input(registration_url, "registration URL")?;
    validate_shell_input(token, "registration token")?;
    validate_shell_input(label, "runner label")?;

    Ok(format!(
        r#"#!/bin/bash
set -euo pipefail

echo "Configuring GitHub Actions runner"
mkdir -p /actions-runner
cd /actions-runner

case $(uname -m) in
    aarch64) RUNNER_ARCH="arm64" ;;
    amd64 | x86_64) RUNNER_ARCH="x64" ;;
esac

curl -O -L "https://github.com/actions/runner/releases/download/v{version}/actions-runner-linux-${{RUNNER_ARCH}}-{version}.tar.gz"
tar xzf "./actions-runner-linux-${{RUNNER_ARCH}}-{version}.tar.gz"

export RUNNER_ALLOW_RUNASROOT=1
./config.sh --url "{url}" --token "{token}" --name "{label}" --work _work --labels "{label}"
./run.sh
"#,
        version = RUNNER_VERSION,
        url = registration_url,
        token = token,
        label = label,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_registers_under_label_and_url() {
        let script = runner_bootstrap_script(
            "https://github.com/octocat/hello-world",
            "AAREGTOKEN123",
            "ec2-runner-abc123",
        )
        .unwrap();

        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("set -euo pipefail"));
        assert!(script.contains("--url \"https://github.com/octocat/hello-world\""));
        assert!(script.contains("--token \"AAREGTOKEN123\""));
        assert!(script.contains("--name \"ec2-runner-abc123\""));
        assert!(script.contains("--labels \"ec2-runner-abc123\""));
        assert!(script.contains("./run.sh"));
    }

    #[test]
    fn script_selects_architecture_at_boot() {
        let script =
            runner_bootstrap_script("https://github.com/octocat/hello-world", "tok", "label")
                .unwrap();
        assert!(script.contains("uname -m"));
        assert!(script.contains("${RUNNER_ARCH}"));
    }

    #[test]
    fn rejects_shell_injection_in_label() {
        let err = runner_bootstrap_script(
            "https://github.com/octocat/hello-world",
            "tok",
            "x\"; rm -rf /; echo \"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("runner label"));
    }

    #[test]
    fn rejects_dollar_expansion_in_token() {
        assert!(runner_bootstrap_script(
            "https://github.com/octocat/hello-world",
            "$(whoami)",
            "label",
        )
        .is_err());
    }

    #[test]
    fn rejects_empty_inputs() {
        assert!(runner_bootstrap_script("", "tok", "label").is_err());
        assert!(runner_bootstrap_script("https://github.com/o/r", "", "label").is_err());
        assert!(runner_bootstrap_script("https://github.com/o/r", "tok", "").is_err());
    }
}
