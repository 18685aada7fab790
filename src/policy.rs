//! Provisioning mode to launch strategy mapping.
//!
//! A pure decision table: no side effects, no state. The strategy is what
//! the launcher dispatches on, so the "at most one fallback" invariant is
//! carried by the strategy value rather than by convention in the launch
//! code.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// How the operator asked for capacity to be provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// No spot usage; plain on-demand capacity.
    None,
    /// Spot capacity or nothing.
    SpotOnly,
    /// Spot capacity if available, on-demand otherwise.
    BestEffort,
    /// Reserved for a future on-demand-only guarantee; currently behaves
    /// like `BestEffort`.
    MaxPerformance,
}

/// The launch path the launcher executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    OnDemand,
    SpotOnly,
    SpotThenOnDemand,
}

impl ProvisioningMode {
    /// Resolve the launch strategy for this mode.
    pub fn strategy(self) -> LaunchStrategy {
        match self {
            ProvisioningMode::None => LaunchStrategy::OnDemand,
            ProvisioningMode::SpotOnly => LaunchStrategy::SpotOnly,
            ProvisioningMode::BestEffort | ProvisioningMode::MaxPerformance => {
                LaunchStrategy::SpotThenOnDemand
            }
        }
    }
}

impl FromStr for ProvisioningMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(ProvisioningMode::None),
            "SpotOnly" => Ok(ProvisioningMode::SpotOnly),
            "BestEffort" => Ok(ProvisioningMode::BestEffort),
            "MaxPerformance" => Ok(ProvisioningMode::MaxPerformance),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for ProvisioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningMode::None => "None",
            ProvisioningMode::SpotOnly => "SpotOnly",
            ProvisioningMode::BestEffort => "BestEffort",
            ProvisioningMode::MaxPerformance => "MaxPerformance",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table_is_total_and_deterministic() {
        assert_eq!(ProvisioningMode::None.strategy(), LaunchStrategy::OnDemand);
        assert_eq!(
            ProvisioningMode::SpotOnly.strategy(),
            LaunchStrategy::SpotOnly
        );
        assert_eq!(
            ProvisioningMode::BestEffort.strategy(),
            LaunchStrategy::SpotThenOnDemand
        );
        assert_eq!(
            ProvisioningMode::MaxPerformance.strategy(),
            LaunchStrategy::SpotThenOnDemand
        );
    }

    #[test]
    fn known_modes_round_trip_through_parse() {
        for name in ["None", "SpotOnly", "BestEffort", "MaxPerformance"] {
            let mode: ProvisioningMode = name.parse().unwrap();
            assert_eq!(mode.to_string(), name);
        }
    }

    #[test]
    fn unknown_modes_are_rejected() {
        for bad in ["", "none", "spot", "OnDemand", "BestEffort "] {
            let err = bad.parse::<ProvisioningMode>().unwrap_err();
            assert!(matches!(err, ConfigError::UnknownMode(_)));
        }
    }
}
