//! Deployment groups: named push/notify policies.

use serde::{Deserialize, Serialize};

use crate::domain::{CloudyError, Result};

/// Branch value meaning "whatever branch is checked out".
pub const CURRENT_BRANCH: &str = "__current__";

/// A deployment group as written in the operator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentGroup {
    /// Branch to deploy, or [`CURRENT_BRANCH`]. Required.
    #[serde(default)]
    pub branch: Option<String>,
    /// Push the branch to the remote before updating endpoints
    #[serde(default)]
    pub push: bool,
    /// Push tags (once per run)
    #[serde(default)]
    pub push_tags: bool,
    /// Endpoint URLs, in notification order
    #[serde(default)]
    pub deployments: Vec<String>,
}

/// Parsed `branch` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSpec {
    Current,
    Named(String),
}

impl DeploymentGroup {
    /// Interpret the `branch` key; missing branch is a configuration error.
    pub fn branch_spec(&self, group_name: &str) -> Result<BranchSpec> {
        match self.branch.as_deref() {
            None => Err(CloudyError::Configuration(format!(
                "\"branch\" key missing from deployment group \"{group_name}\""
            ))),
            Some(CURRENT_BRANCH) => Ok(BranchSpec::Current),
            Some(name) => Ok(BranchSpec::Named(name.to_string())),
        }
    }
}

/// A requested group with its branch resolved to a concrete name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGroup {
    pub name: String,
    pub branch: String,
    pub push: bool,
    pub push_tags: bool,
    pub deployments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_spec_variants() {
        let group = DeploymentGroup {
            branch: Some(CURRENT_BRANCH.to_string()),
            ..Default::default()
        };
        assert_eq!(group.branch_spec("g").unwrap(), BranchSpec::Current);

        let group = DeploymentGroup {
            branch: Some("release".to_string()),
            ..Default::default()
        };
        assert_eq!(
            group.branch_spec("g").unwrap(),
            BranchSpec::Named("release".to_string())
        );
    }

    #[test]
    fn missing_branch_is_configuration_error() {
        let err = DeploymentGroup::default().branch_spec("web").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("\"web\""));
    }

    #[test]
    fn defaults_when_deserializing() {
        let group: DeploymentGroup = serde_json::from_str(r#"{"branch": "main"}"#).unwrap();
        assert!(!group.push);
        assert!(!group.push_tags);
        assert!(group.deployments.is_empty());
    }
}
