//! Deployment identity and the context handed to the orchestrator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{CloudyError, Result};
use crate::paths::normalize_start;
use crate::variables::{find_deployment_variables, DeploymentVariables};

/// File written on each deployment target describing what to deploy.
pub const DEPLOYMENT_DATA_FILE: &str = "cloudy-deployment.json";

/// Identity record of one deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentData {
    /// Commit the target must run
    pub commit: String,
    /// Deployment name as known by the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target-local metadata
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DeploymentData {
    pub fn new(commit: impl Into<String>) -> Self {
        DeploymentData {
            commit: commit.into(),
            name: None,
            extra: BTreeMap::new(),
        }
    }

    /// Load deployment data from an explicit file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            CloudyError::Configuration(format!("invalid deployment data {:?}: {e}", path))
        })
    }

    /// Walk up from `start` to the nearest [`DEPLOYMENT_DATA_FILE`].
    /// Returns the directory holding it along with the data.
    pub fn find(start: &Path) -> Result<Option<(PathBuf, Self)>> {
        let start = normalize_start(start)?;
        for dir in start.ancestors() {
            let candidate = dir.join(DEPLOYMENT_DATA_FILE);
            if candidate.is_file() {
                let data = Self::load(&candidate)?;
                return Ok(Some((dir.to_path_buf(), data)));
            }
        }
        Ok(None)
    }
}

/// Everything a deployment run needs to know about its target, resolved
/// once at the start of the run and passed explicitly.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    /// Directory holding the deployment data
    pub deployment_dir: PathBuf,
    pub data: DeploymentData,
    pub variables: Option<DeploymentVariables>,
}

impl DeploymentContext {
    pub fn new(
        deployment_dir: impl Into<PathBuf>,
        data: DeploymentData,
        variables: Option<DeploymentVariables>,
    ) -> Self {
        DeploymentContext {
            deployment_dir: deployment_dir.into(),
            data,
            variables,
        }
    }

    /// Locate deployment data and variables from `start`.
    ///
    /// Missing deployment data is a configuration error; missing variables
    /// are not.
    pub fn discover(start: &Path) -> Result<Self> {
        let start = normalize_start(start)?;
        let (deployment_dir, data) = DeploymentData::find(&start)?.ok_or_else(|| {
            CloudyError::Configuration(format!(
                "deployment state not found: no {DEPLOYMENT_DATA_FILE} above {:?}",
                start
            ))
        })?;
        let variables = find_deployment_variables(&start)?;
        Ok(DeploymentContext::new(deployment_dir, data, variables))
    }

    pub fn commit(&self) -> &str {
        &self.data.commit
    }
}
