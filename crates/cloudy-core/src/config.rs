//! Operator configuration (`cloudy.yml`).
//!
//! ```yaml
//! deployment_groups:
//!   web:
//!     branch: main
//!     push: true
//!     deployments:
//!       - https://deploy.example.com/api/deployments/web-1/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CloudyError, DeploymentGroup, Result};
use crate::paths::normalize_start;

/// Config file looked up from the working directory upwards.
pub const CONFIG_FILE: &str = "cloudy.yml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CLOUDY_CONFIG";

/// Parsed operator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub deployment_groups: BTreeMap<String, DeploymentGroup>,
    /// File this configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl CliConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        // An empty document is an empty configuration.
        let parsed: Option<CliConfig> = serde_yaml_ng::from_str(text)
            .map_err(|e| CloudyError::Configuration(format!("invalid configuration: {e}")))?;
        Ok(parsed.unwrap_or_default())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            CloudyError::Configuration(format!("cannot read configuration {:?}: {e}", path))
        })?;
        let mut config = Self::from_yaml_str(&text).map_err(|e| match e {
            CloudyError::Configuration(msg) => {
                CloudyError::Configuration(format!("{:?}: {msg}", path))
            }
            other => other,
        })?;
        config.source = Some(path.to_path_buf());
        debug!(path = ?path, groups = config.deployment_groups.len(), "loaded configuration");
        Ok(config)
    }

    /// Locate and load the configuration.
    ///
    /// Lookup order: `explicit`, then `env_path` (the value of
    /// [`CONFIG_ENV`]), then the nearest [`CONFIG_FILE`] above `cwd`.
    pub fn discover(explicit: Option<&Path>, env_path: Option<&Path>, cwd: &Path) -> Result<Self> {
        if let Some(path) = explicit.or(env_path) {
            return Self::load(path);
        }
        let cwd = normalize_start(cwd)?;
        for dir in cwd.ancestors() {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        Err(CloudyError::Configuration(format!(
            "no {CONFIG_FILE} found above {:?}; pass --config or set {CONFIG_ENV}",
            cwd
        )))
    }

    pub fn group(&self, name: &str) -> Option<&DeploymentGroup> {
        self.deployment_groups.get(name)
    }

    /// `(name, branch)` for every group, sorted by name.
    pub fn group_listing(&self) -> Vec<(&str, &str)> {
        self.deployment_groups
            .iter()
            .map(|(name, group)| (name.as_str(), group.branch.as_deref().unwrap_or("<missing>")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
deployment_groups:
  web:
    branch: main
    push: true
    deployments:
      - http://deploy/web-1/
      - http://deploy/web-2/
  staging:
    branch: __current__
"#;

    #[test]
    fn parses_groups() {
        let config = CliConfig::from_yaml_str(SAMPLE).unwrap();
        let web = config.group("web").unwrap();
        assert_eq!(web.branch.as_deref(), Some("main"));
        assert!(web.push);
        assert!(!web.push_tags);
        assert_eq!(web.deployments.len(), 2);
        assert!(config.group("staging").unwrap().deployments.is_empty());
    }

    #[test]
    fn empty_document_is_empty_config() {
        let config = CliConfig::from_yaml_str("").unwrap();
        assert!(config.deployment_groups.is_empty());
    }

    #[test]
    fn malformed_yaml_is_configuration_error() {
        let err = CliConfig::from_yaml_str("deployment_groups: [1, 2").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn listing_is_sorted() {
        let config = CliConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(
            config.group_listing(),
            vec![("staging", "__current__"), ("web", "main")]
        );
    }

    #[test]
    fn discover_walks_up_from_cwd() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), SAMPLE).unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let config = CliConfig::discover(None, None, &nested).unwrap();
        assert_eq!(config.source.as_deref(), Some(dir.path().join(CONFIG_FILE).as_path()));
        assert_eq!(config.deployment_groups.len(), 2);
    }

    #[test]
    fn explicit_path_wins_over_env() {
        let dir = tempdir().unwrap();
        let explicit = dir.path().join("explicit.yml");
        let from_env = dir.path().join("env.yml");
        fs::write(&explicit, "deployment_groups:\n  a:\n    branch: x\n").unwrap();
        fs::write(&from_env, "deployment_groups:\n  b:\n    branch: y\n").unwrap();

        let config = CliConfig::discover(Some(&explicit), Some(&from_env), dir.path()).unwrap();
        assert!(config.group("a").is_some());

        let config = CliConfig::discover(None, Some(&from_env), dir.path()).unwrap();
        assert!(config.group("b").is_some());
    }

    #[test]
    fn missing_explicit_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let err = CliConfig::discover(Some(&dir.path().join("nope.yml")), None, dir.path())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
