//! Domain-level error taxonomy for Cloudy.

use std::path::PathBuf;

use venv_manager::EnvError;

use crate::endpoint::EndpointError;

/// Cloudy domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CloudyError {
    /// Invalid or missing operator/deployment configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A variables file exists but could not be parsed.
    #[error("invalid variables file {path:?}: {message}")]
    InvalidVariables { path: PathBuf, message: String },

    /// Sandbox, release, or sandboxed command failure.
    #[error(transparent)]
    Environment(#[from] EnvError),

    #[error("git error: {0}")]
    GitError(String),

    /// A deployment endpoint could not be polled or updated.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// An `install` or `post_install` hook failed.
    #[error("{hook} hook failed: {message}")]
    Hook { hook: &'static str, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudyError {
    /// Whether this error is a configuration/usage problem (exit status 1,
    /// reported before any mutating action).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CloudyError::Configuration(_) | CloudyError::InvalidVariables { .. }
        )
    }

    /// Whether this is a rollback against a commit with no snapshot.
    pub fn is_unknown_release(&self) -> bool {
        matches!(
            self,
            CloudyError::Environment(EnvError::UnknownRelease { .. })
        )
    }
}

/// Result type for Cloudy domain operations.
pub type Result<T> = std::result::Result<T, CloudyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        let err = CloudyError::Configuration("No such deployment group \"web\"".to_string());
        assert!(err.is_configuration());
        assert!(err.to_string().contains("configuration error"));

        let err = CloudyError::InvalidVariables {
            path: PathBuf::from("/srv/cloudy-vars.json"),
            message: "expected value".to_string(),
        };
        assert!(err.is_configuration());
        assert!(err.to_string().contains("cloudy-vars.json"));
    }

    #[test]
    fn environment_errors_pass_through() {
        let err = CloudyError::from(EnvError::UnknownRelease {
            commit: "abc123".to_string(),
        });
        assert!(!err.is_configuration());
        assert!(err.is_unknown_release());
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn hook_error_names_the_hook() {
        let err = CloudyError::Hook {
            hook: "post_install",
            message: "service restart failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("post_install hook failed"));
        assert!(msg.contains("service restart failed"));
    }
}
