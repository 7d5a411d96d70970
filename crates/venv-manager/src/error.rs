//! Error types for venv-manager

use thiserror::Error;

/// Errors that can occur while managing a versioned environment
#[derive(Error, Debug)]
pub enum EnvError {
    /// The sandbox could not be created, reset, snapshotted or restored
    #[error("environment error: {0}")]
    Environment(String),

    /// Rollback requested for a commit that was never snapshotted
    #[error("unknown release: no snapshot recorded for commit {commit}")]
    UnknownRelease { commit: String },

    /// A command run inside the sandbox exited non-zero
    #[error("command `{command}` failed ({}): {output}", describe_status(*status))]
    Command {
        command: String,
        /// Exit code, `None` when the process was killed by a signal
        status: Option<i32>,
        /// Captured stdout followed by stderr
        output: String,
    },

    /// A system package requested for copy is not installed system-wide
    #[error("system package not found: {0}")]
    SystemPackageNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ledger (de)serialization error
    #[error("release ledger is corrupt: {0}")]
    Ledger(#[from] serde_json::Error),
}

impl EnvError {
    /// Whether this error belongs to the environment-integrity category
    /// (sandbox creation, snapshot storage, system packages).
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            EnvError::Environment(_)
                | EnvError::SystemPackageNotFound(_)
                | EnvError::Io(_)
                | EnvError::Ledger(_)
        )
    }
}

fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_mentions_status_and_output() {
        let err = EnvError::Command {
            command: "pip install -r requirements.txt".to_string(),
            status: Some(2),
            output: "no such file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pip install"));
        assert!(msg.contains("exit status 2"));
        assert!(msg.contains("no such file"));
        assert!(!err.is_environment());
    }

    #[test]
    fn command_error_killed_by_signal() {
        let err = EnvError::Command {
            command: "python setup.py install".to_string(),
            status: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn unknown_release_is_not_environment_category() {
        let err = EnvError::UnknownRelease {
            commit: "abc123".to_string(),
        };
        assert!(err.to_string().contains("abc123"));
        assert!(!err.is_environment());
        assert!(EnvError::SystemPackageNotFound("PyQt4".into()).is_environment());
    }
}
