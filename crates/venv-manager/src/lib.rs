//! Venv-Manager: versioned installation environments for Cloudy
//!
//! A versioned environment is an isolated installation directory (typically
//! a Python virtualenv) that is rebuilt once per distinct commit and then
//! snapshotted. Redeploying a commit that was already seen restores its
//! snapshot instead of rerunning the installation.
//!
//! ## Invariants
//!
//! - A commit is listed by [`Environment::releases`] iff a complete snapshot
//!   was durably recorded for it.
//! - [`Environment::rollback`] is idempotent.

pub mod error;
pub mod fakes;
pub mod ledger;
pub mod tree;
pub mod versioned;

pub use error::EnvError;
pub use ledger::{ReleaseEntry, ReleaseLedger};
pub use tree::tree_digest;
pub use versioned::{EnvConfig, VersionedEnv, SANDBOX_PLACEHOLDER};

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;

/// Capability interface over a snapshot-backed installation sandbox.
///
/// The deployment driver only talks to this trait, so alternative sandboxes
/// (or the in-memory fake in [`fakes`]) can be swapped in at construction.
pub trait Environment: Send + Sync {
    /// Commits with a recorded snapshot, oldest first.
    fn releases(&self) -> Result<Vec<String>>;

    /// Reset the sandbox to a clean, uninitialised state.
    fn checkout_latest(&self) -> Result<()>;

    /// Run `program` inside the sandbox tool context and return its stdout.
    ///
    /// Fails with [`EnvError::Command`] on non-zero exit.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Import a package installed at the system level into the sandbox,
    /// bypassing the package manager.
    fn copy_system_package(&self, name: &str) -> Result<()>;

    /// Durably record the current sandbox state under `commit`.
    fn snapshot(&self, commit: &str) -> Result<()>;

    /// Restore the sandbox to the state snapshotted for `commit`.
    ///
    /// Fails with [`EnvError::UnknownRelease`] if no snapshot exists.
    fn rollback(&self, commit: &str) -> Result<()>;

    /// Whether `commit` has a recorded snapshot.
    fn has_release(&self, commit: &str) -> Result<bool> {
        Ok(self.releases()?.iter().any(|c| c == commit))
    }
}
