//! Filesystem-backed versioned environment.
//!
//! Layout under the environment root:
//!
//! ```text
//! <root>/current/             the live sandbox
//! <root>/snapshots/<commit>/  one full copy of the sandbox per release
//! <root>/releases.json        the release ledger
//! ```
//!
//! A commit only appears in the ledger once its snapshot directory is fully in
//! place, and the ledger is the single source of truth for `releases()`.

use crate::error::EnvError;
use crate::ledger::{ReleaseEntry, ReleaseLedger};
use crate::tree::{copy_tree, remove_path, tree_digest};
use crate::{Environment, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Placeholder replaced by the sandbox path in bootstrap commands.
pub const SANDBOX_PLACEHOLDER: &str = "{sandbox}";

/// Settings for a [`VersionedEnv`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Directory holding the sandbox, snapshots and ledger
    pub root_dir: PathBuf,
    /// Working directory for sandboxed commands (process cwd when unset)
    pub work_dir: Option<PathBuf>,
    /// Command that initialises an empty sandbox, e.g.
    /// `python3 -m venv {sandbox}`. Empty means "just create the directory".
    pub bootstrap: Vec<String>,
    /// Where system packages are copied, relative to the sandbox
    pub package_dir: PathBuf,
    /// Directories searched by `copy_system_package`
    pub system_package_dirs: Vec<PathBuf>,
}

impl EnvConfig {
    /// Config with no bootstrap command and `site-packages` as package dir
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        EnvConfig {
            root_dir: root_dir.into(),
            work_dir: None,
            bootstrap: Vec::new(),
            package_dir: PathBuf::from("site-packages"),
            system_package_dirs: Vec::new(),
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_bootstrap<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.package_dir = dir.into();
        self
    }

    pub fn with_system_package_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_package_dirs.push(dir.into());
        self
    }
}

/// Snapshot-backed sandbox living on the local filesystem
#[derive(Debug, Clone)]
pub struct VersionedEnv {
    config: EnvConfig,
    ledger: ReleaseLedger,
}

impl VersionedEnv {
    /// Open (or lazily create) the environment rooted at `config.root_dir`.
    pub fn open(config: EnvConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_dir).map_err(|e| {
            EnvError::Environment(format!(
                "cannot create environment root {:?}: {e}",
                config.root_dir
            ))
        })?;
        let ledger = ReleaseLedger::new(config.root_dir.join("releases.json"));
        Ok(VersionedEnv { config, ledger })
    }

    /// Open an environment that must already exist; never creates anything.
    pub fn open_existing(config: EnvConfig) -> Result<Self> {
        if !config.root_dir.is_dir() {
            return Err(EnvError::Environment(format!(
                "no environment at {:?}",
                config.root_dir
            )));
        }
        let ledger = ReleaseLedger::new(config.root_dir.join("releases.json"));
        Ok(VersionedEnv { config, ledger })
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// The live sandbox directory
    pub fn sandbox_dir(&self) -> PathBuf {
        self.config.root_dir.join("current")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.config.root_dir.join("snapshots")
    }

    fn snapshot_dir(&self, commit: &str) -> PathBuf {
        self.snapshots_dir().join(commit)
    }

    /// Full ledger entries, oldest first
    pub fn release_entries(&self) -> Result<Vec<ReleaseEntry>> {
        self.ledger.load()
    }

    fn require_sandbox(&self) -> Result<PathBuf> {
        let sandbox = self.sandbox_dir();
        if sandbox.is_dir() {
            Ok(sandbox)
        } else {
            Err(EnvError::Environment(format!(
                "sandbox {:?} does not exist; call checkout_latest first",
                sandbox
            )))
        }
    }

    fn tool_path(&self, sandbox: &Path) -> Result<OsString> {
        let mut paths = vec![sandbox.join("bin")];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths)
            .map_err(|e| EnvError::Environment(format!("cannot build PATH: {e}")))
    }

    fn bootstrap(&self, sandbox: &Path) -> Result<()> {
        let Some((program, args)) = self.config.bootstrap.split_first() else {
            return Ok(());
        };
        let sandbox_str = sandbox.to_string_lossy();
        let program = program.replace(SANDBOX_PLACEHOLDER, &sandbox_str);
        let args: Vec<String> = args
            .iter()
            .map(|a| a.replace(SANDBOX_PLACEHOLDER, &sandbox_str))
            .collect();

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        if let Some(dir) = &self.config.work_dir {
            cmd.current_dir(dir);
        }
        execute(cmd, render_command(&program, &args)).map_err(|e| {
            EnvError::Environment(format!("sandbox bootstrap failed: {e}"))
        })?;
        Ok(())
    }

    fn find_system_package(&self, name: &str) -> Option<Vec<PathBuf>> {
        for dir in &self.config.system_package_dirs {
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };
            let matches: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .filter(|e| is_package_entry(&e.file_name().to_string_lossy(), name))
                .map(|e| e.path())
                .collect();
            if !matches.is_empty() {
                return Some(matches);
            }
        }
        None
    }
}

impl Environment for VersionedEnv {
    fn releases(&self) -> Result<Vec<String>> {
        Ok(self.ledger.load()?.into_iter().map(|e| e.commit).collect())
    }

    fn checkout_latest(&self) -> Result<()> {
        let sandbox = self.sandbox_dir();
        info!(sandbox = ?sandbox, "resetting sandbox");

        remove_path(&sandbox)
            .and_then(|_| fs::create_dir_all(&sandbox).map_err(EnvError::from))
            .map_err(|e| EnvError::Environment(format!("cannot reset sandbox {:?}: {e}", sandbox)))?;

        self.bootstrap(&sandbox)
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let sandbox = self.require_sandbox()?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("VIRTUAL_ENV", &sandbox)
            .env("PATH", self.tool_path(&sandbox)?)
            .env_remove("PYTHONHOME");
        if let Some(dir) = &self.config.work_dir {
            cmd.current_dir(dir);
        }
        execute(cmd, render_command(program, args))
    }

    fn copy_system_package(&self, name: &str) -> Result<()> {
        let sandbox = self.require_sandbox()?;
        let sources = self
            .find_system_package(name)
            .ok_or_else(|| EnvError::SystemPackageNotFound(name.to_string()))?;

        let dest_dir = sandbox.join(&self.config.package_dir);
        fs::create_dir_all(&dest_dir)?;
        for source in sources {
            let Some(file_name) = source.file_name() else {
                continue;
            };
            let dest = dest_dir.join(file_name);
            remove_path(&dest)?;
            if source.is_dir() {
                copy_tree(&source, &dest)?;
            } else {
                fs::copy(&source, &dest)?;
            }
            debug!(package = name, from = ?source, to = ?dest, "copied system package entry");
        }
        info!(package = name, "copied system package into sandbox");
        Ok(())
    }

    fn snapshot(&self, commit: &str) -> Result<()> {
        validate_commit(commit)?;
        let sandbox = self.require_sandbox()?;
        let snapshots = self.snapshots_dir();
        fs::create_dir_all(&snapshots)?;

        // The commit's own name only ever holds a complete copy.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&snapshots)?;
        let staged_tree = staging.path().join("tree");
        copy_tree(&sandbox, &staged_tree)
            .map_err(|e| EnvError::Environment(format!("snapshot copy failed: {e}")))?;
        let digest = tree_digest(&staged_tree)?;

        let target = self.snapshot_dir(commit);
        remove_path(&target)?;
        fs::rename(&staged_tree, &target)
            .map_err(|e| EnvError::Environment(format!("cannot store snapshot: {e}")))?;

        self.ledger.record(ReleaseEntry {
            commit: commit.to_string(),
            tree_digest: digest.clone(),
            created_at: Utc::now(),
        })?;
        info!(commit, digest = %&digest[..12], "snapshot recorded");
        Ok(())
    }

    fn rollback(&self, commit: &str) -> Result<()> {
        let entry = self
            .ledger
            .get(commit)?
            .ok_or_else(|| EnvError::UnknownRelease {
                commit: commit.to_string(),
            })?;
        let source = self.snapshot_dir(commit);
        if !source.is_dir() {
            return Err(EnvError::Environment(format!(
                "release {commit} is recorded but its snapshot {:?} is missing",
                source
            )));
        }

        let staging = tempfile::Builder::new()
            .prefix(".restore-")
            .tempdir_in(&self.config.root_dir)?;
        let staged_tree = staging.path().join("tree");
        copy_tree(&source, &staged_tree)
            .map_err(|e| EnvError::Environment(format!("restore copy failed: {e}")))?;

        let sandbox = self.sandbox_dir();
        remove_path(&sandbox)?;
        fs::rename(&staged_tree, &sandbox)
            .map_err(|e| EnvError::Environment(format!("cannot activate snapshot: {e}")))?;

        let restored = tree_digest(&sandbox)?;
        if restored != entry.tree_digest {
            warn!(commit, expected = %entry.tree_digest, actual = %restored, "restored tree digest mismatch");
            return Err(EnvError::Environment(format!(
                "restored sandbox for {commit} does not match its snapshot digest"
            )));
        }
        info!(commit, "rolled back sandbox to snapshot");
        Ok(())
    }
}

fn render_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}

fn execute(mut cmd: Command, rendered: String) -> Result<String> {
    debug!(command = %rendered, "running sandboxed command");
    let output = cmd.output().map_err(|e| EnvError::Command {
        command: rendered.clone(),
        status: None,
        output: format!("failed to spawn: {e}"),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(EnvError::Command {
        command: rendered,
        status: output.status.code(),
        output: format!("{stdout}{stderr}"),
    })
}

/// Commits become directory names, so reject anything that is not a single
/// plain path component.
fn validate_commit(commit: &str) -> Result<()> {
    let plain = !commit.is_empty()
        && commit != "."
        && commit != ".."
        && !commit.starts_with('.')
        && !commit.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(EnvError::Environment(format!(
            "invalid commit id for snapshot: {commit:?}"
        )))
    }
}

/// Whether a directory entry belongs to the package `name`: the package
/// directory itself, a module file (`name.py`, `name.cpython-311.so`), or
/// its metadata directory (`name-1.0.dist-info`).
fn is_package_entry(entry: &str, name: &str) -> bool {
    if entry == name {
        return true;
    }
    if let Some(rest) = entry.strip_prefix(name) {
        if rest.starts_with('.') {
            return true;
        }
        if rest.starts_with('-') && (rest.ends_with(".dist-info") || rest.ends_with(".egg-info")) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_entry_matching() {
        assert!(is_package_entry("PyQt4", "PyQt4"));
        assert!(is_package_entry("sip.cpython-311-x86_64-linux-gnu.so", "sip"));
        assert!(is_package_entry("sip.py", "sip"));
        assert!(is_package_entry("PyQt4-4.12.dist-info", "PyQt4"));
        assert!(!is_package_entry("sipconfig.py", "sip"));
        assert!(!is_package_entry("PyQt4-tools", "PyQt4"));
    }

    #[test]
    fn commit_ids_must_be_plain_components() {
        assert!(validate_commit("0123abcd").is_ok());
        assert!(validate_commit("").is_err());
        assert!(validate_commit("..").is_err());
        assert!(validate_commit("a/b").is_err());
        assert!(validate_commit(".staging-x").is_err());
    }

    #[test]
    fn render_command_joins_args() {
        assert_eq!(
            render_command("pip", &["install", "-r", "req.txt"]),
            "pip install -r req.txt"
        );
    }

    #[test]
    fn config_builder() {
        let config = EnvConfig::new("/srv/env")
            .with_work_dir("/srv/app")
            .with_bootstrap(["python3", "-m", "venv", SANDBOX_PLACEHOLDER])
            .with_package_dir("lib/python3/site-packages")
            .with_system_package_dir("/usr/lib/python3/dist-packages");
        assert_eq!(config.bootstrap.len(), 4);
        assert_eq!(config.work_dir, Some(PathBuf::from("/srv/app")));
        assert_eq!(config.system_package_dirs.len(), 1);
    }
}
