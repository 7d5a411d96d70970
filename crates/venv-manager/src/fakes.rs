//! In-memory fake environment (testing only)
//!
//! `MemoryEnvironment` models the sandbox as a map of "files" so snapshot and
//! rollback semantics can be exercised without touching the filesystem or
//! spawning processes. Every trait call is logged, and failures can be
//! injected per step.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::error::EnvError;
use crate::{Environment, Result};

/// Sandbox contents as seen by the fake: path -> content
pub type FakeTree = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct State {
    sandbox: Option<FakeTree>,
    snapshots: HashMap<String, FakeTree>,
    releases: Vec<String>,
    calls: Vec<String>,
    system_packages: HashSet<String>,
    failing_commands: Vec<String>,
    fail_checkout: bool,
    fail_snapshot: bool,
}

/// In-memory [`Environment`] with call recording and failure injection
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    state: Mutex<State>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` available to `copy_system_package`.
    pub fn with_system_package(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .system_packages
            .insert(name.to_string());
        self
    }

    /// Fail any `run` whose rendered command line contains `needle`.
    pub fn fail_command_containing(&self, needle: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_commands
            .push(needle.to_string());
    }

    pub fn fail_checkout(&self) {
        self.state.lock().unwrap().fail_checkout = true;
    }

    pub fn fail_snapshot(&self) {
        self.state.lock().unwrap().fail_snapshot = true;
    }

    /// Every trait call so far, rendered as strings (`run pip install ...`).
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Current sandbox contents; `None` before the first checkout.
    pub fn sandbox(&self) -> Option<FakeTree> {
        self.state.lock().unwrap().sandbox.clone()
    }

    /// Pretend an external actor wrote into the sandbox.
    pub fn write_file(&self, path: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .sandbox
            .get_or_insert_with(FakeTree::new)
            .insert(path.to_string(), content.to_string());
    }
}

impl Environment for MemoryEnvironment {
    fn releases(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("releases".to_string());
        Ok(state.releases.clone())
    }

    fn checkout_latest(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("checkout_latest".to_string());
        if state.fail_checkout {
            return Err(EnvError::Environment("injected checkout failure".into()));
        }
        state.sandbox = Some(FakeTree::new());
        Ok(())
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let rendered = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("run {rendered}"));

        if state.failing_commands.iter().any(|n| rendered.contains(n)) {
            return Err(EnvError::Command {
                command: rendered,
                status: Some(1),
                output: "injected failure".to_string(),
            });
        }
        let sandbox = state
            .sandbox
            .as_mut()
            .ok_or_else(|| EnvError::Environment("sandbox not checked out".into()))?;
        sandbox.insert(format!("ran/{rendered}"), "ok".to_string());
        Ok(String::new())
    }

    fn copy_system_package(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("copy_system_package {name}"));
        if !state.system_packages.contains(name) {
            return Err(EnvError::SystemPackageNotFound(name.to_string()));
        }
        let sandbox = state
            .sandbox
            .as_mut()
            .ok_or_else(|| EnvError::Environment("sandbox not checked out".into()))?;
        sandbox.insert(format!("site-packages/{name}"), "system".to_string());
        Ok(())
    }

    fn snapshot(&self, commit: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("snapshot {commit}"));
        if state.fail_snapshot {
            return Err(EnvError::Environment("injected snapshot failure".into()));
        }
        let tree = state
            .sandbox
            .clone()
            .ok_or_else(|| EnvError::Environment("sandbox not checked out".into()))?;
        state.snapshots.insert(commit.to_string(), tree);
        if !state.releases.iter().any(|c| c == commit) {
            state.releases.push(commit.to_string());
        }
        Ok(())
    }

    fn rollback(&self, commit: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rollback {commit}"));
        let tree = state
            .snapshots
            .get(commit)
            .cloned()
            .ok_or_else(|| EnvError::UnknownRelease {
                commit: commit.to_string(),
            })?;
        state.sandbox = Some(tree);
        Ok(())
    }
}
