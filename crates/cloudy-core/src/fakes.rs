//! In-memory fakes for the VCS and endpoint collaborators (testing only)
//!
//! Provides `FakeVcs` and `MemoryEndpoints`. Both record every call so
//! tests can assert on ordering and counts.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{CloudyError, Result};
use crate::endpoint::{DeploymentEndpoint, DeploymentStatus, EndpointError};
use crate::git::Vcs;

// ---------------------------------------------------------------------------
// FakeVcs
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VcsState {
    current_branch: String,
    heads: HashMap<String, String>,
    fail_push: bool,
    calls: Vec<String>,
}

/// Scripted [`Vcs`]: a current branch plus a branch → commit table.
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new(current_branch: &str) -> Self {
        let vcs = Self::default();
        vcs.state.lock().unwrap().current_branch = current_branch.to_string();
        vcs
    }

    pub fn with_branch(self, branch: &str, commit: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .heads
            .insert(branch.to_string(), commit.to_string());
        self
    }

    /// Make every push fail.
    pub fn fail_push(&self) {
        self.state.lock().unwrap().fail_push = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// How many times `branch` was pushed.
    pub fn pushes(&self, branch: &str) -> usize {
        let wanted = format!("push {branch}");
        self.calls().iter().filter(|c| **c == wanted).count()
    }

    pub fn tag_pushes(&self) -> usize {
        self.calls().iter().filter(|c| *c == "push_tags").count()
    }

    /// Whether anything was pushed at all.
    pub fn pushed_anything(&self) -> bool {
        self.calls().iter().any(|c| c.starts_with("push"))
    }
}

impl Vcs for FakeVcs {
    fn current_branch(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("current_branch".to_string());
        Ok(state.current_branch.clone())
    }

    fn push(&self, branch: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("push {branch}"));
        if state.fail_push {
            return Err(CloudyError::GitError(format!("injected push failure for {branch}")));
        }
        Ok(())
    }

    fn push_tags(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("push_tags".to_string());
        if state.fail_push {
            return Err(CloudyError::GitError("injected tag push failure".to_string()));
        }
        Ok(())
    }

    fn rev_parse(&self, reference: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rev_parse {reference}"));
        state
            .heads
            .get(reference)
            .cloned()
            .ok_or_else(|| CloudyError::GitError(format!("unknown revision {reference}")))
    }
}

// ---------------------------------------------------------------------------
// MemoryEndpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EndpointState {
    records: HashMap<String, DeploymentStatus>,
    failing_polls: HashSet<String>,
    failing_updates: HashSet<String>,
    calls: Vec<String>,
}

/// In-memory deployment endpoints keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryEndpoints {
    state: Mutex<EndpointState>,
}

impl MemoryEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployment(self, url: &str, name: &str, commit: Option<&str>) -> Self {
        self.state.lock().unwrap().records.insert(
            url.to_string(),
            DeploymentStatus {
                name: name.to_string(),
                commit: commit.map(str::to_string),
                extra: Default::default(),
            },
        );
        self
    }

    pub fn fail_poll(&self, url: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_polls
            .insert(url.to_string());
    }

    pub fn fail_update(&self, url: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_updates
            .insert(url.to_string());
    }

    /// Commit currently recorded at `url`.
    pub fn commit_at(&self, url: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(url)
            .and_then(|r| r.commit.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn poll_count(&self, url: &str) -> usize {
        let wanted = format!("poll {url}");
        self.calls().iter().filter(|c| **c == wanted).count()
    }

    pub fn set_count(&self, url: &str) -> usize {
        let prefix = format!("set_commit {url} ");
        self.calls().iter().filter(|c| c.starts_with(&prefix)).count()
    }
}

#[async_trait]
impl DeploymentEndpoint for MemoryEndpoints {
    async fn poll(&self, url: &str) -> std::result::Result<DeploymentStatus, EndpointError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("poll {url}"));
        if state.failing_polls.contains(url) {
            return Err(EndpointError::Http(format!("connection refused: {url}")));
        }
        state
            .records
            .get(url)
            .cloned()
            .ok_or_else(|| EndpointError::Status {
                url: url.to_string(),
                status: 404,
            })
    }

    async fn set_commit(&self, url: &str, commit: &str) -> std::result::Result<(), EndpointError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_commit {url} {commit}"));
        if state.failing_updates.contains(url) {
            return Err(EndpointError::Status {
                url: url.to_string(),
                status: 500,
            });
        }
        let record = state.records.get_mut(url).ok_or_else(|| EndpointError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        record.commit = Some(commit.to_string());
        Ok(())
    }
}
