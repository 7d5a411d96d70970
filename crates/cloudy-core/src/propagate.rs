//! Commit propagation across deployment groups.
//!
//! Resolves the requested groups, pushes their branches (and tags) once,
//! then tells every deployment endpoint which commit to run. Endpoint
//! failures are recorded in the report and never abort the walk.

use std::collections::{BTreeMap, HashSet};

use crate::domain::{BranchSpec, CloudyError, DeploymentGroup, ResolvedGroup, Result};
use crate::endpoint::DeploymentEndpoint;
use crate::git::Vcs;
use crate::obs;

/// What happened at one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointOutcome {
    Updated {
        deployment: String,
        previous: Option<String>,
    },
    UpToDate {
        deployment: String,
    },
    PollFailed(String),
    UpdateFailed {
        deployment: String,
        error: String,
    },
}

impl EndpointOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EndpointOutcome::PollFailed(_) | EndpointOutcome::UpdateFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReport {
    pub url: String,
    pub outcome: EndpointOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub group: String,
    pub branch: String,
    pub commit: String,
    pub endpoints: Vec<EndpointReport>,
}

impl GroupReport {
    pub fn has_no_deployments(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Result of a propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Branches pushed, in push order
    pub pushed_branches: Vec<String>,
    pub pushed_tags: bool,
    pub groups: Vec<GroupReport>,
}

impl PropagationReport {
    /// Every endpoint that could not be polled or updated.
    pub fn failures(&self) -> impl Iterator<Item = &EndpointReport> {
        self.groups
            .iter()
            .flat_map(|g| g.endpoints.iter())
            .filter(|e| e.outcome.is_failure())
    }

    /// Names of groups that listed no deployments.
    pub fn empty_groups(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .filter(|g| g.has_no_deployments())
            .map(|g| g.group.as_str())
    }
}

/// Fatal propagation error together with the work completed before it.
#[derive(Debug, thiserror::Error)]
#[error("propagation stopped")]
pub struct PropagationError {
    pub report: PropagationReport,
    #[source]
    pub error: CloudyError,
}

impl PropagationError {
    pub fn is_configuration(&self) -> bool {
        self.error.is_configuration()
    }
}

/// Pushes branches and updates deployment endpoints for named groups.
pub struct GroupCommitPropagator<'a> {
    vcs: &'a dyn Vcs,
    endpoints: &'a dyn DeploymentEndpoint,
}

impl<'a> GroupCommitPropagator<'a> {
    pub fn new(vcs: &'a dyn Vcs, endpoints: &'a dyn DeploymentEndpoint) -> Self {
        GroupCommitPropagator { vcs, endpoints }
    }

    /// Look up each requested group and resolve its branch.
    ///
    /// Fails on the first unknown group or missing branch, before anything
    /// is pushed. Repeated names keep their first position. The current
    /// branch is asked of the VCS at most once.
    pub fn resolve_groups(
        &self,
        groups: &BTreeMap<String, DeploymentGroup>,
        requested: &[String],
    ) -> Result<Vec<ResolvedGroup>> {
        let mut seen = HashSet::new();
        let mut specs = Vec::new();
        for name in requested {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let group = groups.get(name).ok_or_else(|| {
                CloudyError::Configuration(format!("No such deployment group \"{name}\""))
            })?;
            let spec = group.branch_spec(name)?;
            specs.push((name, group, spec));
        }

        let mut current: Option<String> = None;
        let mut resolved = Vec::with_capacity(specs.len());
        for (name, group, spec) in specs {
            let branch = match spec {
                BranchSpec::Named(branch) => branch,
                BranchSpec::Current => match &current {
                    Some(branch) => branch.clone(),
                    None => {
                        let branch = self.vcs.current_branch()?;
                        current = Some(branch.clone());
                        branch
                    }
                },
            };
            resolved.push(ResolvedGroup {
                name: name.clone(),
                branch,
                push: group.push,
                push_tags: group.push_tags,
                deployments: group.deployments.clone(),
            });
        }
        Ok(resolved)
    }

    /// Resolve, push, and notify endpoints for `requested` groups.
    ///
    /// A fatal error stops the run. The [`PropagationError`] carries every
    /// group finished before it.
    pub async fn propagate(
        &self,
        groups: &BTreeMap<String, DeploymentGroup>,
        requested: &[String],
    ) -> std::result::Result<PropagationReport, PropagationError> {
        let mut report = PropagationReport::default();
        match self.propagate_into(groups, requested, &mut report).await {
            Ok(()) => Ok(report),
            Err(error) => Err(PropagationError { report, error }),
        }
    }

    async fn propagate_into(
        &self,
        groups: &BTreeMap<String, DeploymentGroup>,
        requested: &[String],
        report: &mut PropagationReport,
    ) -> Result<()> {
        let resolved = self.resolve_groups(groups, requested)?;

        for group in resolved.iter().filter(|g| g.push) {
            if report.pushed_branches.contains(&group.branch) {
                continue;
            }
            self.vcs.push(&group.branch)?;
            obs::emit_branch_pushed(&group.branch);
            report.pushed_branches.push(group.branch.clone());
        }

        if resolved.iter().any(|g| g.push_tags) {
            self.vcs.push_tags()?;
            obs::emit_tags_pushed();
            report.pushed_tags = true;
        }

        for group in &resolved {
            let commit = self.vcs.rev_parse(&group.branch)?;
            if group.deployments.is_empty() {
                obs::emit_group_without_deployments(&group.name);
            }
            let mut endpoints = Vec::with_capacity(group.deployments.len());
            for url in &group.deployments {
                let outcome = self.update_endpoint(url, &commit).await;
                endpoints.push(EndpointReport {
                    url: url.clone(),
                    outcome,
                });
            }
            report.groups.push(GroupReport {
                group: group.name.clone(),
                branch: group.branch.clone(),
                commit,
                endpoints,
            });
        }

        Ok(())
    }

    async fn update_endpoint(&self, url: &str, commit: &str) -> EndpointOutcome {
        let status = match self.endpoints.poll(url).await {
            Ok(status) => status,
            Err(e) => {
                obs::emit_endpoint_failed(url, "poll", &e);
                return EndpointOutcome::PollFailed(e.to_string());
            }
        };

        if status.is_at(commit) {
            obs::emit_endpoint_up_to_date(url, &status.name);
            return EndpointOutcome::UpToDate {
                deployment: status.name,
            };
        }

        match self.endpoints.set_commit(url, commit).await {
            Ok(()) => {
                obs::emit_endpoint_updated(url, &status.name, commit);
                EndpointOutcome::Updated {
                    deployment: status.name,
                    previous: status.commit,
                }
            }
            Err(e) => {
                obs::emit_endpoint_failed(url, "update", &e);
                EndpointOutcome::UpdateFailed {
                    deployment: status.name,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeVcs, MemoryEndpoints};

    fn group(branch: &str, push: bool, deployments: &[&str]) -> DeploymentGroup {
        DeploymentGroup {
            branch: Some(branch.to_string()),
            push,
            push_tags: false,
            deployments: deployments.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn duplicates_collapse_to_first_position() {
        let vcs = FakeVcs::new("main");
        let endpoints = MemoryEndpoints::new();
        let mut groups = BTreeMap::new();
        groups.insert("a".to_string(), group("x", false, &[]));
        groups.insert("b".to_string(), group("y", false, &[]));

        let resolved = GroupCommitPropagator::new(&vcs, &endpoints)
            .resolve_groups(
                &groups,
                &["b".to_string(), "a".to_string(), "b".to_string()],
            )
            .unwrap();
        let names: Vec<_> = resolved.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn current_branch_is_looked_up_once() {
        let vcs = FakeVcs::new("feature");
        let endpoints = MemoryEndpoints::new();
        let mut groups = BTreeMap::new();
        groups.insert("a".to_string(), group("__current__", false, &[]));
        groups.insert("b".to_string(), group("__current__", false, &[]));

        let resolved = GroupCommitPropagator::new(&vcs, &endpoints)
            .resolve_groups(&groups, &["a".to_string(), "b".to_string()])
            .unwrap();
        assert!(resolved.iter().all(|g| g.branch == "feature"));
        assert_eq!(vcs.calls(), vec!["current_branch"]);
    }
}
