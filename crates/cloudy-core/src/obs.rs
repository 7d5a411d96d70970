//! Structured lifecycle events for deployment runs and commit propagation.
//!
//! Every event carries an `event` field so log pipelines can filter on it,
//! e.g. `event=deploy.decision commit=abc path=rollback`.

use tracing::{info, warn};

/// RAII guard that keeps a deploy-scoped span entered for one run.
pub struct DeploySpan {
    _span: tracing::span::EnteredSpan,
}

impl DeploySpan {
    pub fn enter(commit: &str) -> Self {
        let span = tracing::info_span!("cloudy.deploy", commit = %commit);
        Self {
            _span: span.entered(),
        }
    }
}

/// Fresh install vs rollback, as decided from the release list.
pub fn emit_deploy_decision(commit: &str, path: &str) {
    info!(event = "deploy.decision", commit = %commit, path = %path);
}

pub fn emit_state_transition(from: &str, to: &str) {
    info!(event = "deploy.transition", from = %from, to = %to);
}

pub fn emit_snapshot_taken(commit: &str) {
    info!(event = "deploy.snapshot", commit = %commit);
}

pub fn emit_deploy_finished(commit: &str, path: &str) {
    info!(event = "deploy.finished", commit = %commit, path = %path);
}

/// A deploy step failed; the release list is left as it was.
pub fn emit_deploy_failed(commit: &str, step: &str, error: &dyn std::fmt::Display) {
    warn!(event = "deploy.failed", commit = %commit, step = %step, error = %error);
}

pub fn emit_branch_pushed(branch: &str) {
    info!(event = "propagate.branch_pushed", branch = %branch);
}

pub fn emit_tags_pushed() {
    info!(event = "propagate.tags_pushed");
}

pub fn emit_endpoint_updated(url: &str, deployment: &str, commit: &str) {
    info!(
        event = "propagate.endpoint_updated",
        url = %url,
        deployment = %deployment,
        commit = %commit,
    );
}

pub fn emit_endpoint_up_to_date(url: &str, deployment: &str) {
    info!(event = "propagate.endpoint_up_to_date", url = %url, deployment = %deployment);
}

pub fn emit_endpoint_failed(url: &str, stage: &str, error: &dyn std::fmt::Display) {
    warn!(event = "propagate.endpoint_failed", url = %url, stage = %stage, error = %error);
}

pub fn emit_group_without_deployments(group: &str) {
    warn!(event = "propagate.empty_group", group = %group);
}
