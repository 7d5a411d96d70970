//! Cloudy Core Library
//!
//! Building blocks for deploying Python applications from git:
//!
//! - [`variables`]: per-directory deployment variables found by walking up
//! - [`orchestrator`]: fresh install or rollback of a versioned environment
//! - [`propagate`]: push branches and point deployment endpoints at commits
//!
//! Collaborators ([`git::Vcs`], [`endpoint::DeploymentEndpoint`],
//! [`venv_manager::Environment`]) are traits so tests can use the in-memory
//! versions in [`fakes`] and `venv_manager::fakes`.

pub mod config;
pub mod domain;
pub mod endpoint;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod orchestrator;
pub mod paths;
pub mod propagate;
pub mod telemetry;
pub mod variables;

pub use config::{CliConfig, CONFIG_ENV, CONFIG_FILE};

pub use domain::{
    BranchSpec, CloudyError, DeploymentContext, DeploymentData, DeploymentGroup, ResolvedGroup,
    Result, CURRENT_BRANCH, DEPLOYMENT_DATA_FILE,
};

pub use endpoint::{DeploymentEndpoint, DeploymentStatus, EndpointError, HttpEndpointClient};

pub use git::{GitCli, Vcs};

pub use orchestrator::{
    DefaultHooks, DeployConfig, DeployConfigBuilder, DeployHooks, DeployOutcome, DeployState,
    DeploymentOrchestrator, InstallPath,
};

pub use propagate::{
    EndpointOutcome, EndpointReport, GroupCommitPropagator, GroupReport, PropagationError,
    PropagationReport,
};

pub use variables::{
    find_deployment_variables, DeploymentVariables, ShellFragment, ShellVariables, VariableMap,
    VariablesFormat, VARIABLES_STEM,
};

/// Cloudy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
