//! Domain models for Cloudy.
//!
//! - `DeploymentData` / `DeploymentContext`: what a target must deploy
//! - `DeploymentGroup`: operator-side push/notify policy
//! - `CloudyError`: error taxonomy shared by every component

pub mod deployment;
pub mod error;
pub mod group;

pub use deployment::{DeploymentContext, DeploymentData, DEPLOYMENT_DATA_FILE};
pub use error::{CloudyError, Result};
pub use group::{BranchSpec, DeploymentGroup, ResolvedGroup, CURRENT_BRANCH};
