//! Deployment orchestration on a single target.
//!
//! A run decides between a fresh install and a rollback by checking whether
//! the deployment's commit already has a snapshot, then runs the user hooks.
//!
//! ```text
//! Deciding ──commit ∈ releases──▶ Rollback ─────┐
//!     │                                          ▼
//!     └──────otherwise──────▶ FreshInstall ──▶ Hooks ──▶ Done
//! ```
//!
//! Fresh installs only reach `snapshot` when every earlier step succeeded,
//! so a failed install never adds a release.

use std::fmt;
use std::path::PathBuf;

use venv_manager::Environment;

use crate::domain::{CloudyError, DeploymentContext, Result};
use crate::obs;

/// Immutable settings for a deployment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    /// Requirement files, relative to the deployment directory unless absolute
    pub requirements: Vec<PathBuf>,
    pub prefer_binary: bool,
    pub no_deps: bool,
    /// System packages copied into the sandbox after requirements
    pub system_packages: Vec<String>,
    /// Package installer program run inside the sandbox
    pub installer: String,
    /// Packaging/build step; skipped when empty
    pub build_command: Vec<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            requirements: Vec::new(),
            prefer_binary: false,
            no_deps: false,
            system_packages: Vec::new(),
            installer: "pip".to_string(),
            build_command: vec![
                "python".to_string(),
                "setup.py".to_string(),
                "install".to_string(),
            ],
        }
    }
}

impl DeployConfig {
    pub fn builder() -> DeployConfigBuilder {
        DeployConfigBuilder::default()
    }
}

/// Builder for [`DeployConfig`]; unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct DeployConfigBuilder {
    config: DeployConfig,
}

impl DeployConfigBuilder {
    pub fn requirement(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.requirements.push(path.into());
        self
    }

    pub fn requirements<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.requirements.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn prefer_binary(mut self, yes: bool) -> Self {
        self.config.prefer_binary = yes;
        self
    }

    pub fn no_deps(mut self, yes: bool) -> Self {
        self.config.no_deps = yes;
        self
    }

    pub fn system_package(mut self, name: impl Into<String>) -> Self {
        self.config.system_packages.push(name.into());
        self
    }

    pub fn installer(mut self, program: impl Into<String>) -> Self {
        self.config.installer = program.into();
        self
    }

    pub fn build_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.build_command = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> DeployConfig {
        self.config
    }
}

/// Customisation points of a deployment run. Every method has a default.
pub trait DeployHooks: Send + Sync {
    /// Requirement files to install, in order.
    fn collect_requirements(&self, config: &DeployConfig, ctx: &DeploymentContext) -> Vec<PathBuf> {
        config
            .requirements
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    ctx.deployment_dir.join(p)
                }
            })
            .collect()
    }

    /// Bring system-level packages into the sandbox.
    fn setup_packages(&self, env: &dyn Environment, config: &DeployConfig) -> Result<()> {
        for name in &config.system_packages {
            env.copy_system_package(name)?;
        }
        Ok(())
    }

    /// Runs after the environment is ready, on both the fresh and rollback paths.
    fn install(&self, _env: &dyn Environment, _ctx: &DeploymentContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after [`DeployHooks::install`].
    fn post_install(&self, _env: &dyn Environment, _ctx: &DeploymentContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks with only the default behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl DeployHooks for DefaultHooks {}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Deciding,
    FreshInstall,
    Rollback,
    Hooks,
    Done,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployState::Deciding => "deciding",
            DeployState::FreshInstall => "fresh_install",
            DeployState::Rollback => "rollback",
            DeployState::Hooks => "hooks",
            DeployState::Done => "done",
        };
        f.write_str(name)
    }
}

/// How the environment was brought to the deployment's commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPath {
    Fresh,
    Rollback,
}

impl InstallPath {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallPath::Fresh => "fresh",
            InstallPath::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub commit: String,
    pub path: InstallPath,
}

/// Drives one deployment against an injected [`Environment`].
pub struct DeploymentOrchestrator<E: Environment, H: DeployHooks = DefaultHooks> {
    env: E,
    config: DeployConfig,
    hooks: H,
}

impl<E: Environment> DeploymentOrchestrator<E, DefaultHooks> {
    pub fn new(env: E, config: DeployConfig) -> Self {
        DeploymentOrchestrator {
            env,
            config,
            hooks: DefaultHooks,
        }
    }
}

impl<E: Environment, H: DeployHooks> DeploymentOrchestrator<E, H> {
    pub fn with_hooks<H2: DeployHooks>(self, hooks: H2) -> DeploymentOrchestrator<E, H2> {
        DeploymentOrchestrator {
            env: self.env,
            config: self.config,
            hooks,
        }
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Bring the environment to `ctx.commit()` and run the hooks.
    pub fn run(&self, ctx: &DeploymentContext) -> Result<DeployOutcome> {
        let commit = ctx.commit();
        let _span = obs::DeploySpan::enter(commit);

        let mut state = DeployState::Deciding;
        let mut path = InstallPath::Fresh;

        loop {
            let next = match state {
                DeployState::Deciding => {
                    if self.env.has_release(commit)? {
                        path = InstallPath::Rollback;
                        DeployState::Rollback
                    } else {
                        path = InstallPath::Fresh;
                        DeployState::FreshInstall
                    }
                }
                DeployState::FreshInstall => {
                    obs::emit_deploy_decision(commit, path.as_str());
                    self.fresh_install(ctx)?;
                    DeployState::Hooks
                }
                DeployState::Rollback => {
                    obs::emit_deploy_decision(commit, path.as_str());
                    self.env
                        .rollback(commit)
                        .map_err(|e| self.step_failed(commit, "rollback", e.into()))?;
                    DeployState::Hooks
                }
                DeployState::Hooks => {
                    self.hooks
                        .install(&self.env, ctx)
                        .map_err(|e| hook_error("install", e))?;
                    self.hooks
                        .post_install(&self.env, ctx)
                        .map_err(|e| hook_error("post_install", e))?;
                    DeployState::Done
                }
                DeployState::Done => break,
            };
            obs::emit_state_transition(&state.to_string(), &next.to_string());
            state = next;
        }

        obs::emit_deploy_finished(commit, path.as_str());
        Ok(DeployOutcome {
            commit: commit.to_string(),
            path,
        })
    }

    fn fresh_install(&self, ctx: &DeploymentContext) -> Result<()> {
        let commit = ctx.commit();

        self.env
            .checkout_latest()
            .map_err(|e| self.step_failed(commit, "checkout", e.into()))?;

        let requirements = self.hooks.collect_requirements(&self.config, ctx);
        self.install_requirements(&requirements)
            .map_err(|e| self.step_failed(commit, "requirements", e))?;

        self.hooks
            .setup_packages(&self.env, &self.config)
            .map_err(|e| self.step_failed(commit, "system_packages", e))?;

        if let Some((program, args)) = self.config.build_command.split_first() {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.env
                .run(program, &args)
                .map_err(|e| self.step_failed(commit, "build", e.into()))?;
        }

        self.env
            .snapshot(commit)
            .map_err(|e| self.step_failed(commit, "snapshot", e.into()))?;
        obs::emit_snapshot_taken(commit);
        Ok(())
    }

    fn install_requirements(&self, requirements: &[PathBuf]) -> Result<()> {
        if requirements.is_empty() {
            return Ok(());
        }
        let installer = self.config.installer.as_str();
        if self.config.prefer_binary {
            self.env.run(installer, &["install", "wheel"])?;
        }

        let files: Vec<String> = requirements
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut args = vec!["install"];
        for file in &files {
            args.push("-r");
            args.push(file);
        }
        if self.config.prefer_binary {
            args.push("--prefer-binary");
        }
        if self.config.no_deps {
            args.push("--no-deps");
        }
        self.env.run(installer, &args)?;
        Ok(())
    }

    fn step_failed(&self, commit: &str, step: &str, err: CloudyError) -> CloudyError {
        obs::emit_deploy_failed(commit, step, &err);
        err
    }
}

fn hook_error(hook: &'static str, err: anyhow::Error) -> CloudyError {
    CloudyError::Hook {
        hook,
        message: format!("{err:#}"),
    }
}
