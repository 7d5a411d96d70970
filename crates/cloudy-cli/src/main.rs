//! Cloudy - git-driven deployments
//!
//! ## Commands
//!
//! - `deploy`: push branches and point deployment endpoints at their commits
//! - `install`: bring this host's environment to the deployed commit
//! - `releases`: list the snapshots recorded in an environment

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};

use cloudy_core::{
    CliConfig, CloudyError, DeployConfig, DeploymentContext, DeploymentOrchestrator,
    EndpointOutcome, EndpointReport, GitCli, GroupCommitPropagator, HttpEndpointClient,
    InstallPath, PropagationError, PropagationReport, CONFIG_ENV,
};
use venv_manager::{EnvConfig, VersionedEnv};

#[derive(Parser)]
#[command(name = "cloudy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy Python applications from git", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push branches and update the commit of every deployment in the groups
    Deploy {
        /// Deployment groups to update
        groups: Vec<String>,

        /// List the configured deployment groups instead
        #[arg(short, long)]
        list: bool,

        /// Configuration file (default: nearest cloudy.yml)
        #[arg(short, long, env = CONFIG_ENV)]
        config: Option<PathBuf>,

        /// Git repository to push from
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Remote to push to
        #[arg(long, default_value = "origin")]
        remote: String,
    },

    /// Install (or restore) the environment for the deployed commit
    Install(InstallArgs),

    /// List releases recorded in an environment
    Releases {
        /// Environment root directory
        #[arg(long)]
        env_dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct InstallArgs {
    /// Directory to start looking for deployment data from
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Environment root (default: `venv_dir` deployment variable)
    #[arg(long)]
    env_dir: Option<PathBuf>,

    /// Requirement files, relative to the deployment directory
    #[arg(short, long = "requirements")]
    requirements: Vec<PathBuf>,

    /// Prefer binary distributions
    #[arg(long)]
    prefer_binary: bool,

    /// Do not install dependencies of requirements
    #[arg(long)]
    no_deps: bool,

    /// System package to copy into the environment (repeatable)
    #[arg(long = "copy-system-package")]
    system_packages: Vec<String>,

    /// Directory searched for system packages (repeatable)
    #[arg(long = "system-packages-dir")]
    system_package_dirs: Vec<PathBuf>,

    /// Where copied system packages go, relative to the environment
    #[arg(long, default_value = "site-packages")]
    package_dir: PathBuf,

    /// Package installer run inside the environment
    #[arg(long, default_value = "pip")]
    installer: String,

    /// Build step run after installing requirements, one argument per value;
    /// end the list with `;` when more options follow
    #[arg(
        long,
        num_args = 1..,
        allow_hyphen_values = true,
        value_terminator = ";",
        default_values = ["python", "setup.py", "install"]
    )]
    build_command: Vec<String>,

    /// Skip the build step
    #[arg(long, conflicts_with = "build_command")]
    no_build: bool,

    /// Command creating an empty environment, one argument per value;
    /// `{sandbox}` is replaced by its path
    #[arg(
        long,
        num_args = 1..,
        allow_hyphen_values = true,
        value_terminator = ";",
        default_values = ["python3", "-m", "venv", "{sandbox}"]
    )]
    bootstrap_command: Vec<String>,
}

impl InstallArgs {
    fn build_argv(&self) -> &[String] {
        if self.no_build {
            &[]
        } else {
            &self.build_command
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            err.print().ok();
            return code;
        }
    };

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    cloudy_core::telemetry::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Deploy {
            groups,
            list,
            config,
            repo,
            remote,
        } => cmd_deploy(&groups, list, config.as_deref(), &repo, &remote).await,
        Commands::Install(args) => cmd_install(&args),
        Commands::Releases { env_dir } => cmd_releases(&env_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Push commits to deployment groups, or list them
async fn cmd_deploy(
    groups: &[String],
    list: bool,
    config_path: Option<&Path>,
    repo: &Path,
    remote: &str,
) -> Result<()> {
    if groups.is_empty() && !list {
        bail!("You must specify at least one group name or --list");
    }

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config = CliConfig::discover(config_path, None, &cwd)?;

    if list {
        for (name, branch) in config.group_listing() {
            println!("{name}: branch {branch}");
        }
        return Ok(());
    }

    let git = GitCli::new(repo).with_remote(remote);
    let client = HttpEndpointClient::new()?;
    let result = GroupCommitPropagator::new(&git, &client)
        .propagate(&config.deployment_groups, groups)
        .await;

    // Work done before a fatal error is still reported.
    let (report, error) = match result {
        Ok(report) => (report, None),
        Err(PropagationError { report, error }) => (report, Some(error)),
    };
    for line in report_lines(&report, remote) {
        println!("{line}");
    }
    match error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

/// Human-readable lines for a propagation run, in execution order.
fn report_lines(report: &PropagationReport, remote: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for branch in &report.pushed_branches {
        lines.push(format!("git push {remote} {branch}:{branch}"));
    }
    if report.pushed_tags {
        lines.push(format!("git push {remote} --tags"));
    }
    for group in &report.groups {
        if group.has_no_deployments() {
            lines.push(format!(
                "Warning: deployment group \"{}\" defines no deployments",
                group.group
            ));
        }
        for endpoint in &group.endpoints {
            lines.push(outcome_line(endpoint, &group.commit, &group.branch));
        }
    }
    lines
}

fn outcome_line(endpoint: &EndpointReport, commit: &str, branch: &str) -> String {
    match &endpoint.outcome {
        EndpointOutcome::Updated { deployment, .. } => format!("{deployment}: {commit} ({branch})"),
        EndpointOutcome::UpToDate { deployment } => format!("{deployment}: already up-to-date"),
        EndpointOutcome::PollFailed(error) => format!("error polling {}: {error}", endpoint.url),
        EndpointOutcome::UpdateFailed { error, .. } => {
            format!("error updating {}: {error}", endpoint.url)
        }
    }
}

/// Bring the local environment to the deployed commit
fn cmd_install(args: &InstallArgs) -> Result<()> {
    let ctx = DeploymentContext::discover(&args.dir)?;
    let env_dir = environment_root(args.env_dir.as_deref(), &ctx)?;
    debug!(env_dir = ?env_dir, commit = ctx.commit(), "installing");

    let mut env_config = EnvConfig::new(&env_dir)
        .with_work_dir(&ctx.deployment_dir)
        .with_bootstrap(args.bootstrap_command.iter().cloned())
        .with_package_dir(&args.package_dir);
    for dir in &args.system_package_dirs {
        env_config = env_config.with_system_package_dir(dir);
    }
    let env = VersionedEnv::open(env_config)?;

    let mut builder = DeployConfig::builder()
        .requirements(args.requirements.iter().cloned())
        .prefer_binary(args.prefer_binary)
        .no_deps(args.no_deps)
        .installer(args.installer.as_str())
        .build_command(args.build_argv().iter().cloned());
    for name in &args.system_packages {
        builder = builder.system_package(name.as_str());
    }

    let outcome = DeploymentOrchestrator::new(env, builder.build()).run(&ctx)?;
    match outcome.path {
        InstallPath::Fresh => println!("Installed {} into {:?}", outcome.commit, env_dir),
        InstallPath::Rollback => println!("Restored {} in {:?}", outcome.commit, env_dir),
    }
    Ok(())
}

/// `--env-dir`, else the `venv_dir` variable relative to the deployment.
fn environment_root(explicit: Option<&Path>, ctx: &DeploymentContext) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let from_vars = ctx
        .variables
        .as_ref()
        .and_then(|vars| vars.get_string("venv_dir"))
        .map(|dir| ctx.deployment_dir.join(dir));
    match from_vars {
        Some(dir) => Ok(dir),
        None => Err(CloudyError::Configuration(
            "no environment directory: pass --env-dir or set venv_dir in deployment variables"
                .to_string(),
        )
        .into()),
    }
}

/// List recorded releases, oldest first
fn cmd_releases(env_dir: &Path) -> Result<()> {
    let env = VersionedEnv::open_existing(EnvConfig::new(env_dir))?;
    let entries = env.release_entries()?;

    if entries.is_empty() {
        println!("No releases recorded in {:?}", env_dir);
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {}  sha256:{}",
            entry.commit,
            entry.created_at.to_rfc3339(),
            &entry.tree_digest[..12.min(entry.tree_digest.len())]
        );
    }
    Ok(())
}
