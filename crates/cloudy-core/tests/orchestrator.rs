//! Orchestrator behaviour against the in-memory environment.

use std::sync::Mutex;

use anyhow::bail;
use cloudy_core::{
    CloudyError, DeployConfig, DeployHooks, DeploymentContext, DeploymentData,
    DeploymentOrchestrator, InstallPath,
};
use venv_manager::fakes::MemoryEnvironment;
use venv_manager::{EnvError, Environment};

fn ctx(commit: &str) -> DeploymentContext {
    DeploymentContext::new("/srv/app", DeploymentData::new(commit), None)
}

fn full_config() -> DeployConfig {
    DeployConfig::builder()
        .requirement("requirements.txt")
        .prefer_binary(true)
        .no_deps(true)
        .system_package("psycopg2")
        .build()
}

/// Records hook invocations; optionally fails `install`.
#[derive(Default)]
struct RecordingHooks {
    seen: Mutex<Vec<String>>,
    fail_install: bool,
}

impl RecordingHooks {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl DeployHooks for RecordingHooks {
    fn install(&self, _env: &dyn Environment, ctx: &DeploymentContext) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(format!("install {}", ctx.commit()));
        if self.fail_install {
            bail!("migrations failed");
        }
        Ok(())
    }

    fn post_install(&self, _env: &dyn Environment, ctx: &DeploymentContext) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("post_install {}", ctx.commit()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fresh install
// ---------------------------------------------------------------------------

#[test]
fn fresh_install_runs_steps_in_order() {
    let env = MemoryEnvironment::new().with_system_package("psycopg2");
    let orchestrator = DeploymentOrchestrator::new(env, full_config());

    let outcome = orchestrator.run(&ctx("c1")).unwrap();

    assert_eq!(outcome.path, InstallPath::Fresh);
    assert_eq!(outcome.commit, "c1");
    assert_eq!(
        orchestrator.environment().calls(),
        vec![
            "releases",
            "checkout_latest",
            "run pip install wheel",
            "run pip install -r /srv/app/requirements.txt --prefer-binary --no-deps",
            "copy_system_package psycopg2",
            "run python setup.py install",
            "snapshot c1",
        ]
    );
    assert_eq!(orchestrator.environment().releases().unwrap(), vec!["c1"]);
}

#[test]
fn no_requirement_files_skips_installer() {
    let orchestrator = DeploymentOrchestrator::new(MemoryEnvironment::new(), DeployConfig::default());
    orchestrator.run(&ctx("c1")).unwrap();

    let calls = orchestrator.environment().calls();
    assert!(!calls.iter().any(|c| c.starts_with("run pip")));
    assert!(calls.contains(&"run python setup.py install".to_string()));
}

#[test]
fn empty_build_command_is_skipped() {
    let config = DeployConfig::builder()
        .build_command(Vec::<String>::new())
        .build();
    let orchestrator = DeploymentOrchestrator::new(MemoryEnvironment::new(), config);
    orchestrator.run(&ctx("c1")).unwrap();
    assert_eq!(
        orchestrator.environment().calls(),
        vec!["releases", "checkout_latest", "snapshot c1"]
    );
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn known_commit_rolls_back_without_installing() {
    let env = MemoryEnvironment::new().with_system_package("psycopg2");
    let orchestrator = DeploymentOrchestrator::new(env, full_config());
    orchestrator.run(&ctx("c1")).unwrap();
    let installed = orchestrator.environment().sandbox();
    orchestrator.run(&ctx("c2")).unwrap();

    let before = orchestrator.environment().calls().len();
    let outcome = orchestrator.run(&ctx("c1")).unwrap();
    let calls = orchestrator.environment().calls()[before..].to_vec();

    assert_eq!(outcome.path, InstallPath::Rollback);
    assert_eq!(calls, vec!["releases", "rollback c1"]);
    assert_eq!(orchestrator.environment().sandbox(), installed);
    assert_eq!(
        orchestrator.environment().releases().unwrap(),
        vec!["c1", "c2"]
    );
}

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

fn assert_failed_without_release(orchestrator: &DeploymentOrchestrator<MemoryEnvironment>) {
    let env = orchestrator.environment();
    assert!(env.releases().unwrap().is_empty());
    assert!(!env.calls().iter().any(|c| c.starts_with("snapshot")));
}

#[test]
fn checkout_failure_leaves_releases_unchanged() {
    let env = MemoryEnvironment::new().with_system_package("psycopg2");
    env.fail_checkout();
    let orchestrator = DeploymentOrchestrator::new(env, full_config());

    let err = orchestrator.run(&ctx("c1")).unwrap_err();
    assert!(matches!(err, CloudyError::Environment(EnvError::Environment(_))));
    assert_failed_without_release(&orchestrator);
}

#[test]
fn installer_failure_leaves_releases_unchanged() {
    for needle in ["install wheel", "-r /srv/app/requirements.txt", "setup.py"] {
        let env = MemoryEnvironment::new().with_system_package("psycopg2");
        env.fail_command_containing(needle);
        let orchestrator = DeploymentOrchestrator::new(env, full_config());

        let err = orchestrator.run(&ctx("c1")).unwrap_err();
        assert!(
            matches!(err, CloudyError::Environment(EnvError::Command { .. })),
            "{needle}: {err}"
        );
        assert_failed_without_release(&orchestrator);
    }
}

#[test]
fn missing_system_package_leaves_releases_unchanged() {
    let orchestrator = DeploymentOrchestrator::new(MemoryEnvironment::new(), full_config());
    let err = orchestrator.run(&ctx("c1")).unwrap_err();
    assert!(matches!(
        err,
        CloudyError::Environment(EnvError::SystemPackageNotFound(_))
    ));
    assert_failed_without_release(&orchestrator);
}

#[test]
fn snapshot_failure_leaves_releases_unchanged() {
    let env = MemoryEnvironment::new().with_system_package("psycopg2");
    env.fail_snapshot();
    let orchestrator = DeploymentOrchestrator::new(env, full_config());

    assert!(orchestrator.run(&ctx("c1")).is_err());
    assert!(orchestrator.environment().releases().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[test]
fn hooks_run_on_fresh_and_rollback_paths() {
    let hooks = std::sync::Arc::new(RecordingHooks::default());
    let orchestrator = DeploymentOrchestrator::new(MemoryEnvironment::new(), DeployConfig::default())
        .with_hooks(SharedHooks(hooks.clone()));

    orchestrator.run(&ctx("c1")).unwrap();
    orchestrator.run(&ctx("c1")).unwrap();

    assert_eq!(
        hooks.seen(),
        vec!["install c1", "post_install c1", "install c1", "post_install c1"]
    );
}

#[test]
fn hook_failure_is_surfaced_after_snapshot() {
    let hooks = RecordingHooks {
        fail_install: true,
        ..Default::default()
    };
    let orchestrator = DeploymentOrchestrator::new(MemoryEnvironment::new(), DeployConfig::default())
        .with_hooks(hooks);

    let err = orchestrator.run(&ctx("c1")).unwrap_err();
    match err {
        CloudyError::Hook { hook, message } => {
            assert_eq!(hook, "install");
            assert!(message.contains("migrations failed"));
        }
        other => panic!("expected hook error, got {other}"),
    }
    // the environment itself was installed successfully
    assert_eq!(orchestrator.environment().releases().unwrap(), vec!["c1"]);
}

/// Lets a test keep a handle on hooks moved into the orchestrator.
struct SharedHooks(std::sync::Arc<RecordingHooks>);

impl DeployHooks for SharedHooks {
    fn install(&self, env: &dyn Environment, ctx: &DeploymentContext) -> anyhow::Result<()> {
        self.0.install(env, ctx)
    }

    fn post_install(&self, env: &dyn Environment, ctx: &DeploymentContext) -> anyhow::Result<()> {
        self.0.post_install(env, ctx)
    }
}
