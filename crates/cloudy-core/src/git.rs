//! Version-control collaborator used when propagating commits.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::domain::{CloudyError, Result};

/// The VCS operations commit propagation depends on.
pub trait Vcs: Send + Sync {
    /// Name of the checked-out branch.
    fn current_branch(&self) -> Result<String>;

    /// Push `branch` to the same-named branch on the remote.
    fn push(&self, branch: &str) -> Result<()>;

    /// Push all tags to the remote.
    fn push_tags(&self) -> Result<()>;

    /// Resolve `reference` to a full commit id.
    fn rev_parse(&self, reference: &str) -> Result<String>;
}

/// [`Vcs`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
    remote: String,
}

impl GitCli {
    /// Operate on the repository containing `repo_dir`, pushing to `origin`.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        GitCli {
            repo_dir: repo_dir.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|e| CloudyError::GitError(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudyError::GitError(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Vcs for GitCli {
    fn current_branch(&self) -> Result<String> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch.is_empty() || branch == "HEAD" {
            return Err(CloudyError::GitError(
                "HEAD is detached; cannot resolve the current branch".to_string(),
            ));
        }
        Ok(branch)
    }

    fn push(&self, branch: &str) -> Result<()> {
        let refspec = format!("{branch}:{branch}");
        self.git(&["push", &self.remote, &refspec])?;
        Ok(())
    }

    fn push_tags(&self) -> Result<()> {
        self.git(&["push", &self.remote, "--tags"])?;
        Ok(())
    }

    fn rev_parse(&self, reference: &str) -> Result<String> {
        let sha = self.git(&["rev-parse", "--verify", reference])?;
        if sha.is_empty() {
            return Err(CloudyError::GitError(format!(
                "git rev-parse {reference} returned empty output"
            )));
        }
        Ok(sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A work repo on branch `main` with one commit, plus a bare `origin`.
    fn make_repo_with_remote() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote.git");
        let work = dir.path().join("work");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(&work).unwrap();

        run_git(&remote, &["init", "--bare"]);
        run_git(&work, &["init"]);
        run_git(&work, &["checkout", "-b", "main"]);
        run_git(&work, &["config", "user.name", "test-user"]);
        run_git(&work, &["config", "user.email", "test@example.com"]);
        run_git(&work, &["commit", "--allow-empty", "-m", "initial"]);
        run_git(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);
        (dir, work, remote)
    }

    #[test]
    fn current_branch_and_rev_parse() {
        let (_dir, work, _remote) = make_repo_with_remote();
        let git = GitCli::new(&work);

        assert_eq!(git.current_branch().unwrap(), "main");
        let sha = git.rev_parse("main").unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn push_updates_remote_branch() {
        let (_dir, work, remote) = make_repo_with_remote();
        let git = GitCli::new(&work);

        git.push("main").unwrap();

        let local = git.rev_parse("main").unwrap();
        let pushed = run_git(&remote, &["rev-parse", "main"]);
        assert_eq!(local, pushed);
    }

    #[test]
    fn push_tags_pushes_tags() {
        let (_dir, work, remote) = make_repo_with_remote();
        run_git(&work, &["tag", "v1.0"]);
        let git = GitCli::new(&work);

        git.push_tags().unwrap();

        assert_eq!(run_git(&remote, &["tag"]), "v1.0");
    }

    #[test]
    fn rev_parse_unknown_branch_fails() {
        let (_dir, work, _remote) = make_repo_with_remote();
        let git = GitCli::new(&work);
        let err = git.rev_parse("no-such-branch").unwrap_err();
        assert!(matches!(err, CloudyError::GitError(_)));
    }

    #[test]
    fn push_to_missing_remote_fails() {
        let (_dir, work, _remote) = make_repo_with_remote();
        let git = GitCli::new(&work).with_remote("nowhere");
        assert!(git.push("main").is_err());
    }
}
