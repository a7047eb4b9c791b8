use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::error::VcsError;
use super::runner::Git;
use crate::events::GitResetEvent;

static BRANCH_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").unwrap());
static COMMIT_SHA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{4,64}$").unwrap());
static RESET_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/~^:-]*$").unwrap());

fn validate_branch_name(name: &str) -> Result<(), VcsError> {
    if name.is_empty()
        || name.len() > 255
        || !BRANCH_NAME_RE.is_match(name)
        || name.ends_with('/')
        || name.contains("..")
        || name.ends_with(".lock")
    {
        return Err(VcsError::Validation {
            field: "branch_name",
            reason: format!("'{name}' is not a valid branch name"),
        });
    }
    Ok(())
}

fn validate_commit_sha(sha: &str) -> Result<(), VcsError> {
    if !COMMIT_SHA_RE.is_match(sha) {
        return Err(VcsError::Validation {
            field: "commit_sha",
            reason: format!("'{sha}' is not a valid commit reference"),
        });
    }
    Ok(())
}

/// Validates a `reset` target, which unlike a commit SHA may be any ref
/// expression (`origin/main`, `HEAD~1`, `HEAD^`, `refs/heads/main`, a
/// branch name, or a bare SHA).
fn validate_reset_target(target: &str) -> Result<(), VcsError> {
    if target.is_empty()
        || target.len() > 255
        || !RESET_TARGET_RE.is_match(target)
        || target.contains("..")
    {
        return Err(VcsError::Validation {
            field: "target",
            reason: format!("'{target}' is not a valid reset target"),
        });
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct ResetOptions {
    pub mode: ResetMode,
    pub target: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResetMode {
    Soft,
    #[default]
    Mixed,
    Hard,
}

impl ResetMode {
    fn as_flag(self) -> &'static str {
        match self {
            ResetMode::Soft => "--soft",
            ResetMode::Mixed => "--mixed",
            ResetMode::Hard => "--hard",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CommitOptions {
    pub message: String,
    pub amend: bool,
    pub stage_all: bool,
}

/// Every mutating operation except `create_pr` serializes through this
/// mutex: two concurrent rebases (or a rebase racing a stage) on the same
/// working tree corrupt the index, so only one is ever in flight. Read-only
/// status/log calls on `Git` go straight to the subprocess and never touch
/// this lock.
pub struct VcsOperator {
    git: Git,
    lock: Arc<Mutex<()>>,
    on_mutation: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl VcsOperator {
    pub fn new(git: Git) -> Self {
        Self {
            git,
            lock: Arc::new(Mutex::new(())),
            on_mutation: None,
        }
    }

    /// Registers a callback fired after each mutating op releases the lock,
    /// used to nudge the filesystem watcher into an immediate re-scan rather
    /// than waiting out its debounce window.
    pub fn with_notify(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_mutation = Some(Arc::new(f));
        self
    }

    async fn guarded<F, Fut, T>(&self, op: F) -> Result<T, VcsError>
    where
        F: FnOnce(Git) -> Fut,
        Fut: std::future::Future<Output = Result<T, VcsError>>,
    {
        let _permit = self
            .lock
            .try_lock()
            .map_err(|_| VcsError::Busy)?;
        let result = op(self.git.clone()).await;
        if result.is_ok() {
            if let Some(cb) = &self.on_mutation {
                cb();
            }
        }
        result
    }

    pub async fn pull(&self) -> Result<(), VcsError> {
        self.guarded(|git| async move {
            git.run(&["pull", "--ff-only"]).await?;
            Ok(())
        })
        .await
    }

    pub async fn push(&self, force_with_lease: bool) -> Result<(), VcsError> {
        self.guarded(|git| async move {
            if force_with_lease {
                git.run(&["push", "--force-with-lease"]).await?;
            } else {
                git.run(&["push"]).await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn rebase(&self, onto: &str) -> Result<(), VcsError> {
        validate_branch_name(onto)?;
        self.guarded(|git| async move {
            match git.run(&["rebase", onto]).await {
                Ok(_) => Ok(()),
                Err(VcsError::CommandFailed { stderr, .. }) if stderr.contains("CONFLICT") => {
                    Err(conflicted_files(&git).await)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn merge(&self, branch: &str) -> Result<(), VcsError> {
        validate_branch_name(branch)?;
        self.guarded(|git| async move {
            match git.run(&["merge", "--no-edit", branch]).await {
                Ok(_) => Ok(()),
                Err(VcsError::CommandFailed { stderr, .. }) if stderr.contains("CONFLICT") => {
                    Err(conflicted_files(&git).await)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn commit(&self, opts: CommitOptions) -> Result<String, VcsError> {
        if opts.message.trim().is_empty() && !opts.amend {
            return Err(VcsError::Validation {
                field: "message",
                reason: "commit message must not be empty".into(),
            });
        }
        self.guarded(|git| async move {
            if opts.stage_all {
                git.run(&["add", "-A"]).await?;
            }
            let mut args = vec!["commit"];
            if opts.amend {
                args.push("--amend");
            }
            if !opts.message.trim().is_empty() {
                args.push("-m");
                args.push(&opts.message);
            } else {
                args.push("--no-edit");
            }
            git.run(&args).await?;
            let head = git.head_commit().await?;
            Ok(head)
        })
        .await
    }

    pub async fn stage(&self, paths: &[String]) -> Result<(), VcsError> {
        self.guarded(|git| async move {
            let mut args = vec!["add", "--"];
            args.extend(paths.iter().map(|s| s.as_str()));
            git.run(&args).await?;
            Ok(())
        })
        .await
    }

    pub async fn unstage(&self, paths: &[String]) -> Result<(), VcsError> {
        self.guarded(|git| async move {
            let mut args = vec!["restore", "--staged", "--"];
            args.extend(paths.iter().map(|s| s.as_str()));
            git.run(&args).await?;
            Ok(())
        })
        .await
    }

    /// Discards local changes in `paths`. Tracked paths (already known to
    /// the repo before this change) are reverted with `checkout --`;
    /// untracked paths are removed with `clean -f` since `checkout` leaves
    /// them untouched; paths that are a pure add still sitting in the index
    /// (staged `Added`, no prior history) are removed with `rm -f --` since
    /// `clean -f` only touches untracked paths and `checkout --` would keep
    /// them staged.
    pub async fn discard(&self, paths: &[String]) -> Result<(), VcsError> {
        if paths.is_empty() {
            return Err(VcsError::Validation {
                field: "paths",
                reason: "discard requires at least one path".into(),
            });
        }
        self.guarded(|git| async move {
            let status = git.porcelain_status().await?;
            let mut tracked = Vec::new();
            let mut untracked = Vec::new();
            let mut staged_added = Vec::new();
            for path in paths {
                match status.iter().find(|f| &f.path == path) {
                    Some(f) if f.status == crate::events::FileStatus::Untracked => {
                        untracked.push(path.clone())
                    }
                    Some(f) if f.status == crate::events::FileStatus::Added && f.staged => {
                        staged_added.push(path.clone())
                    }
                    _ => tracked.push(path.clone()),
                }
            }

            if !tracked.is_empty() {
                let mut args = vec!["checkout", "--"];
                args.extend(tracked.iter().map(|s| s.as_str()));
                git.run(&args).await?;
            }
            if !staged_added.is_empty() {
                let mut args = vec!["rm", "-f", "--"];
                args.extend(staged_added.iter().map(|s| s.as_str()));
                git.run(&args).await?;
            }
            for path in &untracked {
                git.run(&["clean", "-f", "--", path]).await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn revert_commit(&self) -> Result<GitResetEvent, VcsError> {
        self.guarded(|git| async move {
            let previous_head = git.head_commit().await?;
            git.run(&["reset", "--soft", "HEAD~1"]).await?;
            let current_head = git.head_commit().await?;
            Ok(GitResetEvent {
                timestamp: crate::events::now_ms(),
                previous_head,
                current_head,
            })
        })
        .await
    }

    pub async fn rename_branch(&self, new_name: &str) -> Result<(), VcsError> {
        validate_branch_name(new_name)?;
        self.guarded(|git| async move {
            git.run(&["branch", "-m", new_name]).await?;
            Ok(())
        })
        .await
    }

    pub async fn reset(&self, opts: ResetOptions) -> Result<GitResetEvent, VcsError> {
        validate_reset_target(&opts.target)?;
        self.guarded(|git| async move {
            let previous_head = git.head_commit().await?;
            git.run(&["reset", opts.mode.as_flag(), &opts.target]).await?;
            let current_head = git.head_commit().await?;
            Ok(GitResetEvent {
                timestamp: crate::events::now_ms(),
                previous_head,
                current_head,
            })
        })
        .await
    }

    pub async fn abort(&self) -> Result<(), VcsError> {
        self.guarded(|git| async move {
            let in_rebase = git.repo_path().join(".git/rebase-merge").exists()
                || git.repo_path().join(".git/rebase-apply").exists();
            if in_rebase {
                git.run(&["rebase", "--abort"]).await?;
            } else {
                git.run(&["merge", "--abort"]).await?;
            }
            Ok(())
        })
        .await
    }

    pub async fn show_commit(&self, sha: &str) -> Result<String, VcsError> {
        validate_commit_sha(sha)?;
        let out = self.git.run(&["show", sha]).await?;
        Ok(out.stdout)
    }

    /// Opens a pull request via the `gh` CLI. This never mutates the local
    /// working tree or index, so it runs outside the mutation lock and can
    /// proceed even while another operator call is in flight.
    pub async fn create_pr(&self, title: &str, body: &str, base: Option<&str>) -> Result<String, VcsError> {
        create_pr_impl(self.git.repo_path(), title, body, base).await
    }
}

async fn conflicted_files(git: &Git) -> VcsError {
    let files = git
        .run(&["diff", "--name-only", "--diff-filter=U"])
        .await
        .map(|o| o.lines().into_iter().map(String::from).collect())
        .unwrap_or_default();
    VcsError::Conflict(files)
}

async fn create_pr_impl(
    repo_path: &Path,
    title: &str,
    body: &str,
    base: Option<&str>,
) -> Result<String, VcsError> {
    let mut cmd = Command::new("gh");
    cmd.arg("-C")
        .arg(repo_path)
        .args(["pr", "create", "--title", title, "--body", body]);
    if let Some(base) = base {
        cmd.args(["--base", base]);
    }
    cmd.kill_on_drop(true);

    let output = cmd.output().await.map_err(|source| VcsError::SpawnError {
        source,
        command: "gh pr create".into(),
    })?;

    if !output.status.success() {
        return Err(VcsError::CommandFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            command: "gh pr create".into(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_branch_names() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("feature/").is_err());
        assert!(validate_branch_name("-bad").is_err());
        assert!(validate_branch_name("feat..x").is_err());
        assert!(validate_branch_name("wip.lock").is_err());
        assert!(validate_branch_name("feature/login-fix").is_ok());
    }

    #[test]
    fn rejects_invalid_commit_shas() {
        assert!(validate_commit_sha("not-a-sha!").is_err());
        assert!(validate_commit_sha("deadbeef").is_ok());
        assert!(validate_commit_sha(&"a".repeat(64)).is_ok());
        assert!(validate_commit_sha(&"a".repeat(65)).is_err());
    }

    #[test]
    fn reset_target_accepts_refs_not_only_shas() {
        assert!(validate_reset_target("origin/main").is_ok());
        assert!(validate_reset_target("HEAD~1").is_ok());
        assert!(validate_reset_target("HEAD^").is_ok());
        assert!(validate_reset_target("refs/heads/main").is_ok());
        assert!(validate_reset_target("a..b").is_err());
        assert!(validate_reset_target("").is_err());
    }

    #[tokio::test]
    async fn second_concurrent_op_sees_busy() {
        let git = Git::new(std::env::temp_dir());
        let op = VcsOperator::new(git);
        let _guard = op.lock.try_lock().unwrap();
        let result = op.pull().await;
        assert!(matches!(result, Err(VcsError::Busy)));
    }

    #[tokio::test]
    async fn discard_rejects_empty_paths() {
        let git = Git::new(std::env::temp_dir());
        let op = VcsOperator::new(git);
        let err = op.discard(&[]).await.unwrap_err();
        assert!(matches!(err, VcsError::Validation { field: "paths", .. }));
    }
}
