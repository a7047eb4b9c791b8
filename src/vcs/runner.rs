use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::error::VcsError;
use crate::env_filter::VCS_STRIPPED_KEYS;

/// Captured stdout/stderr from a completed git subprocess.
#[derive(Debug)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn lines(&self) -> Vec<&str> {
        self.stdout.lines().filter(|l| !l.is_empty()).collect()
    }

    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Low-level git command runner bound to one repository path.
///
/// Every command runs via `git -C <repo>` with `GIT_TERMINAL_PROMPT=0` (never
/// hang on a credential prompt) and `LC_ALL=C` (stable, parseable output).
/// `GIT_DIR`/`GIT_WORK_TREE` are stripped from the inherited environment so a
/// caller embedded inside another git hook can't leak its own repo context
/// into ours. Subprocesses are killed on drop.
#[derive(Debug, Clone)]
pub struct Git {
    repo_path: PathBuf,
}

impl Git {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub async fn run(&self, args: &[&str]) -> Result<GitOutput, VcsError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.repo_path).args(args);
        for key in VCS_STRIPPED_KEYS {
            cmd.env_remove(key);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .kill_on_drop(true);

        let command_str = format!("git -C {} {}", self.repo_path.display(), args.join(" "));

        let output = timeout(Duration::from_secs(30), cmd.output())
            .await
            .map_err(|_| VcsError::CommandFailed {
                code: -1,
                stderr: format!("command timed out after 30s: {command_str}"),
                command: command_str.clone(),
            })?
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    VcsError::GitNotFound
                } else {
                    VcsError::SpawnError {
                        source,
                        command: command_str.clone(),
                    }
                }
            })?;

        let stdout = String::from_utf8(output.stdout)?;
        let stderr = String::from_utf8(output.stderr)?;

        if output.status.success() {
            Ok(GitOutput { stdout, stderr })
        } else {
            Err(VcsError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
                command: command_str,
            })
        }
    }

    pub async fn run_in(&self, path: &Path, args: &[&str]) -> Result<GitOutput, VcsError> {
        Git::new(path).run(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lines_skips_blanks() {
        let out = GitOutput {
            stdout: "a\n\nb\n".into(),
            stderr: String::new(),
        };
        assert_eq!(out.lines(), vec!["a", "b"]);
    }
}
