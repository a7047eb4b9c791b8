use std::collections::HashMap;

use super::error::VcsError;
use super::runner::Git;
use crate::events::{FileInfo, FileStatus, GitCommitEvent, GitStatusEvent};

impl Git {
    /// Current branch name; falls back to the short commit hash on detached HEAD.
    pub async fn current_branch(&self) -> Result<String, VcsError> {
        match self.run(&["symbolic-ref", "--short", "HEAD"]).await {
            Ok(out) => Ok(out.trimmed().to_string()),
            Err(VcsError::CommandFailed { stderr, .. }) if stderr.contains("not a symbolic ref") => {
                let out = self.run(&["rev-parse", "--short", "HEAD"]).await?;
                Ok(out.trimmed().to_string())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn remote_branch(&self) -> Option<String> {
        self.run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"])
            .await
            .ok()
            .map(|o| o.trimmed().to_string())
            .filter(|s| !s.is_empty())
    }

    pub async fn head_commit(&self) -> Result<String, VcsError> {
        Ok(self.run(&["rev-parse", "HEAD"]).await?.trimmed().to_string())
    }

    async fn default_branch_ref(&self) -> Option<String> {
        for candidate in ["origin/main", "origin/master", "main", "master"] {
            if self.run(&["rev-parse", "--verify", candidate]).await.is_ok() {
                return Some(candidate.to_string());
            }
        }
        None
    }

    /// The ref ahead/behind counts compare against: the upstream if set,
    /// otherwise whichever of `main`/`master` (local or `origin/`) exists.
    pub async fn base_commit_ref(&self, remote_branch: &Option<String>) -> Option<String> {
        if let Some(ref rb) = remote_branch {
            return Some(rb.clone());
        }
        self.default_branch_ref().await
    }

    pub async fn ahead_behind(&self, compare_ref: &str) -> Result<(u32, u32), VcsError> {
        let out = self
            .run(&["rev-list", "--left-right", "--count", &format!("HEAD...{compare_ref}")])
            .await?;
        let trimmed = out.trimmed();
        let mut parts = trimmed.split_whitespace();
        let ahead = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let behind = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok((ahead, behind))
    }

    /// Parses `git status --porcelain=v1 --untracked-files=all`. When both
    /// the index and worktree bytes are set (e.g. `AD`), the worktree byte
    /// takes precedence since that's what a subsequent commit would not yet
    /// include.
    pub async fn porcelain_status(&self) -> Result<Vec<FileInfo>, VcsError> {
        let out = self.run(&["status", "--porcelain=v1", "--untracked-files=all"]).await?;
        let mut files = Vec::new();

        for line in out.stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let index_byte = line.as_bytes()[0] as char;
            let worktree_byte = line.as_bytes()[1] as char;
            let rest = &line[3..];

            let (path, old_path) = if let Some((old, new)) = rest.split_once(" -> ") {
                (new.to_string(), Some(old.to_string()))
            } else {
                (rest.to_string(), None)
            };

            if index_byte == '?' && worktree_byte == '?' {
                files.push(FileInfo {
                    path,
                    old_path,
                    status: FileStatus::Untracked,
                    staged: false,
                    additions: 0,
                    deletions: 0,
                    diff: String::new(),
                });
                continue;
            }

            let (status, staged) = if worktree_byte != ' ' && worktree_byte != '?' {
                (classify_status_byte(worktree_byte), false)
            } else {
                (classify_status_byte(index_byte), true)
            };

            files.push(FileInfo {
                path,
                old_path,
                status,
                staged,
                additions: 0,
                deletions: 0,
                diff: String::new(),
            });
        }

        Ok(files)
    }

    /// Fills in `(additions, deletions, diff)` for each file via
    /// `diff --numstat` and a per-file `diff`. Untracked files get a
    /// synthetic unified diff against `/dev/null`.
    pub async fn enrich_file_diffs(
        &self,
        files: &mut [FileInfo],
        base_ref: &str,
    ) -> Result<(), VcsError> {
        let staged_numstat = self.run(&["diff", "--cached", "--numstat", base_ref]).await.ok();
        let unstaged_numstat = self.run(&["diff", "--numstat", base_ref]).await.ok();

        let staged_counts = staged_numstat.as_ref().map(parse_numstat).unwrap_or_default();
        let unstaged_counts = unstaged_numstat.as_ref().map(parse_numstat).unwrap_or_default();

        for file in files.iter_mut() {
            match file.status {
                FileStatus::Untracked => {
                    if let Ok(content) = tokio::fs::read_to_string(self.repo_path().join(&file.path)).await
                    {
                        file.diff = synthetic_untracked_diff(&file.path, &content);
                        file.additions = content.lines().count() as u32;
                    }
                    continue;
                }
                _ => {}
            }

            let counts = if file.staged { &staged_counts } else { &unstaged_counts };
            if let Some((add, del)) = counts.get(&file.path) {
                file.additions = *add;
                file.deletions = *del;
            }

            let diff_args: Vec<&str> = if file.staged {
                vec!["diff", "--cached", base_ref, "--", &file.path]
            } else {
                vec!["diff", base_ref, "--", &file.path]
            };
            if let Ok(out) = self.run(&diff_args).await {
                file.diff = out.stdout;
            }
        }

        Ok(())
    }

    /// Builds the full status snapshot published as a `git_status` event.
    pub async fn build_status(&self) -> Result<GitStatusEvent, VcsError> {
        let branch = self.current_branch().await?;
        let remote_branch = self.remote_branch().await;
        let head_commit = self.head_commit().await?;
        let base_commit_ref = self.base_commit_ref(&remote_branch).await;

        let (ahead, behind) = if let Some(ref compare) = base_commit_ref {
            self.ahead_behind(compare).await.unwrap_or((0, 0))
        } else {
            (0, 0)
        };

        let mut files = self.porcelain_status().await?;
        if let Some(ref base) = base_commit_ref {
            let _ = self.enrich_file_diffs(&mut files, base).await;
        }

        let mut modified = Vec::new();
        let mut added = Vec::new();
        let mut deleted = Vec::new();
        let mut untracked = Vec::new();
        let mut renamed = Vec::new();
        let mut by_path = HashMap::new();

        for f in files {
            match f.status {
                FileStatus::Modified => modified.push(f.path.clone()),
                FileStatus::Added => added.push(f.path.clone()),
                FileStatus::Deleted => deleted.push(f.path.clone()),
                FileStatus::Untracked => untracked.push(f.path.clone()),
                FileStatus::Renamed => renamed.push(f.path.clone()),
            }
            by_path.insert(f.path.clone(), f);
        }

        Ok(GitStatusEvent {
            timestamp: crate::events::now_ms(),
            branch,
            remote_branch,
            head_commit,
            base_commit: base_commit_ref,
            ahead,
            behind,
            modified,
            added,
            deleted,
            untracked,
            renamed,
            files: by_path,
        })
    }

    /// `rev-list previous..current` plus a `%H` separator, returning one
    /// `GitCommitEvent` per commit (oldest excluded, newest included).
    pub async fn commits_between(&self, from: &str, to: &str) -> Result<Vec<GitCommitEvent>, VcsError> {
        let fmt = "%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%s";
        let out = self
            .run(&["log", &format!("--format={fmt}"), &format!("{from}..{to}")])
            .await?;

        let mut commits = Vec::new();
        for line in out.lines() {
            let parts: Vec<&str> = line.split('\u{1f}').collect();
            if parts.len() < 6 {
                continue;
            }
            let sha = parts[0].to_string();
            let stat = self
                .run(&["show", "--numstat", "--format=", &sha])
                .await
                .ok();
            let (files_changed, insertions, deletions) = stat
                .map(|o| summarize_numstat(&o.stdout))
                .unwrap_or((0, 0, 0));

            commits.push(GitCommitEvent {
                timestamp: crate::events::now_ms(),
                commit_sha: sha,
                parent_sha: parts[1].split(' ').next().unwrap_or("").to_string(),
                author_name: parts[2].to_string(),
                author_email: parts[3].to_string(),
                message: parts[5].to_string(),
                files_changed,
                insertions,
                deletions,
                committed_at: parts[4].parse().unwrap_or(0),
            });
        }
        Ok(commits)
    }

    /// True if `ancestor` is an ancestor of (or equal to) `descendant`.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.run(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await
            .is_ok()
    }

    /// Remote tracking branches (`refs/remotes/...`) that contain `commit`,
    /// used to filter out commits that arrived via fetch/pull rather than
    /// local work.
    pub async fn commit_on_remote_tracking_branch(&self, commit: &str) -> bool {
        match self.run(&["branch", "-r", "--contains", commit]).await {
            Ok(out) => !out.trimmed().is_empty(),
            Err(_) => false,
        }
    }

    pub async fn status_digest(&self) -> String {
        self.run(&["status", "--porcelain=v1", "--untracked-files=all"])
            .await
            .map(|o| {
                use sha2::{Digest, Sha256};
                format!("{:x}", Sha256::digest(o.stdout.as_bytes()))
            })
            .unwrap_or_default()
    }
}

fn classify_status_byte(byte: char) -> FileStatus {
    match byte {
        'A' => FileStatus::Added,
        'D' => FileStatus::Deleted,
        'R' => FileStatus::Renamed,
        'C' => FileStatus::Added,
        _ => FileStatus::Modified,
    }
}

fn parse_numstat(out: &super::runner::GitOutput) -> HashMap<String, (u32, u32)> {
    let mut map = HashMap::new();
    for line in out.lines() {
        let mut parts = line.splitn(3, '\t');
        let add = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let del = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        if let Some(path) = parts.next() {
            map.insert(path.to_string(), (add, del));
        }
    }
    map
}

fn summarize_numstat(stdout: &str) -> (u32, u32, u32) {
    let mut files = 0;
    let mut ins = 0;
    let mut del = 0;
    for line in stdout.lines().filter(|l| !l.is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let a: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let d: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        files += 1;
        ins += a;
        del += d;
    }
    (files, ins, del)
}

fn synthetic_untracked_diff(path: &str, content: &str) -> String {
    let mut diff = format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{} @@\n", content.lines().count());
    for line in content.lines() {
        diff.push('+');
        diff.push_str(line);
        diff.push('\n');
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_bytes() {
        assert!(matches!(classify_status_byte('A'), FileStatus::Added));
        assert!(matches!(classify_status_byte('D'), FileStatus::Deleted));
        assert!(matches!(classify_status_byte('M'), FileStatus::Modified));
        assert!(matches!(classify_status_byte('R'), FileStatus::Renamed));
    }

    #[test]
    fn synthetic_diff_has_dev_null_source() {
        let diff = synthetic_untracked_diff("a.txt", "hello\n");
        assert!(diff.starts_with("--- /dev/null"));
        assert!(diff.contains("+hello"));
    }
}
