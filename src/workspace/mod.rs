pub mod error;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::WorkspaceConfig;
use crate::events::{FileChangeEvent, GitStatusEvent, WorkspaceEvent};
use crate::publisher::Publisher;
use crate::vcs::{Git, VcsOperator};

pub use error::WorkspaceError;

struct PollState {
    last_head: Option<String>,
    last_digest: Option<String>,
    last_status: Option<GitStatusEvent>,
}

struct Inner {
    root: PathBuf,
    config: WorkspaceConfig,
    publisher: Arc<Publisher>,
    git: Git,
    operator: VcsOperator,
    trigger: Arc<Notify>,
    stop: Notify,
    poll_state: RwLock<PollState>,
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

/// Ties a recursive filesystem watch together with periodic VCS polling,
/// publishing a single debounced, ordered event stream.
///
/// The filesystem side and the VCS side run as independent tasks but share
/// one `trigger` notify so a filesystem change can force an immediate VCS
/// re-check instead of waiting out the poll interval, and a mutating VCS
/// operation (via [`VcsOperator::with_notify`]) can do the same in reverse.
pub struct WorkspaceTracker {
    inner: Arc<Inner>,
    fs_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    poll_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkspaceTracker {
    pub fn new(root: impl Into<PathBuf>, config: WorkspaceConfig, publisher: Arc<Publisher>) -> Self {
        let root = root.into();
        let git = Git::new(root.clone());
        let trigger = Arc::new(Notify::new());
        let trigger_for_operator = trigger.clone();
        let operator = VcsOperator::new(git.clone()).with_notify(move || trigger_for_operator.notify_one());

        let inner = Arc::new(Inner {
            root,
            config,
            publisher,
            git,
            operator,
            trigger,
            stop: Notify::new(),
            poll_state: RwLock::new(PollState {
                last_head: None,
                last_digest: None,
                last_status: None,
            }),
            watcher: std::sync::Mutex::new(None),
        });

        Self {
            inner,
            fs_task: std::sync::Mutex::new(None),
            poll_task: std::sync::Mutex::new(None),
        }
    }

    pub fn operator(&self) -> &VcsOperator {
        &self.inner.operator
    }

    pub fn git(&self) -> &Git {
        &self.inner.git
    }

    /// Subscribes to the event stream. If a VCS status has already been
    /// computed by a prior poll, it is delivered to the new subscriber
    /// immediately so a caller connecting mid-session doesn't have to wait
    /// out the next poll interval to learn the current status.
    pub fn subscribe(&self) -> (uuid::Uuid, mpsc::Receiver<WorkspaceEvent>) {
        let inner = self.inner.clone();
        inner.publisher.subscribe_with(|| {
            inner
                .poll_state
                .read()
                .unwrap()
                .last_status
                .clone()
                .map(WorkspaceEvent::GitStatus)
        })
    }

    /// Starts the filesystem watcher and the VCS poller. Idempotent only in
    /// the sense that calling it twice starts a second watcher; callers own
    /// one `WorkspaceTracker` per workspace root.
    pub fn start(&self) -> Result<(), WorkspaceError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        })
        .map_err(|e| WorkspaceError::WatchFailed(e.to_string()))?;

        watcher
            .watch(&self.inner.root, RecursiveMode::Recursive)
            .map_err(|e| WorkspaceError::WatchFailed(e.to_string()))?;

        *self.inner.watcher.lock().unwrap() = Some(watcher);

        let fs_inner = self.inner.clone();
        let fs_handle = tokio::spawn(run_fs_monitor(fs_inner, raw_rx));
        *self.fs_task.lock().unwrap() = Some(fs_handle);

        let poll_inner = self.inner.clone();
        let poll_handle = tokio::spawn(run_vcs_poller(poll_inner));
        *self.poll_task.lock().unwrap() = Some(poll_handle);

        Ok(())
    }

    pub fn shutdown(&self) {
        self.inner.stop.notify_waiters();
        if let Some(handle) = self.fs_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
        }
        *self.inner.watcher.lock().unwrap() = None;
    }
}

fn is_ignored(root: &Path, path: &Path, ignore_list: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .any(|c| ignore_list.iter().any(|ig| c.as_os_str() == ig.as_str()))
}

fn operation_for(kind: &notify::EventKind) -> &'static str {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => "created",
        EventKind::Remove(_) => "removed",
        EventKind::Modify(_) => "modified",
        _ => "changed",
    }
}

async fn run_fs_monitor(inner: Arc<Inner>, mut raw_rx: mpsc::UnboundedReceiver<notify::Event>) {
    loop {
        let event = tokio::select! {
            _ = inner.stop.notified() => return,
            event = raw_rx.recv() => match event {
                Some(e) => e,
                None => return,
            },
        };

        let mut pending: Vec<(PathBuf, &'static str)> = event
            .paths
            .iter()
            .filter(|p| !is_ignored(&inner.root, p, &inner.config.ignore_list))
            .map(|p| (p.clone(), operation_for(&event.kind)))
            .collect();

        // Drain whatever else arrives within the debounce window so a burst
        // of writes (e.g. a build tool rewriting many files) becomes one
        // flush instead of one publish per event.
        loop {
            tokio::select! {
                _ = inner.stop.notified() => return,
                _ = sleep(inner.config.fs_debounce) => break,
                more = raw_rx.recv() => match more {
                    Some(e) => {
                        pending.extend(
                            e.paths
                                .iter()
                                .filter(|p| !is_ignored(&inner.root, p, &inner.config.ignore_list))
                                .map(|p| (p.clone(), operation_for(&e.kind))),
                        );
                    }
                    None => return,
                },
            }
        }

        if pending.is_empty() {
            continue;
        }

        // One `refresh` event per debounced flush is the canonical signal a
        // subscriber polls on; per-path events are additionally published
        // for callers that want finer detail.
        inner.publisher.publish(WorkspaceEvent::FileChange(FileChangeEvent {
            timestamp: crate::events::now_ms(),
            path: String::new(),
            operation: "refresh".to_string(),
        }));

        let mut seen = HashSet::new();
        for (path, operation) in pending.into_iter().rev() {
            if !seen.insert(path.clone()) {
                continue;
            }
            inner.publisher.publish(WorkspaceEvent::FileChange(FileChangeEvent {
                timestamp: crate::events::now_ms(),
                path: path.to_string_lossy().into_owned(),
                operation: operation.to_string(),
            }));
        }

        inner.trigger.notify_one();
    }
}

async fn run_vcs_poller(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = inner.stop.notified() => return,
            _ = sleep(inner.config.git_poll_interval) => {}
            _ = inner.trigger.notified() => {}
        }
        poll_once(&inner).await;
    }
}

async fn poll_once(inner: &Inner) {
    let head = match inner.git.head_commit().await {
        Ok(h) => h,
        Err(_) => return,
    };
    let digest = inner.git.status_digest().await;

    let (prev_head, prev_digest) = {
        let state = inner.poll_state.read().unwrap();
        (state.last_head.clone(), state.last_digest.clone())
    };

    if prev_head.as_deref() == Some(head.as_str()) && prev_digest.as_deref() == Some(digest.as_str()) {
        return;
    }

    if prev_head.as_deref() != Some(head.as_str()) {
        if let Some(prev) = &prev_head {
            if inner.git.is_ancestor(prev, &head).await {
                if let Ok(commits) = inner.git.commits_between(prev, &head).await {
                    for commit in commits {
                        // Upstream commits (already visible on a remote
                        // tracking branch) arrived via fetch/pull, not local
                        // work, and are filtered out of the commit feed.
                        if inner.git.commit_on_remote_tracking_branch(&commit.commit_sha).await {
                            continue;
                        }
                        inner.publisher.publish(WorkspaceEvent::GitCommit(commit));
                    }
                }
            } else {
                inner.publisher.publish(WorkspaceEvent::GitReset(crate::events::GitResetEvent {
                    timestamp: crate::events::now_ms(),
                    previous_head: prev.clone(),
                    current_head: head.clone(),
                }));
            }
        }
    }

    let status = inner.git.build_status().await.ok();
    if let Some(status) = status.clone() {
        inner.publisher.publish(WorkspaceEvent::GitStatus(status));
    }

    let mut state = inner.poll_state.write().unwrap();
    state.last_head = Some(head);
    state.last_digest = Some(digest);
    if status.is_some() {
        state.last_status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_configured_directories() {
        let root = Path::new("/repo");
        let ignored = vec!["node_modules".to_string(), ".git".to_string()];
        assert!(is_ignored(root, Path::new("/repo/node_modules/pkg/index.js"), &ignored));
        assert!(!is_ignored(root, Path::new("/repo/src/main.rs"), &ignored));
    }

    #[test]
    fn operation_names_match_event_kind() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        use notify::EventKind;
        assert_eq!(operation_for(&EventKind::Create(CreateKind::File)), "created");
        assert_eq!(operation_for(&EventKind::Remove(RemoveKind::File)), "removed");
        assert_eq!(operation_for(&EventKind::Modify(ModifyKind::Any)), "modified");
    }

    fn test_inner(publisher: Arc<Publisher>) -> Arc<Inner> {
        let root = std::env::temp_dir();
        let git = Git::new(root.clone());
        Arc::new(Inner {
            root,
            config: WorkspaceConfig {
                fs_debounce: std::time::Duration::from_millis(10),
                ..WorkspaceConfig::default()
            },
            publisher,
            operator: VcsOperator::new(git.clone()),
            git,
            trigger: Arc::new(Notify::new()),
            stop: Notify::new(),
            poll_state: RwLock::new(PollState {
                last_head: None,
                last_digest: None,
                last_status: None,
            }),
            watcher: std::sync::Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn fs_monitor_emits_refresh_before_per_path_events() {
        use notify::event::ModifyKind;
        use notify::{Event, EventKind};

        let publisher = Arc::new(Publisher::new(8));
        let inner = test_inner(publisher.clone());
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (_id, mut rx) = publisher.subscribe();

        let handle = tokio::spawn(run_fs_monitor(inner.clone(), raw_rx));

        let path = inner.root.join("file.txt");
        raw_tx
            .send(Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path))
            .unwrap();

        let first = rx.recv().await.unwrap();
        match first {
            WorkspaceEvent::FileChange(e) => {
                assert_eq!(e.operation, "refresh");
                assert_eq!(e.path, "");
            }
            other => panic!("expected FileChange, got {other:?}"),
        }

        let second = rx.recv().await.unwrap();
        match second {
            WorkspaceEvent::FileChange(e) => assert_eq!(e.operation, "modified"),
            other => panic!("expected FileChange, got {other:?}"),
        }

        drop(raw_tx);
        handle.abort();
    }
}
