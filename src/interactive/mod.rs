pub mod error;
pub mod record;
mod reader;
pub mod user_shell;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use regex::Regex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::InteractiveConfig;
use crate::detector::{ClaudeCodeDetector, CodexDetector, Detector, IdleDetector};
use crate::publisher::Publisher;
use crate::pty::{merged_env, PtyHandle, Size, SpawnSpec};
use crate::ring_buffer::{OutputChunk, RingBuffer};
use crate::status_tracker::StatusTracker;

use error::InteractiveError;
use record::{DirectOutputSink, ProcessInfo, ProcessRecord, ProcessStatus};
use user_shell::UserShellEntry;

/// Which agent's pattern matcher a session should run, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    ClaudeCode,
    Codex,
    None,
}

fn make_detector(kind: AgentKind) -> Box<dyn Detector> {
    match kind {
        AgentKind::ClaudeCode => Box::new(ClaudeCodeDetector),
        AgentKind::Codex => Box::new(CodexDetector::default()),
        AgentKind::None => Box::new(IdleDetector),
    }
}

/// Caller-supplied parameters for `Start`.
pub struct StartRequest {
    pub session_id: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub immediate_start: bool,
    pub default_cols: u16,
    pub default_rows: u16,
    pub agent_kind: AgentKind,
    pub disable_turn_detection: bool,
    pub prompt_pattern: Option<Regex>,
    pub idle_timeout_ms: u64,
    pub initial_command: Option<String>,
    pub is_user_shell: bool,
    pub login_shell: bool,
}

/// Per-session cached sink + dimensions, surviving process restarts.
struct SessionWsRecord {
    direct_output: RwLock<Option<Arc<dyn DirectOutputSink>>>,
    last_size: RwLock<Option<Size>>,
}

struct Inner {
    records: DashMap<String, Arc<ProcessRecord>>,
    session_ws: DashMap<String, Arc<SessionWsRecord>>,
    user_shells: DashMap<(String, String), UserShellEntry>,
    publisher: Arc<Publisher>,
    config: InteractiveConfig,
}

/// Owns every interactive PTY session in a workspace: the process registry,
/// the per-session direct-output/size cache, and the per-session user-shell
/// registry. Cheaply cloneable (wraps an `Arc`).
#[derive(Clone)]
pub struct InteractiveRunner {
    inner: Arc<Inner>,
}

impl InteractiveRunner {
    pub fn new(publisher: Arc<Publisher>, config: InteractiveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: DashMap::new(),
                session_ws: DashMap::new(),
                user_shells: DashMap::new(),
                publisher,
                config,
            }),
        }
    }

    fn session_ws(&self, session_id: &str) -> Arc<SessionWsRecord> {
        self.inner
            .session_ws
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(SessionWsRecord {
                    direct_output: RwLock::new(None),
                    last_size: RwLock::new(None),
                })
            })
            .clone()
    }

    /// Validates the request, allocates a record in `pending`, and — if
    /// `immediate_start` is set — runs the start routine using the best
    /// available starting size (cached session size, then request defaults,
    /// then built-ins).
    pub async fn start(&self, req: StartRequest) -> Result<ProcessInfo, InteractiveError> {
        if req.session_id.is_empty() {
            return Err(InteractiveError::Validation { field: "session_id" });
        }
        if req.command.is_empty() {
            return Err(InteractiveError::Validation { field: "command" });
        }

        let process_id = Uuid::new_v4().to_string();
        let now = crate::events::now_ms();

        let record = Arc::new(ProcessRecord {
            process_id: process_id.clone(),
            session_id: req.session_id.clone(),
            command: req.command.clone(),
            working_dir: req.working_dir.clone(),
            env: req.env.clone(),
            is_user_shell: req.is_user_shell,
            disable_turn_detection: req.disable_turn_detection,
            prompt_pattern: req.prompt_pattern.clone(),
            idle_timeout_ms: req.idle_timeout_ms,
            initial_command: req.initial_command.clone(),
            login_shell: req.login_shell,
            status: RwLock::new(ProcessStatus::Pending),
            exit_code: RwLock::new(None),
            started_at_ms: now,
            updated_at_ms: RwLock::new(now),
            pty: RwLock::new(None),
            status_tracker: RwLock::new(None),
            ring_buffer: Arc::new(RingBuffer::new(self.inner.config.ring_buffer_cap_bytes)),
            direct_output: RwLock::new(None),
            stop_signal: Arc::new(Notify::new()),
            stop_once: AtomicBool::new(false),
            start_once: AtomicBool::new(false),
            wait_done: Arc::new(Notify::new()),
            wait_done_fired: AtomicBool::new(false),
        });

        self.inner.records.insert(process_id.clone(), record.clone());

        if req.immediate_start {
            let size = self.resolve_start_size(&req);
            self.run_start_routine(record.clone(), req.agent_kind, size).await?;
        }

        Ok(record.info())
    }

    fn resolve_start_size(&self, req: &StartRequest) -> Size {
        if let Some(cached) = self
            .inner
            .session_ws
            .get(&req.session_id)
            .and_then(|ws| *ws.last_size.read().unwrap())
        {
            return cached;
        }
        if req.default_cols > 0 && req.default_rows > 0 {
            return Size { cols: req.default_cols, rows: req.default_rows };
        }
        Size {
            cols: self.inner.config.default_cols,
            rows: self.inner.config.default_rows,
        }
    }

    /// One-shot per record: assembles the exec description, spawns the PTY,
    /// optionally builds a status tracker, then launches the reader loop and
    /// lifecycle-waiter as sibling tasks.
    async fn run_start_routine(
        &self,
        record: Arc<ProcessRecord>,
        agent_kind: AgentKind,
        size: Size,
    ) -> Result<(), InteractiveError> {
        if !record.try_start_once() {
            return Ok(());
        }

        let program = record.command[0].clone();
        let args = record.command[1..].to_vec();
        let env = merged_env(&record.env);

        let spec = SpawnSpec {
            program,
            args,
            cwd: record.working_dir.clone(),
            env,
            login: record.login_shell,
        };

        let pty = Arc::new(PtyHandle::spawn(spec, size)?);
        *record.pty.write().unwrap() = Some(pty.clone());
        *record.status.write().unwrap() = ProcessStatus::Running;
        record.touch();

        if !record.disable_turn_detection {
            let tracker = Arc::new(StatusTracker::new(
                size.cols,
                size.rows,
                make_detector(agent_kind),
                self.inner.config.check_interval,
                self.inner.config.stability_window,
            ));
            *record.status_tracker.write().unwrap() = Some(tracker);
        }

        let reader_record = record.clone();
        let reader_pty = pty.clone();
        let reader_publisher = self.inner.publisher.clone();
        let reader_task = tokio::spawn(async move {
            reader::run_reader_loop(reader_record, reader_pty, reader_publisher).await;
        });

        let waiter_record = record.clone();
        let waiter_pty = pty.clone();
        let waiter_publisher = self.inner.publisher.clone();
        let runner_for_removal = self.clone();
        tokio::spawn(async move {
            reader::run_lifecycle_waiter(waiter_record.clone(), waiter_pty, waiter_publisher, reader_task)
                .await;
            runner_for_removal.inner.records.remove(&waiter_record.process_id);
        });

        if let Some(cmd) = record.initial_command.clone() {
            let delay = self.inner.config.initial_command_delay;
            let pty_for_initial = pty.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = pty_for_initial.write_all(format!("{cmd}\n").as_bytes());
            });
        }

        self.inner
            .publisher
            .publish(crate::events::WorkspaceEvent::ProcessStatus(
                crate::events::ProcessStatusEvent {
                    session_id: record.session_id.clone(),
                    process_id: record.process_id.clone(),
                    kind: crate::events::ProcessKind::Interactive,
                    command: record.command.clone(),
                    working_dir: record.working_dir.clone(),
                    status: ProcessStatus::Running,
                    exit_code: None,
                    timestamp: crate::events::now_ms(),
                },
            ));

        Ok(())
    }

    fn get_record(&self, process_id: &str) -> Result<Arc<ProcessRecord>, InteractiveError> {
        self.inner
            .records
            .get(process_id)
            .map(|r| r.clone())
            .ok_or_else(|| InteractiveError::NotFound(process_id.to_string()))
    }

    fn find_by_session(&self, session_id: &str) -> Option<Arc<ProcessRecord>> {
        self.inner
            .records
            .iter()
            .find(|r| r.session_id == session_id && !r.is_user_shell)
            .map(|r| r.clone())
    }

    fn get_user_shell_record(
        &self,
        session_id: &str,
        terminal_id: &str,
    ) -> Result<Arc<ProcessRecord>, InteractiveError> {
        let key = (session_id.to_string(), terminal_id.to_string());
        let process_id = self
            .inner
            .user_shells
            .get(&key)
            .and_then(|e| e.process_id.clone())
            .ok_or_else(|| InteractiveError::NotFound(terminal_id.to_string()))?;
        self.get_record(&process_id)
    }

    pub fn get(&self, process_id: &str) -> Option<ProcessInfo> {
        self.inner.records.get(process_id).map(|r| r.info())
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<ProcessInfo> {
        self.find_by_session(session_id).map(|r| r.info())
    }

    pub fn get_buffer(&self, process_id: &str) -> Result<Vec<OutputChunk>, InteractiveError> {
        Ok(self.get_record(process_id)?.ring_buffer.snapshot())
    }

    pub async fn write_stdin(&self, process_id: &str, data: &[u8]) -> Result<(), InteractiveError> {
        let record = self.get_record(process_id)?;
        if *record.status.read().unwrap() == ProcessStatus::Pending {
            return Err(InteractiveError::NotStarted(process_id.to_string()));
        }
        let pty = record
            .pty
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| InteractiveError::PtyUnavailable(process_id.to_string()))?;
        pty.write_all(data)?;
        record.touch();
        Ok(())
    }

    /// Writes stdin to the session's passthrough record, never to a
    /// user-shell sharing the same session id.
    pub async fn write_stdin_by_session(&self, session_id: &str, data: &[u8]) -> Result<(), InteractiveError> {
        let record = self
            .find_by_session(session_id)
            .ok_or_else(|| InteractiveError::NotFound(session_id.to_string()))?;
        self.write_stdin(&record.process_id, data).await
    }

    /// Writes stdin to a specific user shell by `(session_id, terminal_id)`.
    pub async fn write_stdin_user_shell(
        &self,
        session_id: &str,
        terminal_id: &str,
        data: &[u8],
    ) -> Result<(), InteractiveError> {
        let record = self.get_user_shell_record(session_id, terminal_id)?;
        self.write_stdin(&record.process_id, data).await
    }

    /// Resizes a specific user shell by `(session_id, terminal_id)`, never
    /// touching the session's passthrough record.
    pub async fn resize_user_shell(
        &self,
        session_id: &str,
        terminal_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), InteractiveError> {
        let record = self.get_user_shell_record(session_id, terminal_id)?;
        self.resize_record(record, cols, rows, AgentKind::None).await
    }

    /// Resizes by process id, triggering the start routine first if the
    /// record is still pending (lazy start on first resize).
    pub async fn resize_by_process_id(
        &self,
        process_id: &str,
        cols: u16,
        rows: u16,
        agent_kind: AgentKind,
    ) -> Result<(), InteractiveError> {
        let record = self.get_record(process_id)?;
        self.resize_record(record, cols, rows, agent_kind).await
    }

    pub async fn resize_by_session(
        &self,
        session_id: &str,
        cols: u16,
        rows: u16,
        agent_kind: AgentKind,
    ) -> Result<(), InteractiveError> {
        let record = self
            .find_by_session(session_id)
            .ok_or_else(|| InteractiveError::NotFound(session_id.to_string()))?;
        self.resize_record(record, cols, rows, agent_kind).await
    }

    async fn resize_record(
        &self,
        record: Arc<ProcessRecord>,
        cols: u16,
        rows: u16,
        agent_kind: AgentKind,
    ) -> Result<(), InteractiveError> {
        if *record.status.read().unwrap() == ProcessStatus::Pending {
            self.run_start_routine(record.clone(), agent_kind, Size { cols, rows }).await?;
        }

        if let Some(pty) = record.pty.read().unwrap().clone() {
            pty.resize(Size { cols, rows })?;
        }
        if let Some(tracker) = record.status_tracker.read().unwrap().clone() {
            tracker.resize(cols, rows);
        }

        if !record.is_user_shell {
            let ws = self.session_ws(&record.session_id);
            *ws.last_size.write().unwrap() = Some(Size { cols, rows });
        }

        Ok(())
    }

    /// Idempotent. Closes the stop signal, hangs up the PTY, sends the
    /// graceful-terminate signal, then races an external cancel / the
    /// configured grace period / the lifecycle-waiter's completion signal —
    /// whichever fires first; the first two escalate to a forced kill.
    pub async fn stop(&self, process_id: &str) -> Result<(), InteractiveError> {
        let record = self.get_record(process_id)?;
        record.signal_stop_once();

        let pty = record.pty.read().unwrap().clone();
        let Some(pty) = pty else { return Ok(()) };

        pty.hangup();
        pty.signal_term();

        let grace = self.inner.config.stop_grace_period;
        let wait_done = record.wait_done.clone();

        tokio::select! {
            _ = wait_done.notified() => {}
            _ = tokio::time::sleep(grace) => {
                pty.signal_kill();
            }
        }

        Ok(())
    }

    pub fn set_direct_output(
        &self,
        process_id: &str,
        sink: Arc<dyn DirectOutputSink>,
    ) -> Result<(), InteractiveError> {
        let record = self.get_record(process_id)?;
        *record.direct_output.write().unwrap() = Some(sink.clone());
        if !record.is_user_shell {
            let ws = self.session_ws(&record.session_id);
            *ws.direct_output.write().unwrap() = Some(sink);
        }
        Ok(())
    }

    pub fn clear_direct_output(&self, process_id: &str) -> Result<(), InteractiveError> {
        let record = self.get_record(process_id)?;
        *record.direct_output.write().unwrap() = None;
        if !record.is_user_shell {
            if let Some(ws) = self.inner.session_ws.get(&record.session_id) {
                *ws.direct_output.write().unwrap() = None;
            }
        }
        Ok(())
    }

    /// Clears only non-user-shell records for a session; user shells keep
    /// their own sinks regardless of what happens to the passthrough record.
    pub fn clear_direct_output_by_session(&self, session_id: &str) {
        if let Some(record) = self.find_by_session(session_id) {
            *record.direct_output.write().unwrap() = None;
        }
        if let Some(ws) = self.inner.session_ws.get(session_id) {
            *ws.direct_output.write().unwrap() = None;
        }
    }

    pub fn has_active_websocket_by_session(&self, session_id: &str) -> bool {
        self.inner
            .session_ws
            .get(session_id)
            .map(|ws| ws.direct_output.read().unwrap().is_some())
            .unwrap_or(false)
    }

    /// Re-attaches the session's cached direct-output sink and last-known
    /// size (if any) onto the session's current passthrough record, so a
    /// client reconnecting after a process restart doesn't have to resend
    /// either. Returns whether a live passthrough record exists to attach to.
    pub fn connect_session_websocket(&self, session_id: &str) -> bool {
        let Some(record) = self.find_by_session(session_id) else {
            return false;
        };
        let ws = self.session_ws(session_id);
        if let Some(sink) = ws.direct_output.read().unwrap().clone() {
            *record.direct_output.write().unwrap() = Some(sink);
        }
        if let Some(size) = *ws.last_size.read().unwrap() {
            if let Some(pty) = record.pty.read().unwrap().clone() {
                let _ = pty.resize(size);
            }
            if let Some(tracker) = record.status_tracker.read().unwrap().clone() {
                tracker.resize(size.cols, size.rows);
            }
        }
        true
    }

    /// Writes bytes straight to a record's attached direct-output sink
    /// rather than to the PTY's stdin; errors if no sink is attached.
    pub fn write_to_direct_output(&self, process_id: &str, data: &[u8]) -> Result<(), InteractiveError> {
        let record = self.get_record(process_id)?;
        let sink = record
            .direct_output
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| InteractiveError::PtyUnavailable(process_id.to_string()))?;
        sink.write(data);
        Ok(())
    }

    pub fn write_to_direct_output_by_session(&self, session_id: &str, data: &[u8]) -> Result<(), InteractiveError> {
        let record = self
            .find_by_session(session_id)
            .ok_or_else(|| InteractiveError::NotFound(session_id.to_string()))?;
        self.write_to_direct_output(&record.process_id, data)
    }

    /// Returns the live PTY handle for the session's passthrough record, for
    /// callers that want to write directly rather than through
    /// `write_stdin`/`write_stdin_by_session`.
    pub fn get_pty_writer_by_session(&self, session_id: &str) -> Result<Arc<PtyHandle>, InteractiveError> {
        let record = self
            .find_by_session(session_id)
            .ok_or_else(|| InteractiveError::NotFound(session_id.to_string()))?;
        record
            .pty
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| InteractiveError::PtyUnavailable(record.process_id.clone()))
    }

    /// Returns the live PTY handle for a specific user shell by
    /// `(session_id, terminal_id)`.
    pub fn get_pty_writer_user_shell(
        &self,
        session_id: &str,
        terminal_id: &str,
    ) -> Result<Arc<PtyHandle>, InteractiveError> {
        let record = self.get_user_shell_record(session_id, terminal_id)?;
        record
            .pty
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| InteractiveError::PtyUnavailable(record.process_id.clone()))
    }

    // --- user-shell registry -------------------------------------------------

    fn next_plain_label(&self, session_id: &str) -> (String, bool) {
        let plain_count = self
            .inner
            .user_shells
            .iter()
            .filter(|e| e.key().0 == session_id && e.initial_command.is_none() && e.closable)
            .count();

        let has_first = self
            .inner
            .user_shells
            .iter()
            .any(|e| e.key().0 == session_id && e.label == "Terminal");

        if !has_first {
            ("Terminal".to_string(), false)
        } else {
            (format!("Terminal {}", plain_count + 2), true)
        }
    }

    pub fn create_user_shell(&self, session_id: &str) -> UserShellEntry {
        let terminal_id = format!("shell-{}", Uuid::new_v4());
        let (label, closable) = self.next_plain_label(session_id);
        let entry = UserShellEntry {
            terminal_id: terminal_id.clone(),
            process_id: None,
            label,
            initial_command: None,
            closable,
            created_at_ms: crate::events::now_ms(),
        };
        self.inner
            .user_shells
            .insert((session_id.to_string(), terminal_id), entry.clone());
        entry
    }

    pub fn register_script_shell(
        &self,
        session_id: &str,
        terminal_id: &str,
        label: &str,
        initial_command: Option<String>,
    ) -> UserShellEntry {
        let entry = UserShellEntry {
            terminal_id: terminal_id.to_string(),
            process_id: None,
            label: label.to_string(),
            initial_command,
            closable: true,
            created_at_ms: crate::events::now_ms(),
        };
        self.inner
            .user_shells
            .insert((session_id.to_string(), terminal_id.to_string()), entry.clone());
        entry
    }

    pub fn list_user_shells(&self, session_id: &str) -> Vec<UserShellEntry> {
        let mut entries: Vec<UserShellEntry> = self
            .inner
            .user_shells
            .iter()
            .filter(|e| e.key().0 == session_id)
            .map(|e| e.value().clone())
            .collect();

        if entries.is_empty() {
            entries.push(self.create_user_shell(session_id));
        }

        entries.sort_by_key(|e| e.created_at_ms);
        entries
    }

    /// Returns the existing live process bound to `(session_id, terminal_id)`
    /// or spawns a new one, reusing the entry's stored metadata (label,
    /// initial command). Spawned processes always have
    /// `is_user_shell = true` and `disable_turn_detection = true`.
    pub async fn start_user_shell(
        &self,
        session_id: &str,
        terminal_id: &str,
        working_dir: Option<String>,
        preferred_shell: Option<&str>,
    ) -> Result<ProcessInfo, InteractiveError> {
        let key = (session_id.to_string(), terminal_id.to_string());

        if let Some(entry) = self.inner.user_shells.get(&key) {
            if let Some(ref pid) = entry.process_id {
                if let Some(info) = self.get(pid) {
                    if info.status == ProcessStatus::Running || info.status == ProcessStatus::Pending {
                        return Ok(info);
                    }
                }
            }
        }

        let (shell, login) = crate::shell::resolve_shell(preferred_shell);
        let initial_command = self
            .inner
            .user_shells
            .get(&key)
            .and_then(|e| e.initial_command.clone());

        let req = StartRequest {
            session_id: session_id.to_string(),
            command: vec![shell],
            working_dir,
            env: HashMap::new(),
            immediate_start: true,
            default_cols: self.inner.config.default_cols,
            default_rows: self.inner.config.default_rows,
            agent_kind: AgentKind::None,
            disable_turn_detection: true,
            prompt_pattern: None,
            idle_timeout_ms: 0,
            initial_command,
            is_user_shell: true,
            login_shell: login,
        };

        let info = self.start(req).await?;

        if let Some(mut entry) = self.inner.user_shells.get_mut(&key) {
            entry.process_id = Some(info.process_id.clone());
        } else {
            let (label, closable) = self.next_plain_label(session_id);
            self.inner.user_shells.insert(
                key,
                UserShellEntry {
                    terminal_id: terminal_id.to_string(),
                    process_id: Some(info.process_id.clone()),
                    label,
                    initial_command: None,
                    closable,
                    created_at_ms: crate::events::now_ms(),
                },
            );
        }

        Ok(info)
    }

    pub async fn stop_user_shell(&self, session_id: &str, terminal_id: &str) -> Result<(), InteractiveError> {
        let key = (session_id.to_string(), terminal_id.to_string());
        let process_id = self
            .inner
            .user_shells
            .get(&key)
            .and_then(|e| e.process_id.clone());

        if let Some(pid) = process_id {
            self.stop(&pid).await?;
        }
        self.inner.user_shells.remove(&key);
        Ok(())
    }

    pub fn shutdown(&self) {
        for entry in self.inner.records.iter() {
            entry.signal_stop_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InteractiveConfig;
    use crate::publisher::Publisher;

    fn request(session_id: &str, command: &[&str], immediate_start: bool) -> StartRequest {
        StartRequest {
            session_id: session_id.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            env: HashMap::new(),
            immediate_start,
            default_cols: 80,
            default_rows: 24,
            agent_kind: AgentKind::None,
            disable_turn_detection: true,
            prompt_pattern: None,
            idle_timeout_ms: 0,
            initial_command: None,
            is_user_shell: false,
            login_shell: false,
        }
    }

    struct NoopSink;
    impl DirectOutputSink for NoopSink {
        fn write(&self, _data: &[u8]) {}
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deferred_start_then_resize_runs_once() {
        let runner = InteractiveRunner::new(Arc::new(Publisher::new(8)), InteractiveConfig::default());
        let info = runner.start(request("s1", &["cat"], false)).await.unwrap();
        assert_eq!(info.status, ProcessStatus::Pending);

        let err = runner.write_stdin(&info.process_id, b"x").await.unwrap_err();
        assert!(matches!(err, InteractiveError::NotStarted(_)));

        runner.resize_by_session("s1", 80, 24, AgentKind::None).await.unwrap();
        let after = runner.get(&info.process_id).unwrap();
        assert_eq!(after.status, ProcessStatus::Running);

        runner.write_stdin(&info.process_id, b"hello\n").await.unwrap();
        runner.stop(&info.process_id).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_scoped_ops_skip_user_shells() {
        let runner = InteractiveRunner::new(Arc::new(Publisher::new(8)), InteractiveConfig::default());
        let passthrough = runner.start(request("s2", &["cat"], true)).await.unwrap();

        let shell_entry = runner.create_user_shell("s2");
        let shell_info = runner
            .start_user_shell("s2", &shell_entry.terminal_id, None, Some("/bin/sh"))
            .await
            .unwrap();

        let scoped = runner.get_by_session("s2").unwrap();
        assert_eq!(scoped.process_id, passthrough.process_id);
        assert_ne!(scoped.process_id, shell_info.process_id);

        runner.resize_by_session("s2", 100, 30, AgentKind::None).await.unwrap();
        runner.write_stdin_by_session("s2", b"hi\n").await.unwrap();

        runner.resize_user_shell("s2", &shell_entry.terminal_id, 90, 20).await.unwrap();
        runner
            .write_stdin_user_shell("s2", &shell_entry.terminal_id, b"echo hi\n")
            .await
            .unwrap();

        let writer = runner.get_pty_writer_by_session("s2").unwrap();
        writer.write_all(b"more\n").unwrap();
        let shell_writer = runner.get_pty_writer_user_shell("s2", &shell_entry.terminal_id).unwrap();
        shell_writer.write_all(b"echo bye\n").unwrap();

        runner
            .set_direct_output(&passthrough.process_id, Arc::new(NoopSink))
            .unwrap();
        assert!(runner.has_active_websocket_by_session("s2"));
        runner.write_to_direct_output_by_session("s2", b"snapshot").unwrap();
        runner.clear_direct_output_by_session("s2");
        assert!(!runner.has_active_websocket_by_session("s2"));

        assert!(runner.connect_session_websocket("s2"));
        assert!(!runner.connect_session_websocket("no-such-session"));

        runner.stop(&passthrough.process_id).await.unwrap();
        runner.stop(&shell_info.process_id).await.unwrap();
    }
}
