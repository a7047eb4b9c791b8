use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::Serialize;
use tokio::sync::Notify;

use crate::pty::PtyHandle;
use crate::ring_buffer::RingBuffer;
use crate::status_tracker::StatusTracker;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Pending,
    Running,
    Exited,
    Failed,
}

/// A snapshot of a process record's public fields, returned from the
/// runner's lookup methods instead of a live reference so callers can't
/// observe half-updated state.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub process_id: String,
    pub session_id: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub started_at_ms: u64,
    pub updated_at_ms: u64,
    pub is_user_shell: bool,
}

/// A direct-output sink: a writer a caller attaches to receive raw bytes
/// without going through the ring buffer or publisher (e.g. a websocket
/// passthrough). Errors writing to it are logged and otherwise ignored — the
/// process itself must never be affected by a disconnected sink.
pub trait DirectOutputSink: Send + Sync {
    fn write(&self, data: &[u8]);
}

/// One interactive process's full internal state. Exclusively owned by the
/// runner's registry; the PTY handle and status tracker are in turn
/// exclusively owned by this record.
pub struct ProcessRecord {
    pub process_id: String,
    pub session_id: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub is_user_shell: bool,
    pub disable_turn_detection: bool,
    pub prompt_pattern: Option<Regex>,
    pub idle_timeout_ms: u64,
    pub initial_command: Option<String>,
    pub login_shell: bool,

    pub status: RwLock<ProcessStatus>,
    pub exit_code: RwLock<Option<i32>>,
    pub started_at_ms: u64,
    pub updated_at_ms: RwLock<u64>,

    pub pty: RwLock<Option<Arc<PtyHandle>>>,
    pub status_tracker: RwLock<Option<Arc<StatusTracker>>>,
    pub ring_buffer: Arc<RingBuffer>,
    pub direct_output: RwLock<Option<Arc<dyn DirectOutputSink>>>,

    pub stop_signal: Arc<Notify>,
    pub stop_once: AtomicBool,
    pub start_once: AtomicBool,

    pub wait_done: Arc<Notify>,
    pub wait_done_fired: AtomicBool,
}

impl ProcessRecord {
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            process_id: self.process_id.clone(),
            session_id: self.session_id.clone(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            status: *self.status.read().unwrap(),
            exit_code: *self.exit_code.read().unwrap(),
            started_at_ms: self.started_at_ms,
            updated_at_ms: *self.updated_at_ms.read().unwrap(),
            is_user_shell: self.is_user_shell,
        }
    }

    pub fn touch(&self) {
        *self.updated_at_ms.write().unwrap() = crate::events::now_ms();
    }

    /// Returns true exactly once: the first caller to observe `false` flips
    /// it and proceeds; every later caller (even concurrent ones) gets
    /// `false` and must not repeat the start routine.
    pub fn try_start_once(&self) -> bool {
        self.start_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn signal_stop_once(&self) {
        if self
            .stop_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.stop_signal.notify_waiters();
        }
    }

    pub fn signal_wait_done_once(&self) {
        if self
            .wait_done_fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.wait_done.notify_waiters();
        }
    }
}
