use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::interactive::record::ProcessStatus;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Untracked,
    Renamed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub staged: bool,
    pub additions: u32,
    pub deletions: u32,
    pub diff: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitStatusEvent {
    pub timestamp: u64,
    pub branch: String,
    pub remote_branch: Option<String>,
    pub head_commit: String,
    pub base_commit: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
    pub renamed: Vec<String>,
    pub files: HashMap<String, FileInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitCommitEvent {
    pub timestamp: u64,
    pub commit_sha: String,
    pub parent_sha: String,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub committed_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitResetEvent {
    pub timestamp: u64,
    pub previous_head: String,
    pub current_head: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileChangeEvent {
    pub timestamp: u64,
    pub path: String,
    pub operation: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutputEvent {
    pub session_id: String,
    pub process_id: String,
    pub kind: ProcessKind,
    pub stream: StreamKind,
    pub data: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Interactive,
    Background,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatusEvent {
    pub session_id: String,
    pub process_id: String,
    pub kind: ProcessKind,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStateKind {
    Unknown,
    Working,
    WaitingApproval,
    WaitingInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStateEvent {
    pub session_id: String,
    pub state: AgentStateKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnCompleteEvent {
    pub session_id: String,
    pub process_id: String,
    pub timestamp: u64,
}

/// The single tagged union carried over a workspace's publisher.
///
/// `turn_complete` is carried on the same stream as every other event so a
/// subscriber never needs a second channel to observe it, even though it is
/// produced by the interactive runner rather than the workspace tracker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WorkspaceEvent {
    GitStatus(GitStatusEvent),
    GitCommit(GitCommitEvent),
    GitReset(GitResetEvent),
    FileChange(FileChangeEvent),
    ProcessOutput(ProcessOutputEvent),
    ProcessStatus(ProcessStatusEvent),
    AgentState(AgentStateEvent),
    TurnComplete(TurnCompleteEvent),
}
