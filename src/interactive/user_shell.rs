use serde::Serialize;

/// One entry in a session's user-shell registry. Created on first
/// list/create/register, bound to a process id on first attach, removed on
/// explicit stop.
#[derive(Debug, Clone, Serialize)]
pub struct UserShellEntry {
    pub terminal_id: String,
    pub process_id: Option<String>,
    pub label: String,
    pub initial_command: Option<String>,
    pub closable: bool,
    pub created_at_ms: u64,
}
