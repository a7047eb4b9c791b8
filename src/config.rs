use std::time::Duration;

/// Tunables for the interactive PTY runner. No file-format loader is
/// provided — configuration loading lives outside this crate's scope — but
/// every tunable named in the component design has a field here with the
/// documented default, so an embedder can construct one without a config file.
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    /// How often the status tracker may run a detect cycle on a session.
    pub check_interval: Duration,
    /// How long a candidate agent-state must persist before being adopted.
    pub stability_window: Duration,
    /// Grace period between SIGTERM/close and SIGKILL escalation on `Stop`.
    pub stop_grace_period: Duration,
    /// Default terminal size used when no cached/requested size is available.
    pub default_cols: u16,
    pub default_rows: u16,
    /// Delay before writing `initial_command` to a freshly started PTY.
    pub initial_command_delay: Duration,
    /// Cap, in bytes, for a session's ring buffer.
    pub ring_buffer_cap_bytes: usize,
}

impl Default for InteractiveConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(100),
            stability_window: Duration::from_millis(0),
            stop_grace_period: Duration::from_secs(2),
            default_cols: 120,
            default_rows: 40,
            initial_command_delay: Duration::from_millis(100),
            ring_buffer_cap_bytes: crate::ring_buffer::DEFAULT_CAP_BYTES,
        }
    }
}

/// Tunables for the background command runner.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    pub stop_grace_period: Duration,
    pub ring_buffer_cap_bytes: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            stop_grace_period: Duration::from_secs(2),
            ring_buffer_cap_bytes: crate::ring_buffer::DEFAULT_CAP_BYTES,
        }
    }
}

/// Tunables for the workspace tracker.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// How often the VCS poller checks HEAD + status digest.
    pub git_poll_interval: Duration,
    /// Debounce window after a filesystem event before a refresh runs.
    pub fs_debounce: Duration,
    /// Directory names skipped entirely by the recursive watcher.
    pub ignore_list: Vec<String>,
    /// Capacity of each subscriber's event channel.
    pub subscriber_buffer: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            git_poll_interval: Duration::from_secs(3),
            fs_debounce: Duration::from_millis(300),
            ignore_list: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                ".next".to_string(),
                "dist".to_string(),
                "build".to_string(),
            ],
            subscriber_buffer: 100,
        }
    }
}
