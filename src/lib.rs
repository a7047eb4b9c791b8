//! Workspace process-management core: interactive PTY sessions, background
//! commands, agent-state detection, and filesystem/VCS tracking for a single
//! workspace directory.
//!
//! [`Workbench`] wires the four subsystems to one shared [`Publisher`] so a
//! caller gets one ordered event stream regardless of which subsystem
//! produced an event.

pub mod background;
pub mod config;
pub mod detector;
pub mod env_filter;
pub mod events;
pub mod interactive;
pub mod pty;
pub mod publisher;
pub mod ring_buffer;
pub mod shell;
pub mod status_tracker;
pub mod vcs;
pub mod vt;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

use config::{BackgroundConfig, InteractiveConfig, WorkspaceConfig};
use publisher::Publisher;

pub use background::BackgroundRunner;
pub use interactive::InteractiveRunner;
pub use workspace::{WorkspaceError, WorkspaceTracker};

/// Tunables for all four subsystems, grouped for a single construction call.
#[derive(Debug, Clone, Default)]
pub struct WorkbenchConfig {
    pub interactive: InteractiveConfig,
    pub background: BackgroundConfig,
    pub workspace: WorkspaceConfig,
}

/// The full process-management surface for one workspace root: interactive
/// sessions, background commands, and filesystem/VCS tracking, all fanning
/// out onto one [`Publisher`].
///
/// This is a convenience wrapper; each subsystem is independently usable —
/// an embedder that only needs background commands can construct a
/// [`BackgroundRunner`] directly without a `Workbench` at all.
pub struct Workbench {
    pub publisher: Arc<Publisher>,
    pub interactive: InteractiveRunner,
    pub background: BackgroundRunner,
    pub tracker: WorkspaceTracker,
}

impl Workbench {
    pub fn new(root: impl Into<PathBuf>, config: WorkbenchConfig) -> Self {
        let publisher = Arc::new(Publisher::new(config.workspace.subscriber_buffer));
        let interactive = InteractiveRunner::new(publisher.clone(), config.interactive);
        let background = BackgroundRunner::new(publisher.clone(), config.background);
        let tracker = WorkspaceTracker::new(root, config.workspace, publisher.clone());

        Self {
            publisher,
            interactive,
            background,
            tracker,
        }
    }

    /// Starts the filesystem watcher and VCS poller. The interactive and
    /// background runners need no start step of their own — they come alive
    /// lazily on each session's/command's first `start()` call.
    pub fn start(&self) -> Result<(), WorkspaceError> {
        self.tracker.start()
    }

    pub async fn shutdown(&self) {
        self.tracker.shutdown();
        self.interactive.shutdown();
        self.background.stop_all().await;
    }
}
