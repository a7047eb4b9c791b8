use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::interactive::error::InteractiveError;

/// A running PTY-backed child process.
///
/// Wraps `portable-pty`'s master/child handles, which already own the
/// Unix-vs-ConPTY split; this type layers the read/write/resize/wait
/// capability set plus the process-id and (on Unix) process-group bookkeeping
/// the rest of this crate needs for signal delivery.
pub struct PtyHandle {
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pub pid: i32,
    #[cfg(unix)]
    pub pgid: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

/// Everything needed to spawn a shell or command inside a PTY.
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub login: bool,
}

impl PtyHandle {
    pub fn spawn(spec: SpawnSpec, size: Size) -> Result<Self, InteractiveError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| InteractiveError::SpawnFailed(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        #[cfg(unix)]
        if spec.login {
            cmd.arg("-l");
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        if let Some(ref dir) = spec.cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| InteractiveError::SpawnFailed(format!("failed to spawn: {e}")))?;

        let pid = child
            .process_id()
            .map(|p| p as i32)
            .ok_or_else(|| InteractiveError::SpawnFailed("could not obtain child pid".into()))?;

        #[cfg(unix)]
        let pgid = pair.master.process_group_leader().unwrap_or(pid);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| InteractiveError::SpawnFailed(format!("failed to take writer: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| InteractiveError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        drop(pair.slave);

        Ok(Self {
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            reader: Mutex::new(Some(reader)),
            child: Mutex::new(child),
            pid,
            #[cfg(unix)]
            pgid,
        })
    }

    /// Takes the reader out for the dedicated OS reader thread; can only be
    /// taken once per handle.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().unwrap().take()
    }

    pub fn write_all(&self, data: &[u8]) -> Result<(), InteractiveError> {
        let mut w = self.writer.lock().unwrap();
        w.write_all(data)?;
        w.flush()?;
        Ok(())
    }

    pub fn resize(&self, size: Size) -> Result<(), InteractiveError> {
        self.master
            .lock()
            .unwrap()
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| InteractiveError::SpawnFailed(format!("resize failed: {e}")))?;
        Ok(())
    }

    /// Releases the master/writer file descriptors, which hangs up the PTY
    /// and causes the reader thread to observe EOF.
    pub fn hangup(&self) {
        // Dropping the boxed writer/master closes their underlying fds.
        // We cannot move out of a Mutex<Box<...>> easily without replacing
        // with a no-op sink, so we shrink the writer to an empty Vec sink and
        // let the master Drop at handle-drop time; the PTY slave side is
        // already gone (dropped at spawn time), so closing the master here
        // is what actually signals EOF to the child's stdin/stdout.
        let mut w = self.writer.lock().unwrap();
        *w = Box::new(std::io::sink());
    }

    /// Blocks the calling thread until the child exits. Intended to run on a
    /// dedicated blocking thread (`tokio::task::spawn_blocking`), never on an
    /// async task, since `portable_pty::Child::wait` is a blocking call.
    pub fn wait(&self) -> std::io::Result<WaitOutcome> {
        let mut child = self.child.lock().unwrap();
        let status = child.wait()?;
        Ok(WaitOutcome {
            success: status.success(),
            code: status.exit_code() as i32,
        })
    }

    #[cfg(unix)]
    pub fn signal_term(&self) {
        let r = unsafe { libc::kill(-self.pgid, libc::SIGTERM) };
        if r != 0 {
            log::warn!(
                "failed to SIGTERM pgid {}: {}",
                self.pgid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(unix)]
    pub fn signal_kill(&self) {
        let r = unsafe { libc::kill(-self.pgid, libc::SIGKILL) };
        if r != 0 {
            log::warn!(
                "failed to SIGKILL pgid {}: {}",
                self.pgid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(unix)]
    pub fn is_alive(&self) -> bool {
        unsafe { libc::kill(self.pid, 0) == 0 }
    }

    #[cfg(windows)]
    pub fn signal_term(&self) {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string(), "/T"])
            .output();
    }

    #[cfg(windows)]
    pub fn signal_kill(&self) {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &self.pid.to_string(), "/T", "/F"])
            .output();
    }
}

pub struct WaitOutcome {
    pub success: bool,
    pub code: i32,
}

/// Merges caller overrides into the current process environment, filtering
/// keys the environment-filtering policy excludes from child processes.
pub fn merged_env(overrides: &HashMap<String, String>) -> Vec<(String, String)> {
    crate::env_filter::build_child_env(overrides)
}
