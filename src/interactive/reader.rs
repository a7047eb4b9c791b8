use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;

use crate::events::{
    AgentStateEvent, ProcessKind, ProcessOutputEvent, ProcessStatusEvent, StreamKind,
    TurnCompleteEvent, WorkspaceEvent,
};
use crate::pty::PtyHandle;
use crate::publisher::Publisher;
use crate::ring_buffer::OutputStream;

use super::record::ProcessRecord;

const READ_CHUNK: usize = 32 * 1024;
const PROMPT_WINDOW: usize = 1024;

/// Spawns the dedicated OS thread that blocks on PTY reads, feeding a bounded
/// channel drained by the async reader-loop task below. Blocking I/O never
/// runs on a tokio worker thread.
fn spawn_reader_thread(pty: Arc<PtyHandle>, process_id: String) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
    let mut reader = match pty.take_reader() {
        Some(r) => r,
        None => return rx,
    };

    let builder = std::thread::Builder::new().name(format!("pty-reader-{process_id}"));
    let spawned = builder.spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    #[cfg(unix)]
                    {
                        let raw = e.raw_os_error().unwrap_or(0);
                        if raw == libc::EAGAIN || raw == libc::EINTR {
                            continue;
                        }
                    }
                    log::debug!("pty reader {process_id} error: {e}");
                    break;
                }
            }
        }
        log::debug!("pty reader {process_id} exited");
    });
    if let Err(e) = spawned {
        log::warn!("failed to spawn pty reader thread: {e}");
    }
    rx
}

fn is_dsr_query(window: &[u8]) -> bool {
    window.windows(4).any(|w| w == b"\x1b[6n") || window.windows(5).any(|w| w == b"\x1b[?6n")
}

fn is_da1_query(window: &[u8]) -> bool {
    // ESC [ c  or ESC [ 0 c ; strictly NOT ESC [ 1..9 c (cursor-forward).
    window.windows(3).any(|w| w == b"\x1b[c") || window.windows(4).any(|w| w == b"\x1b[0c")
}

/// Runs the async reader loop for one record until EOF or `stop_signal`.
/// Ownership: the only task permitted to touch `record.ring_buffer`,
/// `record.status_tracker`, `record.direct_output`, and the idle timer.
pub(crate) async fn run_reader_loop(
    record: Arc<ProcessRecord>,
    pty: Arc<PtyHandle>,
    publisher: Arc<Publisher>,
) {
    let mut rx = spawn_reader_thread(pty.clone(), record.process_id.clone());

    let mut prompt_window: Vec<u8> = Vec::with_capacity(PROMPT_WINDOW * 2);
    let idle_timeout = Duration::from_millis(record.idle_timeout_ms);
    let idle_enabled = idle_timeout > Duration::ZERO && !record.disable_turn_detection;
    let idle_deadline: AsyncMutex<Option<Instant>> =
        AsyncMutex::new(if idle_enabled { Some(Instant::now() + idle_timeout) } else { None });

    loop {
        let sleep_fut = async {
            if idle_enabled {
                let deadline = *idle_deadline.lock().await;
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            } else {
                std::future::pending::<()>().await
            }
        };

        tokio::select! {
            biased;
            _ = record.stop_signal.notified() => {
                break;
            }
            data = rx.recv() => {
                match data {
                    None => break,
                    Some(bytes) => {
                        if idle_enabled {
                            *idle_deadline.lock().await = Some(Instant::now() + idle_timeout);
                        }

                        let has_direct_sink = record.direct_output.read().unwrap().is_some();

                        if !has_direct_sink {
                            if is_dsr_query(&bytes) {
                                let _ = pty.write_all(b"\x1b[1;1R");
                            } else if is_da1_query(&bytes) {
                                let _ = pty.write_all(b"\x1b[?1;2c");
                            }
                        }

                        if let Some(tracker) = record.status_tracker.read().unwrap().clone() {
                            tracker.feed(&bytes);
                            if let Some(new_state) = tracker.maybe_detect() {
                                publisher.publish(WorkspaceEvent::AgentState(AgentStateEvent {
                                    session_id: record.session_id.clone(),
                                    state: new_state,
                                }));
                                if new_state == crate::events::AgentStateKind::WaitingInput {
                                    publisher.publish(WorkspaceEvent::TurnComplete(TurnCompleteEvent {
                                        session_id: record.session_id.clone(),
                                        process_id: record.process_id.clone(),
                                        timestamp: crate::events::now_ms(),
                                    }));
                                }
                            }
                        }

                        record.ring_buffer.append(OutputStream::Stdout, bytes.clone());

                        if let Some(sink) = record.direct_output.read().unwrap().clone() {
                            sink.write(&bytes);
                        } else {
                            publisher.publish(WorkspaceEvent::ProcessOutput(ProcessOutputEvent {
                                session_id: record.session_id.clone(),
                                process_id: record.process_id.clone(),
                                kind: ProcessKind::Interactive,
                                stream: StreamKind::Stdout,
                                data: bytes.clone(),
                                timestamp: crate::events::now_ms(),
                            }));
                        }

                        if let Some(ref re) = record.prompt_pattern {
                            prompt_window.extend_from_slice(&bytes);
                            if prompt_window.len() > PROMPT_WINDOW {
                                let start = prompt_window.len() - PROMPT_WINDOW;
                                prompt_window.drain(0..start);
                            }
                            if let Ok(text) = std::str::from_utf8(&prompt_window) {
                                if re.is_match(text) {
                                    publisher.publish(WorkspaceEvent::TurnComplete(TurnCompleteEvent {
                                        session_id: record.session_id.clone(),
                                        process_id: record.process_id.clone(),
                                        timestamp: crate::events::now_ms(),
                                    }));
                                    prompt_window.clear();
                                }
                            }
                        }
                    }
                }
            }
            _ = sleep_fut => {
                publisher.publish(WorkspaceEvent::TurnComplete(TurnCompleteEvent {
                    session_id: record.session_id.clone(),
                    process_id: record.process_id.clone(),
                    timestamp: crate::events::now_ms(),
                }));
                *idle_deadline.lock().await = Some(Instant::now() + idle_timeout);
            }
        }
    }

    log::debug!("reader loop for {} exited", record.process_id);
}

/// Blocks on the platform wait routine off the async runtime, derives the
/// record's terminal status, and publishes it only after the reader loop has
/// finished enqueuing every prior output chunk (guaranteed by awaiting the
/// reader task's join handle before publishing here).
pub(crate) async fn run_lifecycle_waiter(
    record: Arc<ProcessRecord>,
    pty: Arc<PtyHandle>,
    publisher: Arc<Publisher>,
    reader_task: tokio::task::JoinHandle<()>,
) {
    let wait_pty = pty.clone();
    let outcome = tokio::task::spawn_blocking(move || wait_pty.wait()).await;

    let _ = reader_task.await;

    let status = match &outcome {
        Ok(Ok(o)) if o.success => crate::interactive::record::ProcessStatus::Exited,
        _ => crate::interactive::record::ProcessStatus::Failed,
    };
    let exit_code = match &outcome {
        Ok(Ok(o)) => Some(o.code),
        _ => None,
    };

    if matches!(status, crate::interactive::record::ProcessStatus::Failed) {
        let tail = record.ring_buffer.tail(4096);
        log::warn!(
            "process {} failed; tail: {}",
            record.process_id,
            String::from_utf8_lossy(&tail)
        );
    }

    *record.status.write().unwrap() = status;
    *record.exit_code.write().unwrap() = exit_code;
    record.touch();
    *record.pty.write().unwrap() = None;

    publisher.publish(WorkspaceEvent::ProcessStatus(ProcessStatusEvent {
        session_id: record.session_id.clone(),
        process_id: record.process_id.clone(),
        kind: ProcessKind::Interactive,
        command: record.command.clone(),
        working_dir: record.working_dir.clone(),
        status,
        exit_code,
        timestamp: crate::events::now_ms(),
    }));

    record.signal_wait_done_once();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_device_status_report_query() {
        assert!(is_dsr_query(b"\x1b[6n"));
        assert!(is_dsr_query(b"\x1b[?6n"));
        assert!(is_dsr_query(b"prefix \x1b[6n suffix"));
        assert!(!is_dsr_query(b"\x1b[2J"));
    }

    #[test]
    fn detects_primary_device_attributes_query_but_not_cursor_forward() {
        assert!(is_da1_query(b"\x1b[c"));
        assert!(is_da1_query(b"\x1b[0c"));
        assert!(!is_da1_query(b"\x1b[1c"));
        assert!(!is_da1_query(b"\x1b[5c"));
    }
}
