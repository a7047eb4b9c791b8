use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::detector::Detector;
use crate::events::AgentStateKind;
use crate::vt::VirtualTerminal;

struct State {
    last_state: AgentStateKind,
    last_check: Instant,
    candidate: Option<(AgentStateKind, Instant)>,
}

/// Owns one virtual terminal plus one detector for a session, throttling
/// detect cycles to `check_interval` and optionally debouncing adoption of a
/// new state across `stability_window` before invoking the caller's
/// state-change callback.
///
/// The tracker's own lock is released before the callback runs — the
/// callback commonly re-enters the runner (to emit `turn_complete`, update a
/// record, or publish), and holding the lock across it would deadlock any
/// caller that tries to touch the tracker from inside the callback.
pub struct StatusTracker {
    vt: VirtualTerminal,
    detector: Box<dyn Detector>,
    check_interval: Duration,
    stability_window: Duration,
    state: Mutex<State>,
}

impl StatusTracker {
    pub fn new(
        cols: u16,
        rows: u16,
        detector: Box<dyn Detector>,
        check_interval: Duration,
        stability_window: Duration,
    ) -> Self {
        Self {
            vt: VirtualTerminal::new(cols, rows),
            detector,
            check_interval,
            stability_window,
            state: Mutex::new(State {
                last_state: AgentStateKind::Unknown,
                last_check: Instant::now() - check_interval,
                candidate: None,
            }),
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.vt.resize(cols, rows);
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.vt.feed(bytes);
    }

    /// Runs at most one detect cycle if `check_interval` has elapsed since
    /// the last one. Returns `Some(new_state)` exactly when a transition is
    /// adopted this call, having already released the internal lock before
    /// returning so the caller may safely invoke its state-change handler.
    pub fn maybe_detect(&self) -> Option<AgentStateKind> {
        let now = Instant::now();
        let candidate_state;
        let old_state;
        let adopted;

        {
            let mut state = self.state.lock().unwrap();
            if now.duration_since(state.last_check) < self.check_interval {
                return None;
            }
            state.last_check = now;

            let snapshot = self.vt.snapshot();
            let detected = self.detector.detect_state(&snapshot);
            old_state = state.last_state;

            if detected == old_state {
                state.candidate = None;
                return None;
            }

            if !self.detector.should_accept_state_change(old_state, detected) {
                return None;
            }

            if self.stability_window.is_zero() {
                state.last_state = detected;
                state.candidate = None;
                candidate_state = detected;
                adopted = true;
            } else {
                match state.candidate {
                    Some((pending, since)) if pending == detected => {
                        if now.duration_since(since) >= self.stability_window {
                            state.last_state = detected;
                            state.candidate = None;
                            candidate_state = detected;
                            adopted = true;
                        } else {
                            return None;
                        }
                    }
                    _ => {
                        state.candidate = Some((detected, now));
                        return None;
                    }
                }
            }
        }

        if adopted {
            Some(candidate_state)
        } else {
            None
        }
    }

    pub fn current_state(&self) -> AgentStateKind {
        self.state.lock().unwrap().last_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ClaudeCodeDetector;

    #[test]
    fn adopts_immediately_with_zero_stability_window() {
        let tracker = StatusTracker::new(
            80,
            24,
            Box::new(ClaudeCodeDetector),
            Duration::from_millis(0),
            Duration::from_millis(0),
        );
        tracker.feed(b"\x1b[2K\r\n\r\n\r\n\r\n");
        tracker.feed("• Working… (esc to interrupt)\r\n".as_bytes());
        let adopted = tracker.maybe_detect();
        assert_eq!(adopted, Some(crate::events::AgentStateKind::Working));
    }

    #[test]
    fn second_call_within_interval_is_throttled() {
        let tracker = StatusTracker::new(
            80,
            24,
            Box::new(ClaudeCodeDetector),
            Duration::from_secs(10),
            Duration::from_millis(0),
        );
        tracker.feed(b"• Working… (esc to interrupt)\r\n");
        assert!(tracker.maybe_detect().is_some());
        tracker.feed(b"more text");
        assert!(tracker.maybe_detect().is_none());
    }
}
