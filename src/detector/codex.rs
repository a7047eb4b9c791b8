use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use super::Detector;
use crate::events::AgentStateKind;
use crate::vt::Snapshot;

static WORKING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[•◦]\s*.+\(?(\d+h\s+)?(\d+m\s+)?\d+s\s*[•·]\s*(esc|ctrl\+c)\s+to\s+interrupt")
        .unwrap()
});

static WAITING_INPUT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^─\s*Worked\s+for\s+.+─+$").unwrap());

static SELECTION_ARROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[›❯]\s*\d+\.").unwrap());

static CONFIRM_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(approve|allow|confirm|proceed)\?").unwrap());

const STABILITY_WINDOW: Duration = Duration::from_secs(1);

/// Detector for the Codex CLI's TUI.
///
/// Unlike `ClaudeCodeDetector`, this detector carries its own internal
/// stability timer: a transition *out of* `working` is rejected if it would
/// land within one second of the last time `working` was observed, since
/// Codex's spinner line can blink off for a single frame between status
/// updates.
///
/// The selection-arrow heuristic for `waiting_approval` is deliberately
/// permissive — a bare numbered list with no nearby confirm/cancel wording
/// still counts — matching the behavior this detector is designed to
/// reproduce even though it risks the occasional false positive.
pub struct CodexDetector {
    last_working: Mutex<Option<Instant>>,
}

impl Default for CodexDetector {
    fn default() -> Self {
        Self {
            last_working: Mutex::new(None),
        }
    }
}

impl Detector for CodexDetector {
    fn detect_state(&self, snapshot: &Snapshot) -> AgentStateKind {
        for line in snapshot.lines.iter().rev() {
            if WORKING_PATTERN.is_match(line) {
                *self.last_working.lock().unwrap() = Some(Instant::now());
                return AgentStateKind::Working;
            }
        }

        for line in snapshot.lines.iter().rev() {
            let trimmed = line.trim_end();
            if SELECTION_ARROW.is_match(trimmed) {
                return AgentStateKind::WaitingApproval;
            }
            if CONFIRM_PROMPT.is_match(trimmed) {
                return AgentStateKind::WaitingApproval;
            }
        }

        for line in snapshot.lines.iter().rev() {
            if WAITING_INPUT_PATTERN.is_match(line.trim_end()) {
                return AgentStateKind::WaitingInput;
            }
        }

        AgentStateKind::Unknown
    }

    fn should_accept_state_change(&self, old: AgentStateKind, new: AgentStateKind) -> bool {
        if old != AgentStateKind::Working || new == AgentStateKind::Working {
            return true;
        }
        match *self.last_working.lock().unwrap() {
            Some(t) => t.elapsed() >= STABILITY_WINDOW,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(lines: &[&str]) -> Snapshot {
        Snapshot {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            cells: vec![],
        }
    }

    #[test]
    fn detects_working_with_elapsed_timer() {
        let d = CodexDetector::default();
        let s = snap(&["• Thinking (1m 5s • esc to interrupt)"]);
        assert_eq!(d.detect_state(&s), AgentStateKind::Working);
    }

    #[test]
    fn detects_waiting_input_banner() {
        let d = CodexDetector::default();
        let s = snap(&["─ Worked for 12s ─────"]);
        assert_eq!(d.detect_state(&s), AgentStateKind::WaitingInput);
    }

    #[test]
    fn rejects_transition_out_of_working_within_stability_window() {
        let d = CodexDetector::default();
        let working = snap(&["• Thinking (5s • esc to interrupt)"]);
        assert_eq!(d.detect_state(&working), AgentStateKind::Working);
        assert!(!d.should_accept_state_change(AgentStateKind::Working, AgentStateKind::WaitingInput));
    }

    #[test]
    fn accepts_transition_after_stability_window_elapses() {
        let d = CodexDetector::default();
        *d.last_working.lock().unwrap() = Some(Instant::now() - Duration::from_secs(2));
        assert!(d.should_accept_state_change(AgentStateKind::Working, AgentStateKind::WaitingInput));
    }
}
