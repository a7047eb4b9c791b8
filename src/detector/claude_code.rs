use once_cell::sync::Lazy;
use regex::Regex;

use super::Detector;
use crate::events::AgentStateKind;
use crate::vt::Snapshot;

/// Approval prompts: anything asking the user to confirm a tool call. Scanned
/// bottom-up so a prompt anywhere in view outranks an earlier `working` line.
static APPROVAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)do you want to proceed\??").unwrap(),
        Regex::new(r"(?i)\byes\b.*\bno\b").unwrap(),
        Regex::new(r"❯\s*\d+\.\s").unwrap(),
    ]
});

/// `• Doing a thing… (esc to interrupt)` / `(ctrl+c to interrupt)`.
static WORKING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*[•◦●]\s+.+[…\.]{2,}\s*\((esc|ctrl\+c)\s+to\s+interrupt").unwrap()
});

/// `⎿ Tip: ...` / `⎿ Next: ...` / `⎿ Hint: ...` inside the box-drawn input region.
static WAITING_INPUT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"⎿\s*(Tip|Next|Hint):").unwrap());

static BOX_BORDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[─━]{3,}").unwrap());

/// Detector for the Claude Code CLI's TUI.
///
/// Precedence, scanned bottom-up over the visible lines: an approval prompt
/// anywhere in view wins outright; otherwise a `working` spinner line wins;
/// otherwise a tip/hint line inside the bordered input box means the agent is
/// waiting on free-form input. No stability window of its own — the status
/// tracker's configured `stability_window` governs debounce uniformly.
#[derive(Default)]
pub struct ClaudeCodeDetector;

impl Detector for ClaudeCodeDetector {
    fn detect_state(&self, snapshot: &Snapshot) -> AgentStateKind {
        for line in snapshot.lines.iter().rev() {
            if APPROVAL_PATTERNS.iter().any(|re| re.is_match(line)) {
                return AgentStateKind::WaitingApproval;
            }
        }

        for line in snapshot.lines.iter().rev() {
            if WORKING_PATTERN.is_match(line) {
                return AgentStateKind::Working;
            }
        }

        // Waiting-input must be inside the input-box region: a tip line
        // preceded (somewhere above, within the same box) by a border run.
        let mut in_box = false;
        for line in snapshot.lines.iter().rev() {
            if BOX_BORDER.is_match(line.trim()) {
                in_box = !in_box;
                continue;
            }
            if in_box && WAITING_INPUT_PATTERN.is_match(line) {
                return AgentStateKind::WaitingInput;
            }
        }

        AgentStateKind::Unknown
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
    fn detects_working_spinner() {
        let d = ClaudeCodeDetector;
        let s = snap(&["• Exploring the repo… (esc to interrupt)"]);
        assert_eq!(d.detect_state(&s), AgentStateKind::Working);
    }

    #[test]
    fn approval_overrides_earlier_working_line() {
        let d = ClaudeCodeDetector;
        let s = snap(&[
            "• Exploring the repo… (esc to interrupt)",
            "Do you want to proceed?",
        ]);
        assert_eq!(d.detect_state(&s), AgentStateKind::WaitingApproval);
    }

    #[test]
    fn waiting_input_inside_box() {
        let d = ClaudeCodeDetector;
        let s = snap(&["──────────", "⎿ Tip: try /help", "──────────"]);
        assert_eq!(d.detect_state(&s), AgentStateKind::WaitingInput);
    }

    #[test]
    fn blank_screen_is_unknown() {
        let d = ClaudeCodeDetector;
        let s = snap(&["", "", ""]);
        assert_eq!(d.detect_state(&s), AgentStateKind::Unknown);
    }
}
