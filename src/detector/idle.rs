use super::Detector;
use crate::events::AgentStateKind;
use crate::vt::Snapshot;

/// Always-unknown detector used for sessions with no agent-specific pattern
/// set (plain user shells, or an agent kind this crate doesn't recognize).
/// Turn-complete for these sessions comes solely from the idle timer, not
/// from any adopted state transition.
#[derive(Default)]
pub struct IdleDetector;

impl Detector for IdleDetector {
    fn detect_state(&self, _snapshot: &Snapshot) -> AgentStateKind {
        AgentStateKind::Unknown
    }
}
