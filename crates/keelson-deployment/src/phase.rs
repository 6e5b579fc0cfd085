//! Strategy phases and phase logging

use std::fmt;
use tracing::{info, warn};

/// Step of the update state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    ApplyPre,
    Transition,
    VerifyHealth,
    Switch,
    ApplyPost,
    Finalize,
    Done,
    Fail,
    Rollback,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::ApplyPre => "apply-pre",
            Phase::Transition => "transition",
            Phase::VerifyHealth => "verify-health",
            Phase::Switch => "switch",
            Phase::ApplyPost => "apply-post",
            Phase::Finalize => "finalize",
            Phase::Done => "done",
            Phase::Fail => "fail",
            Phase::Rollback => "rollback",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log `[<service>] <phase>: <outcome>`
pub fn log_phase(service: &str, phase: Phase, outcome: impl fmt::Display) {
    info!(
        service,
        phase = phase.as_str(),
        outcome = %outcome,
        "[{}] {}: {}",
        service,
        phase,
        outcome
    );
}

/// Like [`log_phase`], at warn level
pub fn warn_phase(service: &str, phase: Phase, outcome: impl fmt::Display) {
    warn!(
        service,
        phase = phase.as_str(),
        outcome = %outcome,
        "[{}] {}: {}",
        service,
        phase,
        outcome
    );
}
