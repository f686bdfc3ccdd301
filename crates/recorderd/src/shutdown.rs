//! Cleanup of a session whose client went away without destroying it.
//!
//! The engine is walked down from wherever it is to destroyed using a fixed
//! step list. The state is read once; every step from the first matching one
//! onward runs, each best-effort. Session resources are released afterwards
//! whether or not the engine cooperated.

use recproto::RecorderState;
use tracing::{info, warn};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Commit,
    Unprepare,
    Destroy,
}

#[derive(Debug)]
pub struct Step {
    /// States this step applies to.
    pub from: &'static [RecorderState],
    pub action: StepAction,
}

pub const STEPS: &[Step] = &[
    Step {
        from: &[RecorderState::Recording, RecorderState::Paused],
        action: StepAction::Commit,
    },
    Step {
        from: &[RecorderState::Ready],
        action: StepAction::Unprepare,
    },
    Step {
        from: &[RecorderState::Created],
        action: StepAction::Destroy,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub initial: RecorderState,
    /// Each attempted step and whether the engine accepted it.
    pub steps: Vec<(StepAction, bool)>,
    /// False if the session had already been torn down.
    pub released: bool,
}

/// Index of the first step for `state`, if any.
pub fn first_step(state: RecorderState) -> Option<usize> {
    STEPS.iter().position(|s| s.from.contains(&state))
}

pub fn shutdown_session(session: &Session) -> ShutdownReport {
    let engine = session.engine();
    let initial = if session.is_torn_down() {
        RecorderState::None
    } else {
        engine.state().unwrap_or_else(|e| {
            warn!(
                "session {:#x}: state unreadable ({}), assuming created",
                session.handle(),
                e
            );
            RecorderState::Created
        })
    };

    let mut steps = Vec::new();
    if let Some(start) = first_step(initial) {
        for step in &STEPS[start..] {
            let result = match step.action {
                StepAction::Commit => engine.commit(),
                StepAction::Unprepare => engine.unprepare(),
                StepAction::Destroy => engine.destroy(),
            };
            if let Err(e) = &result {
                warn!(
                    "session {:#x}: {:?} during shutdown failed: {}",
                    session.handle(),
                    step.action,
                    e
                );
            }
            steps.push((step.action, result.is_ok()));
        }
    }

    let released = session.release_resources();
    info!(
        "session {:#x} shut down from {:?} ({} steps)",
        session.handle(),
        initial,
        steps.len()
    );

    ShutdownReport {
        initial,
        steps,
        released,
    }
}
