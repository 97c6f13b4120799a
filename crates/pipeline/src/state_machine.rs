use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Capture opened and the worker launched.
    Start,
    /// Stop requested; the in-flight cycle is finishing.
    Stop,
    /// Worker joined and capture released.
    Finished,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cannot apply {event:?} while {from:?}")]
pub struct TransitionError {
    pub from: PipelineState,
    pub event: PipelineEvent,
}

/// Session lifecycle: `Idle -> Running -> Stopping -> Stopped`, and
/// `Stopped -> Running` for a new session.
#[derive(Debug)]
pub struct StateMachine {
    current_state: PipelineState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current_state: PipelineState::Idle,
        }
    }

    pub fn current_state(&self) -> PipelineState {
        self.current_state
    }

    /// The state `event` would lead to, without applying it.
    pub fn next(&self, event: PipelineEvent) -> Result<PipelineState, TransitionError> {
        use PipelineEvent::*;
        use PipelineState::*;

        match (self.current_state, event) {
            (Idle | Stopped, Start) => Ok(Running),
            (Running, Stop) => Ok(Stopping),
            (Stopping, Finished) => Ok(Stopped),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    pub fn apply(&mut self, event: PipelineEvent) -> Result<PipelineState, TransitionError> {
        let next = self.next(event)?;
        tracing::info!(from = ?self.current_state, to = ?next, "State transition");
        self.current_state = next;
        Ok(next)
    }
}
