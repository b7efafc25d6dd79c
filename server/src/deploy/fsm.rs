//! State machine for one deploy record

use crate::models::deployment::DeployStatusCode;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeployEvent {
    /// A step begins; re-enters `Started`
    Step(String),

    /// Every step completed
    Succeed,

    /// A step failed
    Fail(String),
}

/// Deploy FSM: `Queued -> Started* -> {Success, Failed}`.
///
/// `Started` may be entered any number of times as the pipeline advances. The
/// terminal state is entered once and never left.
#[derive(Debug, Clone)]
pub struct DeployFsm {
    state: DeployStatusCode,
    step: Option<String>,
    error: Option<String>,
}

impl DeployFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self::resume(DeployStatusCode::Queued)
    }

    /// Pick up a record at its persisted status
    pub fn resume(state: DeployStatusCode) -> Self {
        Self {
            state,
            step: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeployStatusCode {
        self.state
    }

    /// Message of the step in progress
    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeployEvent) -> Result<DeployStatusCode, String> {
        let new_state = match (self.state, &event) {
            (DeployStatusCode::Queued | DeployStatusCode::Started, DeployEvent::Step(msg)) => {
                self.step = Some(msg.clone());
                DeployStatusCode::Started
            }
            (DeployStatusCode::Started, DeployEvent::Succeed) => DeployStatusCode::Success,
            (DeployStatusCode::Queued | DeployStatusCode::Started, DeployEvent::Fail(err)) => {
                self.error = Some(err.clone());
                DeployStatusCode::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeployFsm {
    fn default() -> Self {
        Self::new()
    }
}
