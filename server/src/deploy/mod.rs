//! Deploy pipeline
//!
//! One request at a time moves through a fixed list of steps. Every step
//! re-enters `Started` in the status store; the first failure ends the run.

pub mod executor;
pub mod fsm;
pub mod metadata;
pub mod pipeline;
pub mod publisher;
pub mod workspace;

use std::fmt;

/// A failed pipeline step: the status message plus the underlying error text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub message: String,
    pub detail: String,
}

impl StepFailure {
    pub fn new(message: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self {
            message: message.into(),
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.detail)
    }
}

impl std::error::Error for StepFailure {}
